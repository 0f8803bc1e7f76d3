//! Per-application usage aggregation
//!
//! Accumulates bytes per UID for each transport, resolves UIDs to packages and
//! merges the Wi-Fi and mobile lists into one record per package.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::stats::{
    bytes_to_mb, NetworkStatsSource, PackageResolver, StatsError, Transport, UsageWindow,
    FIRST_APPLICATION_UID,
};

/// Time range used when the caller does not give one
pub const DEFAULT_TIME_RANGE_HOURS: i64 = 24;

/// Usage of one application on one transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppTransportUsage {
    pub package_name: String,
    pub app_name: String,
    #[serde(rename = "usageMB")]
    pub usage_mb: f64,
    pub has_icon: bool,
}

/// Combined Wi-Fi and mobile usage of one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsageRecord {
    pub package_name: String,
    pub app_name: String,
    #[serde(rename = "wifiUsageMB")]
    pub wifi_usage_mb: f64,
    #[serde(rename = "mobileUsageMB")]
    pub mobile_usage_mb: f64,
    #[serde(rename = "totalUsageMB")]
    pub total_usage_mb: f64,
}

impl AppUsageRecord {
    fn new(package_name: String, app_name: String) -> Self {
        Self {
            package_name,
            app_name,
            wifi_usage_mb: 0.0,
            mobile_usage_mb: 0.0,
            total_usage_mb: 0.0,
        }
    }

    fn add(&mut self, transport: Transport, mb: f64) {
        match transport {
            Transport::Wifi => self.wifi_usage_mb += mb,
            Transport::Mobile => self.mobile_usage_mb += mb,
        }
        self.total_usage_mb = self.wifi_usage_mb + self.mobile_usage_mb;
    }
}

/// Builds per-application usage lists on demand
pub struct AppUsageAggregator {
    source: Arc<dyn NetworkStatsSource>,
    resolver: Arc<dyn PackageResolver>,
}

impl AppUsageAggregator {
    pub fn new(source: Arc<dyn NetworkStatsSource>, resolver: Arc<dyn PackageResolver>) -> Self {
        Self { source, resolver }
    }

    /// Per-app Wi-Fi usage over the last `hours` hours
    pub async fn wifi_usage(&self, hours: i64) -> Vec<AppTransportUsage> {
        self.transport_usage(Transport::Wifi, UsageWindow::last_hours(Utc::now(), hours))
            .await
    }

    /// Per-app mobile usage over the last `hours` hours
    pub async fn mobile_usage(&self, hours: i64) -> Vec<AppTransportUsage> {
        self.transport_usage(Transport::Mobile, UsageWindow::last_hours(Utc::now(), hours))
            .await
    }

    /// Combined per-app usage over the last `hours` hours
    pub async fn all_usage(&self, hours: i64) -> Vec<AppUsageRecord> {
        self.all_usage_in(UsageWindow::last_hours(Utc::now(), hours))
            .await
    }

    /// Combined per-app usage over `window`
    pub async fn all_usage_in(&self, window: UsageWindow) -> Vec<AppUsageRecord> {
        let mut merged: HashMap<String, AppUsageRecord> = HashMap::new();

        for transport in Transport::ALL {
            for app in self.transport_usage(transport, window).await {
                merged
                    .entry(app.package_name.clone())
                    .or_insert_with(|| AppUsageRecord::new(app.package_name, app.app_name))
                    .add(transport, app.usage_mb);
            }
        }

        merged.into_values().collect()
    }

    /// Per-app usage for one transport over `window`
    ///
    /// Returns an empty list when usage statistics are unavailable.
    pub async fn transport_usage(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Vec<AppTransportUsage> {
        match self.try_transport_usage(transport, window).await {
            Ok(apps) => apps,
            Err(e) => {
                tracing::error!("Failed to get per-app {} usage: {}", transport, e);
                Vec::new()
            }
        }
    }

    async fn try_transport_usage(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Result<Vec<AppTransportUsage>, StatsError> {
        if !self.source.has_usage_permission() {
            return Err(StatsError::PermissionDenied);
        }

        let mut by_uid: HashMap<u32, u64> = HashMap::new();
        for bucket in self.source.query_summary(transport, window).await? {
            let total = by_uid.entry(bucket.uid).or_insert(0);
            *total = total.saturating_add(bucket.total_bytes());
        }

        let mut apps = Vec::with_capacity(by_uid.len());
        for (uid, bytes) in by_uid {
            if uid <= FIRST_APPLICATION_UID {
                continue;
            }
            match self.resolve(uid) {
                Ok(Some((package_name, app_name))) => {
                    let has_icon = self.resolver.has_icon(&package_name);
                    apps.push(AppTransportUsage {
                        package_name,
                        app_name,
                        usage_mb: bytes_to_mb(bytes),
                        has_icon,
                    });
                }
                Ok(None) => {
                    tracing::trace!("No package for uid {}", uid);
                }
                Err(e) => {
                    tracing::warn!("Failed to resolve app info for uid {}: {}", uid, e);
                }
            }
        }

        Ok(apps)
    }

    fn resolve(&self, uid: u32) -> Result<Option<(String, String)>, StatsError> {
        let Some(package) = self.resolver.packages_for_uid(uid).into_iter().next() else {
            return Ok(None);
        };
        let label = self.resolver.app_label(&package)?;
        Ok(Some((package, label)))
    }
}
