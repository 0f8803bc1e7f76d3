//! In-memory stats source and package table
//!
//! Hosts that receive accounting data from elsewhere push buckets here; the
//! Linux source also uses it as its bucket log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::base::{
    NetworkStatsSource, PackageResolver, StatsError, Transport, UsageBucket, UsageWindow,
};

/// Stats source backed by a list of recorded buckets
pub struct MemoryStatsSource {
    buckets: RwLock<Vec<(Transport, UsageBucket)>>,
    permitted: AtomicBool,
}

impl MemoryStatsSource {
    /// Creates an empty source with permission granted
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(Vec::new()),
            permitted: AtomicBool::new(true),
        }
    }

    /// Records a bucket for a transport
    pub fn record(&self, transport: Transport, bucket: UsageBucket) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.push((transport, bucket));
        }
    }

    /// Grants or revokes usage permission
    pub fn set_permitted(&self, permitted: bool) {
        self.permitted.store(permitted, Ordering::SeqCst);
    }

    /// Drops buckets that started before `cutoff`
    pub fn prune_before(&self, cutoff: DateTime<Utc>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.retain(|(_, b)| b.start >= cutoff);
        }
    }

    /// Number of recorded buckets
    pub fn len(&self) -> usize {
        self.buckets.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buckets for `transport` starting inside `window`
    pub fn buckets_in(&self, transport: Transport, window: UsageWindow) -> Vec<UsageBucket> {
        self.buckets
            .read()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter(|(t, b)| *t == transport && window.contains(b.start))
                    .map(|(_, b)| b.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkStatsSource for MemoryStatsSource {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn has_usage_permission(&self) -> bool {
        self.permitted.load(Ordering::SeqCst)
    }

    async fn query_summary(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>, StatsError> {
        if !self.has_usage_permission() {
            return Err(StatsError::PermissionDenied);
        }
        Ok(self.buckets_in(transport, window))
    }
}

/// Package entry in a [`StaticPackageResolver`]
#[derive(Debug, Clone)]
struct PackageEntry {
    package: String,
    label: String,
    has_icon: bool,
}

/// Package resolver backed by a fixed UID table
#[derive(Debug, Clone, Default)]
pub struct StaticPackageResolver {
    by_uid: HashMap<u32, Vec<PackageEntry>>,
}

impl StaticPackageResolver {
    /// Creates an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a package for a UID
    pub fn with_package(
        mut self,
        uid: u32,
        package: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.by_uid.entry(uid).or_default().push(PackageEntry {
            package: package.into(),
            label: label.into(),
            has_icon: true,
        });
        self
    }

    fn entry(&self, package: &str) -> Option<&PackageEntry> {
        self.by_uid
            .values()
            .flatten()
            .find(|entry| entry.package == package)
    }
}

impl PackageResolver for StaticPackageResolver {
    fn packages_for_uid(&self, uid: u32) -> Vec<String> {
        self.by_uid
            .get(&uid)
            .map(|entries| entries.iter().map(|e| e.package.clone()).collect())
            .unwrap_or_default()
    }

    fn app_label(&self, package: &str) -> Result<String, StatsError> {
        self.entry(package)
            .map(|e| e.label.clone())
            .ok_or_else(|| StatsError::QueryFailed(format!("Unknown package: {}", package)))
    }

    fn has_icon(&self, package: &str) -> bool {
        self.entry(package).map_or(false, |e| e.has_icon)
    }
}
