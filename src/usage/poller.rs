//! Device-level usage polling
//!
//! Sums received and transmitted bytes reported by the stats source for a
//! window and transport. Failures are logged and reported as zero usage.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveTime, TimeZone, Timelike, Utc};

use super::state::UsageState;
use crate::stats::{
    bytes_to_mb, NetworkStatsSource, StatsError, Transport, UsageSample, UsageWindow,
};

/// Default length of the "current" window
pub const DEFAULT_CURRENT_WINDOW_MINUTES: i64 = 180;

/// Returns the window from local midnight of `now`'s day up to `now`
pub fn today_window<Tz: TimeZone>(now: DateTime<Tz>) -> UsageWindow {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let start = match midnight.and_local_timezone(now.timezone()) {
        LocalResult::Single(start) => start.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Midnight skipped by a DST change
        LocalResult::None => {
            now.with_timezone(&Utc) - Duration::seconds(i64::from(now.num_seconds_from_midnight()))
        }
    };
    UsageWindow::new(start, now.with_timezone(&Utc))
}

/// Polls the stats source and caches the latest totals
pub struct UsagePoller {
    source: Arc<dyn NetworkStatsSource>,
    state: Arc<UsageState>,
    transports: Vec<Transport>,
    current_window_minutes: i64,
}

impl UsagePoller {
    /// Creates a poller summing every transport
    pub fn new(source: Arc<dyn NetworkStatsSource>, state: Arc<UsageState>) -> Self {
        Self {
            source,
            state,
            transports: Transport::ALL.to_vec(),
            current_window_minutes: DEFAULT_CURRENT_WINDOW_MINUTES,
        }
    }

    /// Sets which transports make up the device totals
    pub fn with_transports(mut self, transports: Vec<Transport>) -> Self {
        self.transports = transports;
        self
    }

    /// Sets the length of the "current" window
    pub fn with_current_window_minutes(mut self, minutes: i64) -> Self {
        self.current_window_minutes = minutes;
        self
    }

    /// The state this poller writes to
    pub fn state(&self) -> &Arc<UsageState> {
        &self.state
    }

    /// The "current" window ending at `now`
    pub fn current_window(&self, now: DateTime<Utc>) -> UsageWindow {
        UsageWindow::last_minutes(now, self.current_window_minutes)
    }

    /// Queries one transport over one window
    pub async fn try_poll(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Result<UsageSample, StatsError> {
        if !self.source.has_usage_permission() {
            return Err(StatsError::PermissionDenied);
        }

        let buckets = self.source.query_summary(transport, window).await?;
        let total_bytes = buckets
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.total_bytes()));

        Ok(UsageSample {
            transport,
            window_start: window.start,
            window_end: window.end,
            total_bytes,
        })
    }

    /// Queries one transport, returning an empty sample on failure
    pub async fn poll(&self, transport: Transport, window: UsageWindow) -> UsageSample {
        match self.try_poll(transport, window).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::error!(
                    "Failed to query {} usage from {}: {}",
                    transport,
                    self.source.id(),
                    e
                );
                UsageSample::empty(transport, window)
            }
        }
    }

    /// Sums the tracked transports over `window`
    async fn total_mb(&self, window: UsageWindow) -> Result<f64, StatsError> {
        let mut total_bytes = 0u64;
        for transport in &self.transports {
            let sample = self.try_poll(*transport, window).await?;
            total_bytes = total_bytes.saturating_add(sample.total_bytes);
        }
        Ok(bytes_to_mb(total_bytes))
    }

    /// Usage in the "current" window, in megabytes
    pub async fn current_usage_mb(&self) -> f64 {
        let window = self.current_window(Utc::now());
        match self.total_mb(window).await {
            Ok(mb) => {
                self.state.set_current(mb).await;
                mb
            }
            Err(e) => {
                tracing::error!("Failed to get current data usage: {}", e);
                0.0
            }
        }
    }

    /// Usage since local midnight, in megabytes
    pub async fn today_usage_mb(&self) -> f64 {
        let window = today_window(Local::now());
        match self.total_mb(window).await {
            Ok(mb) => {
                self.state.set_today(mb).await;
                mb
            }
            Err(e) => {
                tracing::error!("Failed to get today's data usage: {}", e);
                0.0
            }
        }
    }
}
