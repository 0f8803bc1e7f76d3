//! Base types and traits for network usage statistics
//!
//! Defines the capability interfaces the rest of the crate uses to reach the
//! operating system's usage accounting and package database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes in one megabyte
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// UIDs at or below this value belong to the OS and system services
pub const FIRST_APPLICATION_UID: u32 = 10_000;

/// Converts a byte count into megabytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Network medium that carried the traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Wi-Fi
    Wifi,
    /// Mobile / cellular
    Mobile,
}

impl Transport {
    /// All transports, in query order
    pub const ALL: [Transport; 2] = [Transport::Wifi, Transport::Mobile];

    /// Returns a short lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Wifi => "wifi",
            Transport::Mobile => "mobile",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open query window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsageWindow {
    /// Creates a window from explicit bounds
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Creates a window covering the last `hours` hours before `end`
    ///
    /// A span reaching past the earliest representable instant starts there.
    pub fn last_hours(end: DateTime<Utc>, hours: i64) -> Self {
        Self::ending_at(end, Duration::try_hours(hours))
    }

    /// Creates a window covering the last `minutes` minutes before `end`
    pub fn last_minutes(end: DateTime<Utc>, minutes: i64) -> Self {
        Self::ending_at(end, Duration::try_minutes(minutes))
    }

    fn ending_at(end: DateTime<Utc>, span: Option<Duration>) -> Self {
        let start = span
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, end)
    }

    /// Returns true if `instant` falls inside the window
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// One accounting record returned by a stats source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBucket {
    /// Application identity the bytes are attributed to
    pub uid: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl UsageBucket {
    /// Creates a bucket
    pub fn new(uid: u32, start: DateTime<Utc>, end: DateTime<Utc>, rx: u64, tx: u64) -> Self {
        Self {
            uid,
            start,
            end,
            rx_bytes: rx,
            tx_bytes: tx,
        }
    }

    /// Received plus transmitted bytes
    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }
}

/// Result of polling one transport over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    pub transport: Transport,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_bytes: u64,
}

impl UsageSample {
    /// Creates an empty sample for a window
    pub fn empty(transport: Transport, window: UsageWindow) -> Self {
        Self {
            transport,
            window_start: window.start,
            window_end: window.end,
            total_bytes: 0,
        }
    }

    /// Total in megabytes
    pub fn megabytes(&self) -> f64 {
        bytes_to_mb(self.total_bytes)
    }
}

/// Errors that can occur when querying usage statistics
#[derive(Debug, Error)]
pub enum StatsError {
    /// The process is not allowed to read usage statistics
    #[error("Usage statistics permission denied")]
    PermissionDenied,

    /// The platform query failed
    #[error("Usage query failed: {0}")]
    QueryFailed(String),

    /// Reading a statistics file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Access to the operating system's per-UID network accounting
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkStatsSource: Send + Sync {
    /// Returns the identifier of this source (for logging)
    fn id(&self) -> &'static str;

    /// Returns whether usage statistics may be read
    fn has_usage_permission(&self) -> bool;

    /// Returns every bucket recorded for `transport` whose start lies in `window`
    async fn query_summary(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>, StatsError>;
}

/// Lookup of installed packages by UID
#[cfg_attr(test, mockall::automock)]
pub trait PackageResolver: Send + Sync {
    /// Package names sharing `uid`, first one is the primary package
    fn packages_for_uid(&self, uid: u32) -> Vec<String>;

    /// Human-readable label of a package
    fn app_label(&self, package: &str) -> Result<String, StatsError>;

    /// Whether the package has an icon the UI can request
    fn has_icon(&self, _package: &str) -> bool {
        false
    }
}
