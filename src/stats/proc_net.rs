//! Linux stats source built on `/proc/net/dev`
//!
//! The kernel only exposes cumulative per-interface counters, so every query
//! samples them and records the delta since the previous sample as a
//! device-wide bucket. Interfaces are mapped to transports by name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::base::{NetworkStatsSource, StatsError, Transport, UsageBucket, UsageWindow};
use super::memory::MemoryStatsSource;

/// Default location of the interface counter table
pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// UID that device-wide buckets are attributed to
pub const DEVICE_UID: u32 = 0;

/// How long a permission denial is reported before the file is tried again
const PERMISSION_RECHECK_SECS: i64 = 60;

/// Raw counters of one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Maps an interface name to the transport it carries, if any
pub fn classify_interface(name: &str) -> Option<Transport> {
    const WIFI: [&str; 3] = ["wlan", "wl", "wifi"];
    const MOBILE: [&str; 4] = ["rmnet", "wwan", "ccmni", "ppp"];

    if MOBILE.iter().any(|p| name.starts_with(p)) {
        Some(Transport::Mobile)
    } else if WIFI.iter().any(|p| name.starts_with(p)) {
        Some(Transport::Wifi)
    } else {
        None
    }
}

/// Parses the contents of `/proc/net/dev`
pub fn parse_proc_net_dev(content: &str) -> Result<HashMap<String, InterfaceCounters>, StatsError> {
    let mut counters = HashMap::new();

    for line in content.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(StatsError::QueryFailed(format!(
                "Malformed interface line: {}",
                line.trim()
            )));
        }

        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|e| StatsError::QueryFailed(format!("Bad counter '{}': {}", s, e)))
        };

        counters.insert(
            name.trim().to_string(),
            InterfaceCounters {
                rx_bytes: parse(fields[0])?,
                tx_bytes: parse(fields[8])?,
            },
        );
    }

    Ok(counters)
}

/// Difference between two readings of a monotonic counter.
/// A smaller current value means the counter was reset.
fn counter_delta(previous: u64, current: u64) -> u64 {
    if current >= previous {
        current - previous
    } else {
        current
    }
}

struct Baseline {
    at: DateTime<Utc>,
    counters: HashMap<String, InterfaceCounters>,
}

/// Stats source sampling Linux interface counters
pub struct ProcNetDevSource {
    path: PathBuf,
    retention: Duration,
    log: MemoryStatsSource,
    /// Held from the file read until the delta is recorded
    baseline: Mutex<Option<Baseline>>,
    denied_at: StdMutex<Option<DateTime<Utc>>>,
}

impl ProcNetDevSource {
    /// Creates a source reading the default `/proc/net/dev`
    pub fn new() -> Self {
        Self::with_path(PROC_NET_DEV)
    }

    /// Creates a source reading a custom counter file
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            retention: Duration::hours(48),
            log: MemoryStatsSource::new(),
            baseline: Mutex::new(None),
            denied_at: StdMutex::new(None),
        }
    }

    /// Sets how long recorded deltas are kept
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Reads the counters and records deltas since the previous sample
    pub async fn sample(&self) -> Result<(), StatsError> {
        let mut baseline = self.baseline.lock().await;
        let content = tokio::fs::read_to_string(&self.path).await?;
        let counters = parse_proc_net_dev(&content)?;
        self.record_counters(&mut baseline, Utc::now(), counters);
        Ok(())
    }

    fn record_counters(
        &self,
        baseline: &mut Option<Baseline>,
        now: DateTime<Utc>,
        counters: HashMap<String, InterfaceCounters>,
    ) {
        if let Some(current) = baseline.as_ref() {
            if now < current.at {
                tracing::debug!(
                    "Ignoring interface sample taken before the baseline ({} < {})",
                    now,
                    current.at
                );
                return;
            }
        }

        let previous = baseline.replace(Baseline {
            at: now,
            counters: counters.clone(),
        });
        let Some(previous) = previous else {
            tracing::debug!("Recorded first interface baseline from {}", self.path.display());
            return;
        };

        let mut totals: HashMap<Transport, InterfaceCounters> = HashMap::new();
        for (name, current) in &counters {
            let Some(transport) = classify_interface(name) else {
                continue;
            };
            let before = previous.counters.get(name).copied().unwrap_or_default();
            let total = totals.entry(transport).or_default();
            total.rx_bytes += counter_delta(before.rx_bytes, current.rx_bytes);
            total.tx_bytes += counter_delta(before.tx_bytes, current.tx_bytes);
        }

        for (transport, delta) in totals {
            if delta.rx_bytes == 0 && delta.tx_bytes == 0 {
                continue;
            }
            self.log.record(
                transport,
                UsageBucket::new(DEVICE_UID, previous.at, now, delta.rx_bytes, delta.tx_bytes),
            );
        }

        self.log.prune_before(now - self.retention);
    }

    fn set_denied_at(&self, at: Option<DateTime<Utc>>) {
        *self.denied_at.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Default for ProcNetDevSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkStatsSource for ProcNetDevSource {
    fn id(&self) -> &'static str {
        "proc-net-dev"
    }

    fn has_usage_permission(&self) -> bool {
        match *self.denied_at.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(at) => Utc::now() - at >= Duration::seconds(PERMISSION_RECHECK_SECS),
            None => true,
        }
    }

    async fn query_summary(
        &self,
        transport: Transport,
        window: UsageWindow,
    ) -> Result<Vec<UsageBucket>, StatsError> {
        match self.sample().await {
            Ok(()) => {
                self.set_denied_at(None);
                Ok(self.log.buckets_in(transport, window))
            }
            Err(StatsError::Io(io)) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("No read access to {}", self.path.display());
                self.set_denied_at(Some(Utc::now()));
                Err(StatsError::PermissionDenied)
            }
            Err(e) => Err(e),
        }
    }
}
