//! Last-known usage values shared by the monitor, the data stream and the channels

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;

/// Snapshot of the most recent successful polls
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReading {
    /// Megabytes used in the "current" window
    pub current_mb: f64,
    /// Megabytes used since local midnight
    pub today_mb: f64,
    /// Milliseconds since the epoch of the last update
    pub timestamp_ms: i64,
}

/// Owned holder of the last usage reading
#[derive(Debug)]
pub struct UsageState {
    reading: RwLock<UsageReading>,
}

impl UsageState {
    /// Creates a state with zero usage stamped with the current time
    pub fn new() -> Self {
        Self {
            reading: RwLock::new(UsageReading {
                current_mb: 0.0,
                today_mb: 0.0,
                timestamp_ms: Utc::now().timestamp_millis(),
            }),
        }
    }

    /// Returns the last reading
    pub async fn reading(&self) -> UsageReading {
        *self.reading.read().await
    }

    /// Stores a new "current" value
    pub async fn set_current(&self, mb: f64) {
        let mut reading = self.reading.write().await;
        reading.current_mb = mb;
        reading.timestamp_ms = Utc::now().timestamp_millis();
    }

    /// Stores a new "today" value
    pub async fn set_today(&self, mb: f64) {
        let mut reading = self.reading.write().await;
        reading.today_mb = mb;
        reading.timestamp_ms = Utc::now().timestamp_millis();
    }
}

impl Default for UsageState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_starts_at_zero() {
        let state = UsageState::new();
        let reading = state.reading().await;
        assert_eq!(reading.current_mb, 0.0);
        assert_eq!(reading.today_mb, 0.0);
        assert!(reading.timestamp_ms > 0);
    }

    #[tokio::test]
    async fn test_state_updates_independently() {
        let state = UsageState::new();
        let before = state.reading().await.timestamp_ms;

        state.set_current(12.5).await;
        state.set_today(300.0).await;

        let reading = state.reading().await;
        assert_eq!(reading.current_mb, 12.5);
        assert_eq!(reading.today_mb, 300.0);
        assert!(reading.timestamp_ms >= before);
    }

    #[test]
    fn test_reading_serialization() {
        let reading = UsageReading {
            current_mb: 1.0,
            today_mb: 2.0,
            timestamp_ms: 42,
        };
        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["currentMb"], 1.0);
        assert_eq!(json["timestampMs"], 42);
    }
}
