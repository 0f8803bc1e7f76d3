//! Configuration management for DataMeter
//!
//! Handles the application settings file and the `DataLimitPrefs` preference
//! store holding the daily cap. Supports Windows, macOS, and Linux.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

use crate::stats::Transport;

/// Name of the preference store holding the daily limit
pub const LIMIT_PREFS_NAME: &str = "DataLimitPrefs";

/// Errors that can occur while loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory could be determined for this platform
    #[error("Could not determine config path")]
    NoConfigDir,

    /// Reading or writing a file failed
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The file contents could not be (de)serialized
    #[error("Config format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Timing of the background monitor and the data stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Seconds between refresh ticks
    pub refresh_interval_secs: u64,
    /// Ticks closer together than this are skipped
    pub min_update_spacing_secs: u64,
    /// Length of the "current" usage window
    pub current_window_minutes: i64,
    /// Seconds between data stream events
    pub stream_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 15,
            min_update_spacing_secs: 5,
            current_window_minutes: 180,
            stream_interval_secs: 5,
        }
    }
}

impl MonitorSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn min_update_spacing(&self) -> Duration {
        Duration::from_secs(self.min_update_spacing_secs)
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_secs(self.stream_interval_secs)
    }
}

/// Restart policy numbers for supervised agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartSettings {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures before the supervisor gives up
    pub max_restarts: u32,
    /// A run lasting this long resets the backoff
    pub stable_after_secs: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            max_restarts: 10,
            stable_after_secs: 300,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub restart: RestartSettings,
    /// Transports summed into the device-level current/today totals
    #[serde(default = "default_tracked_transports")]
    pub tracked_transports: Vec<Transport>,
    /// Counter file for the Linux stats source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_path: Option<PathBuf>,
    /// Start the background monitor when the process starts
    #[serde(default = "default_true")]
    pub start_monitoring_on_launch: bool,
}

fn default_tracked_transports() -> Vec<Transport> {
    Transport::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorSettings::default(),
            restart: RestartSettings::default(),
            tracked_transports: default_tracked_transports(),
            stats_path: None,
            start_monitoring_on_launch: true,
        }
    }
}

impl AppConfig {
    /// Gets the config directory path (cross-platform)
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|p| PathBuf::from(p).join("DataMeter"))
        }

        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|p| PathBuf::from(p).join("Library/Application Support/DataMeter"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|p| PathBuf::from(p).join(".config")))
                .map(|p| p.join("datameter"))
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }

    /// Gets the config file path inside `dir`
    pub fn config_path(dir: &Path) -> PathBuf {
        dir.join("config.json")
    }

    /// Loads configuration from the platform config directory
    pub fn load() -> Self {
        match Self::config_dir() {
            Some(dir) => Self::load_from(&Self::config_path(&dir)),
            None => Self::default(),
        }
    }

    /// Loads configuration from a file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path)
            .map_err(ConfigError::from)
            .and_then(|content| serde_json::from_str(&content).map_err(ConfigError::from))
        {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Saves configuration to the platform config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = Self::config_dir().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&Self::config_path(&dir))
    }

    /// Saves configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Daily cap as read by the monitor on every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyLimitConfig {
    /// Cap in megabytes, `<= 0` means no cap
    pub limit_mb: f64,
    pub alerts_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LimitPrefs {
    #[serde(default)]
    daily_limit: f32,
    #[serde(default = "default_true")]
    alert_enabled: bool,
}

impl Default for LimitPrefs {
    fn default() -> Self {
        Self {
            daily_limit: 0.0,
            alert_enabled: true,
        }
    }
}

/// Persistent key-value store for the daily limit
///
/// The limit is stored with `f32` precision, matching the preference format
/// the UI layer already reads.
pub struct LimitStore {
    path: Option<PathBuf>,
    prefs: RwLock<LimitPrefs>,
}

impl LimitStore {
    /// Opens (or creates on first write) the store inside `dir`
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(format!("{}.json", LIMIT_PREFS_NAME));
        let prefs = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Resetting corrupt {}: {}", path.display(), e);
                LimitPrefs::default()
            }),
            Err(_) => LimitPrefs::default(),
        };

        Self {
            path: Some(path),
            prefs: RwLock::new(prefs),
        }
    }

    /// Creates a store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            prefs: RwLock::new(LimitPrefs::default()),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current daily limit in megabytes
    pub fn daily_limit(&self) -> f64 {
        self.prefs.read().unwrap_or_else(|e| e.into_inner()).daily_limit as f64
    }

    /// Whether limit alerts are enabled
    pub fn is_alert_enabled(&self) -> bool {
        self.prefs.read().unwrap_or_else(|e| e.into_inner()).alert_enabled
    }

    /// Reads both values at once
    pub fn snapshot(&self) -> DailyLimitConfig {
        let prefs = self.prefs.read().unwrap_or_else(|e| e.into_inner());
        DailyLimitConfig {
            limit_mb: prefs.daily_limit as f64,
            alerts_enabled: prefs.alert_enabled,
        }
    }

    /// Sets the daily limit in megabytes
    pub fn set_daily_limit(&self, limit_mb: f64) -> Result<(), ConfigError> {
        self.update(|prefs| prefs.daily_limit = limit_mb as f32)
    }

    /// Enables or disables limit alerts
    pub fn set_alert_enabled(&self, enabled: bool) -> Result<(), ConfigError> {
        self.update(|prefs| prefs.alert_enabled = enabled)
    }

    /// Applies a change and persists it; memory is only updated once the file is written
    fn update(&self, apply: impl FnOnce(&mut LimitPrefs)) -> Result<(), ConfigError> {
        let mut prefs = self.prefs.write().unwrap_or_else(|e| e.into_inner());
        let mut updated = prefs.clone();
        apply(&mut updated);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&updated)?)?;
        }

        *prefs = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.refresh_interval(), Duration::from_secs(15));
        assert_eq!(config.monitor.min_update_spacing(), Duration::from_secs(5));
        assert_eq!(config.monitor.current_window_minutes, 180);
        assert_eq!(config.tracked_transports, vec![Transport::Wifi, Transport::Mobile]);
        assert!(config.start_monitoring_on_launch);
        assert_eq!(config.restart.max_restarts, 10);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json =
            r#"{"monitor": {"refresh_interval_secs": 30}, "tracked_transports": ["mobile"]}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.monitor.refresh_interval_secs, 30);
        assert_eq!(config.monitor.min_update_spacing_secs, 5);
        assert_eq!(config.tracked_transports, vec![Transport::Mobile]);
        assert_eq!(config.restart, RestartSettings::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = AppConfig::config_path(dir.path());

        let mut config = AppConfig::default();
        config.monitor.refresh_interval_secs = 60;
        config.start_monitoring_on_launch = false;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.monitor.refresh_interval_secs, 60);
        assert!(!loaded.start_monitoring_on_launch);
    }

    #[test]
    fn test_corrupt_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = AppConfig::config_path(dir.path());
        fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.monitor, MonitorSettings::default());
    }

    #[test]
    fn test_limit_store_defaults() {
        let store = LimitStore::in_memory();
        assert_eq!(store.daily_limit(), 0.0);
        assert!(store.is_alert_enabled());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_limit_store_persists() {
        let dir = tempfile::tempdir().unwrap();

        let store = LimitStore::open(dir.path());
        store.set_daily_limit(500.0).unwrap();
        store.set_alert_enabled(false).unwrap();

        let reopened = LimitStore::open(dir.path());
        assert_eq!(reopened.daily_limit(), 500.0);
        assert!(!reopened.is_alert_enabled());
        assert_eq!(
            reopened.snapshot(),
            DailyLimitConfig {
                limit_mb: 500.0,
                alerts_enabled: false
            }
        );
    }

    #[test]
    fn test_failed_write_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();

        let store = LimitStore::open(&blocker);
        assert!(store.set_daily_limit(750.0).is_err());
        assert!(store.set_alert_enabled(false).is_err());

        assert_eq!(store.daily_limit(), 0.0);
        assert!(store.is_alert_enabled());
    }

    #[test]
    fn test_limit_store_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = LimitStore::open(dir.path());
        store.set_daily_limit(1.5).unwrap();

        let expected = dir.path().join("DataLimitPrefs.json");
        assert_eq!(store.path(), Some(expected.as_path()));
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(expected).unwrap()).unwrap();
        assert_eq!(raw["daily_limit"], 1.5);
        assert_eq!(raw["alert_enabled"], true);
    }
}
