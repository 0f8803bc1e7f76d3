//! Method channels
//!
//! All calls the UI host can make, grouped by channel name. Each call yields
//! a success value, an error with a code, or "not implemented" for a method
//! the channel does not know.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::agents::{AgentError, MONITOR_AGENT_ID, STREAM_AGENT_ID};
use crate::config::ConfigError;
use crate::usage::DEFAULT_TIME_RANGE_HOURS;
use crate::AppState;

pub const DATA_MONITOR_CHANNEL: &str = "data_monitor";
pub const DATA_LIMIT_CHANNEL: &str = "data_limit";
pub const APP_DATA_USAGE_CHANNEL: &str = "app_data_usage";
pub const DATA_STREAM_CHANNEL: &str = "data_stream";

/// Errors raised while handling a call
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid argument '{name}': expected {expected}")]
    InvalidArgument { name: String, expected: &'static str },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChannelError {
    /// Error code reported to the host
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::UnknownChannel(_) => "UNKNOWN_CHANNEL",
            _ => "ERROR",
        }
    }
}

/// A call from the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub channel: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl MethodCall {
    pub fn new(channel: &str, method: &str) -> Self {
        Self {
            channel: channel.to_string(),
            method: method.to_string(),
            args: Value::Null,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

/// Outcome of a call
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Success(Value),
    Error { code: String, message: String },
    NotImplemented,
}

impl From<ChannelError> for MethodResult {
    fn from(e: ChannelError) -> Self {
        MethodResult::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

// Missing and null arguments fall back to the default; a value of the wrong
// type is an error.

fn arg_f64(args: &Value, name: &str, default: f64) -> Result<f64, ChannelError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| ChannelError::InvalidArgument {
            name: name.to_string(),
            expected: "a number",
        }),
    }
}

fn arg_bool(args: &Value, name: &str, default: bool) -> Result<bool, ChannelError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| ChannelError::InvalidArgument {
            name: name.to_string(),
            expected: "a boolean",
        }),
    }
}

fn arg_hours(args: &Value, name: &str, default: i64) -> Result<i64, ChannelError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_i64()
            .filter(|hours| *hours > 0)
            .ok_or_else(|| ChannelError::InvalidArgument {
                name: name.to_string(),
                expected: "a positive whole number of hours",
            }),
    }
}

// ============================================================================
// Router
// ============================================================================

/// Dispatches calls to the channel handlers
#[derive(Clone)]
pub struct ChannelRouter {
    state: Arc<AppState>,
}

impl ChannelRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Handles one call
    pub async fn handle(&self, call: &MethodCall) -> MethodResult {
        let outcome = match call.channel.as_str() {
            DATA_MONITOR_CHANNEL => self.data_monitor(&call.method).await,
            DATA_LIMIT_CHANNEL => self.data_limit(&call.method, &call.args),
            APP_DATA_USAGE_CHANNEL => self.app_data_usage(&call.method, &call.args).await,
            DATA_STREAM_CHANNEL => self.data_stream(&call.method).await,
            other => Err(ChannelError::UnknownChannel(other.to_string())),
        };

        match outcome {
            Ok(Some(value)) => MethodResult::Success(value),
            Ok(None) => {
                tracing::debug!("Method not implemented: {}.{}", call.channel, call.method);
                MethodResult::NotImplemented
            }
            Err(e) => {
                tracing::error!("Error in channel {} ({}): {}", call.channel, call.method, e);
                e.into()
            }
        }
    }

    async fn data_monitor(&self, method: &str) -> Result<Option<Value>, ChannelError> {
        let manager = &self.state.agent_manager;
        let value = match method {
            "getCurrentDataUsage" => json!(self.state.poller.current_usage_mb().await),
            "getTodayDataUsage" => json!(self.state.poller.today_usage_mb().await),
            "startMonitoring" => {
                manager.start_agent(MONITOR_AGENT_ID).await?;
                json!(true)
            }
            "stopMonitoring" => {
                manager.stop_agent(MONITOR_AGENT_ID).await?;
                json!(true)
            }
            "isMonitoringActive" => {
                let failed = manager
                    .agent_status(MONITOR_AGENT_ID)
                    .await
                    .map_or(false, |status| status.has_error());
                json!(!failed && manager.is_active(MONITOR_AGENT_ID).await)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn data_limit(&self, method: &str, args: &Value) -> Result<Option<Value>, ChannelError> {
        let store = &self.state.store;
        let value = match method {
            "setDailyLimit" => {
                store.set_daily_limit(arg_f64(args, "limitMB", 0.0)?)?;
                json!(true)
            }
            "getDailyLimit" => json!(store.daily_limit()),
            "setLimitAlertEnabled" => {
                store.set_alert_enabled(arg_bool(args, "enabled", false)?)?;
                json!(true)
            }
            "isLimitAlertEnabled" => json!(store.is_alert_enabled()),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Per-app lists are returned as JSON array strings
    async fn app_data_usage(
        &self,
        method: &str,
        args: &Value,
    ) -> Result<Option<Value>, ChannelError> {
        let aggregator = &self.state.aggregator;
        let encoded = match method {
            "getAppsWifiDataUsage" => {
                let hours = arg_hours(args, "timeRange", DEFAULT_TIME_RANGE_HOURS)?;
                serde_json::to_string(&aggregator.wifi_usage(hours).await)?
            }
            "getAppsMobileDataUsage" => {
                let hours = arg_hours(args, "timeRange", DEFAULT_TIME_RANGE_HOURS)?;
                serde_json::to_string(&aggregator.mobile_usage(hours).await)?
            }
            "getAllAppsDataUsage" => {
                let hours = arg_hours(args, "timeRange", DEFAULT_TIME_RANGE_HOURS)?;
                serde_json::to_string(&aggregator.all_usage(hours).await)?
            }
            _ => return Ok(None),
        };
        Ok(Some(Value::String(encoded)))
    }

    async fn data_stream(&self, method: &str) -> Result<Option<Value>, ChannelError> {
        let manager = &self.state.agent_manager;
        match method {
            "listen" => {
                tracing::debug!("Data stream listener attached");
                manager.start_agent(STREAM_AGENT_ID).await?;
            }
            "cancel" => {
                tracing::debug!("Data stream listener detached");
                manager.stop_agent(STREAM_AGENT_ID).await?;
            }
            _ => return Ok(None),
        }
        Ok(Some(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, LimitStore};
    use crate::notify::LogNotifier;
    use crate::stats::{MemoryStatsSource, StaticPackageResolver, Transport, UsageBucket};
    use crate::Platform;
    use chrono::Utc;

    const MB: u64 = 1_048_576;

    async fn router() -> ChannelRouter {
        let source = MemoryStatsSource::new();
        let start = Utc::now() - chrono::Duration::minutes(5);
        source.record(Transport::Wifi, UsageBucket::new(10_050, start, start, 4 * MB, 0));
        source.record(Transport::Mobile, UsageBucket::new(10_050, start, start, MB, MB));

        let resolver =
            StaticPackageResolver::new().with_package(10_050, "com.example.maps", "Maps");
        let platform = Platform {
            source: Arc::new(source),
            resolver: Arc::new(resolver),
            notifier: Arc::new(LogNotifier),
        };
        let config = AppConfig {
            start_monitoring_on_launch: false,
            ..AppConfig::default()
        };
        let state = AppState::new(config, platform, Arc::new(LimitStore::in_memory())).await;
        ChannelRouter::new(Arc::new(state))
    }

    fn success(result: MethodResult) -> Value {
        match result {
            MethodResult::Success(value) => value,
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_device_usage_methods() {
        let router = router().await;

        let current = MethodCall::new("data_monitor", "getCurrentDataUsage");
        assert_eq!(success(router.handle(&current).await), json!(6.0));
        let today = MethodCall::new("data_monitor", "getTodayDataUsage");
        assert_eq!(success(router.handle(&today).await), json!(6.0));
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let router = router().await;
        let call = |m: &str| MethodCall::new("data_monitor", m);

        assert_eq!(success(router.handle(&call("isMonitoringActive")).await), json!(false));
        assert_eq!(success(router.handle(&call("startMonitoring")).await), json!(true));
        assert_eq!(success(router.handle(&call("isMonitoringActive")).await), json!(true));
        // Starting again is harmless
        assert_eq!(success(router.handle(&call("startMonitoring")).await), json!(true));
        assert_eq!(success(router.handle(&call("stopMonitoring")).await), json!(true));
        assert_eq!(success(router.handle(&call("isMonitoringActive")).await), json!(false));
    }

    #[tokio::test]
    async fn test_daily_limit_methods() {
        let router = router().await;

        let set =
            MethodCall::new("data_limit", "setDailyLimit").with_args(json!({"limitMB": 500.5}));
        assert_eq!(success(router.handle(&set).await), json!(true));
        assert_eq!(
            success(router.handle(&MethodCall::new("data_limit", "getDailyLimit")).await),
            json!(500.5)
        );

        // Integers are accepted as numbers
        let set =
            MethodCall::new("data_limit", "setDailyLimit").with_args(json!({"limitMB": 2048}));
        success(router.handle(&set).await);
        assert_eq!(router.state().store.daily_limit(), 2048.0);

        // Missing argument resets the cap
        success(router.handle(&MethodCall::new("data_limit", "setDailyLimit")).await);
        assert_eq!(router.state().store.daily_limit(), 0.0);
    }

    #[tokio::test]
    async fn test_missing_enabled_argument_disables_alerts() {
        let router = router().await;
        let is_enabled = MethodCall::new("data_limit", "isLimitAlertEnabled");

        assert_eq!(success(router.handle(&is_enabled).await), json!(true));
        success(router.handle(&MethodCall::new("data_limit", "setLimitAlertEnabled")).await);
        assert_eq!(success(router.handle(&is_enabled).await), json!(false));

        let enable = MethodCall::new("data_limit", "setLimitAlertEnabled")
            .with_args(json!({"enabled": true}));
        success(router.handle(&enable).await);
        assert_eq!(success(router.handle(&is_enabled).await), json!(true));
    }

    #[tokio::test]
    async fn test_wrong_argument_type_is_error() {
        let router = router().await;
        let call =
            MethodCall::new("data_limit", "setDailyLimit").with_args(json!({"limitMB": "lots"}));

        match router.handle(&call).await {
            MethodResult::Error { code, message } => {
                assert_eq!(code, "ERROR");
                assert!(message.contains("limitMB"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_app_usage_methods_return_json_strings() {
        let router = router().await;

        let wifi = MethodCall::new("app_data_usage", "getAppsWifiDataUsage");
        let wifi = success(router.handle(&wifi).await);
        let apps: Value = serde_json::from_str(wifi.as_str().unwrap()).unwrap();
        assert_eq!(apps[0]["packageName"], "com.example.maps");
        assert_eq!(apps[0]["appName"], "Maps");
        assert_eq!(apps[0]["usageMB"], 4.0);

        let all = MethodCall::new("app_data_usage", "getAllAppsDataUsage")
            .with_args(json!({"timeRange": 1}));
        let all = success(router.handle(&all).await);
        let apps: Value = serde_json::from_str(all.as_str().unwrap()).unwrap();
        assert_eq!(apps[0]["wifiUsageMB"], 4.0);
        assert_eq!(apps[0]["mobileUsageMB"], 2.0);
        assert_eq!(apps[0]["totalUsageMB"], 6.0);
    }

    #[tokio::test]
    async fn test_non_positive_time_range_is_error() {
        let router = router().await;
        let call = MethodCall::new("app_data_usage", "getAppsMobileDataUsage")
            .with_args(json!({"timeRange": 0}));
        assert!(matches!(router.handle(&call).await, MethodResult::Error { .. }));
    }

    #[tokio::test]
    async fn test_huge_time_range_covers_all_history() {
        let router = router().await;

        for hours in [100_000_000_000_i64, i64::MAX] {
            let call = MethodCall::new("app_data_usage", "getAppsWifiDataUsage")
                .with_args(json!({"timeRange": hours}));
            let wifi = success(router.handle(&call).await);
            let apps: Value = serde_json::from_str(wifi.as_str().unwrap()).unwrap();
            assert_eq!(apps[0]["usageMB"], 4.0);
        }

        let call = MethodCall::new("app_data_usage", "getAllAppsDataUsage")
            .with_args(json!({"timeRange": i64::MAX}));
        let all = success(router.handle(&call).await);
        let apps: Value = serde_json::from_str(all.as_str().unwrap()).unwrap();
        assert_eq!(apps[0]["totalUsageMB"], 6.0);
    }

    #[tokio::test]
    async fn test_unknown_method_and_channel() {
        let router = router().await;

        assert_eq!(
            router.handle(&MethodCall::new("data_limit", "resetEverything")).await,
            MethodResult::NotImplemented
        );
        match router.handle(&MethodCall::new("battery", "getLevel")).await {
            MethodResult::Error { code, .. } => assert_eq!(code, "UNKNOWN_CHANNEL"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_stream_listen_and_cancel() {
        let router = router().await;
        let mut rx = router.state().stream.subscribe();

        let listen = router.handle(&MethodCall::new("data_stream", "listen")).await;
        assert_eq!(listen, MethodResult::Success(Value::Null));

        let payload: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(payload["currentUsage"], 6.0);
        assert!(router.state().agent_manager.is_active(STREAM_AGENT_ID).await);

        router.handle(&MethodCall::new("data_stream", "cancel")).await;
        assert!(!router.state().agent_manager.is_active(STREAM_AGENT_ID).await);
    }
}
