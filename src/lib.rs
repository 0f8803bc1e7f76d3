//! DataMeter - Track device and per-app data usage against a daily cap
//!
//! The native half of a data usage monitor: it polls network statistics,
//! keeps an always-visible status notification up to date, warns when the
//! daily cap is exceeded and answers channel calls from the UI host.
//!
//! ## Features
//!
//! - Device usage for the last three hours and since local midnight
//! - Per-application Wi-Fi, mobile and combined usage
//! - Persisted daily cap with optional alerts
//! - Supervised background monitor that restarts itself with backoff
//! - Live data stream for attached listeners
//!
//! ## Architecture
//!
//! - **Stats**: platform capabilities (network statistics, package names)
//! - **Usage**: polling, per-app aggregation and cap evaluation
//! - **Agents**: background tasks (monitor, data stream) and their supervisor
//! - **Channels**: method channel dispatch for the UI host
//! - **Bridge**: JSON-lines transport between the host and the channels

pub mod agents;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod notify;
pub mod stats;
pub mod usage;

use std::sync::Arc;

use anyhow::Context;

use agents::{AgentManager, MonitorAgent, RestartPolicy, StreamAgent, MONITOR_AGENT_ID};
use config::{AppConfig, LimitStore};
use notify::{ChannelNotifier, Notifier};
use stats::{NetworkStatsSource, PackageResolver, ProcNetDevSource, StaticPackageResolver};
use usage::{AppUsageAggregator, UsagePoller, UsageState};

/// Notifications buffered for the host before old ones are dropped
const NOTIFICATION_CAPACITY: usize = 32;

/// Platform capabilities the application runs on
#[derive(Clone)]
pub struct Platform {
    pub source: Arc<dyn NetworkStatsSource>,
    pub resolver: Arc<dyn PackageResolver>,
    pub notifier: Arc<dyn Notifier>,
}

/// Application state shared by the channels and the agents
pub struct AppState {
    pub config: AppConfig,
    /// Persisted daily cap
    pub store: Arc<LimitStore>,
    /// Last-known device usage
    pub usage: Arc<UsageState>,
    pub poller: Arc<UsagePoller>,
    pub aggregator: AppUsageAggregator,
    /// Agent manager for background tasks
    pub agent_manager: AgentManager,
    pub stream: Arc<StreamAgent>,
}

impl AppState {
    /// Wires the usage services and registers the background agents
    pub async fn new(config: AppConfig, platform: Platform, store: Arc<LimitStore>) -> Self {
        let usage = Arc::new(UsageState::new());
        let poller = Arc::new(
            UsagePoller::new(Arc::clone(&platform.source), Arc::clone(&usage))
                .with_transports(config.tracked_transports.clone())
                .with_current_window_minutes(config.monitor.current_window_minutes),
        );
        let aggregator =
            AppUsageAggregator::new(Arc::clone(&platform.source), Arc::clone(&platform.resolver));

        let agent_manager = AgentManager::with_policy(RestartPolicy::from(&config.restart));

        let monitor = Arc::new(MonitorAgent::new(
            config.monitor.clone(),
            Arc::clone(&poller),
            Arc::clone(&store),
            Arc::clone(&platform.notifier),
        ));
        let stream = Arc::new(StreamAgent::new(
            config.monitor.stream_interval(),
            Arc::clone(&poller),
            Arc::clone(&store),
        ));

        agent_manager.register(monitor).await;
        agent_manager.register(stream.clone()).await;

        Self {
            config,
            store,
            usage,
            poller,
            aggregator,
            agent_manager,
            stream,
        }
    }

    /// Starts the monitor when the configuration asks for it
    pub async fn start_background(&self) -> Result<(), agents::AgentError> {
        if self.config.start_monitoring_on_launch {
            self.agent_manager.start_agent(MONITOR_AGENT_ID).await?;
        }
        Ok(())
    }

    /// Stops every agent
    pub async fn shutdown(&self) {
        if let Err(e) = self.agent_manager.stop_all().await {
            tracing::error!("Failed to stop agents: {}", e);
        }
    }
}

// ============================================================================
// Entry Point
// ============================================================================

/// Initializes logging, wires the application and serves the host bridge on stdio
pub fn run() -> anyhow::Result<()> {
    // Logs go to stderr, stdout carries the bridge
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datameter_lib=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    tracing::info!("Starting DataMeter...");

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    runtime.block_on(serve_stdio())
}

async fn serve_stdio() -> anyhow::Result<()> {
    let config = AppConfig::load();
    let store = match AppConfig::config_dir() {
        Some(dir) => LimitStore::open(&dir),
        None => {
            tracing::warn!("No config directory, daily limit will not be persisted");
            LimitStore::in_memory()
        }
    };

    let source = match &config.stats_path {
        Some(path) => ProcNetDevSource::with_path(path),
        None => ProcNetDevSource::new(),
    };
    let notifier = Arc::new(ChannelNotifier::new(NOTIFICATION_CAPACITY));
    let platform = Platform {
        source: Arc::new(source),
        resolver: Arc::new(StaticPackageResolver::new()),
        notifier: notifier.clone(),
    };

    let state = Arc::new(AppState::new(config, platform, Arc::new(store)).await);
    let bridge = bridge::Bridge::new(channels::ChannelRouter::new(Arc::clone(&state)))
        .with_notifications(notifier.subscribe());

    state
        .start_background()
        .await
        .context("failed to start the monitor")?;
    tracing::info!("DataMeter initialized successfully");

    let served = bridge
        .serve(
            tokio::io::BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
        )
        .await;

    state.shutdown().await;
    served.context("bridge failed")
}
