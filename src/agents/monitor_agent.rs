//! Monitor agent - Periodically re-polls usage and refreshes the status notification
//!
//! Publishes the starting notification, then ticks at a fixed interval. Each
//! tick polls current and today usage, checks the daily cap and rewrites the
//! status notification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::base::{Agent, AgentError, AgentStatus};
use crate::config::{LimitStore, MonitorSettings};
use crate::notify::{Notifier, StatusNotification};
use crate::usage::{render_status, LimitEvaluator, UsagePoller};

/// Identifier the monitor is registered under
pub const MONITOR_AGENT_ID: &str = "monitor";

/// Agent that keeps the status notification up to date
pub struct MonitorAgent {
    settings: MonitorSettings,
    poller: Arc<UsagePoller>,
    evaluator: LimitEvaluator,
    store: Arc<LimitStore>,
    notifier: Arc<dyn Notifier>,
    status: RwLock<AgentStatus>,
    cancel_token: RwLock<CancellationToken>,
    last_update: Mutex<Option<Instant>>,
}

impl MonitorAgent {
    pub fn new(
        settings: MonitorSettings,
        poller: Arc<UsagePoller>,
        store: Arc<LimitStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            evaluator: LimitEvaluator::new(Arc::clone(&store), Arc::clone(&notifier)),
            poller,
            store,
            notifier,
            status: RwLock::new(AgentStatus::Idle),
            cancel_token: RwLock::new(CancellationToken::new()),
            last_update: Mutex::new(None),
        }
    }

    /// Runs one refresh, unless the previous one was too recent
    ///
    /// Returns the notification that was shown, or `None` when skipped.
    pub async fn tick(&self) -> Option<StatusNotification> {
        {
            let mut last = self.last_update.lock().await;
            if let Some(previous) = *last {
                if previous.elapsed() < self.settings.min_update_spacing() {
                    tracing::debug!("Skipping refresh, last update {:?} ago", previous.elapsed());
                    return None;
                }
            }
            *last = Some(Instant::now());
        }

        let current_mb = self.poller.current_usage_mb().await;
        let today_mb = self.poller.today_usage_mb().await;
        tracing::debug!("Usage refreshed: current {:.2} MB, today {:.2} MB", current_mb, today_mb);

        self.evaluator.evaluate(today_mb);

        let status = render_status(current_mb, today_mb, self.store.daily_limit());
        self.notifier.show_status(&status);
        Some(status)
    }

    fn tick_interval(&self) -> Duration {
        self.settings.refresh_interval().max(Duration::from_millis(1))
    }
}

#[async_trait]
impl Agent for MonitorAgent {
    fn id(&self) -> &'static str {
        MONITOR_AGENT_ID
    }

    fn name(&self) -> &'static str {
        "Data Usage Monitor"
    }

    fn status(&self) -> AgentStatus {
        // Use try_read to avoid blocking
        self.status
            .try_read()
            .map(|s| s.clone())
            .unwrap_or(AgentStatus::Running)
    }

    async fn start(&self) -> Result<(), AgentError> {
        let token = {
            let mut status = self.status.write().await;
            if status.is_running() {
                return Err(AgentError::AlreadyRunning);
            }
            *status = AgentStatus::Starting;

            let mut token = self.cancel_token.write().await;
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };

        tracing::info!("Data usage monitor starting");
        self.notifier.show_status(&StatusNotification::starting());
        *self.status.write().await = AgentStatus::Running;

        // First tick completes immediately
        let mut ticker = tokio::time::interval(self.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = token.cancelled() => {
                    tracing::info!("Monitor agent cancelled");
                    break;
                }
            }
        }

        *self.status.write().await = AgentStatus::Stopped;
        Ok(())
    }

    async fn stop(&self) -> Result<(), AgentError> {
        let status = self.status.read().await;
        if !status.is_running() {
            return Ok(()); // Already stopped
        }

        self.cancel_token.read().await.cancel();
        Ok(())
    }

    async fn reset(&self) {
        let mut status = self.status.write().await;
        if status.is_running() {
            *status = AgentStatus::Stopped;
        }
    }
}
