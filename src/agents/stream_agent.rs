//! Stream agent - Pushes usage updates to listeners of the data stream
//!
//! While running, re-polls usage at a fixed interval and broadcasts a JSON
//! string payload to every subscriber.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use super::base::{Agent, AgentError, AgentStatus};
use crate::config::LimitStore;
use crate::usage::UsagePoller;

/// Identifier the stream is registered under
pub const STREAM_AGENT_ID: &str = "data_stream";

/// Default number of payloads buffered per subscriber
const STREAM_CAPACITY: usize = 16;

/// One data stream event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPayload {
    pub current_usage: f64,
    pub today_usage: f64,
    /// Milliseconds since the epoch of the last usage update
    pub timestamp: i64,
    pub daily_limit: f64,
}

/// Agent that emits usage payloads while a listener is attached
pub struct StreamAgent {
    interval: Duration,
    poller: Arc<UsagePoller>,
    store: Arc<LimitStore>,
    sender: broadcast::Sender<String>,
    status: RwLock<AgentStatus>,
    cancel_token: RwLock<CancellationToken>,
}

impl StreamAgent {
    pub fn new(interval: Duration, poller: Arc<UsagePoller>, store: Arc<LimitStore>) -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            interval: interval.max(Duration::from_millis(1)),
            poller,
            store,
            sender,
            status: RwLock::new(AgentStatus::Idle),
            cancel_token: RwLock::new(CancellationToken::new()),
        }
    }

    /// Subscribes to serialized stream payloads
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Polls usage and builds the next payload
    pub async fn next_payload(&self) -> StreamPayload {
        self.poller.current_usage_mb().await;
        self.poller.today_usage_mb().await;

        let reading = self.poller.state().reading().await;
        StreamPayload {
            current_usage: reading.current_mb,
            today_usage: reading.today_mb,
            timestamp: reading.timestamp_ms,
            daily_limit: self.store.daily_limit(),
        }
    }

    async fn send_update(&self) {
        let payload = self.next_payload().await;
        match serde_json::to_string(&payload) {
            Ok(json) => {
                if self.sender.send(json).is_err() {
                    tracing::trace!("No data stream listeners");
                }
            }
            Err(e) => tracing::error!("Failed to serialize stream payload: {}", e),
        }
    }
}

#[async_trait]
impl Agent for StreamAgent {
    fn id(&self) -> &'static str {
        STREAM_AGENT_ID
    }

    fn name(&self) -> &'static str {
        "Data Stream"
    }

    fn status(&self) -> AgentStatus {
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
            *status = AgentStatus::Running;

            let mut token = self.cancel_token.write().await;
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };
        tracing::debug!("Data stream started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.send_update().await;
                }
                _ = token.cancelled() => {
                    tracing::debug!("Data stream stopped");
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
            return Ok(());
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
