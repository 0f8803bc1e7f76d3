//! Notification sink abstraction
//!
//! The monitor rewrites one ongoing status notification and raises a separate
//! alert when the daily cap is exceeded. Where they end up is the host's
//! business: the log, or the UI host through the bridge.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Identifier of the ongoing status notification
pub const STATUS_NOTIFICATION_ID: u32 = 1;

/// Identifier of the limit-exceeded alert
pub const LIMIT_NOTIFICATION_ID: u32 = 2;

/// The always-visible monitor notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    pub title: String,
    pub text: String,
    /// Percentage of the daily cap used, when a cap is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl StatusNotification {
    /// Notification shown before the first refresh completes
    pub fn starting() -> Self {
        Self {
            title: "Data Usage Monitor".to_string(),
            text: "Monitoring data usage...".to_string(),
            progress: None,
        }
    }
}

/// Alert raised when today's usage reaches the daily cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitAlert {
    pub title: String,
    pub text: String,
    pub today_mb: f64,
    pub limit_mb: f64,
}

impl LimitAlert {
    pub fn new(today_mb: f64, limit_mb: f64) -> Self {
        Self {
            title: "Data Usage Limit Exceeded".to_string(),
            text: "You have exceeded your daily data usage limit".to_string(),
            today_mb,
            limit_mb,
        }
    }
}

/// Notification forwarded to the UI host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NotificationEvent {
    Status {
        id: u32,
        #[serde(flatten)]
        notification: StatusNotification,
    },
    LimitExceeded {
        id: u32,
        #[serde(flatten)]
        alert: LimitAlert,
    },
}

/// Destination for monitor notifications
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Replaces the ongoing status notification
    fn show_status(&self, notification: &StatusNotification);

    /// Raises the limit-exceeded alert
    fn alert_limit_exceeded(&self, alert: &LimitAlert);
}

/// Notifier that only writes to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_status(&self, notification: &StatusNotification) {
        tracing::info!("{}: {}", notification.title, notification.text);
    }

    fn alert_limit_exceeded(&self, alert: &LimitAlert) {
        tracing::warn!(
            "{}: {} ({:.2} MB of {:.2} MB)",
            alert.title,
            alert.text,
            alert.today_mb,
            alert.limit_mb
        );
    }
}

/// Notifier that forwards notifications to bridge subscribers
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: broadcast::Sender<NotificationEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to forwarded notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: NotificationEvent) {
        // No subscribers just means no host is attached yet
        if self.sender.send(event).is_err() {
            tracing::trace!("Dropped notification, no subscribers");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn show_status(&self, notification: &StatusNotification) {
        tracing::debug!("Status notification: {}", notification.text);
        self.publish(NotificationEvent::Status {
            id: STATUS_NOTIFICATION_ID,
            notification: notification.clone(),
        });
    }

    fn alert_limit_exceeded(&self, alert: &LimitAlert) {
        tracing::info!("Sending limit notification: {}", alert.text);
        self.publish(NotificationEvent::LimitExceeded {
            id: LIMIT_NOTIFICATION_ID,
            alert: alert.clone(),
        });
    }
}
