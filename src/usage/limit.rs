//! Daily cap evaluation and status text formatting

use std::sync::Arc;

use crate::config::LimitStore;
use crate::notify::{LimitAlert, Notifier, StatusNotification};

/// Title of the refreshed status notification
pub const STATUS_TITLE: &str = "Data Usage";

/// Returns true when a positive cap is set and `today_mb` has reached it
pub fn is_limit_exceeded(limit_mb: f64, today_mb: f64) -> bool {
    limit_mb > 0.0 && today_mb >= limit_mb
}

/// Whole percentage of the cap used, capped at 100. Zero when no cap is set.
pub fn usage_percentage(today_mb: f64, limit_mb: f64) -> u8 {
    if limit_mb <= 0.0 {
        return 0;
    }
    let pct = (today_mb / limit_mb * 100.0).floor();
    pct.clamp(0.0, 100.0) as u8
}

/// Formats megabytes, switching to gigabytes above 1024 MB
///
/// ```
/// use datameter_lib::usage::format_megabytes;
///
/// assert_eq!(format_megabytes(2047.0), "2.00 GB");
/// assert_eq!(format_megabytes(1023.0), "1023.00 MB");
/// ```
pub fn format_megabytes(mb: f64) -> String {
    if mb > 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.2} MB", mb)
    }
}

/// Builds the status notification for the latest values
pub fn render_status(current_mb: f64, today_mb: f64, limit_mb: f64) -> StatusNotification {
    let today = format_megabytes(today_mb);

    if limit_mb > 0.0 {
        let pct = usage_percentage(today_mb, limit_mb);
        StatusNotification {
            title: STATUS_TITLE.to_string(),
            text: format!(
                "Today: {} | {}% of limit ({})",
                today,
                pct,
                format_megabytes(limit_mb)
            ),
            progress: Some(pct),
        }
    } else {
        StatusNotification {
            title: STATUS_TITLE.to_string(),
            text: format!(
                "Today: {} | Last 3 hours: {}",
                today,
                format_megabytes(current_mb)
            ),
            progress: None,
        }
    }
}

/// Result of one limit evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOutcome {
    pub exceeded: bool,
    /// Whether an alert was raised
    pub notified: bool,
}

/// Checks today's usage against the persisted cap
///
/// Every call that finds the cap exceeded raises a new alert while alerts are
/// enabled; there is no suppression between calls.
pub struct LimitEvaluator {
    store: Arc<LimitStore>,
    notifier: Arc<dyn Notifier>,
}

impl LimitEvaluator {
    pub fn new(store: Arc<LimitStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Evaluates the cap and raises the alert if needed
    pub fn evaluate(&self, today_mb: f64) -> LimitOutcome {
        let limits = self.store.snapshot();
        let exceeded = is_limit_exceeded(limits.limit_mb, today_mb);
        let notified = exceeded && limits.alerts_enabled;

        if notified {
            self.notifier
                .alert_limit_exceeded(&LimitAlert::new(today_mb, limits.limit_mb));
        } else if exceeded {
            tracing::debug!("Daily limit exceeded but alerts are disabled");
        }

        LimitOutcome { exceeded, notified }
    }
}
