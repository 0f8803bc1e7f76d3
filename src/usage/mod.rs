//! Usage module - Polling, per-app aggregation and daily cap checks

mod aggregator;
mod limit;
mod poller;
mod state;

pub use aggregator::{
    AppTransportUsage, AppUsageAggregator, AppUsageRecord, DEFAULT_TIME_RANGE_HOURS,
};
pub use limit::{
    format_megabytes, is_limit_exceeded, render_status, usage_percentage, LimitEvaluator,
    LimitOutcome, STATUS_TITLE,
};
pub use poller::{today_window, UsagePoller, DEFAULT_CURRENT_WINDOW_MINUTES};
pub use state::{UsageReading, UsageState};
