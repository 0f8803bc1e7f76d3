//! Agent module - Background tasks and periodic operations
//!
//! Provides agents for:
//! - Periodic refresh of the status notification and the daily cap check
//! - The data stream pushed to attached listeners
//!
//! Agents run under the manager's supervisor, which restarts them when they fail.

mod base;
mod manager;
mod monitor_agent;
mod stream_agent;

pub use base::{Agent, AgentError, AgentStatus};
pub use manager::{AgentManager, RestartPolicy};
pub use monitor_agent::{MonitorAgent, MONITOR_AGENT_ID};
pub use stream_agent::{StreamAgent, StreamPayload, STREAM_AGENT_ID};
