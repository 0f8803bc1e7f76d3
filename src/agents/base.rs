//! Base agent trait and types
//!
//! Defines the Agent trait that all background agents must implement.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur in agents
#[derive(Debug, Error)]
pub enum AgentError {
    /// Agent is already running
    #[error("Agent is already running")]
    AlreadyRunning,

    /// Agent is not registered with the manager
    #[error("Agent '{0}' not found")]
    NotFound(String),

    /// Agent operation failed
    #[error("Agent operation failed: {0}")]
    OperationFailed(String),
}

/// Status of an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    /// Agent has never been started
    Idle,
    /// Agent is setting up before its first tick
    Starting,
    /// Agent is currently running
    Running,
    /// Agent failed and will not be restarted
    Error(String),
    /// Agent has been stopped
    Stopped,
}

impl AgentStatus {
    /// Returns true if the agent is starting or running
    pub fn is_running(&self) -> bool {
        matches!(self, AgentStatus::Starting | AgentStatus::Running)
    }

    /// Returns true if the agent has an error
    pub fn has_error(&self) -> bool {
        matches!(self, AgentStatus::Error(_))
    }
}

/// Trait for background agents
///
/// Agents are long-running background tasks that can be started and stopped.
/// The manager runs `start` under a supervisor that restarts it when it fails.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the unique identifier for this agent
    fn id(&self) -> &'static str;

    /// Returns the display name for this agent
    fn name(&self) -> &'static str;

    /// Returns the current status of the agent
    fn status(&self) -> AgentStatus;

    /// Runs the agent's main loop until it is stopped
    ///
    /// Implementations should use tokio::select! with a cancellation token.
    async fn start(&self) -> Result<(), AgentError>;

    /// Signals the agent to stop
    async fn stop(&self) -> Result<(), AgentError>;

    /// Clears running state left behind by a failed or panicked run
    async fn reset(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_is_running() {
        assert!(AgentStatus::Running.is_running());
        assert!(AgentStatus::Starting.is_running());
        assert!(!AgentStatus::Idle.is_running());
        assert!(!AgentStatus::Stopped.is_running());
        assert!(!AgentStatus::Error("test".into()).is_running());
    }

    #[test]
    fn test_agent_status_has_error() {
        assert!(AgentStatus::Error("test".into()).has_error());
        assert!(!AgentStatus::Idle.has_error());
        assert!(!AgentStatus::Running.has_error());
        assert!(!AgentStatus::Stopped.has_error());
    }

    #[test]
    fn test_agent_error_messages() {
        assert_eq!(AgentError::NotFound("monitor".into()).to_string(), "Agent 'monitor' not found");
        assert_eq!(AgentError::AlreadyRunning.to_string(), "Agent is already running");
    }
}
