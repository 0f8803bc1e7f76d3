//! Agent manager - Orchestrates and supervises agents
//!
//! Each started agent runs under a supervisor task. If the agent's run ends
//! without a stop request (error, panic or unexpected return), the supervisor
//! restarts it after an exponential backoff, and gives up after too many
//! consecutive failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::base::{Agent, AgentError, AgentStatus};
use crate::config::RestartSettings;

/// How long `stop` waits for a supervisor before aborting it
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Restart behaviour for supervised agents
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_restarts: u32,
    /// A run lasting at least this long resets the failure count
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from(&RestartSettings::default())
    }
}

impl From<&RestartSettings> for RestartPolicy {
    fn from(settings: &RestartSettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_restarts: settings.max_restarts,
            stable_after: Duration::from_secs(settings.stable_after_secs),
        }
    }
}

impl RestartPolicy {
    /// A policy that never restarts
    pub fn never() -> Self {
        Self {
            max_restarts: 0,
            ..Self::default()
        }
    }

    /// Delay before the restart following the `failure`-th consecutive failure
    pub fn backoff_for(&self, failure: u32) -> Duration {
        let exponent = failure.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Default)]
struct Supervision {
    stop_requested: bool,
    restarts: u32,
    gave_up: Option<String>,
}

type SupervisionMap = Arc<RwLock<HashMap<&'static str, Supervision>>>;

/// Manages the lifecycle of multiple agents
pub struct AgentManager {
    agents: RwLock<HashMap<&'static str, Arc<dyn Agent>>>,
    handles: RwLock<HashMap<&'static str, JoinHandle<()>>>,
    supervision: SupervisionMap,
    policy: RestartPolicy,
}

impl AgentManager {
    /// Creates a new AgentManager with the default restart policy
    pub fn new() -> Self {
        Self::with_policy(RestartPolicy::default())
    }

    /// Creates a new AgentManager with a custom restart policy
    pub fn with_policy(policy: RestartPolicy) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            supervision: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Registers an agent with the manager
    pub async fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.id();
        self.agents.write().await.insert(id, agent);
    }

    async fn find(&self, id: &str) -> Option<(&'static str, Arc<dyn Agent>)> {
        self.agents
            .read()
            .await
            .iter()
            .find(|(k, _)| **k == id)
            .map(|(k, v)| (*k, Arc::clone(v)))
    }

    /// Starts a specific agent by ID
    ///
    /// Starting an agent that is already active is a no-op.
    pub async fn start_agent(&self, id: &str) -> Result<(), AgentError> {
        let (static_id, agent) = self
            .find(id)
            .await
            .ok_or_else(|| AgentError::NotFound(id.to_string()))?;

        if self.is_active(static_id).await {
            tracing::debug!("Agent '{}' already active", static_id);
            return Ok(());
        }
        if let Some(AgentStatus::Error(reason)) = self.agent_status(static_id).await {
            tracing::info!("Restarting agent '{}' after it gave up: {}", static_id, reason);
        }

        self.start_agent_internal(static_id, agent).await
    }

    async fn start_agent_internal(
        &self,
        id: &'static str,
        agent: Arc<dyn Agent>,
    ) -> Result<(), AgentError> {
        self.supervision
            .write()
            .await
            .insert(id, Supervision::default());

        let agent_name = agent.name();
        let handle = tokio::spawn(supervise(
            id,
            agent,
            self.policy.clone(),
            Arc::clone(&self.supervision),
        ));

        if let Some(previous) = self.handles.write().await.insert(id, handle) {
            previous.abort();
        }

        tracing::info!("Started agent: {} ({})", agent_name, id);
        Ok(())
    }

    /// Stops all agents
    pub async fn stop_all(&self) -> Result<(), AgentError> {
        let agents = self.agents.read().await.clone();

        for (id, agent) in agents {
            self.stop_agent_internal(id, agent).await?;
        }

        Ok(())
    }

    /// Stops a specific agent by ID
    pub async fn stop_agent(&self, id: &str) -> Result<(), AgentError> {
        if let Some((static_id, agent)) = self.find(id).await {
            self.stop_agent_internal(static_id, agent).await
        } else {
            Ok(()) // Agent not found, nothing to stop
        }
    }

    async fn stop_agent_internal(
        &self,
        id: &'static str,
        agent: Arc<dyn Agent>,
    ) -> Result<(), AgentError> {
        if let Some(state) = self.supervision.write().await.get_mut(id) {
            state.stop_requested = true;
        }

        agent.stop().await?;

        let handle = self.handles.write().await.remove(id);
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Agent '{}' did not stop in time, aborting", id);
                handle.abort();
                agent.reset().await;
            }
            tracing::info!(
                "Stopped agent: {} after {} restarts",
                id,
                self.restart_count(id).await
            );
        }

        Ok(())
    }

    /// Returns true while the agent is running or waiting to be restarted
    pub async fn is_active(&self, id: &str) -> bool {
        let supervised = self
            .handles
            .read()
            .await
            .get(id)
            .map_or(false, |h| !h.is_finished());
        let stop_requested = self
            .supervision
            .read()
            .await
            .get(id)
            .map_or(false, |s| s.stop_requested);

        supervised && !stop_requested
    }

    /// Number of restarts performed for an agent since it was last started
    pub async fn restart_count(&self, id: &str) -> u32 {
        self.supervision
            .read()
            .await
            .get(id)
            .map_or(0, |s| s.restarts)
    }

    /// Status of an agent, reporting `Error` once its supervisor has given up
    pub async fn agent_status(&self, id: &str) -> Option<AgentStatus> {
        let (static_id, agent) = self.find(id).await?;
        let gave_up = self
            .supervision
            .read()
            .await
            .get(static_id)
            .and_then(|s| s.gave_up.clone());

        Some(gave_up.map_or_else(|| agent.status(), AgentStatus::Error))
    }
}

impl Default for AgentManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the agent's run when the supervisor itself is aborted
struct AbortOnDrop(JoinHandle<Result<(), AgentError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn stop_requested(supervision: &SupervisionMap, id: &'static str) -> bool {
    supervision
        .read()
        .await
        .get(id)
        .map_or(true, |s| s.stop_requested)
}

/// Runs an agent until it is stopped, restarting it when it fails
async fn supervise(
    id: &'static str,
    agent: Arc<dyn Agent>,
    policy: RestartPolicy,
    supervision: SupervisionMap,
) {
    let mut failures = 0u32;

    loop {
        if stop_requested(&supervision, id).await {
            break;
        }

        let started = Instant::now();
        let run = Arc::clone(&agent);
        let mut current = AbortOnDrop(tokio::spawn(async move { run.start().await }));
        let outcome = (&mut current.0).await;

        if stop_requested(&supervision, id).await {
            break;
        }

        let reason = match outcome {
            Ok(Ok(())) => "exited without a stop request".to_string(),
            Ok(Err(AgentError::AlreadyRunning)) => {
                tracing::warn!("Agent '{}' is already running, not supervising", id);
                break;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => "panicked".to_string(),
            Err(e) => e.to_string(),
        };

        if started.elapsed() >= policy.stable_after {
            failures = 0;
        }
        failures += 1;

        if failures > policy.max_restarts {
            tracing::error!(
                "Agent '{}' failed {} times in a row ({}), giving up",
                id,
                failures,
                reason
            );
            if let Some(state) = supervision.write().await.get_mut(id) {
                state.gave_up = Some(reason);
            }
            break;
        }

        let delay = policy.backoff_for(failures);
        tracing::warn!(
            "Agent '{}' stopped unexpectedly ({}), restarting in {:?}",
            id,
            reason,
            delay
        );
        agent.reset().await;
        tokio::time::sleep(delay).await;

        if stop_requested(&supervision, id).await {
            break;
        }
        if let Some(state) = supervision.write().await.get_mut(id) {
            state.restarts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    // Simple test agent
    struct TestAgent {
        id: &'static str,
        status: RwLock<AgentStatus>,
        cancel: CancellationToken,
    }

    impl TestAgent {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                status: RwLock::new(AgentStatus::Idle),
                cancel: CancellationToken::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Agent for TestAgent {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Agent"
        }

        fn status(&self) -> AgentStatus {
            self.status
                .try_read()
                .map(|s| s.clone())
                .unwrap_or(AgentStatus::Idle)
        }

        async fn start(&self) -> Result<(), AgentError> {
            *self.status.write().await = AgentStatus::Running;
            self.cancel.cancelled().await;
            Ok(())
        }

        async fn stop(&self) -> Result<(), AgentError> {
            self.cancel.cancel();
            *self.status.write().await = AgentStatus::Stopped;
            Ok(())
        }
    }

    // Agent that fails a fixed number of runs, then behaves
    struct FlakyAgent {
        runs: AtomicU32,
        failing_runs: u32,
        panics: bool,
        resets: AtomicU32,
        cancel: CancellationToken,
    }

    impl FlakyAgent {
        fn new(failing_runs: u32, panics: bool) -> Self {
            Self {
                runs: AtomicU32::new(0),
                failing_runs,
                panics,
                resets: AtomicU32::new(0),
                cancel: CancellationToken::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Agent for FlakyAgent {
        fn id(&self) -> &'static str {
            "flaky"
        }

        fn name(&self) -> &'static str {
            "Flaky Agent"
        }

        fn status(&self) -> AgentStatus {
            AgentStatus::Running
        }

        async fn start(&self) -> Result<(), AgentError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= self.failing_runs {
                if self.panics {
                    panic!("run {} crashed", run);
                }
                return Err(AgentError::OperationFailed(format!("run {} failed", run)));
            }
            self.cancel.cancelled().await;
            Ok(())
        }

        async fn stop(&self) -> Result<(), AgentError> {
            self.cancel.cancel();
            Ok(())
        }

        async fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_policy(max_restarts: u32) -> RestartPolicy {
        RestartPolicy {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            max_restarts,
            stable_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_restarts: 10,
            stable_after: Duration::from_secs(300),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(500), Duration::from_secs(60));
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(60));
        assert_eq!(policy.max_restarts, 10);
        assert_eq!(RestartPolicy::never().max_restarts, 0);
    }

    #[tokio::test]
    async fn test_registered_agent_starts_idle() {
        let manager = AgentManager::new();
        manager.register(Arc::new(TestAgent::new("test-1"))).await;

        assert_eq!(manager.agent_status("test-1").await, Some(AgentStatus::Idle));
        assert_eq!(manager.agent_status("nonexistent").await, None);
        assert!(!manager.is_active("test-1").await);
    }

    #[tokio::test]
    async fn test_start_and_stop_agent() {
        let manager = AgentManager::new();
        manager.register(Arc::new(TestAgent::new("test-1"))).await;

        manager.start_agent("test-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_active("test-1").await);
        assert_eq!(manager.agent_status("test-1").await, Some(AgentStatus::Running));

        manager.stop_agent("test-1").await.unwrap();
        assert!(!manager.is_active("test-1").await);
        assert_eq!(manager.agent_status("test-1").await, Some(AgentStatus::Stopped));
        assert_eq!(manager.restart_count("test-1").await, 0);
    }

    #[tokio::test]
    async fn test_start_unknown_agent() {
        let manager = AgentManager::new();
        assert!(matches!(
            manager.start_agent("ghost").await,
            Err(AgentError::NotFound(_))
        ));
        assert!(manager.stop_agent("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_supervisor_restarts_failed_agent() {
        let manager = AgentManager::with_policy(fast_policy(5));
        let agent = Arc::new(FlakyAgent::new(2, false));
        manager.register(agent.clone()).await;

        manager.start_agent("flaky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(agent.runs.load(Ordering::SeqCst), 3);
        assert_eq!(agent.resets.load(Ordering::SeqCst), 2);
        assert_eq!(manager.restart_count("flaky").await, 2);
        assert!(manager.is_active("flaky").await);

        manager.stop_agent("flaky").await.unwrap();
        assert!(!manager.is_active("flaky").await);
    }

    #[tokio::test]
    async fn test_supervisor_restarts_panicked_agent() {
        let manager = AgentManager::with_policy(fast_policy(5));
        let agent = Arc::new(FlakyAgent::new(1, true));
        manager.register(agent.clone()).await;

        manager.start_agent("flaky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(agent.runs.load(Ordering::SeqCst), 2);
        assert!(manager.is_active("flaky").await);
        manager.stop_agent("flaky").await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_gives_up_after_max_restarts() {
        let manager = AgentManager::with_policy(fast_policy(2));
        let agent = Arc::new(FlakyAgent::new(u32::MAX, false));
        manager.register(agent.clone()).await;

        manager.start_agent("flaky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // First run plus two restarts
        assert_eq!(agent.runs.load(Ordering::SeqCst), 3);
        assert!(!manager.is_active("flaky").await);
        assert!(manager
            .agent_status("flaky")
            .await
            .map_or(false, |s| s.has_error()));

        // A manual start clears the give-up state
        manager.start_agent("flaky").await.unwrap();
        assert!(!manager
            .agent_status("flaky")
            .await
            .map_or(true, |s| s.has_error()));
        manager.stop_agent("flaky").await.unwrap();
    }

    #[tokio::test]
    async fn test_never_policy_does_not_restart() {
        let manager = AgentManager::with_policy(RestartPolicy::never());
        let agent = Arc::new(FlakyAgent::new(1, false));
        manager.register(agent.clone()).await;

        manager.start_agent("flaky").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(agent.runs.load(Ordering::SeqCst), 1);
        assert!(!manager.is_active("flaky").await);
    }
}
