use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::Notify;

/// Agent lifecycle: Stopped -> Starting -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum AgentState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl From<u8> for AgentState {
    fn from(value: u8) -> Self {
        match value {
            1 => AgentState::Starting,
            2 => AgentState::Running,
            3 => AgentState::Stopping,
            _ => AgentState::Stopped,
        }
    }
}

/// How a polling wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Interrupted,
}

/// Shared lifecycle flag of one agent
///
/// Every transition is a compare-and-swap on a single atomic. Each start
/// bumps a generation counter so a polling task from an earlier run can
/// tell it has been superseded. Each run also gets its own wake-up, so an
/// interrupt nobody consumed in one run is not seen by the next.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

#[derive(Debug, Default)]
struct LifecycleInner {
    state: AtomicU8,
    generation: AtomicU64,
    wake: Mutex<Arc<Notify>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AgentState {
        self.inner.state.load(Ordering::SeqCst).into()
    }

    /// Starting counts as running: notifications raised during startup are delivered
    pub fn is_running(&self) -> bool {
        matches!(self.state(), AgentState::Starting | AgentState::Running)
    }

    /// Whether the run identified by `generation` should keep going
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Stopped -> Starting. Returns the generation of the new run, or `None`
    /// if the agent was not stopped.
    pub fn begin_start(&self) -> Option<u64> {
        if !self.transition(AgentState::Stopped, AgentState::Starting) {
            return None;
        }

        let mut wake = self.inner.wake.lock();
        *wake = Arc::new(Notify::new());
        Some(self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Starting -> Running. Does nothing if a stop came in meanwhile.
    pub fn finish_start(&self) -> bool {
        self.transition(AgentState::Starting, AgentState::Running)
    }

    /// Starting -> Stopped, after a failed start
    pub fn abort_start(&self) {
        self.transition(AgentState::Starting, AgentState::Stopped);
    }

    /// Running or Starting -> Stopping
    pub fn begin_stop(&self) -> bool {
        self.transition(AgentState::Running, AgentState::Stopping)
            || self.transition(AgentState::Starting, AgentState::Stopping)
    }

    /// Stopping -> Stopped
    pub fn finish_stop(&self) {
        self.transition(AgentState::Stopping, AgentState::Stopped);
    }

    /// Cut the current (or next) polling wait of this run short
    pub fn interrupt(&self) {
        self.inner.wake.lock().notify_one();
    }

    /// Sleep for `interval` unless interrupted first. A superseded run
    /// returns at once.
    pub async fn wait(&self, generation: u64, interval: Duration) -> Wait {
        let wake = {
            let wake = self.inner.wake.lock();
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return Wait::Interrupted;
            }
            Arc::clone(&wake)
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => Wait::Elapsed,
            _ = wake.notified() => Wait::Interrupted,
        }
    }

    fn transition(&self, from: AgentState, to: AgentState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), AgentState::Stopped);

        let generation = lifecycle.begin_start().unwrap();
        assert_eq!(lifecycle.state(), AgentState::Starting);
        assert!(lifecycle.is_running());
        assert!(lifecycle.begin_start().is_none());

        assert!(lifecycle.finish_start());
        assert_eq!(lifecycle.state(), AgentState::Running);
        assert!(lifecycle.is_current(generation));

        assert!(lifecycle.begin_stop());
        assert!(!lifecycle.is_running());
        assert!(!lifecycle.begin_stop());
        lifecycle.finish_stop();
        assert_eq!(lifecycle.state(), AgentState::Stopped);
    }

    #[test]
    fn test_restart_supersedes_previous_generation() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.begin_start().unwrap();
        lifecycle.finish_start();
        lifecycle.begin_stop();
        lifecycle.finish_stop();

        let second = lifecycle.begin_start().unwrap();
        assert_ne!(first, second);
        assert!(!lifecycle.is_current(first));
        assert!(lifecycle.is_current(second));
    }

    #[test]
    fn test_stop_during_start_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start().unwrap();
        assert!(lifecycle.begin_stop());
        lifecycle.finish_stop();
        assert!(!lifecycle.finish_start());
        assert_eq!(lifecycle.state(), AgentState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AgentState::Running.to_string(), "running");
        assert_eq!(AgentState::Stopped.to_string(), "stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_or_is_interrupted() {
        let lifecycle = Lifecycle::new();
        let generation = lifecycle.begin_start().unwrap();
        assert_eq!(
            lifecycle.wait(generation, Duration::from_millis(10)).await,
            Wait::Elapsed
        );

        lifecycle.interrupt();
        assert_eq!(
            lifecycle.wait(generation, Duration::from_secs(3600)).await,
            Wait::Interrupted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconsumed_interrupt_does_not_leak_into_next_run() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.begin_start().unwrap();
        lifecycle.finish_start();

        // Stop lands while nobody is waiting
        lifecycle.begin_stop();
        lifecycle.interrupt();
        lifecycle.finish_stop();

        let second = lifecycle.begin_start().unwrap();
        lifecycle.finish_start();
        assert_eq!(
            lifecycle.wait(second, Duration::from_millis(10)).await,
            Wait::Elapsed
        );
        assert_eq!(
            lifecycle.wait(first, Duration::from_secs(3600)).await,
            Wait::Interrupted
        );
    }
}
