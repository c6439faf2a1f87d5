use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

/// Maximum number of entries retained in the recent-error ring.
pub const ERROR_RING_CAPACITY: usize = 32;

/// Coarse orchestration phase, advanced only by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FetchingTemplate,
    Distributing,
    Mining,
    Submitting,
    ResettingWorkspace,
}

impl Phase {
    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::FetchingTemplate => 1,
            Phase::Distributing => 2,
            Phase::Mining => 3,
            Phase::Submitting => 4,
            Phase::ResettingWorkspace => 5,
        }
    }

    fn from_u8(value: u8) -> Phase {
        match value {
            1 => Phase::FetchingTemplate,
            2 => Phase::Distributing,
            3 => Phase::Mining,
            4 => Phase::Submitting,
            5 => Phase::ResettingWorkspace,
            _ => Phase::Idle,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::FetchingTemplate => "fetching-template",
            Phase::Distributing => "distributing",
            Phase::Mining => "mining",
            Phase::Submitting => "submitting",
            Phase::ResettingWorkspace => "resetting-workspace",
        };
        write!(f, "{label}")
    }
}

/// Process-wide status surface shared by every pipeline component.
///
/// Constructed exactly once at orchestrator start with every field live from
/// the beginning; components only mutate it through the methods below. It is
/// never persisted.
#[derive(Debug)]
pub struct PipelineState {
    phase: AtomicU8,
    templates_processed: AtomicU64,
    submissions_succeeded: AtomicU64,
    submissions_failed: AtomicU64,
    worker_restarts: AtomicU64,
    block_events: AtomicU64,
    recent_errors: Mutex<VecDeque<String>>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle.as_u8()),
            templates_processed: AtomicU64::new(0),
            submissions_succeeded: AtomicU64::new(0),
            submissions_failed: AtomicU64::new(0),
            worker_restarts: AtomicU64::new(0),
            block_events: AtomicU64::new(0),
            recent_errors: Mutex::new(VecDeque::with_capacity(ERROR_RING_CAPACITY)),
        }
    }
}

impl PipelineState {
    pub fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn record_template_processed(&self) {
        self.templates_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_success(&self) {
        self.submissions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_failure(&self) {
        self.submissions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_restart(&self) {
        self.worker_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_event(&self) {
        self.block_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Appends to the bounded error ring, evicting the oldest entry when full.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "mineloop::state", error = %message, "pipeline error recorded");
        let mut ring = self.recent_errors.lock().unwrap();
        if ring.len() == ERROR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(message);
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.recent_errors.lock().unwrap().iter().cloned().collect()
    }

    pub fn templates_processed(&self) -> u64 {
        self.templates_processed.load(Ordering::Relaxed)
    }

    pub fn submissions_succeeded(&self) -> u64 {
        self.submissions_succeeded.load(Ordering::Relaxed)
    }

    pub fn submissions_failed(&self) -> u64 {
        self.submissions_failed.load(Ordering::Relaxed)
    }

    pub fn worker_restarts(&self) -> u64 {
        self.worker_restarts.load(Ordering::Relaxed)
    }

    pub fn block_events(&self) -> u64 {
        self.block_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            phase: self.phase(),
            templates_processed: self.templates_processed(),
            submissions_succeeded: self.submissions_succeeded(),
            submissions_failed: self.submissions_failed(),
            worker_restarts: self.worker_restarts(),
            block_events: self.block_events(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct PipelineSnapshot {
    pub phase: Phase,
    pub templates_processed: u64,
    pub submissions_succeeded: u64,
    pub submissions_failed: u64,
    pub worker_restarts: u64,
    pub block_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips() {
        let state = PipelineState::default();
        assert_eq!(state.phase(), Phase::Idle);

        for phase in [
            Phase::FetchingTemplate,
            Phase::Distributing,
            Phase::Mining,
            Phase::Submitting,
            Phase::ResettingWorkspace,
            Phase::Idle,
        ] {
            state.set_phase(phase);
            assert_eq!(state.phase(), phase);
        }
    }

    #[test]
    fn counters_accumulate() {
        let state = PipelineState::default();
        state.record_template_processed();
        state.record_template_processed();
        state.record_submission_success();
        state.record_submission_failure();
        state.record_worker_restart();
        state.record_block_event();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.templates_processed, 2);
        assert_eq!(snapshot.submissions_succeeded, 1);
        assert_eq!(snapshot.submissions_failed, 1);
        assert_eq!(snapshot.worker_restarts, 1);
        assert_eq!(snapshot.block_events, 1);
    }

    #[test]
    fn error_ring_is_bounded() {
        let state = PipelineState::default();
        for i in 0..(ERROR_RING_CAPACITY + 5) {
            state.record_error(format!("error {i}"));
        }

        let errors = state.recent_errors();
        assert_eq!(errors.len(), ERROR_RING_CAPACITY);
        assert_eq!(errors.first().map(String::as_str), Some("error 5"));
        assert_eq!(
            errors.last().map(String::as_str),
            Some(format!("error {}", ERROR_RING_CAPACITY + 4).as_str())
        );
    }
}
