//! Submission gate between the worker pool and the network.
//!
//! Candidates are processed strictly in arrival order. Each one passes the
//! consensus gate before any network traffic happens, goes out at most once,
//! and leaves a durable [`SubmissionAttempt`] record behind. Candidates for a
//! template superseded by a workspace reset are discarded without comment to
//! the network.

use crate::coordination::area::CoordinationArea;
use crate::coordination::package::CandidateSolution;
use crate::pipeline::hooks::ConsensusHook;
use crate::pipeline::state::PipelineState;
use crate::rpc::client::{NodeClient, SubmitOutcome};
use crate::submission::attempt::{NetworkVerdict, SubmissionAttempt};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::Mutex;

/// What became of one candidate after its trip through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The candidate targeted a superseded template; nothing reached the
    /// network and no counter moved.
    Stale,
    /// The consensus gate blocked the candidate before any network call.
    RejectedLocally,
    Accepted,
    Rejected,
}

pub struct SubmissionCoordinator {
    node: Arc<dyn NodeClient>,
    consensus: Arc<dyn ConsensusHook>,
    state: Arc<PipelineState>,
    area: Arc<CoordinationArea>,
    current_template: Mutex<Option<String>>,
}

impl SubmissionCoordinator {
    pub fn new(
        node: Arc<dyn NodeClient>,
        consensus: Arc<dyn ConsensusHook>,
        state: Arc<PipelineState>,
        area: Arc<CoordinationArea>,
    ) -> Self {
        Self {
            node,
            consensus,
            state,
            area,
            current_template: Mutex::new(None),
        }
    }

    /// Records the template id of the latest distribution. Only candidates
    /// for this template are eligible for submission.
    pub fn note_template(&self, template_id: &str) {
        *self.current_template.lock().unwrap() = Some(template_id.to_owned());
    }

    /// Records a workspace reset. Until the next distribution every arriving
    /// candidate is stale by definition.
    pub fn note_workspace_reset(&self) {
        *self.current_template.lock().unwrap() = None;
    }

    pub fn current_template(&self) -> Option<String> {
        self.current_template.lock().unwrap().clone()
    }

    /// Runs one candidate through the gate: staleness check, consensus
    /// verification, a single network submission, post-submission
    /// confirmation, durable record.
    pub async fn process(&self, candidate: &CandidateSolution) -> Result<AttemptOutcome> {
        let current = self.current_template();
        if current.as_deref() != Some(candidate.template_id.as_str()) {
            tracing::info!(
                target: "mineloop::submission",
                ordinal = candidate.ordinal,
                candidate_template = %candidate.template_id,
                current_template = current.as_deref().unwrap_or("<none>"),
                "discarding stale candidate"
            );
            return Ok(AttemptOutcome::Stale);
        }

        let mut attempt =
            SubmissionAttempt::new(candidate.ordinal, &candidate.template_id, candidate.found_at);

        let verdict = match self.consensus.verify(candidate).await {
            Ok(passed) => passed,
            Err(err) => {
                self.state
                    .record_error(format!("consensus verification failed: {err:#}"));
                false
            }
        };
        attempt.mark_consensus(verdict);

        if !verdict {
            self.state.record_submission_failure();
            tracing::warn!(
                target: "mineloop::submission",
                ordinal = candidate.ordinal,
                template = %candidate.template_id,
                "candidate failed consensus verification; not submitted"
            );
            self.archive(&attempt).await;
            return Ok(AttemptOutcome::RejectedLocally);
        }

        // Single shot: a transport failure here leaves the fate of the
        // candidate unknown, so it is surfaced instead of retried.
        let outcome = match self.node.submit_candidate(&candidate.payload).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.state.record_submission_failure();
                self.archive(&attempt).await;
                return Err(err).context("candidate submission failed in transit");
            }
        };

        match outcome {
            SubmitOutcome::Accepted => {
                attempt.mark_submitted(NetworkVerdict::Accepted, None);
                self.state.record_submission_success();
                tracing::info!(
                    target: "mineloop::submission",
                    ordinal = candidate.ordinal,
                    template = %candidate.template_id,
                    attempt_id = %attempt.attempt_id,
                    "candidate accepted by the network"
                );

                match self.consensus.confirm(candidate).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            target: "mineloop::submission",
                            attempt_id = %attempt.attempt_id,
                            "post-submission confirmation negative"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            target: "mineloop::submission",
                            attempt_id = %attempt.attempt_id,
                            error = %err,
                            "post-submission confirmation failed"
                        );
                    }
                }

                self.archive(&attempt).await;
                Ok(AttemptOutcome::Accepted)
            }
            SubmitOutcome::Duplicate => {
                attempt.mark_submitted(NetworkVerdict::Rejected, Some("duplicate".into()));
                self.state.record_submission_failure();
                tracing::warn!(
                    target: "mineloop::submission",
                    ordinal = candidate.ordinal,
                    template = %candidate.template_id,
                    "network already knows this candidate; recorded as rejected"
                );
                self.archive(&attempt).await;
                Ok(AttemptOutcome::Rejected)
            }
            SubmitOutcome::Rejected(reason) => {
                attempt.mark_submitted(NetworkVerdict::Rejected, Some(reason.clone()));
                self.state.record_submission_failure();
                tracing::warn!(
                    target: "mineloop::submission",
                    ordinal = candidate.ordinal,
                    template = %candidate.template_id,
                    reason = %reason,
                    "candidate rejected by the network"
                );
                self.archive(&attempt).await;
                Ok(AttemptOutcome::Rejected)
            }
        }
    }

    async fn archive(&self, attempt: &SubmissionAttempt) {
        if let Err(err) = self.area.archive_submission(&attempt.attempt_id, attempt).await {
            tracing::warn!(
                target: "mineloop::submission",
                attempt_id = %attempt.attempt_id,
                error = %err,
                "failed to archive submission record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedNode {
        outcome: SubmitOutcome,
        submissions: AtomicUsize,
    }

    impl ScriptedNode {
        fn new(outcome: SubmitOutcome) -> Self {
            Self {
                outcome,
                submissions: AtomicUsize::new(0),
            }
        }
    }

    impl NodeClient for ScriptedNode {
        fn fetch_template<'a>(&'a self) -> BoxFuture<'a, Result<Value>> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn submit_candidate<'a>(&'a self, _payload: &'a Value) -> BoxFuture<'a, Result<SubmitOutcome>> {
            Box::pin(async {
                self.submissions.fetch_add(1, Ordering::SeqCst);
                Ok(self.outcome.clone())
            })
        }

        fn best_block_hash<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
            Box::pin(async { Ok("hash".into()) })
        }
    }

    struct RejectingHook;

    impl ConsensusHook for RejectingHook {
        fn verify<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async { Ok(false) })
        }

        fn confirm<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
            Box::pin(async { Ok(true) })
        }
    }

    fn candidate(template_id: &str) -> CandidateSolution {
        CandidateSolution {
            ordinal: 1,
            template_id: template_id.into(),
            payload: json!({"nonce": 99}),
            found_at: 1,
        }
    }

    fn coordinator(
        node: Arc<ScriptedNode>,
        consensus: Arc<dyn ConsensusHook>,
    ) -> (TempDir, Arc<PipelineState>, SubmissionCoordinator) {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(PipelineState::default());
        let area = Arc::new(CoordinationArea::new(dir.path()));
        let coordinator =
            SubmissionCoordinator::new(node, consensus, state.clone(), area);
        (dir, state, coordinator)
    }

    #[tokio::test]
    async fn accepted_candidate_counts_as_success() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Accepted));
        let (_dir, state, coordinator) =
            coordinator(node.clone(), Arc::new(crate::pipeline::hooks::AcceptAll));
        coordinator.note_template("t1");

        let outcome = coordinator.process(&candidate("t1")).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Accepted);
        assert_eq!(state.submissions_succeeded(), 1);
        assert_eq!(state.submissions_failed(), 0);
        assert_eq!(node.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consensus_failure_blocks_submission() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Accepted));
        let (_dir, state, coordinator) = coordinator(node.clone(), Arc::new(RejectingHook));
        coordinator.note_template("t1");

        let outcome = coordinator.process(&candidate("t1")).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::RejectedLocally);
        assert_eq!(state.submissions_failed(), 1);
        assert_eq!(
            node.submissions.load(Ordering::SeqCst),
            0,
            "blocked candidate must never reach the network"
        );
    }

    #[tokio::test]
    async fn duplicate_is_recorded_as_rejected() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Duplicate));
        let (_dir, state, coordinator) =
            coordinator(node.clone(), Arc::new(crate::pipeline::hooks::AcceptAll));
        coordinator.note_template("t1");

        let outcome = coordinator.process(&candidate("t1")).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Rejected);
        assert_eq!(state.submissions_succeeded(), 0);
        assert_eq!(state.submissions_failed(), 1);
    }

    #[tokio::test]
    async fn candidates_after_workspace_reset_are_stale() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Accepted));
        let (_dir, state, coordinator) =
            coordinator(node.clone(), Arc::new(crate::pipeline::hooks::AcceptAll));

        coordinator.note_template("t1");
        coordinator.note_workspace_reset();

        // Both late arrivals for the cleared template are discarded.
        let first = coordinator.process(&candidate("t1")).await.unwrap();
        let second = coordinator.process(&candidate("t1")).await.unwrap();
        assert_eq!(first, AttemptOutcome::Stale);
        assert_eq!(second, AttemptOutcome::Stale);
        assert_eq!(state.submissions_succeeded(), 0);
        assert_eq!(state.submissions_failed(), 0);
        assert_eq!(node.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn candidate_for_old_template_is_stale() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Accepted));
        let (_dir, _state, coordinator) =
            coordinator(node.clone(), Arc::new(crate::pipeline::hooks::AcceptAll));

        coordinator.note_template("t2");
        let outcome = coordinator.process(&candidate("t1")).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Stale);
    }

    #[tokio::test]
    async fn accepted_attempt_leaves_durable_record() {
        let node = Arc::new(ScriptedNode::new(SubmitOutcome::Accepted));
        let dir = TempDir::new().unwrap();
        let state = Arc::new(PipelineState::default());
        let area = Arc::new(CoordinationArea::new(dir.path()));
        area.ensure_layout(&[]).await.unwrap();
        let coordinator = SubmissionCoordinator::new(
            node,
            Arc::new(crate::pipeline::hooks::AcceptAll),
            state,
            area,
        );
        coordinator.note_template("t1");

        coordinator.process(&candidate("t1")).await.unwrap();

        let records: Vec<_> = std::fs::read_dir(dir.path().join("records"))
            .unwrap()
            .collect();
        assert_eq!(records.len(), 1);
    }
}
