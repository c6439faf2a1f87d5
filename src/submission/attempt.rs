//! Record types describing one submission attempt, archived into the
//! coordination area's durable records.

use crate::coordination::package::unix_timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Network-side fate of a submitted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkVerdict {
    /// Not yet submitted, or submission was blocked locally.
    Pending,
    Accepted,
    Rejected,
}

/// Durable trail of one candidate's trip through the submission gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    pub attempt_id: String,
    pub source_ordinal: u32,
    pub template_id: String,
    pub consensus_passed: bool,
    pub verdict: NetworkVerdict,
    pub found_at: u64,
    pub checked_at: Option<u64>,
    pub submitted_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl SubmissionAttempt {
    pub fn new(source_ordinal: u32, template_id: impl Into<String>, found_at: u64) -> Self {
        Self {
            attempt_id: Uuid::new_v4().simple().to_string(),
            source_ordinal,
            template_id: template_id.into(),
            consensus_passed: false,
            verdict: NetworkVerdict::Pending,
            found_at,
            checked_at: None,
            submitted_at: None,
            rejection_reason: None,
        }
    }

    pub fn mark_consensus(&mut self, passed: bool) {
        self.consensus_passed = passed;
        self.checked_at = Some(unix_timestamp());
    }

    pub fn mark_submitted(&mut self, verdict: NetworkVerdict, reason: Option<String>) {
        self.verdict = verdict;
        self.submitted_at = Some(unix_timestamp());
        self.rejection_reason = reason;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_lifecycle_stamps_timestamps() {
        let mut attempt = SubmissionAttempt::new(2, "t5", 10);
        assert_eq!(attempt.verdict, NetworkVerdict::Pending);
        assert!(attempt.checked_at.is_none());

        attempt.mark_consensus(true);
        assert!(attempt.consensus_passed);
        assert!(attempt.checked_at.is_some());

        attempt.mark_submitted(NetworkVerdict::Accepted, None);
        assert_eq!(attempt.verdict, NetworkVerdict::Accepted);
        assert!(attempt.submitted_at.is_some());
    }

    #[test]
    fn attempt_ids_are_unique() {
        let first = SubmissionAttempt::new(0, "t1", 1);
        let second = SubmissionAttempt::new(0, "t1", 1);
        assert_ne!(first.attempt_id, second.attempt_id);
    }
}
