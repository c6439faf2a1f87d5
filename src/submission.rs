//! Submission gating: consensus-checked, submit-once delivery of candidate
//! solutions with durable attempt records.

pub mod attempt;
pub mod coordinator;

pub use attempt::{NetworkVerdict, SubmissionAttempt};
pub use coordinator::{AttemptOutcome, SubmissionCoordinator};
