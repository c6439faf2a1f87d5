//! Consensus hook trait consumed by the submission coordinator.
//!
//! A hook decides whether a candidate solution may go out to the network
//! (`verify`) and, after an accepted submission, whether the network actually
//! kept the block (`confirm`). The orchestrator ships with [`AcceptAll`] for
//! deployments without an external consensus layer; operators with one plug
//! in their own implementation.

use crate::coordination::package::CandidateSolution;
use anyhow::Result;
use futures::future::BoxFuture;

pub trait ConsensusHook: Send + Sync {
    /// Pre-submission gate. `Ok(false)` means the candidate must not be
    /// submitted; `Err` is treated the same way but is also recorded as a
    /// pipeline error.
    fn verify<'a>(&'a self, candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>>;

    /// Post-submission check, invoked only after the network accepted the
    /// candidate. A negative or failed confirmation is logged, never fatal:
    /// the block is already out.
    fn confirm<'a>(&'a self, candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>>;
}

/// Default hook: every candidate passes both gates.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ConsensusHook for AcceptAll {
    fn verify<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn confirm<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}
