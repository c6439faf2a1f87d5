//! Per-daemon bookkeeping for the worker pool supervisor.

use std::time::Instant;
use tokio::process::Child;
use uuid::Uuid;

/// Lifecycle status of one supervised worker daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl std::fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DaemonStatus::Stopped => "stopped",
            DaemonStatus::Starting => "starting",
            DaemonStatus::Running => "running",
            DaemonStatus::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// One worker daemon slot. The ordinal is stable across restarts; the
/// instance id is regenerated every launch so logs and coordination traffic
/// from a dead incarnation can never be mistaken for the live one.
#[derive(Debug)]
pub struct WorkerDaemon {
    pub ordinal: u32,
    pub instance_id: String,
    pub child: Option<Child>,
    pub status: DaemonStatus,
    pub launched_at: Option<Instant>,
    pub last_restart: Option<Instant>,
    pub restarts: u32,
    pub dead_letters: u32,
}

impl WorkerDaemon {
    pub fn new(ordinal: u32) -> Self {
        Self {
            ordinal,
            instance_id: fresh_instance_id(ordinal),
            child: None,
            status: DaemonStatus::Stopped,
            launched_at: None,
            last_restart: None,
            restarts: 0,
            dead_letters: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.status, DaemonStatus::Starting | DaemonStatus::Running)
    }

    /// OS process id of the live child, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|child| child.id())
    }
}

/// Generates a unique instance id for a launch on the given ordinal.
pub fn fresh_instance_id(ordinal: u32) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    format!("worker-{ordinal}-{}", &unique[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_unique_per_launch() {
        let first = fresh_instance_id(3);
        let second = fresh_instance_id(3);
        assert!(first.starts_with("worker-3-"));
        assert!(second.starts_with("worker-3-"));
        assert_ne!(first, second);
    }

    #[test]
    fn new_daemon_starts_stopped() {
        let daemon = WorkerDaemon::new(7);
        assert_eq!(daemon.ordinal, 7);
        assert_eq!(daemon.status, DaemonStatus::Stopped);
        assert!(!daemon.is_alive());
        assert!(daemon.pid().is_none());
        assert_eq!(daemon.restarts, 0);
    }
}
