//! Worker daemon supervision: process launch, liveness sweeps with relaunch,
//! graceful teardown, and the marker-based emergency kill path.

pub mod daemon;
pub mod pool;

pub use daemon::{DaemonStatus, WorkerDaemon};
pub use pool::{emergency_kill_all, DaemonSupervisor, WORKER_ENV_MARKER};
