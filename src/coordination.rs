//! Filesystem coordination between the orchestrator and worker daemons:
//! work packages, commands, candidate solutions, and template fan-out.

pub mod area;
pub mod broadcast;
pub mod package;

pub use area::CoordinationArea;
pub use broadcast::TemplateBroadcaster;
pub use package::{CandidateSolution, PackageState, WorkPackage, WorkerCommand};
