pub mod coordination;
pub mod monitor;
pub mod pipeline;
pub mod rpc;
pub mod runtime;
pub mod submission;
pub mod supervisor;

pub use coordination::area::CoordinationArea;
pub use coordination::broadcast::TemplateBroadcaster;
pub use coordination::package::{CandidateSolution, WorkPackage, WorkerCommand};
pub use monitor::watcher::{ChainMonitor, ConnectOutcome, MonitorState};
pub use pipeline::hooks::{AcceptAll, ConsensusHook};
pub use pipeline::orchestrator::Orchestrator;
pub use pipeline::state::{Phase, PipelineSnapshot, PipelineState};
pub use rpc::{AsyncNodeClient, NodeClient, RpcError, SubmitOutcome};
pub use runtime::config::{LoopConfig, LoopConfigBuilder, LoopConfigParams, MiningMode};
pub use runtime::runner::Runner;
pub use runtime::telemetry::init_tracing;
pub use submission::coordinator::{AttemptOutcome, SubmissionCoordinator};
pub use supervisor::pool::{emergency_kill_all, DaemonSupervisor};
