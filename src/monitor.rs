//! Block-change monitoring: notification subscription with automatic
//! reconnect plus a best-block-hash polling fallback.

pub mod events;
pub mod watcher;

pub use events::{BlockEvent, BlockEventKind};
pub use watcher::{ChainMonitor, ConnectOutcome, MonitorState};
