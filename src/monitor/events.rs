use crate::coordination::package::unix_timestamp;
use serde::{Deserialize, Serialize};

/// Kind of upstream state change carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockEventKind {
    /// A new block was connected upstream. Actionable: the current template
    /// is superseded.
    NewBlock,
    /// A new transaction entered the mempool. Informational only.
    NewTransaction,
}

/// One unit of upstream-state-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvent {
    pub kind: BlockEventKind,
    pub identifier: String,
    pub observed_at: u64,
}

impl BlockEvent {
    pub fn new(kind: BlockEventKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            observed_at: unix_timestamp(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.kind == BlockEventKind::NewBlock
    }
}

/// Wire frame read from a notification endpoint: one JSON object per line.
#[derive(Debug, Deserialize)]
pub(crate) struct NotificationFrame {
    pub kind: BlockEventKind,
    pub id: String,
}
