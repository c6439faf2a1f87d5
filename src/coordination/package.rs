use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lifecycle of one worker-scoped copy of the current template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Ready,
    Claimed,
    Stale,
}

/// One worker-scoped copy of the current unit of work, published into that
/// worker's coordination slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPackage {
    pub source_template_id: String,
    pub ordinal: u32,
    pub payload: serde_json::Value,
    pub issued_at: u64,
    pub state: PackageState,
}

impl WorkPackage {
    pub fn new(source_template_id: impl Into<String>, ordinal: u32, payload: serde_json::Value) -> Self {
        Self {
            source_template_id: source_template_id.into(),
            ordinal,
            payload,
            issued_at: unix_timestamp(),
            state: PackageState::Ready,
        }
    }
}

/// Out-of-band instruction written to a worker's command slot. Workers poll
/// the slot and obey without being restarted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    Stop,
    Resume {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_difficulty: Option<f64>,
    },
}

/// A candidate solution reported by a worker through its coordination slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSolution {
    pub ordinal: u32,
    pub template_id: String,
    pub payload: serde_json::Value,
    #[serde(default = "unix_timestamp")]
    pub found_at: u64,
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_package_starts_ready() {
        let package = WorkPackage::new("t1", 3, json!({"height": 100}));
        assert_eq!(package.state, PackageState::Ready);
        assert_eq!(package.ordinal, 3);
        assert!(package.issued_at > 0);
    }

    #[test]
    fn worker_command_serializes_with_tag() {
        let stop = serde_json::to_value(WorkerCommand::Stop).unwrap();
        assert_eq!(stop["command"], "stop");

        let resume = serde_json::to_value(WorkerCommand::Resume {
            target_difficulty: Some(2.5),
        })
        .unwrap();
        assert_eq!(resume["command"], "resume");
        assert_eq!(resume["target_difficulty"], 2.5);
    }

    #[test]
    fn candidate_solution_defaults_found_at() {
        let raw = json!({
            "ordinal": 2,
            "template_id": "t7",
            "payload": {"nonce": 42},
        });
        let candidate: CandidateSolution = serde_json::from_value(raw).unwrap();
        assert_eq!(candidate.ordinal, 2);
        assert!(candidate.found_at > 0);
    }
}
