//! Filesystem-backed coordination area shared between the orchestrator and
//! worker processes.
//!
//! Logically this is a key-value store keyed by worker ordinal: each slot
//! holds at most one current work package plus a command file, and workers
//! drop candidate solutions into their own slot. Every write goes through a
//! temporary file followed by a rename so readers never observe a
//! half-written value. Durable submission records live under `records/`,
//! which workspace clears never touch.

use crate::coordination::package::{unix_timestamp, CandidateSolution, WorkPackage, WorkerCommand};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

const PACKAGE_FILE: &str = "package.json";
const COMMAND_FILE: &str = "command.json";
const SOLUTION_FILE: &str = "solution.json";
const RECORDS_DIR: &str = "records";

#[derive(Debug, Clone)]
pub struct CoordinationArea {
    root: PathBuf,
}

impl CoordinationArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, ordinal: u32) -> PathBuf {
        self.root.join(format!("worker_{ordinal}"))
    }

    fn package_path(&self, ordinal: u32) -> PathBuf {
        self.slot_dir(ordinal).join(PACKAGE_FILE)
    }

    fn command_path(&self, ordinal: u32) -> PathBuf {
        self.slot_dir(ordinal).join(COMMAND_FILE)
    }

    fn solution_path(&self, ordinal: u32) -> PathBuf {
        self.slot_dir(ordinal).join(SOLUTION_FILE)
    }

    fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    /// Creates the root, one slot directory per ordinal, and the durable
    /// records directory. Idempotent.
    pub async fn ensure_layout(&self, ordinals: &[u32]) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create coordination root {:?}", self.root))?;
        fs::create_dir_all(self.records_dir())
            .await
            .context("failed to create records directory")?;
        for ordinal in ordinals {
            let dir = self.slot_dir(*ordinal);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create slot directory {dir:?}"))?;
        }
        Ok(())
    }

    /// Publishes a work package into its slot in one indivisible step.
    pub async fn publish_package(&self, package: &WorkPackage) -> Result<()> {
        self.write_atomic(self.package_path(package.ordinal), package)
            .await
    }

    pub async fn read_package(&self, ordinal: u32) -> Result<Option<WorkPackage>> {
        read_json(self.package_path(ordinal)).await
    }

    pub async fn remove_package(&self, ordinal: u32) -> Result<()> {
        remove_if_present(self.package_path(ordinal)).await
    }

    /// Writes an out-of-band command into the ordinal's command slot.
    pub async fn write_command(&self, ordinal: u32, command: &WorkerCommand) -> Result<()> {
        self.write_atomic(self.command_path(ordinal), command).await
    }

    /// Removes and returns the candidate solution a worker dropped into its
    /// slot, if any. Unparseable files are discarded with a warning so one
    /// corrupt worker cannot wedge the scan.
    pub async fn take_solution(&self, ordinal: u32) -> Result<Option<CandidateSolution>> {
        let path = self.solution_path(ordinal);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read solution {path:?}"))
            }
        };

        remove_if_present(path.clone()).await?;

        match serde_json::from_slice::<CandidateSolution>(&raw) {
            Ok(candidate) => Ok(Some(candidate)),
            Err(err) => {
                tracing::warn!(
                    target: "mineloop::coordination",
                    ordinal,
                    error = %err,
                    "discarding unparseable solution file"
                );
                Ok(None)
            }
        }
    }

    /// Wipes every file inside the given slots (packages, commands, stray
    /// solutions, worker scratch). Slot directories themselves and the
    /// records directory survive.
    pub async fn clear_slots(&self, ordinals: &[u32]) -> Result<()> {
        for ordinal in ordinals {
            let dir = self.slot_dir(*ordinal);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to list slot {dir:?}"))
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .with_context(|| format!("failed to iterate slot {dir:?}"))?
            {
                let path = entry.path();
                let result = if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    fs::remove_dir_all(&path).await
                } else {
                    fs::remove_file(&path).await
                };
                if let Err(err) = result {
                    tracing::warn!(
                        target: "mineloop::coordination",
                        path = ?path,
                        error = %err,
                        "could not delete slot entry during clear"
                    );
                }
            }
        }
        Ok(())
    }

    /// Appends a durable submission record. Records are never touched by
    /// [`CoordinationArea::clear_slots`].
    pub async fn archive_submission<T: Serialize>(&self, label: &str, record: &T) -> Result<()> {
        let path = self
            .records_dir()
            .join(format!("submission_{}_{label}.json", unix_timestamp()));
        self.write_atomic(path, record).await
    }

    async fn write_atomic<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<()> {
        let serialized =
            serde_json::to_vec_pretty(value).context("failed to serialize coordination value")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &serialized)
            .await
            .with_context(|| format!("failed to write temporary file {tmp:?}"))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to publish {path:?}"))?;
        Ok(())
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: PathBuf) -> Result<Option<T>> {
    match fs::read(&path).await {
        Ok(raw) => {
            let value = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {path:?}"))?;
            Ok(Some(value))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {path:?}")),
    }
}

async fn remove_if_present(path: PathBuf) -> Result<()> {
    match fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {path:?}")),
    }
}
