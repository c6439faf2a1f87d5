//! Fans one upstream template out into per-worker work packages.
//!
//! The broadcaster owns the only write path into the coordination area's
//! package slots and enforces the ordering rule of the pipeline: a
//! distribution for a new template must be preceded by a workspace clear, so
//! no worker can keep mining a superseded template.

use crate::coordination::area::CoordinationArea;
use crate::coordination::package::{PackageState, WorkPackage};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct BroadcastLedger {
    packages: HashMap<u32, WorkPackage>,
    last_template: Option<String>,
    cleared_since_distribute: bool,
}

pub struct TemplateBroadcaster {
    area: Arc<CoordinationArea>,
    ledger: Mutex<BroadcastLedger>,
}

impl TemplateBroadcaster {
    pub fn new(area: Arc<CoordinationArea>) -> Self {
        Self {
            area,
            ledger: Mutex::new(BroadcastLedger {
                packages: HashMap::new(),
                last_template: None,
                // A fresh broadcaster has nothing to supersede.
                cleared_since_distribute: true,
            }),
        }
    }

    /// Writes one work package per target ordinal, superseding any previous
    /// package for that ordinal. Returns the number of slots written.
    ///
    /// Distributing a template id different from the previous one without an
    /// intervening [`TemplateBroadcaster::clear_workspace`] is rejected:
    /// stale packages from the superseded template could still be live.
    pub async fn distribute(
        &self,
        template_id: &str,
        payload: &serde_json::Value,
        ordinals: &[u32],
    ) -> Result<usize> {
        let mut ledger = self.ledger.lock().await;

        if let Some(last) = &ledger.last_template {
            if last != template_id && !ledger.cleared_since_distribute {
                bail!(
                    "distribute of template {template_id} without clearing workspace \
                     after template {last}"
                );
            }
        }

        let mut written = 0;
        for ordinal in ordinals {
            if let Some(previous) = ledger.packages.get_mut(ordinal) {
                previous.state = PackageState::Stale;
                self.area.remove_package(*ordinal).await?;
            }

            let package = WorkPackage::new(template_id, *ordinal, payload.clone());
            self.area.publish_package(&package).await?;
            ledger.packages.insert(*ordinal, package);
            written += 1;
        }

        ledger.last_template = Some(template_id.to_owned());
        ledger.cleared_since_distribute = false;

        tracing::info!(
            target: "mineloop::broadcast",
            template = template_id,
            slots = written,
            "template distributed"
        );
        Ok(written)
    }

    /// Marks every live package stale, wipes the slots, and arms the next
    /// distribution. Invoked after a block event or an accepted submission.
    pub async fn clear_workspace(&self, ordinals: &[u32]) -> Result<()> {
        let mut ledger = self.ledger.lock().await;

        for package in ledger.packages.values_mut() {
            package.state = PackageState::Stale;
        }
        self.area.clear_slots(ordinals).await?;
        ledger.packages.clear();
        ledger.cleared_since_distribute = true;

        tracing::info!(target: "mineloop::broadcast", "workspace cleared");
        Ok(())
    }

    /// Ordinals that currently hold a ready package.
    pub async fn ready_ordinals(&self) -> Vec<u32> {
        let ledger = self.ledger.lock().await;
        let mut ordinals: Vec<u32> = ledger
            .packages
            .iter()
            .filter(|(_, package)| package.state == PackageState::Ready)
            .map(|(ordinal, _)| *ordinal)
            .collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Template id of the most recent distribution, if any.
    pub async fn current_template(&self) -> Option<String> {
        self.ledger.lock().await.last_template.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_broadcaster(ordinals: &[u32]) -> (TempDir, Arc<CoordinationArea>, TemplateBroadcaster) {
        let dir = TempDir::new().expect("tempdir");
        let area = Arc::new(CoordinationArea::new(dir.path()));
        area.ensure_layout(ordinals).await.unwrap();
        let broadcaster = TemplateBroadcaster::new(area.clone());
        (dir, area, broadcaster)
    }

    #[tokio::test]
    async fn distribute_writes_one_ready_package_per_ordinal() {
        let ordinals = [1, 2, 3];
        let (_dir, area, broadcaster) = test_broadcaster(&ordinals).await;

        let written = broadcaster
            .distribute("t1", &json!({"height": 1}), &ordinals)
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(broadcaster.ready_ordinals().await, vec![1, 2, 3]);

        for ordinal in ordinals {
            let package = area.read_package(ordinal).await.unwrap().expect("package");
            assert_eq!(package.source_template_id, "t1");
            assert_eq!(package.state, PackageState::Ready);
        }
    }

    #[tokio::test]
    async fn redistribution_of_same_template_supersedes_in_place() {
        let ordinals = [1, 2];
        let (_dir, area, broadcaster) = test_broadcaster(&ordinals).await;

        broadcaster
            .distribute("t1", &json!({"round": 1}), &ordinals)
            .await
            .unwrap();
        broadcaster
            .distribute("t1", &json!({"round": 2}), &ordinals)
            .await
            .unwrap();

        // Still exactly one ready package per ordinal.
        assert_eq!(broadcaster.ready_ordinals().await, vec![1, 2]);
        let package = area.read_package(1).await.unwrap().expect("package");
        assert_eq!(package.payload["round"], 2);
    }

    #[tokio::test]
    async fn new_template_requires_prior_clear() {
        let ordinals = [1];
        let (_dir, _area, broadcaster) = test_broadcaster(&ordinals).await;

        broadcaster
            .distribute("t1", &json!({}), &ordinals)
            .await
            .unwrap();

        let err = broadcaster
            .distribute("t2", &json!({}), &ordinals)
            .await
            .unwrap_err();
        assert!(
            format!("{err}").contains("without clearing workspace"),
            "ordering violation should be rejected"
        );

        broadcaster.clear_workspace(&ordinals).await.unwrap();
        broadcaster
            .distribute("t2", &json!({}), &ordinals)
            .await
            .unwrap();
        assert_eq!(
            broadcaster.current_template().await.as_deref(),
            Some("t2")
        );
    }

    #[tokio::test]
    async fn clear_workspace_stales_all_packages() {
        let ordinals = [1, 2, 3];
        let (_dir, area, broadcaster) = test_broadcaster(&ordinals).await;

        broadcaster
            .distribute("t1", &json!({}), &ordinals)
            .await
            .unwrap();
        broadcaster.clear_workspace(&ordinals).await.unwrap();

        assert!(broadcaster.ready_ordinals().await.is_empty());
        for ordinal in ordinals {
            assert!(area.read_package(ordinal).await.unwrap().is_none());
        }
    }
}
