use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{init_tracing, wait_until},
    mock_node::MockNode,
};
use anyhow::Result;
use futures::future::BoxFuture;
use mineloop::coordination::package::CandidateSolution;
use mineloop::pipeline::hooks::{AcceptAll, ConsensusHook};
use mineloop::pipeline::orchestrator::Orchestrator;
use mineloop::runtime::config::{LoopConfig, MiningMode};
use mineloop::CoordinationArea;
use serde_json::json;
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct RejectingHook;

impl ConsensusHook for RejectingHook {
    fn verify<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(false) })
    }

    fn confirm<'a>(&'a self, _candidate: &'a CandidateSolution) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async { Ok(true) })
    }
}

fn test_config(dir: &TempDir, mode: MiningMode, worker_command: Vec<&str>) -> LoopConfig {
    LoopConfig::builder()
        .rpc_url("http://localhost:8332")
        .rpc_user("user")
        .rpc_password("pass")
        .worker_count(1)
        .worker_command(worker_command.into_iter().map(String::from).collect())
        .coordination_dir(dir.path())
        .mode(mode)
        .block_target(1)
        .health_check_interval(Duration::from_millis(30))
        .template_refresh_interval(Duration::from_millis(100))
        .solution_poll_interval(Duration::from_millis(20))
        .shutdown_grace(Duration::from_millis(300))
        .restart_cooldown(Duration::from_millis(1))
        .build()
        .expect("config")
}

fn write_solution(area: &CoordinationArea, ordinal: u32, template_id: &str) {
    let solution = json!({
        "ordinal": ordinal,
        "template_id": template_id,
        "payload": {"nonce": 42},
        "found_at": 1,
    });
    std::fs::write(
        area.slot_dir(ordinal).join("solution.json"),
        serde_json::to_vec(&solution).unwrap(),
    )
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_submission_meets_fixed_count_target() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let node = Arc::new(MockNode::new(vec![json!({
        "height": 1,
        "previousblockhash": "aa",
    })]));

    let mut orchestrator = Orchestrator::new(
        test_config(&dir, MiningMode::FixedCount, vec!["sleep", "300"]),
        node.clone(),
        Arc::new(AcceptAll),
        CancellationToken::new(),
    );
    orchestrator.start().await?;

    let state = orchestrator.state();
    let area = CoordinationArea::new(dir.path());
    let package = area.read_package(1).await?.expect("initial package");
    write_solution(&area, 1, &package.source_template_id);

    let run = tokio::spawn(async move {
        let result = orchestrator.run().await;
        orchestrator.stop().await.ok();
        result
    });

    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop once the target is reached")
        .expect("run task should not panic")?;

    assert_eq!(state.submissions_succeeded(), 1);
    assert_eq!(node.submission_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn template_rotation_discards_stale_solutions() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let node = Arc::new(MockNode::new(vec![
        json!({"height": 1, "previousblockhash": "aa"}),
        json!({"height": 2, "previousblockhash": "bb"}),
    ]));

    let mut orchestrator = Orchestrator::new(
        test_config(&dir, MiningMode::Continuous, vec!["sleep", "300"]),
        node.clone(),
        Arc::new(AcceptAll),
        CancellationToken::new(),
    );
    orchestrator.start().await?;

    let state = orchestrator.state();
    let run_token = orchestrator.run_token();
    let area = CoordinationArea::new(dir.path());

    let first = area.read_package(1).await?.expect("initial package");
    assert_eq!(first.source_template_id, "1-aa");

    let run = tokio::spawn(async move {
        let result = orchestrator.run().await;
        orchestrator.stop().await.ok();
        result
    });

    // The refresh tick sees the successor template and rotates the workspace.
    let area_probe = area.clone();
    wait_until("template rotation", Duration::from_secs(5), || {
        let area = area_probe.clone();
        async move {
            matches!(
                area.read_package(1).await,
                Ok(Some(package)) if package.source_template_id == "2-bb"
            )
        }
    })
    .await?;

    // A solution for the superseded template goes nowhere.
    write_solution(&area, 1, "1-aa");
    let solution_path = area.slot_dir(1).join("solution.json");
    wait_until("stale solution pickup", Duration::from_secs(5), || {
        let path = solution_path.clone();
        async move { !path.exists() }
    })
    .await?;
    assert_eq!(node.submission_count(), 0);
    assert_eq!(state.submissions_succeeded(), 0);
    assert_eq!(state.submissions_failed(), 0);

    // A solution for the live template is submitted.
    write_solution(&area, 1, "2-bb");
    let state_probe = state.clone();
    wait_until("live solution submission", Duration::from_secs(5), || {
        let state = state_probe.clone();
        async move { state.submissions_succeeded() == 1 }
    })
    .await?;
    assert_eq!(node.submission_count(), 1);

    run_token.cancel();
    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop after cancellation")
        .expect("run task should not panic")?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consensus_gate_blocks_network_submission() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let node = Arc::new(MockNode::new(vec![json!({
        "height": 7,
        "previousblockhash": "cc",
    })]));

    let mut orchestrator = Orchestrator::new(
        test_config(&dir, MiningMode::Continuous, vec!["sleep", "300"]),
        node.clone(),
        Arc::new(RejectingHook),
        CancellationToken::new(),
    );
    orchestrator.start().await?;

    let state = orchestrator.state();
    let run_token = orchestrator.run_token();
    let area = CoordinationArea::new(dir.path());
    write_solution(&area, 1, "7-cc");

    let run = tokio::spawn(async move {
        let result = orchestrator.run().await;
        orchestrator.stop().await.ok();
        result
    });

    let state_probe = state.clone();
    wait_until("consensus rejection", Duration::from_secs(5), || {
        let state = state_probe.clone();
        async move { state.submissions_failed() == 1 }
    })
    .await?;
    assert_eq!(
        node.submission_count(),
        0,
        "a blocked candidate must never reach the network"
    );
    assert_eq!(state.submissions_succeeded(), 0);

    run_token.cancel();
    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop after cancellation")
        .expect("run task should not panic")?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashed_workers_are_relaunched() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let node = Arc::new(MockNode::new(vec![json!({
        "height": 3,
        "previousblockhash": "dd",
    })]));

    // `true` exits immediately, so every liveness sweep finds a dead worker.
    let mut orchestrator = Orchestrator::new(
        test_config(&dir, MiningMode::Continuous, vec!["true"]),
        node,
        Arc::new(AcceptAll),
        CancellationToken::new(),
    );
    orchestrator.start().await?;

    let state = orchestrator.state();
    let run_token = orchestrator.run_token();

    let run = tokio::spawn(async move {
        let result = orchestrator.run().await;
        orchestrator.stop().await.ok();
        result
    });

    let state_probe = state.clone();
    wait_until("worker relaunch", Duration::from_secs(5), || {
        let state = state_probe.clone();
        async move { state.worker_restarts() >= 1 }
    })
    .await?;

    run_token.cancel();
    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop after cancellation")
        .expect("run task should not panic")?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_submission_counts_as_failure() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let node = Arc::new(MockNode::new(vec![json!({
        "height": 9,
        "previousblockhash": "ee",
    })]));
    node.script_submit_outcome(mineloop::SubmitOutcome::Duplicate);

    let mut orchestrator = Orchestrator::new(
        test_config(&dir, MiningMode::Continuous, vec!["sleep", "300"]),
        node.clone(),
        Arc::new(AcceptAll),
        CancellationToken::new(),
    );
    orchestrator.start().await?;

    let state = orchestrator.state();
    let run_token = orchestrator.run_token();
    let area = CoordinationArea::new(dir.path());
    write_solution(&area, 1, "9-ee");

    let run = tokio::spawn(async move {
        let result = orchestrator.run().await;
        orchestrator.stop().await.ok();
        result
    });

    let state_probe = state.clone();
    wait_until("duplicate rejection", Duration::from_secs(5), || {
        let state = state_probe.clone();
        async move { state.submissions_failed() == 1 }
    })
    .await?;
    assert_eq!(node.submission_count(), 1);
    assert_eq!(state.submissions_succeeded(), 0);

    run_token.cancel();
    timeout(Duration::from_secs(5), run)
        .await
        .expect("run should stop after cancellation")
        .expect("run task should not panic")?;
    Ok(())
}
