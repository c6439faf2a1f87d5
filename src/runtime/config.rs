use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TEMPLATE_REFRESH_SECS: u64 = 20;
const DEFAULT_HEALTH_CHECK_SECS: u64 = 5;
const DEFAULT_SOLUTION_POLL_MS: u64 = 500;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_RESTART_COOLDOWN_SECS: u64 = 3;
const DEFAULT_ACTIVATION_WINDOW_SECS: u64 = 40 * 60;

/// Hard ceiling on accepted blocks per day in fixed-count mode. The network
/// produces one block roughly every ten minutes, so more than this is not
/// reachable anyway.
pub const MAX_BLOCKS_PER_DAY: u32 = 144;

/// Selects how the orchestrator behaves after an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MiningMode {
    /// Keep mining indefinitely.
    Continuous,
    /// Stop after `block_target` accepted submissions.
    FixedCount,
    /// Park the worker pool after each accepted submission and wake it again
    /// after the activation window elapses.
    OnDemand,
}

impl std::fmt::Display for MiningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiningMode::Continuous => write!(f, "continuous"),
            MiningMode::FixedCount => write!(f, "fixed-count"),
            MiningMode::OnDemand => write!(f, "on-demand"),
        }
    }
}

/// Runtime configuration for the orchestration pipeline.
///
/// All instances must be constructed via [`LoopConfig::builder`] or
/// [`LoopConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    rpc_url: String,
    rpc_user: String,
    rpc_password: String,
    worker_count: usize,
    worker_command: Vec<String>,
    coordination_dir: PathBuf,
    notify_endpoints: Vec<String>,
    mode: MiningMode,
    block_target: u32,
    activation_window: Duration,
    rpc_timeout: Duration,
    template_refresh_interval: Duration,
    health_check_interval: Duration,
    solution_poll_interval: Duration,
    shutdown_grace: Duration,
    restart_cooldown: Duration,
}

pub struct LoopConfigParams {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub worker_count: usize,
    pub worker_command: Vec<String>,
    pub coordination_dir: PathBuf,
    pub notify_endpoints: Vec<String>,
    pub mode: MiningMode,
    pub block_target: u32,
    pub activation_window: Duration,
    pub rpc_timeout: Duration,
    pub template_refresh_interval: Duration,
    pub health_check_interval: Duration,
    pub solution_poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub restart_cooldown: Duration,
}

impl LoopConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> LoopConfigBuilder {
        LoopConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`LoopConfig::builder`] when many values use defaults.
    pub fn new(params: LoopConfigParams) -> Result<Self> {
        let LoopConfigParams {
            rpc_url,
            rpc_user,
            rpc_password,
            worker_count,
            worker_command,
            coordination_dir,
            notify_endpoints,
            mode,
            block_target,
            activation_window,
            rpc_timeout,
            template_refresh_interval,
            health_check_interval,
            solution_poll_interval,
            shutdown_grace,
            restart_cooldown,
        } = params;

        let config = Self {
            rpc_url: trimmed_string(rpc_url),
            rpc_user: trimmed_string(rpc_user),
            rpc_password: trimmed_string(rpc_password),
            worker_count,
            worker_command,
            coordination_dir,
            notify_endpoints,
            mode,
            block_target,
            activation_window,
            rpc_timeout,
            template_refresh_interval,
            health_check_interval,
            solution_poll_interval,
            shutdown_grace,
            restart_cooldown,
        };

        config.validate()?;
        Ok(config)
    }

    /// Full RPC URL (including scheme) of the upstream node.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// RPC username.
    pub fn rpc_user(&self) -> &str {
        &self.rpc_user
    }

    /// RPC password.
    pub fn rpc_password(&self) -> &str {
        &self.rpc_password
    }

    /// Number of worker daemons requested. The supervisor clamps this to the
    /// hardware ceiling when the pool starts.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Command line (program plus leading arguments) used to launch one
    /// worker daemon. The supervisor appends per-ordinal arguments.
    pub fn worker_command(&self) -> &[String] {
        &self.worker_command
    }

    /// Root of the shared coordination area.
    pub fn coordination_dir(&self) -> &PathBuf {
        &self.coordination_dir
    }

    /// Notification endpoints consumed by the block-change monitor. May be
    /// empty, in which case the monitor starts in polling fallback mode.
    pub fn notify_endpoints(&self) -> &[String] {
        &self.notify_endpoints
    }

    /// Selected mining mode.
    pub fn mode(&self) -> MiningMode {
        self.mode
    }

    /// Accepted-submission target for fixed-count mode.
    pub fn block_target(&self) -> u32 {
        self.block_target
    }

    /// Sleep window between cycles in on-demand mode.
    pub fn activation_window(&self) -> Duration {
        self.activation_window
    }

    /// Per-call timeout applied to the JSON-RPC client.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Interval between periodic template refetches. This is the polling
    /// backstop that keeps the pipeline moving when no notification endpoint
    /// is reachable.
    pub fn template_refresh_interval(&self) -> Duration {
        self.template_refresh_interval
    }

    /// Interval between supervisor liveness sweeps.
    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }

    /// Interval between coordination-area scans for candidate solutions.
    pub fn solution_poll_interval(&self) -> Duration {
        self.solution_poll_interval
    }

    /// How long `stop_pool` waits for a daemon to exit before force-killing it.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Minimum delay before a crashed daemon is relaunched on the same ordinal.
    pub fn restart_cooldown(&self) -> Duration {
        self.restart_cooldown
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;
        ensure_not_empty(&self.rpc_user, "rpc_user")?;
        ensure_not_empty(&self.rpc_password, "rpc_password")?;

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.worker_command.is_empty() {
            bail!("worker_command must name a program to launch");
        }

        if self.coordination_dir.as_os_str().is_empty() {
            bail!("coordination_dir cannot be empty");
        }

        if self.block_target == 0 {
            bail!("block_target must be greater than 0");
        }

        if self.block_target > MAX_BLOCKS_PER_DAY {
            bail!(
                "block_target ({}) exceeds the daily ceiling of {MAX_BLOCKS_PER_DAY}",
                self.block_target
            );
        }

        if self.activation_window.is_zero() {
            bail!("activation_window must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.template_refresh_interval.is_zero() {
            bail!("template_refresh_interval must be greater than 0");
        }

        if self.health_check_interval.is_zero() {
            bail!("health_check_interval must be greater than 0");
        }

        if self.solution_poll_interval.is_zero() {
            bail!("solution_poll_interval must be greater than 0");
        }

        if self.shutdown_grace.is_zero() {
            bail!("shutdown_grace must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LoopConfigBuilder {
    rpc_url: Option<String>,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    worker_count: Option<usize>,
    worker_command: Option<Vec<String>>,
    coordination_dir: Option<PathBuf>,
    notify_endpoints: Option<Vec<String>>,
    mode: Option<MiningMode>,
    block_target: Option<u32>,
    activation_window: Option<Duration>,
    rpc_timeout: Option<Duration>,
    template_refresh_interval: Option<Duration>,
    health_check_interval: Option<Duration>,
    solution_poll_interval: Option<Duration>,
    shutdown_grace: Option<Duration>,
    restart_cooldown: Option<Duration>,
}

impl LoopConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn rpc_user(mut self, user: impl Into<String>) -> Self {
        self.rpc_user = Some(user.into());
        self
    }

    pub fn rpc_password(mut self, password: impl Into<String>) -> Self {
        self.rpc_password = Some(password.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn worker_command(mut self, command: Vec<String>) -> Self {
        self.worker_command = Some(command);
        self
    }

    pub fn coordination_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.coordination_dir = Some(dir.into());
        self
    }

    pub fn notify_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.notify_endpoints = Some(endpoints);
        self
    }

    pub fn mode(mut self, mode: MiningMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn block_target(mut self, target: u32) -> Self {
        self.block_target = Some(target);
        self
    }

    pub fn activation_window(mut self, window: Duration) -> Self {
        self.activation_window = Some(window);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn template_refresh_interval(mut self, interval: Duration) -> Self {
        self.template_refresh_interval = Some(interval);
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    pub fn solution_poll_interval(mut self, interval: Duration) -> Self {
        self.solution_poll_interval = Some(interval);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub fn restart_cooldown(mut self, cooldown: Duration) -> Self {
        self.restart_cooldown = Some(cooldown);
        self
    }

    pub fn build(self) -> Result<LoopConfig> {
        let params = LoopConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            rpc_user: self.rpc_user.context("rpc_user is required")?,
            rpc_password: self.rpc_password.context("rpc_password is required")?,
            worker_count: self.worker_count.unwrap_or_else(num_cpus::get),
            worker_command: self.worker_command.context("worker_command is required")?,
            coordination_dir: self
                .coordination_dir
                .context("coordination_dir is required")?,
            notify_endpoints: self.notify_endpoints.unwrap_or_default(),
            mode: self.mode.unwrap_or(MiningMode::Continuous),
            block_target: self.block_target.unwrap_or(MAX_BLOCKS_PER_DAY),
            activation_window: self
                .activation_window
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_ACTIVATION_WINDOW_SECS)),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            template_refresh_interval: self
                .template_refresh_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TEMPLATE_REFRESH_SECS)),
            health_check_interval: self
                .health_check_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_HEALTH_CHECK_SECS)),
            solution_poll_interval: self
                .solution_poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_SOLUTION_POLL_MS)),
            shutdown_grace: self
                .shutdown_grace
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS)),
            restart_cooldown: self
                .restart_cooldown
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RESTART_COOLDOWN_SECS)),
        };

        LoopConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
