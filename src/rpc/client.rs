//! JSON-RPC client for the upstream blockchain node. Houses the
//! `AsyncNodeClient`, error types, and the `NodeClient` trait consumed by the
//! orchestrator and the submission coordinator.

use crate::rpc::auth::build_auth_headers;
use crate::rpc::options::RpcClientOptions;
use crate::runtime::config::LoopConfig;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    Unreachable { method: &'static str },
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::Unreachable { method } => {
                write!(f, "node unreachable during rpc method {method}")
            }
        }
    }
}

impl std::error::Error for RpcError {}

/// Interpretation of the node's answer to a candidate submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// The node already knows this solution. Not an error, but not a win
    /// either: the coordinator records it as rejected.
    Duplicate,
    Rejected(String),
}

/// The subset of node operations the pipeline consumes. Implemented by the
/// real client below and by the mock node in the test suite.
pub trait NodeClient: Send + Sync {
    fn fetch_template<'a>(&'a self) -> BoxFuture<'a, Result<Value>>;
    fn submit_candidate<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, Result<SubmitOutcome>>;
    fn best_block_hash<'a>(&'a self) -> BoxFuture<'a, Result<String>>;
}

#[derive(Debug, Clone)]
pub struct AsyncNodeClient {
    client: HttpClient,
    options: RpcClientOptions,
}

impl NodeClient for AsyncNodeClient {
    fn fetch_template<'a>(&'a self) -> BoxFuture<'a, Result<Value>> {
        Box::pin(self.get_block_template())
    }

    fn submit_candidate<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, Result<SubmitOutcome>> {
        Box::pin(self.submit_block(payload))
    }

    fn best_block_hash<'a>(&'a self) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.get_best_block_hash())
    }
}

impl AsyncNodeClient {
    pub fn new(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Self::with_options(url, user, password, RpcClientOptions::default())
    }

    pub fn with_options(
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        options: RpcClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let rpc_url = url.into();
        let headers = build_auth_headers(&user.into(), &password.into())?;

        let client = HttpClientBuilder::default()
            .set_headers(headers)
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .build(&rpc_url)
            .map_err(|err| anyhow!("failed to build RPC client: {err}"))?;

        Ok(Self { client, options })
    }

    pub fn from_config(config: &LoopConfig) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            ..RpcClientOptions::default()
        };
        Self::with_options(
            config.rpc_url().to_owned(),
            config.rpc_user().to_owned(),
            config.rpc_password().to_owned(),
            options,
        )
    }

    /// Fetches the current unit of work from the node.
    pub async fn get_block_template(&self) -> Result<Value> {
        const METHOD: &str = "getblocktemplate";
        self.call_with_retry(METHOD, || async {
            self.request_once::<Value>(METHOD, rpc_params![json!({"rules": ["segwit"]})])
                .await
        })
        .await
    }

    /// Submits a candidate solution. The call itself is not retried: a
    /// candidate must reach the network at most once, and the caller decides
    /// what a failure means.
    pub async fn submit_block(&self, payload: &Value) -> Result<SubmitOutcome> {
        const METHOD: &str = "submitblock";

        let serialized = match payload.as_str() {
            Some(hex) => hex.to_owned(),
            None => serde_json::to_string(payload)?,
        };

        let response = self
            .request_once::<Option<String>>(METHOD, rpc_params![serialized])
            .await?;

        Ok(interpret_submit_response(response))
    }

    /// Current best block hash, used by the polling fallback of the
    /// block-change monitor.
    pub async fn get_best_block_hash(&self) -> Result<String> {
        const METHOD: &str = "getbestblockhash";
        self.call_with_retry(METHOD, || async {
            self.request_once::<String>(METHOD, rpc_params![]).await
        })
        .await
    }

    async fn request_once<R>(
        &self,
        method: &'static str,
        params: jsonrpsee::core::params::ArrayParams,
    ) -> Result<R>
    where
        R: serde::de::DeserializeOwned,
    {
        timeout(
            self.options.request_timeout,
            self.client.request::<R, _>(method, params),
        )
        .await
        .map_err(|_| RpcError::Timeout { method })?
        .map_err(|err| match err {
            jsonrpsee::core::client::Error::Transport(source) => {
                anyhow!(RpcError::Unreachable { method }).context(source.to_string())
            }
            err => anyhow!("rpc {method} call failed: {err}"),
        })
    }

    /// Retry loop with exponential backoff shared by the idempotent read
    /// methods. Timeouts and transport failures are retried up to
    /// `max_attempts`; the last error is returned when attempts run out.
    async fn call_with_retry<T, F, Fut>(&self, method: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(method, attempt, "rpc call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.options.max_attempts {
                        tracing::warn!(
                            method,
                            attempt,
                            error = %err,
                            "rpc retries exhausted"
                        );
                        return Err(err);
                    }

                    let backoff = self.backoff_delay(attempt);
                    tracing::debug!(
                        method,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "rpc call failed; retrying"
                    );
                    sleep(backoff).await;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.options.initial_backoff;
        }

        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let mut delay = self.options.initial_backoff.saturating_mul(multiplier);

        if delay > self.options.max_backoff {
            delay = self.options.max_backoff;
        }

        delay
    }
}

/// Maps the node's `submitblock` response onto a [`SubmitOutcome`]. An empty
/// response means the block was accepted; "duplicate" family strings mean the
/// node already knows the block and the submission did not win anything.
fn interpret_submit_response(response: Option<String>) -> SubmitOutcome {
    match response {
        None => SubmitOutcome::Accepted,
        Some(reason) if reason.is_empty() => SubmitOutcome::Accepted,
        Some(reason) if reason.starts_with("duplicate") => SubmitOutcome::Duplicate,
        Some(reason) => SubmitOutcome::Rejected(reason),
    }
}
