//! JSON-RPC client plumbing for the upstream node: authentication, client
//! options, retry policy, and the `NodeClient` trait.

pub mod auth;
pub mod client;
pub mod options;

pub use client::{AsyncNodeClient, NodeClient, RpcError, SubmitOutcome};
pub use options::RpcClientOptions;
