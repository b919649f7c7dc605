//! External network boundaries.
//!
//! The step library never speaks the ledger's wire protocol. Calls go through
//! these traits; [`crate::io::cli_client::CliClient`] implements them by
//! driving an external ledger CLI, and tests use scripted fakes.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::collection::CollectionConfig;
use crate::core::policy::SignaturePolicy;
use crate::core::retry::{Classification, RetryPolicy};
use crate::core::types::{ChannelCall, Target, TransportError};
use crate::io::clock::Sleeper;
use crate::pipeline::Pipeline;

/// Query/invoke boundary. Implementations apply `policy` to each call they make.
pub trait NetworkClient {
    /// Read-only call; fan-out and response selection across `targets` happen
    /// behind this boundary.
    fn query(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError>;

    /// State-mutating call.
    fn invoke(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        policy: &RetryPolicy,
    ) -> Result<String, TransportError>;

    /// Privileged call routed through `pipeline` instead of the plain path.
    fn invoke_via_pipeline(
        &self,
        pipeline: &Pipeline,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError>;
}

/// One peer's answer to a proposal.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ProposalResponse {
    /// URL of the endorsing peer.
    pub endorser: String,
    pub msp_id: String,
    pub status: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub payload: String,
}

/// Sends proposals without committing them; used by the pipeline's dispatch stage.
pub trait Endorser {
    fn process_proposal(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
    ) -> Result<Vec<ProposalResponse>, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub chaincode_id: String,
    pub path: String,
    pub version: String,
    /// Directory the chaincode package is built from.
    pub package_root: std::path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub chaincode_id: String,
    pub path: String,
    pub version: String,
    pub args: Vec<String>,
    pub policy: SignaturePolicy,
    pub collections: Vec<CollectionConfig>,
}

/// Chaincode lifecycle operations.
pub trait LifecycleClient {
    /// Whether `chaincode_id` is already installed on `target`.
    fn is_installed(&self, chaincode_id: &str, target: &Target) -> Result<bool>;
    fn install(&self, request: &InstallRequest, targets: &[Target]) -> Result<()>;
    fn instantiate(&self, channel: &str, request: &DeployRequest, targets: &[Target])
    -> Result<()>;
    fn upgrade(&self, channel: &str, request: &DeployRequest, targets: &[Target]) -> Result<()>;
}

/// Block inspection through the ledger's CLI.
pub trait BlockInspector {
    fn block_height(&self, channel: &str, org: &str) -> Result<u64>;
    /// Render `count` blocks starting at `from`, walking backwards.
    fn blocks(&self, channel: &str, org: &str, from: u64, count: u64) -> Result<String>;
}

/// Run `op` under `policy`: retryable failures are retried with backoff until
/// the attempt budget is spent; terminal failures return immediately.
pub fn retry_call<T, S, F>(policy: &RetryPolicy, sleeper: &S, mut op: F) -> Result<T, TransportError>
where
    S: Sleeper + ?Sized,
    F: FnMut() -> Result<T, TransportError>,
{
    let mut retries = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if policy.classify(&err) == Classification::Terminal {
                    debug!(%err, "terminal error");
                    return Err(err);
                }
                if retries >= policy.max_attempts {
                    warn!(%err, retries, "retry budget exhausted");
                    return Err(err);
                }
                let delay = policy.backoff(retries);
                warn!(%err, attempt = retries + 1, delay_ms = delay.as_millis() as u64, "retrying");
                sleeper.sleep(delay);
                retries += 1;
            }
        }
    }
}
