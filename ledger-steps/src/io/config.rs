//! Step library configuration stored in `ledger-steps.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::{CHAINCODE_NOT_FOUND, RetryCodeTable, RetryPolicy, compose};
use crate::core::topology::Topology;
use crate::core::types::{ErrorGroup, Target};
use crate::warmup::WarmUpSettings;

pub const DEFAULT_CONFIG_FILE: &str = "ledger-steps.toml";

/// Step library configuration (TOML).
///
/// Missing fields default to values suited to a local two-org test network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub client: ClientConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub warmup: WarmUpConfig,
    pub deploy: DeployConfig,
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Ledger CLI command prefix (e.g. `["peer"]`); the operation is appended.
    pub command: Vec<String>,
    /// Truncate CLI stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command: vec!["peer".to_string()],
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub query_secs: u64,
    /// Invokes and lifecycle calls.
    pub execute_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            query_secs: 30,
            execute_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
    /// Codes added to the channel-client table for every scenario.
    pub codes: Vec<RetryCode>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 5_000,
            backoff_factor: 2.0,
            codes: vec![RetryCode {
                group: ErrorGroup::Chaincode,
                code: CHAINCODE_NOT_FOUND,
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryCode {
    pub group: ErrorGroup,
    pub code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WarmUpConfig {
    pub delay_secs: u64,
    pub max_attempts: u32,
}

impl Default for WarmUpConfig {
    fn default() -> Self {
        Self {
            delay_secs: 5,
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeployConfig {
    /// Test chaincode root, relative to the working directory.
    pub test_cc_path: PathBuf,
    /// System chaincode root, relative to the working directory.
    pub system_cc_path: PathBuf,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            test_cc_path: PathBuf::from("fixtures/testdata"),
            system_cc_path: PathBuf::from("fixtures/scc"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    pub id: String,
    pub url: String,
    pub org: String,
    pub msp_id: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name_override: Option<String>,
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.client.command.is_empty() || self.client.command[0].trim().is_empty() {
            return Err(anyhow!("client.command must be a non-empty array"));
        }
        if self.client.output_limit_bytes == 0 {
            return Err(anyhow!("client.output_limit_bytes must be > 0"));
        }
        if self.timeouts.query_secs == 0 {
            return Err(anyhow!("timeouts.query_secs must be > 0"));
        }
        if self.timeouts.execute_secs == 0 {
            return Err(anyhow!("timeouts.execute_secs must be > 0"));
        }
        if !(self.retry.backoff_factor.is_finite() && self.retry.backoff_factor >= 1.0) {
            return Err(anyhow!("retry.backoff_factor must be >= 1.0"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(anyhow!(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms"
            ));
        }
        if self.warmup.max_attempts == 0 {
            return Err(anyhow!("warmup.max_attempts must be > 0"));
        }

        let mut ids = BTreeSet::new();
        for peer in &self.peers {
            if peer.id.trim().is_empty() {
                return Err(anyhow!("peers: id must not be empty"));
            }
            if !ids.insert(peer.id.as_str()) {
                return Err(anyhow!("peers: duplicate id [{}]", peer.id));
            }
            if peer.url.trim().is_empty() {
                return Err(anyhow!("peers: [{}] url must not be empty", peer.id));
            }
            if peer.org.trim().is_empty() || peer.msp_id.trim().is_empty() {
                return Err(anyhow!("peers: [{}] org and msp_id are required", peer.id));
            }
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.query_secs)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.execute_secs)
    }

    /// Codes every scenario starts with on top of the channel-client table.
    pub fn retry_additions(&self) -> Vec<(ErrorGroup, i32)> {
        self.retry.codes.iter().map(|c| (c.group, c.code)).collect()
    }

    /// Channel-client table composed with `additions`, shaped by `[retry]`.
    pub fn retry_policy(&self, additions: &[(ErrorGroup, i32)]) -> RetryPolicy {
        RetryPolicy {
            table: compose(&RetryCodeTable::channel_client(), additions),
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            backoff_factor: self.retry.backoff_factor,
        }
    }

    pub fn warmup_settings(&self) -> WarmUpSettings {
        WarmUpSettings {
            delay: Duration::from_secs(self.warmup.delay_secs),
            max_attempts: self.warmup.max_attempts,
        }
    }

    /// Build the network snapshot from `[[peers]]`, in file order.
    pub fn topology(&self) -> Topology {
        let mut topology = Topology::new();
        for peer in &self.peers {
            topology.add_peer(
                Target {
                    url: peer.url.clone(),
                    org_id: peer.org.clone(),
                    msp_id: peer.msp_id.clone(),
                    peer_id: peer.id.clone(),
                    server_name_override: peer.server_name_override.clone(),
                },
                peer.channels.iter().cloned(),
            );
        }
        topology
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LedgerConfig::default()`.
pub fn load_config(path: &Path) -> Result<LedgerConfig> {
    if !path.exists() {
        let cfg = LedgerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LedgerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
