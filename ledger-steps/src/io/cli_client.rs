//! Network boundaries implemented by driving an external ledger CLI.
//!
//! The configured command prefix (e.g. `["fabric-cli"]`) is followed by a
//! subcommand and flags:
//!
//! ```text
//! chaincode query|invoke|endorse --cid CH --ccid CC --args JSON --peer URL,.. [--transient JSON]
//! chaincode install     --ccid CC --ccp PATH --v VERSION --gopath ROOT --peer URL,..
//! chaincode instantiate|upgrade --cid CH --ccid CC --ccp PATH --v VERSION --args JSON
//!                       --policy EXPR [--collconfig FILE] --peer URL,..
//! chaincode installed   --peer URL
//! query info            --cid CH --orgid ORG
//! query block           --cid CH --orgid ORG --num N --traverse COUNT
//! ```
//!
//! Successful calls print their payload on stdout. Failed calls exit non-zero
//! and report `status: <group>/<code>` on stderr; that line becomes the
//! [`TransportError`] the retry policy classifies.

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::core::retry::RetryPolicy;
use crate::core::types::{ChannelCall, ErrorGroup, Target, TransportError};
use crate::io::clock::Sleeper;
use crate::io::config::LedgerConfig;
use crate::io::network::{
    BlockInspector, DeployRequest, Endorser, InstallRequest, LifecycleClient, NetworkClient,
    ProposalResponse, retry_call,
};
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::pipeline::Pipeline;

/// gRPC `DEADLINE_EXCEEDED`, reported when the CLI outlives its timeout.
pub const DEADLINE_EXCEEDED: i32 = 4;
/// Client-side failure with no status line (spawn error, unparsable output).
pub const CLIENT_FAILURE: i32 = -1;

static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"status:\s*([a-z_]+)/(-?\d+)").unwrap());

pub struct CliClient<S> {
    command: Vec<String>,
    output_limit_bytes: usize,
    execute_timeout: Duration,
    sleeper: S,
}

impl<S: Sleeper> CliClient<S> {
    pub fn new(cfg: &LedgerConfig, sleeper: S) -> Self {
        Self {
            command: cfg.client.command.clone(),
            output_limit_bytes: cfg.client.output_limit_bytes,
            execute_timeout: cfg.execute_timeout(),
            sleeper,
        }
    }

    fn command(&self) -> Result<Command> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("client.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(prefix);
        Ok(cmd)
    }

    /// Run one CLI invocation and return its trimmed stdout.
    fn exec(&self, args: &[String], timeout: Duration) -> Result<String, TransportError> {
        let mut cmd = self.command().map_err(client_failure)?;
        cmd.args(args);
        let output = run_command_with_timeout(cmd, timeout, self.output_limit_bytes)
            .map_err(client_failure)?;
        if output.success() {
            return Ok(output.stdout_text());
        }
        let err = transport_error(&output);
        debug!(%err, "ledger CLI call failed");
        Err(err)
    }

    fn exec_anyhow(&self, args: &[String], timeout: Duration) -> Result<String> {
        let op = args
            .iter()
            .take(2)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        self.exec(args, timeout)
            .with_context(|| format!("ledger CLI {op}"))
    }
}

fn client_failure(err: anyhow::Error) -> TransportError {
    TransportError::new(ErrorGroup::Client, CLIENT_FAILURE, format!("{err:#}"))
}

/// Map a failed CLI run to a transport error.
pub fn transport_error(output: &CommandOutput) -> TransportError {
    let stderr = output.stderr_text();
    if output.timed_out {
        return TransportError::new(ErrorGroup::Transport, DEADLINE_EXCEEDED, "request timed out");
    }
    match parse_status(&stderr) {
        Some((group, code)) => TransportError::new(group, code, stderr),
        None => TransportError::new(
            ErrorGroup::Unknown,
            output.status.code().unwrap_or(CLIENT_FAILURE),
            stderr,
        ),
    }
}

/// Find the first `status: <group>/<code>` marker in `stderr`.
pub fn parse_status(stderr: &str) -> Option<(ErrorGroup, i32)> {
    let caps = STATUS_RE.captures(stderr)?;
    let group = caps[1].parse().ok()?;
    let code = caps[2].parse().ok()?;
    Some((group, code))
}

fn peers_arg(targets: &[Target]) -> String {
    targets
        .iter()
        .map(|t| t.url.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn call_args(sub: &str, call: &ChannelCall, targets: &[Target]) -> Vec<String> {
    let mut invocation = vec![call.request.function.clone()];
    invocation.extend(call.request.args.iter().cloned());
    let mut args = vec![
        "chaincode".to_string(),
        sub.to_string(),
        "--cid".to_string(),
        call.channel_id.clone(),
        "--ccid".to_string(),
        call.request.chaincode_id.clone(),
        "--args".to_string(),
        json!({ "Args": invocation }).to_string(),
        "--peer".to_string(),
        peers_arg(targets),
    ];
    if !call.request.transient_data.is_empty() {
        let transient: serde_json::Map<String, Value> = call
            .request
            .transient_data
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(STANDARD.encode(v))))
            .collect();
        args.push("--transient".to_string());
        args.push(Value::Object(transient).to_string());
    }
    for target in targets {
        if let Some(name) = &target.server_name_override {
            args.push("--server-name".to_string());
            args.push(format!("{}={name}", target.url));
        }
    }
    args
}

fn deploy_args(
    sub: &str,
    channel: &str,
    request: &DeployRequest,
    targets: &[Target],
) -> Vec<String> {
    vec![
        "chaincode".to_string(),
        sub.to_string(),
        "--cid".to_string(),
        channel.to_string(),
        "--ccid".to_string(),
        request.chaincode_id.clone(),
        "--ccp".to_string(),
        request.path.clone(),
        "--v".to_string(),
        request.version.clone(),
        "--args".to_string(),
        json!({ "Args": request.args }).to_string(),
        "--policy".to_string(),
        request.policy.to_string(),
        "--peer".to_string(),
        peers_arg(targets),
    ]
}

/// Parse `query info` output: a JSON object whose `height` is a number or a
/// numeric string.
pub fn parse_height(output: &str) -> Result<u64> {
    let info: Value = serde_json::from_str(output).context("parse channel info JSON")?;
    match &info["height"] {
        Value::Number(n) => n.as_u64().ok_or_else(|| anyhow!("invalid height [{n}]")),
        Value::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("invalid height [{s}]")),
        other => bail!("channel info has no height: {other}"),
    }
}

impl<S: Sleeper> NetworkClient for CliClient<S> {
    #[instrument(skip_all, fields(chaincode = %call.request.chaincode_id, channel = %call.channel_id))]
    fn query(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        let args = call_args("query", call, targets);
        retry_call(policy, &self.sleeper, || self.exec(&args, timeout))
    }

    #[instrument(skip_all, fields(chaincode = %call.request.chaincode_id, channel = %call.channel_id))]
    fn invoke(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        let args = call_args("invoke", call, targets);
        retry_call(policy, &self.sleeper, || {
            self.exec(&args, self.execute_timeout)
        })
    }

    fn invoke_via_pipeline(
        &self,
        pipeline: &Pipeline,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        retry_call(policy, &self.sleeper, || {
            pipeline.execute(self, call, targets, timeout)
        })
    }
}

impl<S: Sleeper> Endorser for CliClient<S> {
    fn process_proposal(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
    ) -> Result<Vec<ProposalResponse>, TransportError> {
        let stdout = self.exec(&call_args("endorse", call, targets), timeout)?;
        serde_json::from_str(&stdout).map_err(|err| {
            TransportError::new(
                ErrorGroup::Client,
                CLIENT_FAILURE,
                format!("parse proposal responses: {err}"),
            )
        })
    }
}

impl<S: Sleeper> LifecycleClient for CliClient<S> {
    fn is_installed(&self, chaincode_id: &str, target: &Target) -> Result<bool> {
        let args = vec![
            "chaincode".to_string(),
            "installed".to_string(),
            "--peer".to_string(),
            target.url.clone(),
        ];
        let stdout = self.exec_anyhow(&args, self.execute_timeout)?;
        Ok(stdout.lines().any(|line| {
            line.trim()
                .strip_prefix("Name: ")
                .and_then(|rest| rest.split(',').next())
                .is_some_and(|name| name.trim() == chaincode_id)
        }))
    }

    #[instrument(skip_all, fields(chaincode = %request.chaincode_id, targets = targets.len()))]
    fn install(&self, request: &InstallRequest, targets: &[Target]) -> Result<()> {
        let args = vec![
            "chaincode".to_string(),
            "install".to_string(),
            "--ccid".to_string(),
            request.chaincode_id.clone(),
            "--ccp".to_string(),
            request.path.clone(),
            "--v".to_string(),
            request.version.clone(),
            "--gopath".to_string(),
            request.package_root.display().to_string(),
            "--peer".to_string(),
            peers_arg(targets),
        ];
        self.exec_anyhow(&args, self.execute_timeout)?;
        info!("chaincode installed");
        Ok(())
    }

    fn instantiate(&self, channel: &str, request: &DeployRequest, targets: &[Target]) -> Result<()> {
        self.deploy("instantiate", channel, request, targets)
    }

    fn upgrade(&self, channel: &str, request: &DeployRequest, targets: &[Target]) -> Result<()> {
        self.deploy("upgrade", channel, request, targets)
    }
}

impl<S: Sleeper> CliClient<S> {
    #[instrument(skip_all, fields(op = sub, chaincode = %request.chaincode_id, channel = %channel))]
    fn deploy(
        &self,
        sub: &str,
        channel: &str,
        request: &DeployRequest,
        targets: &[Target],
    ) -> Result<()> {
        let mut args = deploy_args(sub, channel, request, targets);
        // Held until the CLI exits.
        let mut collections_file = None;
        if !request.collections.is_empty() {
            let file = tempfile::Builder::new()
                .prefix("collections-")
                .suffix(".json")
                .tempfile()
                .context("create collection config file")?;
            serde_json::to_writer(file.as_file(), &request.collections)
                .context("write collection config file")?;
            args.push("--collconfig".to_string());
            args.push(file.path().display().to_string());
            collections_file = Some(file);
        }
        self.exec_anyhow(&args, self.execute_timeout)?;
        drop(collections_file);
        info!("chaincode {sub} complete");
        Ok(())
    }
}

impl<S: Sleeper> BlockInspector for CliClient<S> {
    fn block_height(&self, channel: &str, org: &str) -> Result<u64> {
        let args = vec![
            "query".to_string(),
            "info".to_string(),
            "--cid".to_string(),
            channel.to_string(),
            "--orgid".to_string(),
            org.to_string(),
        ];
        let stdout = self.exec_anyhow(&args, self.execute_timeout)?;
        parse_height(&stdout).with_context(|| format!("block height of channel [{channel}]"))
    }

    fn blocks(&self, channel: &str, org: &str, from: u64, count: u64) -> Result<String> {
        let args = vec![
            "query".to_string(),
            "block".to_string(),
            "--cid".to_string(),
            channel.to_string(),
            "--orgid".to_string(),
            org.to_string(),
            "--num".to_string(),
            from.to_string(),
            "--traverse".to_string(),
            count.to_string(),
        ];
        self.exec_anyhow(&args, self.execute_timeout)
    }
}
