//! Test-only helpers: deterministic targets and topologies plus scripted fakes
//! for the network, lifecycle and block boundaries.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::retry::RetryPolicy;
use crate::core::selector::Permutation;
use crate::core::topology::Topology;
use crate::core::types::{ChannelCall, Target, TransportError};
use crate::io::clock::Sleeper;
use crate::io::network::{
    BlockInspector, DeployRequest, Endorser, InstallRequest, LifecycleClient, NetworkClient,
    ProposalResponse,
};
use crate::pipeline::Pipeline;

/// Create a target for peer `id` of `org` (`org1` → MSP `Org1MSP`).
pub fn target(id: &str, org: &str) -> Target {
    Target {
        url: format!("grpcs://{id}:7051"),
        org_id: org.to_string(),
        msp_id: msp_for(org),
        peer_id: id.to_string(),
        server_name_override: None,
    }
}

fn msp_for(org: &str) -> String {
    let mut chars = org.chars();
    match chars.next() {
        Some(first) => format!("{}{}MSP", first.to_ascii_uppercase(), chars.as_str()),
        None => "MSP".to_string(),
    }
}

/// Two orgs with two peers each. Everyone joins `mychannel`; only org1 joins
/// `org1only`.
pub fn two_org_topology() -> Topology {
    let mut topology = Topology::new();
    topology.add_peer(target("peer0.org1", "org1"), ["mychannel", "org1only"]);
    topology.add_peer(target("peer1.org1", "org1"), ["mychannel", "org1only"]);
    topology.add_peer(target("peer0.org2", "org2"), ["mychannel"]);
    topology.add_peer(target("peer1.org2", "org2"), ["mychannel"]);
    topology
}

/// Always returns the same permutation.
#[derive(Debug, Clone)]
pub struct FixedPermutation(pub Vec<usize>);

impl Permutation for FixedPermutation {
    fn permute(&self, _len: usize) -> Vec<usize> {
        self.0.clone()
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
    }
}

/// One boundary call seen by [`ScriptedNetwork`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// `query`, `invoke`, `pipeline`, `proposal`, `install`, `instantiate`,
    /// `upgrade` or `blocks`.
    pub operation: &'static str,
    pub channel: String,
    pub chaincode_id: String,
    pub function: String,
    pub args: Vec<String>,
    /// Peer IDs in the order passed.
    pub targets: Vec<String>,
    /// Retry policy handed to the call, if the boundary takes one.
    pub policy: Option<RetryPolicy>,
}

type Scripted = Result<String, TransportError>;

/// Scripted stand-in for every network boundary.
///
/// Results are queued per peer ID and consumed by the first target of each
/// call; the last queued result for a peer repeats once the queue drains.
/// Peers with nothing queued answer `Ok("")`.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    script: RefCell<HashMap<String, VecDeque<Scripted>>>,
    calls: RefCell<Vec<RecordedCall>>,
    installed: RefCell<HashSet<(String, String)>>,
    deploys: RefCell<Vec<DeployRequest>>,
    lifecycle_error: Option<String>,
    block_height: u64,
}

impl ScriptedNetwork {
    /// Queue a result for calls whose first target is `peer_id`.
    pub fn respond(self, peer_id: &str, result: Result<&str, TransportError>) -> Self {
        self.script
            .borrow_mut()
            .entry(peer_id.to_string())
            .or_default()
            .push_back(result.map(str::to_string));
        self
    }

    /// Make every lifecycle call fail with `message`.
    pub fn fail_lifecycle(mut self, message: &str) -> Self {
        self.lifecycle_error = Some(message.to_string());
        self
    }

    /// Mark `chaincode_id` as already installed on `peer_id`.
    pub fn with_installed(self, chaincode_id: &str, peer_id: &str) -> Self {
        self.installed
            .borrow_mut()
            .insert((chaincode_id.to_string(), peer_id.to_string()));
        self
    }

    pub fn with_block_height(mut self, height: u64) -> Self {
        self.block_height = height;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    /// Instantiate and upgrade requests, in call order.
    pub fn deploys(&self) -> Vec<DeployRequest> {
        self.deploys.borrow().clone()
    }

    fn next_result(&self, peer_id: &str) -> Scripted {
        let mut script = self.script.borrow_mut();
        match script.get_mut(peer_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(String::new())),
            None => Ok(String::new()),
        }
    }

    fn record(
        &self,
        operation: &'static str,
        channel: &str,
        call: Option<&ChannelCall>,
        targets: &[Target],
        policy: Option<&RetryPolicy>,
    ) {
        self.calls.borrow_mut().push(RecordedCall {
            operation,
            channel: channel.to_string(),
            chaincode_id: call.map(|c| c.request.chaincode_id.clone()).unwrap_or_default(),
            function: call.map(|c| c.request.function.clone()).unwrap_or_default(),
            args: call.map(|c| c.request.args.clone()).unwrap_or_default(),
            targets: targets.iter().map(|t| t.peer_id.clone()).collect(),
            policy: policy.cloned(),
        });
    }

    fn first_result(&self, targets: &[Target]) -> Scripted {
        match targets.first() {
            Some(target) => self.next_result(&target.peer_id),
            None => Ok(String::new()),
        }
    }

    fn lifecycle(
        &self,
        operation: &'static str,
        channel: &str,
        cc: &str,
        targets: &[Target],
    ) -> Result<()> {
        self.calls.borrow_mut().push(RecordedCall {
            operation,
            channel: channel.to_string(),
            chaincode_id: cc.to_string(),
            function: String::new(),
            args: Vec::new(),
            targets: targets.iter().map(|t| t.peer_id.clone()).collect(),
            policy: None,
        });
        match &self.lifecycle_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

impl NetworkClient for ScriptedNetwork {
    fn query(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        _timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        self.record("query", &call.channel_id, Some(call), targets, Some(policy));
        self.first_result(targets)
    }

    fn invoke(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        self.record("invoke", &call.channel_id, Some(call), targets, Some(policy));
        self.first_result(targets)
    }

    fn invoke_via_pipeline(
        &self,
        pipeline: &Pipeline,
        call: &ChannelCall,
        targets: &[Target],
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<String, TransportError> {
        self.record("pipeline", &call.channel_id, Some(call), targets, Some(policy));
        pipeline.execute(self, call, targets, timeout)
    }
}

impl Endorser for ScriptedNetwork {
    /// Every target answers from its own queue; a scripted error fails the
    /// whole proposal.
    fn process_proposal(
        &self,
        call: &ChannelCall,
        targets: &[Target],
        _timeout: Duration,
    ) -> Result<Vec<ProposalResponse>, TransportError> {
        self.record("proposal", &call.channel_id, Some(call), targets, None);
        targets
            .iter()
            .map(|target| {
                let payload = self.next_result(&target.peer_id)?;
                Ok(ProposalResponse {
                    endorser: target.url.clone(),
                    msp_id: target.msp_id.clone(),
                    status: 200,
                    message: String::new(),
                    payload,
                })
            })
            .collect()
    }
}

impl LifecycleClient for ScriptedNetwork {
    fn is_installed(&self, chaincode_id: &str, target: &Target) -> Result<bool> {
        Ok(self
            .installed
            .borrow()
            .contains(&(chaincode_id.to_string(), target.peer_id.clone())))
    }

    fn install(&self, request: &InstallRequest, targets: &[Target]) -> Result<()> {
        self.lifecycle("install", "", &request.chaincode_id, targets)?;
        let mut installed = self.installed.borrow_mut();
        for target in targets {
            installed.insert((request.chaincode_id.clone(), target.peer_id.clone()));
        }
        Ok(())
    }

    fn instantiate(
        &self,
        channel: &str,
        request: &DeployRequest,
        targets: &[Target],
    ) -> Result<()> {
        self.deploys.borrow_mut().push(request.clone());
        self.lifecycle("instantiate", channel, &request.chaincode_id, targets)
    }

    fn upgrade(&self, channel: &str, request: &DeployRequest, targets: &[Target]) -> Result<()> {
        self.deploys.borrow_mut().push(request.clone());
        self.lifecycle("upgrade", channel, &request.chaincode_id, targets)
    }
}

impl BlockInspector for ScriptedNetwork {
    fn block_height(&self, _channel: &str, _org: &str) -> Result<u64> {
        Ok(self.block_height)
    }

    fn blocks(&self, channel: &str, org: &str, from: u64, count: u64) -> Result<String> {
        self.calls.borrow_mut().push(RecordedCall {
            operation: "blocks",
            channel: channel.to_string(),
            chaincode_id: String::new(),
            function: String::new(),
            args: vec![org.to_string(), from.to_string(), count.to_string()],
            targets: Vec::new(),
            policy: None,
        });
        Ok(format!("blocks {from}..-{count}"))
    }
}

/// Write `contents` as `ledger-steps.toml` in a fresh temp dir.
pub fn config_dir(contents: &str) -> Result<(TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger-steps.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}
