//! Step handlers shared by ledger scenarios.
//!
//! [`CommonSteps`] owns the scenario state and borrows the network boundary,
//! so one instance drives one scenario at a time. Every handler returns
//! `anyhow::Result<()>`; the cached response is cleared before each query or
//! invoke and replaced with its payload on success.

use std::path::{Path, PathBuf};
use std::slice;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::core::assertions;
use crate::core::collection::{CollectionDefinition, CollectionRegistry};
use crate::core::deploy::{ChaincodeKind, deploy_path};
use crate::core::policy::policy_or_default;
use crate::core::retry::RetryPolicy;
use crate::core::selector::{Permutation, TargetFilter, pick_one, select};
use crate::core::state::ScenarioContext;
use crate::core::template;
use crate::core::topology::Topology;
use crate::core::types::{ChannelCall, InvocationRequest, Operation, Target};
use crate::dispatch::{DispatchMode, Dispatcher};
use crate::feature::ScenarioHooks;
use crate::io::clock::Sleeper;
use crate::io::config::LedgerConfig;
use crate::io::network::{
    BlockInspector, DeployRequest, InstallRequest, LifecycleClient, NetworkClient,
};
use crate::pipeline::Pipeline;
use crate::warmup::warm_up;

/// Version used when a step does not name one.
pub const DEFAULT_VERSION: &str = "v1";

/// Every boundary a step may call.
pub trait LedgerClient: NetworkClient + LifecycleClient + BlockInspector {}

impl<T: NetworkClient + LifecycleClient + BlockInspector + ?Sized> LedgerClient for T {}

/// Arguments shared by instantiate, upgrade and deploy steps.
#[derive(Debug, Clone, Copy)]
pub struct DeploySpec<'s> {
    pub kind: &'s str,
    pub chaincode_id: &'s str,
    pub version: &'s str,
    pub path: &'s str,
    /// Comma-separated org IDs; blank selects every org on the channel.
    pub orgs: &'s str,
    pub channel: &'s str,
    pub args: &'s str,
    /// Endorsement policy expression; blank means any member of the channel.
    pub policy: &'s str,
    /// Comma-separated collection config IDs.
    pub collections: &'s str,
}

pub struct CommonSteps<'a, C: ?Sized, S: ?Sized, P> {
    pub ctx: ScenarioContext,
    config: LedgerConfig,
    topology: Topology,
    collections: CollectionRegistry,
    workdir: PathBuf,
    client: &'a C,
    sleeper: &'a S,
    permutation: P,
}

impl<'a, C, S, P> CommonSteps<'a, C, S, P>
where
    C: LedgerClient + ?Sized,
    S: Sleeper + ?Sized,
    P: Permutation,
{
    pub fn new(
        config: LedgerConfig,
        workdir: &Path,
        client: &'a C,
        sleeper: &'a S,
        permutation: P,
    ) -> Self {
        Self {
            ctx: ScenarioContext::new(config.retry_additions()),
            topology: config.topology(),
            config,
            collections: CollectionRegistry::default(),
            workdir: workdir.to_path_buf(),
            client,
            sleeper,
            permutation,
        }
    }

    /// Replace the topology built from `[[peers]]`.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn response(&self) -> &str {
        self.ctx.response.get()
    }

    fn policy(&self) -> RetryPolicy {
        self.config.retry_policy(&self.ctx.retry_additions)
    }

    fn dispatcher(&self) -> Dispatcher<'a, C, S> {
        Dispatcher::new(self.client, self.sleeper)
    }

    fn targets(&self, channel: &str, filter: &TargetFilter) -> Result<Vec<Target>> {
        Ok(select(&self.topology, channel, filter)?)
    }

    fn channel_call(&self, chaincode_id: &str, channel: &str, args: &str) -> Result<ChannelCall> {
        let args = template::resolve(&self.ctx.vars, args)?;
        Ok(ChannelCall {
            channel_id: channel.to_string(),
            request: InvocationRequest::from_args(chaincode_id, args),
        })
    }

    fn channel_msps(&self, channel: &str) -> Vec<String> {
        self.topology
            .orgs_on_channel(channel)
            .into_iter()
            .filter_map(|org| self.topology.msp_id(org))
            .map(str::to_string)
            .collect()
    }

    fn execute(
        &mut self,
        chaincode_id: &str,
        args: &str,
        channel: &str,
        targets: &[Target],
        operation: Operation,
        mode: DispatchMode<'_>,
    ) -> Result<()> {
        let call = self.channel_call(chaincode_id, channel, args)?;
        let timeout = match operation {
            Operation::Query => self.config.query_timeout(),
            Operation::Invoke => self.config.execute_timeout(),
        };
        let payload = self
            .dispatcher()
            .dispatch(&call, targets, operation, mode, &self.policy(), timeout)?;
        debug!(%payload, "call returned");
        self.ctx.response.set(payload);
        Ok(())
    }

    // Queries

    pub fn query_cc(&mut self, chaincode_id: &str, args: &str, channel: &str) -> Result<()> {
        info!(chaincode = chaincode_id, channel, args, "querying chaincode");
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::All)?;
        self.execute(
            chaincode_id,
            args,
            channel,
            &targets,
            Operation::Query,
            DispatchMode::ConcurrentFanOut,
        )
    }

    pub fn query_cc_on_orgs(
        &mut self,
        chaincode_id: &str,
        args: &str,
        orgs: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::orgs(orgs))?;
        self.execute(
            chaincode_id,
            args,
            channel,
            &targets,
            Operation::Query,
            DispatchMode::ConcurrentFanOut,
        )
    }

    /// Query one randomly chosen peer of `orgs`.
    pub fn query_cc_on_single_peer(
        &mut self,
        chaincode_id: &str,
        args: &str,
        orgs: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::orgs(orgs))?;
        let target = pick_one(&targets, &self.permutation)
            .ok_or_else(|| anyhow!("no peers in org(s) [{orgs}] for channel [{channel}]"))?;
        info!(peer = %target.url, "querying single peer");
        self.execute(
            chaincode_id,
            args,
            channel,
            slice::from_ref(&target),
            Operation::Query,
            DispatchMode::ConcurrentFanOut,
        )
    }

    pub fn query_cc_on_peers(
        &mut self,
        chaincode_id: &str,
        args: &str,
        peers: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::peers(peers))?;
        debug!(peers, "querying peers");
        self.execute(
            chaincode_id,
            args,
            channel,
            &targets,
            Operation::Query,
            DispatchMode::ConcurrentFanOut,
        )
    }

    /// Query a system chaincode on the first peer of `org`, keeping only that
    /// org's endorsements.
    pub fn query_system_cc(
        &mut self,
        chaincode_id: &str,
        args: &str,
        org: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let target = self
            .topology
            .org_targets(org)
            .first()
            .map(|t| (*t).clone())
            .ok_or_else(|| anyhow!("could not get peers config for org [{org}]"))?;
        let pipeline = Pipeline::standard(Some(target.msp_id.clone()), 1);
        self.execute(
            chaincode_id,
            args,
            channel,
            slice::from_ref(&target),
            Operation::Query,
            DispatchMode::Pipeline(&pipeline),
        )
    }

    pub fn query_cc_with_error(
        &mut self,
        chaincode_id: &str,
        args: &str,
        channel: &str,
        expected: &str,
    ) -> Result<()> {
        expect_error(self.query_cc(chaincode_id, args, channel), expected)
    }

    // Invokes

    pub fn invoke_cc(&mut self, chaincode_id: &str, args: &str, channel: &str) -> Result<()> {
        self.invoke_cc_on_orgs(chaincode_id, args, "", channel)
    }

    pub fn invoke_cc_on_orgs(
        &mut self,
        chaincode_id: &str,
        args: &str,
        orgs: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::orgs(orgs))?;
        self.execute(
            chaincode_id,
            args,
            channel,
            &targets,
            Operation::Invoke,
            DispatchMode::ConcurrentFanOut,
        )
    }

    pub fn invoke_cc_on_peers(
        &mut self,
        chaincode_id: &str,
        args: &str,
        peers: &str,
        channel: &str,
    ) -> Result<()> {
        self.ctx.response.clear();
        let targets = self.targets(channel, &TargetFilter::peers(peers))?;
        debug!(peers, "invoking peers");
        self.execute(
            chaincode_id,
            args,
            channel,
            &targets,
            Operation::Invoke,
            DispatchMode::ConcurrentFanOut,
        )
    }

    // Warm-up and pacing

    pub fn warm_up_cc(&mut self, chaincode_id: &str, orgs: &str, channel: &str) -> Result<()> {
        info!(chaincode = chaincode_id, orgs, channel, "warming up chaincode");
        let targets = self.targets(channel, &TargetFilter::orgs(orgs))?;
        warm_up(
            &self.dispatcher(),
            chaincode_id,
            channel,
            &targets,
            &self.policy(),
            self.config.execute_timeout(),
            self.config.warmup_settings(),
        )?;
        Ok(())
    }

    pub fn wait(&mut self, seconds: u64) -> Result<()> {
        info!(seconds, "waiting");
        self.sleeper.sleep(std::time::Duration::from_secs(seconds));
        Ok(())
    }

    // Lifecycle

    /// Install on the local peers of each org in `orgs` (every org when blank),
    /// skipping peers whose ID matches `exclude`.
    pub fn install_cc(
        &mut self,
        kind: &str,
        chaincode_id: &str,
        version: &str,
        path: &str,
        orgs: &str,
        exclude: &str,
    ) -> Result<()> {
        let package_root = self.package_root(kind)?;
        let orgs: Vec<String> = if orgs.trim().is_empty() {
            self.topology.orgs().into_iter().map(str::to_string).collect()
        } else {
            orgs.split(',').map(|o| o.trim().to_string()).collect()
        };

        let request = InstallRequest {
            chaincode_id: chaincode_id.to_string(),
            path: path.to_string(),
            version: version.to_string(),
            package_root,
        };
        for org in &orgs {
            let filter = TargetFilter::local(org, exclude)?;
            let targets = self.targets("", &filter)?;
            if targets.is_empty() {
                bail!("no targets for chaincode [{chaincode_id}]");
            }
            info!(
                chaincode = chaincode_id,
                version,
                org = %org,
                targets = targets.len(),
                "installing chaincode"
            );
            self.client
                .install(&request, &targets)
                .with_context(|| format!("install chaincode [{chaincode_id}] on org [{org}]"))?;
        }
        Ok(())
    }

    fn package_root(&self, kind: &str) -> Result<PathBuf> {
        let kind: ChaincodeKind = kind.parse()?;
        Ok(deploy_path(
            &self.workdir,
            kind,
            &self.config.deploy.test_cc_path,
            &self.config.deploy.system_cc_path,
        ))
    }

    fn deploy_request(&self, spec: &DeploySpec<'_>) -> Result<DeployRequest> {
        let msps = self.channel_msps(spec.channel);
        let policy =
            policy_or_default(spec.policy, &msps).context("error creating endorsement policy")?;
        let collections = self.collections.resolve(spec.collections, &msps)?;
        let args = template::resolve(&self.ctx.vars, spec.args)?;
        Ok(DeployRequest {
            chaincode_id: spec.chaincode_id.to_string(),
            path: spec.path.to_string(),
            version: spec.version.to_string(),
            args,
            policy,
            collections,
        })
    }

    fn deploy_targets(&self, spec: &DeploySpec<'_>, all_peers: bool) -> Result<Vec<Target>> {
        let mut peers = self.targets(spec.channel, &TargetFilter::orgs(spec.orgs))?;
        if peers.is_empty() {
            bail!("no peers found for orgs [{}]", spec.orgs);
        }
        if !all_peers {
            peers.truncate(1);
        }
        Ok(peers)
    }

    /// Instantiate on the first selected peer. An "already exists" failure is
    /// logged and treated as success.
    pub fn instantiate_cc(&mut self, spec: &DeploySpec<'_>) -> Result<()> {
        spec.kind.parse::<ChaincodeKind>()?;
        let targets = self.deploy_targets(spec, false)?;
        let request = self.deploy_request(spec)?;
        info!(
            chaincode = spec.chaincode_id,
            channel = spec.channel,
            policy = %request.policy,
            "instantiating chaincode"
        );
        tolerate_existing(
            self.client.instantiate(spec.channel, &request, &targets),
            "instantiate",
        )
        .with_context(|| format!("instantiate chaincode [{}]", spec.chaincode_id))
    }

    pub fn upgrade_cc(&mut self, spec: &DeploySpec<'_>) -> Result<()> {
        spec.kind.parse::<ChaincodeKind>()?;
        let targets = self.deploy_targets(spec, false)?;
        let request = self.deploy_request(spec)?;
        info!(
            chaincode = spec.chaincode_id,
            version = spec.version,
            channel = spec.channel,
            "upgrading chaincode"
        );
        tolerate_existing(
            self.client.upgrade(spec.channel, &request, &targets),
            "upgrade",
        )
        .with_context(|| format!("upgrade chaincode [{}]", spec.chaincode_id))
    }

    pub fn upgrade_cc_with_error(&mut self, spec: &DeploySpec<'_>, expected: &str) -> Result<()> {
        expect_error(self.upgrade_cc(spec), expected)
    }

    /// Install where missing, then instantiate on every selected peer.
    pub fn deploy_cc(&mut self, spec: &DeploySpec<'_>) -> Result<()> {
        let package_root = self.package_root(spec.kind)?;
        let targets = self.deploy_targets(spec, true)?;
        let install = InstallRequest {
            chaincode_id: spec.chaincode_id.to_string(),
            path: spec.path.to_string(),
            version: spec.version.to_string(),
            package_root,
        };
        for target in &targets {
            let installed = self
                .client
                .is_installed(spec.chaincode_id, target)
                .context("error querying installed chaincodes")?;
            if !installed {
                self.client
                    .install(&install, slice::from_ref(target))
                    .with_context(|| format!("install chaincode on [{}]", target.peer_id))?;
            }
        }
        let request = self.deploy_request(spec)?;
        self.client
            .instantiate(spec.channel, &request, &targets)
            .with_context(|| format!("instantiate chaincode [{}]", spec.chaincode_id))
    }

    pub fn define_collection_config(
        &mut self,
        id: &str,
        collection: &str,
        policy: &str,
        required_peer_count: u32,
        max_peer_count: u32,
        blocks_to_live: u64,
    ) -> Result<()> {
        info!(
            id,
            collection,
            policy,
            required_peer_count,
            max_peer_count,
            blocks_to_live,
            "defining collection config"
        );
        self.collections.define(
            id,
            CollectionDefinition {
                name: collection.to_string(),
                policy: policy.to_string(),
                required_peer_count,
                max_peer_count,
                blocks_to_live,
            },
        );
        Ok(())
    }

    // Blocks

    fn channel_org(&self, channel: &str) -> Result<String> {
        self.topology
            .org_for_channel(channel)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("no orgs joined to channel [{channel}]"))
    }

    pub fn display_block(&mut self, number: u64, channel: &str) -> Result<()> {
        let org = self.channel_org(channel)?;
        let block = self.client.blocks(channel, &org, number, 1)?;
        info!("{block}");
        Ok(())
    }

    pub fn display_last_blocks(&mut self, count: u64, channel: &str) -> Result<()> {
        let org = self.channel_org(channel)?;
        let height = self
            .client
            .block_height(channel, &org)
            .context("error getting channel height")?;
        let last = height
            .checked_sub(1)
            .ok_or_else(|| anyhow!("channel [{channel}] has no blocks"))?;
        let blocks = self.client.blocks(channel, &org, last, count)?;
        info!("{blocks}");
        Ok(())
    }

    pub fn display_last_block(&mut self, channel: &str) -> Result<()> {
        self.display_last_blocks(1, channel)
    }

    // Response checks and variables

    pub fn response_contains(&mut self, expected: &str) -> Result<()> {
        info!(response = self.response(), expected, "checking response");
        Ok(assertions::contains(self.response(), expected)?)
    }

    pub fn response_equals(&mut self, expected: &str) -> Result<()> {
        info!(response = self.response(), expected, "checking response");
        Ok(assertions::equals(self.response(), expected)?)
    }

    pub fn set_variable_from_response(&mut self, name: &str) -> Result<()> {
        info!(name, value = self.response(), "saving response to variable");
        let value = self.response().to_string();
        self.ctx.vars.set(name, value);
        Ok(())
    }

    pub fn set_json_variable(&mut self, name: &str, value: &str) -> Result<()> {
        assertions::validate_json_object(value)?;
        self.ctx.vars.set(name, value);
        Ok(())
    }

    pub fn json_path_equals(&mut self, path: &str, expected: &str) -> Result<()> {
        Ok(assertions::path_equals(self.response(), path, expected)?)
    }

    pub fn json_path_has_items(&mut self, path: &str, expected: usize) -> Result<()> {
        Ok(assertions::path_has_items(self.response(), path, expected)?)
    }

    pub fn json_path_contains(&mut self, path: &str, expected: &str) -> Result<()> {
        Ok(assertions::path_contains(self.response(), path, expected)?)
    }
}

impl<C: ?Sized, S: ?Sized, P> ScenarioHooks for CommonSteps<'_, C, S, P> {
    fn before_scenario(&mut self) {
        self.ctx.reset();
    }

    fn after_scenario(&mut self) {
        self.ctx.reset();
    }
}

/// Turn an expected failure into success when its message contains `expected`.
fn expect_error(result: Result<()>, expected: &str) -> Result<()> {
    match result {
        Ok(()) => bail!("expecting error [{expected}] but got no error"),
        Err(err) => {
            let message = format!("{err:#}");
            if !message.contains(expected) {
                bail!("expecting error [{expected}] but got [{message}]");
            }
            Ok(())
        }
    }
}

fn tolerate_existing(result: Result<()>, op: &str) -> Result<()> {
    match result {
        Err(err) if format!("{err:#}").contains("already exists") => {
            warn!(error = %format!("{err:#}"), "{op}: chaincode already exists");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::{ErrorGroup, TransportError};
    use crate::test_support::{FixedPermutation, RecordingSleeper, ScriptedNetwork, two_org_topology};

    type Steps<'a> = CommonSteps<'a, ScriptedNetwork, RecordingSleeper, FixedPermutation>;

    fn steps<'a>(network: &'a ScriptedNetwork, sleeper: &'a RecordingSleeper) -> Steps<'a> {
        CommonSteps::new(
            LedgerConfig::default(),
            Path::new("/work"),
            network,
            sleeper,
            FixedPermutation(vec![1, 0]),
        )
        .with_topology(two_org_topology())
    }

    fn spec<'s>(orgs: &'s str, policy: &'s str, collections: &'s str) -> DeploySpec<'s> {
        DeploySpec {
            kind: "test",
            chaincode_id: "examplecc",
            version: DEFAULT_VERSION,
            path: "github.com/example_cc",
            orgs,
            channel: "mychannel",
            args: "init,a,100",
            policy,
            collections,
        }
    }

    #[test]
    fn query_resolves_args_and_caches_response() {
        let network = ScriptedNetwork::default().respond("peer0.org1", Ok("100"));
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps.ctx.vars.set("key", "a");

        steps.query_cc("examplecc", "get,${key}", "mychannel").expect("query");

        assert_eq!(steps.response(), "100");
        let call = &network.calls()[0];
        assert_eq!(call.function, "get");
        assert_eq!(call.args, vec!["a"]);
        assert_eq!(call.targets.len(), 4);
    }

    #[test]
    fn scenario_retry_additions_reach_the_boundary() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps.ctx.retry_additions.push((ErrorGroup::Chaincode, 418));

        steps.query_cc("examplecc", "get", "mychannel").expect("query");

        let policy = network.calls()[0].policy.clone().expect("policy");
        assert!(policy.table.contains(ErrorGroup::Chaincode, 404));
        assert!(policy.table.contains(ErrorGroup::Chaincode, 418));
        assert!(policy.table.contains(ErrorGroup::Transport, 14));

        steps.after_scenario();
        steps.query_cc("examplecc", "get", "mychannel").expect("query");
        let policy = network.calls()[1].policy.clone().expect("policy");
        assert!(policy.table.contains(ErrorGroup::Chaincode, 404));
        assert!(!policy.table.contains(ErrorGroup::Chaincode, 418));
    }

    #[test]
    fn unresolved_variable_aborts_before_any_call() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps.ctx.response.set("stale");

        let err = steps
            .query_cc("examplecc", "get,${missing}", "mychannel")
            .unwrap_err();

        assert!(format!("{err:#}").contains("missing"));
        assert!(network.calls().is_empty());
        assert_eq!(steps.response(), "", "response is cleared first");
    }

    #[test]
    fn single_peer_query_uses_permutation() {
        let network = ScriptedNetwork::default().respond("peer1.org2", Ok("from p1"));
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps
            .query_cc_on_single_peer("examplecc", "get,a", "org2", "mychannel")
            .expect("query");

        assert_eq!(network.calls()[0].targets, vec!["peer1.org2"]);
        assert_eq!(steps.response(), "from p1");

        let err = steps
            .query_cc_on_single_peer("examplecc", "get,a", "org3", "mychannel")
            .unwrap_err();
        assert!(err.to_string().contains("no peers in org(s) [org3]"));
    }

    #[test]
    fn system_query_goes_through_pipeline_on_first_org_peer() {
        let network = ScriptedNetwork::default().respond("peer0.org2", Ok("chain-info"));
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps
            .query_system_cc("qscc", "GetChainInfo,mychannel", "org2", "mychannel")
            .expect("query");

        let calls = network.calls();
        assert_eq!(calls[0].operation, "pipeline");
        assert_eq!(calls[0].targets, vec!["peer0.org2"]);
        assert_eq!(steps.response(), "chain-info");
    }

    #[test]
    fn query_with_error_matches_substring() {
        let network = ScriptedNetwork::default().respond(
            "peer0.org1",
            Err(TransportError::new(ErrorGroup::Chaincode, 500, "key not found")),
        );
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps
            .query_cc_with_error("examplecc", "get,zz", "mychannel", "key not found")
            .expect("expected error matched");
        let err = steps
            .query_cc_with_error("examplecc", "get,zz", "mychannel", "timeout")
            .unwrap_err();
        assert!(err.to_string().contains("expecting error [timeout]"));
    }

    #[test]
    fn invoke_on_peers_rejects_unknown_peer() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        let err = steps
            .invoke_cc_on_peers("examplecc", "put,a,1", "peer0.org1,peer7.org9", "mychannel")
            .unwrap_err();
        assert!(err.to_string().contains("peer7.org9"));
        assert!(network.calls().is_empty());

        steps
            .invoke_cc_on_orgs("examplecc", "put,a,1", "org2", "mychannel")
            .expect("invoke");
        let call = &network.calls()[0];
        assert_eq!(call.operation, "invoke");
        assert_eq!(call.targets, vec!["peer0.org2", "peer1.org2"]);
    }

    #[test]
    fn warm_up_queries_each_peer_sequentially() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps.warm_up_cc("examplecc", "org1", "mychannel").expect("warm up");

        let targets: Vec<Vec<String>> = network.calls().into_iter().map(|c| c.targets).collect();
        assert_eq!(targets, vec![vec!["peer0.org1"], vec!["peer1.org1"]]);
    }

    #[test]
    fn wait_uses_sleeper() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps.wait(3).expect("wait");
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn install_targets_local_peers_per_org() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps
            .install_cc("test", "examplecc", "v2", "github.com/example_cc", "", "^peer1\\.")
            .expect("install");

        let calls = network.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].targets, vec!["peer0.org1"]);
        assert_eq!(calls[1].targets, vec!["peer0.org2"]);

        let err = steps
            .install_cc("wasm", "examplecc", "v1", "p", "", "")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported chaincode type: [wasm]"));
    }

    #[test]
    fn instantiate_uses_default_policy_and_collections() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps
            .define_collection_config("coll1", "collection1", "", 1, 2, 0)
            .expect("define");

        steps
            .instantiate_cc(&spec("", "", "coll1"))
            .expect("instantiate");

        let calls = network.calls();
        assert_eq!(calls[0].operation, "instantiate");
        assert_eq!(calls[0].targets, vec!["peer0.org1"], "first peer only");
        let deploy = &network.deploys()[0];
        assert_eq!(
            deploy.policy.to_string(),
            "OutOf(1, 'Org1MSP.member', 'Org2MSP.member')"
        );
        assert_eq!(deploy.args, vec!["init", "a", "100"]);
        assert_eq!(deploy.collections[0].name, "collection1");
    }

    #[test]
    fn instantiate_tolerates_existing_chaincode() {
        let network = ScriptedNetwork::default().fail_lifecycle("chaincode examplecc already exists");
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps
            .instantiate_cc(&spec("org1", "", ""))
            .expect("already exists is tolerated");

        let err = steps.instantiate_cc(&spec("org1", "", "nope")).unwrap_err();
        assert!(format!("{err:#}").contains("no collection config defined"));
    }

    #[test]
    fn upgrade_with_error_expects_failure() {
        let network = ScriptedNetwork::default().fail_lifecycle("version v2 is invalid");
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        let mut upgrade = spec("", "OR('Org1MSP.member')", "");
        upgrade.version = "v2";

        steps
            .upgrade_cc_with_error(&upgrade, "is invalid")
            .expect("error matched");
    }

    #[test]
    fn deploy_installs_only_where_missing() {
        let network = ScriptedNetwork::default().with_installed("examplecc", "peer0.org1");
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps.deploy_cc(&spec("org1", "", "")).expect("deploy");

        let ops: Vec<(&str, Vec<String>)> = network
            .calls()
            .into_iter()
            .map(|c| (c.operation, c.targets))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("install", vec!["peer1.org1".to_string()]),
                (
                    "instantiate",
                    vec!["peer0.org1".to_string(), "peer1.org1".to_string()]
                ),
            ]
        );
    }

    #[test]
    fn last_blocks_walk_back_from_height() {
        let network = ScriptedNetwork::default().with_block_height(10);
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);

        steps.display_last_blocks(3, "mychannel").expect("blocks");
        steps.display_block(2, "org1only").expect("block");

        let calls = network.calls();
        assert_eq!(calls[0].args, vec!["org1", "9", "3"]);
        assert_eq!(calls[1].channel, "org1only");
        assert_eq!(calls[1].args, vec!["org1", "2", "1"]);

        let empty = ScriptedNetwork::default();
        let mut steps = self::steps(&empty, &sleeper);
        assert!(steps.display_last_block("mychannel").is_err());
    }

    #[test]
    fn response_checks_and_variables() {
        let network = ScriptedNetwork::default()
            .respond("peer0.org1", Ok(r#"{"owner":{"name":"alice"},"tags":["x","y"]}"#));
        let sleeper = RecordingSleeper::default();
        let mut steps = steps(&network, &sleeper);
        steps.query_cc("examplecc", "read", "mychannel").expect("query");

        steps.response_contains("alice").expect("contains");
        assert!(steps.response_equals("alice").is_err());
        steps.json_path_equals("owner.name", "alice").expect("path");
        steps.json_path_has_items("tags.#", 2).expect("count");
        steps.json_path_contains("tags", "y").expect("contains item");

        steps.set_variable_from_response("doc").expect("save");
        assert_eq!(steps.ctx.vars.get("doc"), Some(steps.response()));
        assert!(steps.set_json_variable("bad", "[1,2]").is_err());
        steps.set_json_variable("good", r#"{"a":1}"#).expect("json var");

        steps.after_scenario();
        assert!(steps.ctx.vars.is_empty());
        assert_eq!(steps.response(), "");
    }
}
