//! Maps step sentences to handlers.
//!
//! Patterns are anchored regexes tried in registration order; the first match
//! wins and its capture groups become the handler's [`StepArgs`].

use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::core::selector::Permutation;
use crate::io::clock::Sleeper;
use crate::steps::{CommonSteps, DEFAULT_VERSION, DeploySpec, LedgerClient};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("undefined step: [{0}]")]
    UnknownStep(String),
}

/// Capture groups of a matched sentence, in group order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepArgs(Vec<String>);

impl StepArgs {
    pub fn str(&self, index: usize) -> Result<&str> {
        self.0
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("step argument {index} missing"))
    }

    pub fn parse<T>(&self, index: usize) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.str(index)?;
        raw.parse()
            .map_err(|err| anyhow!("step argument {index} [{raw}]: {err}"))
    }
}

pub type Handler<T> = fn(&mut T, &StepArgs) -> Result<()>;

pub struct StepRegistry<T> {
    steps: Vec<(Regex, Handler<T>)>,
}

impl<T> Default for StepRegistry<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T> StepRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, pattern: &str, handler: Handler<T>) -> Result<()> {
        let regex =
            Regex::new(pattern).with_context(|| format!("compile step pattern {pattern}"))?;
        self.steps.push((regex, handler));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(regex, _)| regex.as_str())
    }

    pub fn is_defined(&self, sentence: &str) -> bool {
        let sentence = sentence.trim();
        self.steps.iter().any(|(regex, _)| regex.is_match(sentence))
    }

    /// Run the first handler whose pattern matches `sentence`.
    pub fn run(&self, target: &mut T, sentence: &str) -> Result<()> {
        let sentence = sentence.trim();
        for (regex, handler) in &self.steps {
            if let Some(caps) = regex.captures(sentence) {
                let args = StepArgs(
                    caps.iter()
                        .skip(1)
                        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect(),
                );
                debug!(pattern = regex.as_str(), "matched step");
                return handler(target, &args);
            }
        }
        Err(RegistryError::UnknownStep(sentence.to_string()).into())
    }
}

fn deploy_spec<'s>(
    a: &'s StepArgs,
    version: &'s str,
    orgs: &'s str,
    rest: [usize; 5],
) -> Result<DeploySpec<'s>> {
    let [channel, args, policy, collections, path] = rest;
    Ok(DeploySpec {
        kind: a.str(0)?,
        chaincode_id: a.str(1)?,
        version,
        path: a.str(path)?,
        orgs,
        channel: a.str(channel)?,
        args: a.str(args)?,
        policy: a.str(policy)?,
        collections: a.str(collections)?,
    })
}

/// The full common step vocabulary.
pub fn common_steps<'a, C, S, P>() -> Result<StepRegistry<CommonSteps<'a, C, S, P>>>
where
    C: LedgerClient + ?Sized,
    S: Sleeper + ?Sized,
    P: Permutation,
{
    let mut r: StepRegistry<CommonSteps<'a, C, S, P>> = StepRegistry::new();

    r.step(r"^we wait (\d+) seconds$", |s, a| s.wait(a.parse(0)?))?;

    // Queries
    r.step(
        r#"^client queries chaincode "([^"]*)" with args "([^"]*)" on all peers in the "([^"]*)" org on the "([^"]*)" channel$"#,
        |s, a| s.query_cc_on_orgs(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client queries chaincode "([^"]*)" with args "([^"]*)" on a single peer in the "([^"]*)" org on the "([^"]*)" channel$"#,
        |s, a| s.query_cc_on_single_peer(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client queries chaincode "([^"]*)" with args "([^"]*)" on peers "([^"]*)" on the "([^"]*)" channel$"#,
        |s, a| s.query_cc_on_peers(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client queries system chaincode "([^"]*)" with args "([^"]*)" on org "([^"]*)" peer on the "([^"]*)" channel$"#,
        |s, a| s.query_system_cc(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client queries chaincode "([^"]*)" with args "([^"]*)" on the "([^"]*)" channel$"#,
        |s, a| s.query_cc(a.str(0)?, a.str(1)?, a.str(2)?),
    )?;
    r.step(
        r#"^client queries chaincode "([^"]*)" with args "([^"]*)" on the "([^"]*)" channel then the error response should contain "([^"]*)"$"#,
        |s, a| s.query_cc_with_error(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;

    // Invokes
    r.step(
        r#"^client invokes chaincode "([^"]*)" with args "([^"]*)" on all peers in the "([^"]*)" org on the "([^"]*)" channel$"#,
        |s, a| s.invoke_cc_on_orgs(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client invokes chaincode "([^"]*)" with args "([^"]*)" on peers "([^"]*)" on the "([^"]*)" channel$"#,
        |s, a| s.invoke_cc_on_peers(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?),
    )?;
    r.step(
        r#"^client invokes chaincode "([^"]*)" with args "([^"]*)" on the "([^"]*)" channel$"#,
        |s, a| s.invoke_cc(a.str(0)?, a.str(1)?, a.str(2)?),
    )?;

    // Response checks and variables
    r.step(
        r#"^response from "([^"]*)" to client contains value "([^"]*)"$"#,
        |s, a| s.response_contains(a.str(1)?),
    )?;
    r.step(
        r#"^response from "([^"]*)" to client equal value "([^"]*)"$"#,
        |s, a| s.response_equals(a.str(1)?),
    )?;
    r.step(
        r#"^the response is saved to variable "([^"]*)"$"#,
        |s, a| s.set_variable_from_response(a.str(0)?),
    )?;
    r.step(
        r#"^variable "([^"]*)" is assigned the JSON value '([^']*)'$"#,
        |s, a| s.set_json_variable(a.str(0)?, a.str(1)?),
    )?;
    r.step(
        r#"^the JSON path "([^"]*)" of the response equals "([^"]*)"$"#,
        |s, a| s.json_path_equals(a.str(0)?, a.str(1)?),
    )?;
    r.step(
        r#"^the JSON path "([^"]*)" of the response has (\d+) items$"#,
        |s, a| s.json_path_has_items(a.str(0)?, a.parse(1)?),
    )?;
    r.step(
        r#"^the JSON path "([^"]*)" of the response contains "([^"]*)"$"#,
        |s, a| s.json_path_contains(a.str(0)?, a.str(1)?),
    )?;

    // Install
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" version "([^"]*)" is installed from path "([^"]*)" to all peers$"#,
        |s, a| s.install_cc(a.str(0)?, a.str(1)?, a.str(2)?, a.str(3)?, "", ""),
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is installed from path "([^"]*)" to all peers$"#,
        |s, a| s.install_cc(a.str(0)?, a.str(1)?, DEFAULT_VERSION, a.str(2)?, "", ""),
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is installed from path "([^"]*)" to all peers in the "([^"]*)" org$"#,
        |s, a| s.install_cc(a.str(0)?, a.str(1)?, DEFAULT_VERSION, a.str(2)?, a.str(3)?, ""),
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is installed from path "([^"]*)" to all peers except "([^"]*)"$"#,
        |s, a| s.install_cc(a.str(0)?, a.str(1)?, DEFAULT_VERSION, a.str(2)?, "", a.str(3)?),
    )?;

    // Instantiate, upgrade and deploy. Groups after kind and ID are listed as
    // [channel, args, policy, collections, path].
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is instantiated from path "([^"]*)" on all peers in the "([^"]*)" org on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, DEFAULT_VERSION, a.str(3)?, [4, 5, 6, 7, 2])?;
            s.instantiate_cc(&spec)
        },
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is instantiated from path "([^"]*)" on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, DEFAULT_VERSION, "", [3, 4, 5, 6, 2])?;
            s.instantiate_cc(&spec)
        },
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is upgraded with version "([^"]*)" from path "([^"]*)" on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, a.str(2)?, "", [4, 5, 6, 7, 3])?;
            s.upgrade_cc(&spec)
        },
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is upgraded with version "([^"]*)" from path "([^"]*)" on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)" then the error response should contain "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, a.str(2)?, "", [4, 5, 6, 7, 3])?;
            s.upgrade_cc_with_error(&spec, a.str(8)?)
        },
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is deployed from path "([^"]*)" to all peers in the "([^"]*)" org on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, DEFAULT_VERSION, a.str(3)?, [4, 5, 6, 7, 2])?;
            s.deploy_cc(&spec)
        },
    )?;
    r.step(
        r#"^"([^"]*)" chaincode "([^"]*)" is deployed from path "([^"]*)" to all peers on the "([^"]*)" channel with args "([^"]*)" with endorsement policy "([^"]*)" with collection policy "([^"]*)"$"#,
        |s, a| {
            let spec = deploy_spec(a, DEFAULT_VERSION, "", [3, 4, 5, 6, 2])?;
            s.deploy_cc(&spec)
        },
    )?;
    r.step(
        r#"^collection config "([^"]*)" is defined for collection "([^"]*)" as policy="([^"]*)", requiredPeerCount=(\d+), maxPeerCount=(\d+), and blocksToLive=(\d+)$"#,
        |s, a| {
            s.define_collection_config(
                a.str(0)?,
                a.str(1)?,
                a.str(2)?,
                a.parse(3)?,
                a.parse(4)?,
                a.parse(5)?,
            )
        },
    )?;

    // Warm-up
    r.step(
        r#"^chaincode "([^"]*)" is warmed up on all peers in the "([^"]*)" org on the "([^"]*)" channel$"#,
        |s, a| s.warm_up_cc(a.str(0)?, a.str(1)?, a.str(2)?),
    )?;
    r.step(
        r#"^chaincode "([^"]*)" is warmed up on all peers on the "([^"]*)" channel$"#,
        |s, a| s.warm_up_cc(a.str(0)?, "", a.str(1)?),
    )?;

    // Blocks
    r.step(
        r#"^block (\d+) from the "([^"]*)" channel is displayed$"#,
        |s, a| s.display_block(a.parse(0)?, a.str(1)?),
    )?;
    r.step(
        r#"^the last (\d+) blocks from the "([^"]*)" channel are displayed$"#,
        |s, a| s.display_last_blocks(a.parse(0)?, a.str(1)?),
    )?;
    r.step(
        r#"^the last block from the "([^"]*)" channel is displayed$"#,
        |s, a| s.display_last_block(a.str(0)?),
    )?;

    Ok(r)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::io::config::LedgerConfig;
    use crate::test_support::{FixedPermutation, RecordingSleeper, ScriptedNetwork, two_org_topology};

    #[derive(Default)]
    struct Counter {
        seen: Vec<String>,
    }

    #[test]
    fn first_matching_pattern_wins() {
        let mut registry: StepRegistry<Counter> = StepRegistry::new();
        registry
            .step(r"^add (\d+)$", |c, a| {
                c.seen.push(format!("add {}", a.parse::<u32>(0)?));
                Ok(())
            })
            .expect("pattern");
        registry
            .step(r"^add (.*)$", |c, a| {
                c.seen.push(format!("any {}", a.str(0)?));
                Ok(())
            })
            .expect("pattern");

        let mut counter = Counter::default();
        registry.run(&mut counter, "  add 7 ").expect("numeric");
        registry.run(&mut counter, "add seven").expect("fallback");
        assert_eq!(counter.seen, vec!["add 7", "any seven"]);

        assert!(!registry.is_defined("remove 1"));
        let err = registry.run(&mut counter, "remove 1").unwrap_err();
        assert_eq!(
            err.downcast_ref::<RegistryError>(),
            Some(&RegistryError::UnknownStep("remove 1".to_string()))
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut registry: StepRegistry<Counter> = StepRegistry::new();
        let err = registry.step(r"^(unclosed$", |_, _| Ok(())).unwrap_err();
        assert!(err.to_string().contains("compile step pattern"));
    }

    #[test]
    fn common_sentences_reach_their_handlers() {
        let network = ScriptedNetwork::default().respond("peer0.org1", Ok("42"));
        let sleeper = RecordingSleeper::default();
        let mut steps = CommonSteps::new(
            LedgerConfig::default(),
            Path::new("/work"),
            &network,
            &sleeper,
            FixedPermutation(vec![0]),
        )
        .with_topology(two_org_topology());
        let registry = common_steps().expect("registry");

        for sentence in [
            r#"client queries chaincode "examplecc" with args "get,a" on the "mychannel" channel"#,
            r#"response from "examplecc" to client equal value "42""#,
            r#"collection config "coll1" is defined for collection "collection1" as policy="", requiredPeerCount=1, maxPeerCount=2, and blocksToLive=3"#,
            r#""test" chaincode "examplecc" is instantiated from path "github.com/example_cc" on the "mychannel" channel with args "init" with endorsement policy "" with collection policy "coll1""#,
            r#""test" chaincode "examplecc" is upgraded with version "v2" from path "github.com/example_cc" on the "mychannel" channel with args "init" with endorsement policy "OR('Org1MSP.member')" with collection policy """#,
            "we wait 2 seconds",
        ] {
            registry.run(&mut steps, sentence).expect(sentence);
        }

        let deploys = network.deploys();
        assert_eq!(deploys[0].version, "v1");
        assert_eq!(deploys[0].path, "github.com/example_cc");
        assert_eq!(deploys[0].collections[0].block_to_live, 3);
        assert_eq!(deploys[1].version, "v2");
        assert_eq!(deploys[1].policy.to_string(), "OutOf(1, 'Org1MSP.member')");
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[test]
    fn error_suffix_variant_is_distinct_from_plain_query() {
        let network = ScriptedNetwork::default();
        let sleeper = RecordingSleeper::default();
        let mut steps = CommonSteps::new(
            LedgerConfig::default(),
            Path::new("/work"),
            &network,
            &sleeper,
            FixedPermutation(vec![0]),
        )
        .with_topology(two_org_topology());
        let registry = common_steps().expect("registry");

        let err = registry
            .run(
                &mut steps,
                r#"client queries chaincode "cc" with args "get" on the "mychannel" channel then the error response should contain "boom""#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("expecting error [boom] but got no error"));
    }
}
