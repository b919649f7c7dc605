//! Scenario step runner for permissioned ledger networks.
//!
//! Loads `ledger-steps.toml`, then either inspects it (`validate`, `targets`,
//! `resolve`, `steps`) or runs a feature file against the network through the
//! configured ledger CLI (`run`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};

use ledger_steps::core::selector::{RandomPermutation, TargetFilter, select};
use ledger_steps::core::state::VariableStore;
use ledger_steps::core::template;
use ledger_steps::exit_codes;
use ledger_steps::feature::{RunSummary, parse_feature, run_feature};
use ledger_steps::io::cli_client::CliClient;
use ledger_steps::io::clock::ThreadSleeper;
use ledger_steps::io::config::{DEFAULT_CONFIG_FILE, load_config};
use ledger_steps::logging;
use ledger_steps::registry::common_steps;
use ledger_steps::steps::CommonSteps;

#[derive(Parser)]
#[command(
    name = "ledger-steps",
    version,
    about = "Reusable scenario steps for permissioned ledger networks"
)]
struct Cli {
    /// Config file; defaults apply when it is missing.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the config file and summarize the network it describes.
    Validate,
    /// Resolve a comma-separated argument template and print it as JSON.
    Resolve {
        args: String,
        /// Variable binding, `name=value`. Repeatable.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Print the peers a filter selects.
    Targets {
        #[arg(long, default_value = "")]
        channel: String,
        /// Comma-separated org IDs.
        #[arg(long, conflicts_with_all = ["peers", "local_org"])]
        orgs: Option<String>,
        /// Comma-separated peer IDs.
        #[arg(long, conflicts_with = "local_org")]
        peers: Option<String>,
        /// Local peers of one org, regardless of channel.
        #[arg(long)]
        local_org: Option<String>,
        /// Regex over peer IDs to drop from `--local-org`.
        #[arg(long, default_value = "", requires = "local_org")]
        exclude: String,
    },
    /// List the step sentence patterns.
    Steps,
    /// Run every scenario in a feature file.
    Run {
        feature: PathBuf,
        /// Base directory for chaincode paths.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got [{raw}]"))
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate => cmd_validate(&cli.config),
        Command::Resolve { args, vars } => cmd_resolve(&args, vars),
        Command::Targets {
            channel,
            orgs,
            peers,
            local_org,
            exclude,
        } => {
            let filter = match (orgs, peers, local_org) {
                (Some(orgs), _, _) => TargetFilter::orgs(&orgs),
                (_, Some(peers), _) => TargetFilter::peers(&peers),
                (_, _, Some(org)) => TargetFilter::local(&org, &exclude)?,
                _ => TargetFilter::All,
            };
            cmd_targets(&cli.config, &channel, &filter)
        }
        Command::Steps => cmd_steps(),
        Command::Run {
            feature,
            workdir,
            json,
        } => cmd_run(&cli.config, &feature, &workdir, json),
    }
}

fn cmd_validate(config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let topology = cfg.topology();
    println!(
        "ok: {} peer(s) in {} org(s) on {} channel(s)",
        cfg.peers.len(),
        topology.orgs().len(),
        topology.channels().count()
    );
    Ok(exit_codes::OK)
}

fn cmd_resolve(args: &str, vars: Vec<(String, String)>) -> Result<i32> {
    let vars: VariableStore = vars.into_iter().collect();
    let resolved = template::resolve(&vars, args)?;
    println!("{}", serde_json::to_string(&resolved)?);
    Ok(exit_codes::OK)
}

fn cmd_targets(config: &Path, channel: &str, filter: &TargetFilter) -> Result<i32> {
    let cfg = load_config(config)?;
    let targets = select(&cfg.topology(), channel, filter)?;
    if targets.is_empty() {
        bail!("no targets selected on channel [{channel}]");
    }
    for target in targets {
        println!("{}\t{}\t{}", target.peer_id, target.org_id, target.url);
    }
    Ok(exit_codes::OK)
}

fn cmd_steps() -> Result<i32> {
    let registry = common_steps::<CliClient<ThreadSleeper>, ThreadSleeper, RandomPermutation>()?;
    for pattern in registry.patterns() {
        println!("{pattern}");
    }
    Ok(exit_codes::OK)
}

fn cmd_run(config: &Path, path: &Path, workdir: &Path, json: bool) -> Result<i32> {
    let cfg = load_config(config)?;
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let feature = parse_feature(&text).with_context(|| format!("parse {}", path.display()))?;

    let registry = common_steps()?;
    let undefined: Vec<String> = feature
        .background
        .iter()
        .chain(feature.scenarios.iter().flat_map(|s| &s.steps))
        .filter(|step| !registry.is_defined(&step.text))
        .map(|step| format!("line {}: {}", step.line, step.text))
        .collect();
    if !undefined.is_empty() {
        return Err(anyhow!("undefined steps:\n  {}", undefined.join("\n  ")));
    }

    let sleeper = ThreadSleeper;
    let client = CliClient::new(&cfg, ThreadSleeper);
    let mut steps = CommonSteps::new(cfg, workdir, &client, &sleeper, RandomPermutation);
    let summary = run_feature(&registry, &mut steps, &feature);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(if summary.success() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn print_summary(summary: &RunSummary) {
    for failure in &summary.failed {
        println!(
            "FAIL {} (line {}): {}\n  {}",
            failure.scenario, failure.line, failure.step, failure.error
        );
    }
    println!(
        "{} passed, {} failed",
        summary.passed,
        summary.failed.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_resolve_with_vars() {
        let cli = Cli::parse_from([
            "ledger-steps",
            "resolve",
            "get,${key}",
            "--var",
            "key=a=b",
        ]);
        match cli.command {
            Command::Resolve { args, vars } => {
                assert_eq!(args, "get,${key}");
                assert_eq!(vars, vec![("key".to_string(), "a=b".to_string())]);
            }
            _ => panic!("expected resolve"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_var_requires_name() {
        assert!(parse_var("=x").is_err());
        assert!(parse_var("novalue").is_err());
        assert_eq!(parse_var("k=").unwrap(), ("k".to_string(), String::new()));
    }

    #[test]
    fn targets_filters_conflict() {
        let result = Cli::try_parse_from([
            "ledger-steps",
            "targets",
            "--orgs",
            "org1",
            "--peers",
            "peer0.org1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parse_run_with_global_config() {
        let cli = Cli::parse_from([
            "ledger-steps",
            "run",
            "query.feature",
            "--config",
            "net.toml",
            "--json",
        ]);
        assert!(matches!(cli.command, Command::Run { json: true, .. }));
        assert_eq!(cli.config, PathBuf::from("net.toml"));
    }
}
