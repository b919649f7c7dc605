//! Plain-text feature files and the scenario loop that runs them.
//!
//! Only the subset the step library needs is understood: `Feature:`,
//! `Background:` and `Scenario:` headers, step lines starting with
//! `Given`/`When`/`Then`/`And`/`But`, `#` comments and free text under the
//! feature header. Background steps run before every scenario.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::registry::StepRegistry;

const STEP_KEYWORDS: [&str; 5] = ["Given", "When", "Then", "And", "But"];

/// State reset around each scenario.
pub trait ScenarioHooks {
    fn before_scenario(&mut self);
    fn after_scenario(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// 1-based line in the feature file.
    pub line: usize,
    /// Sentence with its keyword stripped.
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub line: usize,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub background: Vec<Step>,
    pub scenarios: Vec<Scenario>,
}

enum Section {
    Preamble,
    Background,
    Scenario,
}

pub fn parse_feature(text: &str) -> Result<Feature> {
    let mut feature = Feature::default();
    let mut section = Section::Preamble;

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(name) = trimmed.strip_prefix("Feature:") {
            feature.name = name.trim().to_string();
            section = Section::Preamble;
        } else if trimmed.starts_with("Background:") {
            if !feature.scenarios.is_empty() {
                bail!("line {line}: Background must come before the first Scenario");
            }
            section = Section::Background;
        } else if let Some(name) = trimmed.strip_prefix("Scenario:") {
            feature.scenarios.push(Scenario {
                name: name.trim().to_string(),
                line,
                steps: Vec::new(),
            });
            section = Section::Scenario;
        } else if let Some(sentence) = strip_keyword(trimmed) {
            let step = Step {
                line,
                text: sentence.to_string(),
            };
            match section {
                Section::Preamble => bail!("line {line}: step outside of a Scenario"),
                Section::Background => feature.background.push(step),
                Section::Scenario => {
                    if let Some(scenario) = feature.scenarios.last_mut() {
                        scenario.steps.push(step);
                    }
                }
            }
        } else if !matches!(section, Section::Preamble) {
            bail!("line {line}: expected a step, found [{trimmed}]");
        }
    }
    Ok(feature)
}

fn strip_keyword(line: &str) -> Option<&str> {
    STEP_KEYWORDS.iter().find_map(|keyword| {
        line.strip_prefix(keyword)
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(str::trim)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioFailure {
    pub scenario: String,
    pub line: usize,
    pub step: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: Vec<ScenarioFailure>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run every scenario. A failing step ends its scenario; later scenarios
/// still run.
#[instrument(skip_all, fields(feature = %feature.name, scenarios = feature.scenarios.len()))]
pub fn run_feature<T: ScenarioHooks>(
    registry: &StepRegistry<T>,
    target: &mut T,
    feature: &Feature,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for scenario in &feature.scenarios {
        info!(scenario = %scenario.name, "running scenario");
        target.before_scenario();
        let failure = feature
            .background
            .iter()
            .chain(&scenario.steps)
            .find_map(|step| {
                registry
                    .run(target, &step.text)
                    .err()
                    .map(|err| (step, format!("{err:#}")))
            });
        target.after_scenario();

        match failure {
            None => summary.passed += 1,
            Some((step, error)) => {
                warn!(scenario = %scenario.name, line = step.line, %error, "scenario failed");
                summary.failed.push(ScenarioFailure {
                    scenario: scenario.name.clone(),
                    line: step.line,
                    step: step.text.clone(),
                    error,
                });
            }
        }
    }
    summary
}
