//! Scenario files for the `batchfill` command.
//!
//! A scenario lists targets, named in-memory sources and the joins to run
//! between them. Every join is applied to every target, then one fill
//! cycle runs over all of them.

use anyhow::{Context, Result};
use batchfill_engine::source::memory::MemorySource;
use batchfill_engine::{EngineConfig, FillEngine, FillSummary, JoinOptions};
use batchfill_model::Target;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One join: the source to fetch from and its options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub source: String,
    #[serde(flatten)]
    pub options: JoinOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub config: EngineConfig,
    pub targets: Vec<Value>,
    #[serde(default)]
    pub sources: BTreeMap<String, Vec<Value>>,
    pub joins: Vec<JoinSpec>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid scenario file")
    }
}

/// Populated targets plus the fill summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioReport {
    pub targets: Vec<Value>,
    pub summary: FillSummary,
}

/// Runs every join of `scenario` in a single fill cycle.
pub async fn run_scenario(scenario: Scenario) -> Result<ScenarioReport> {
    let engine = FillEngine::with_config(scenario.config);

    let targets = scenario
        .targets
        .into_iter()
        .enumerate()
        .map(|(i, value)| Target::from_value(value).with_context(|| format!("target #{i}")))
        .collect::<Result<Vec<_>>>()?;

    let sources: BTreeMap<String, Arc<MemorySource>> = scenario
        .sources
        .into_iter()
        .map(|(name, records)| {
            let source = Arc::new(MemorySource::with_records(name.clone(), records));
            (name, source)
        })
        .collect();

    for (i, join) in scenario.joins.into_iter().enumerate() {
        let source = sources
            .get(&join.source)
            .cloned()
            .with_context(|| format!("join #{i} references unknown source {:?}", join.source))?;
        let subscription = engine
            .subscribe(source, join.options)
            .with_context(|| format!("join #{i}"))?;
        subscription
            .add_all(&targets)
            .with_context(|| format!("join #{i}"))?;
        debug!("Join #{} on {}: {} key(s)", i, join.source, subscription.len());
    }

    info!("Running fill over {} target(s)", targets.len());
    let summary = engine.fill_subscriptions().await?;

    Ok(ScenarioReport {
        targets: targets.iter().map(Target::snapshot).collect(),
        summary,
    })
}
