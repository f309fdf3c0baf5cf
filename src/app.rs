use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::JobConfig;
use crate::engine::calculator::{CalculationMode, EventBasedCalculator};
use crate::engine::gmf::{GsimRegistry, SimpleAttenuation};
use crate::logging::{humansize, LogLevel, RunLogger};
use crate::ltree::{GsimBranch, GsimLogicTree};
use crate::rupture::SourceGroup;
use crate::sampler::PoissonGenerator;
use crate::site::SiteCollection;

/// Job file consumed by the command-line driver: the parameter bundle plus
/// the model inputs the excluded job database would normally provide.
#[derive(Debug, Deserialize)]
struct JobFile {
    config: JobConfig,
    sites: Vec<(f64, f64)>,
    source_groups: Vec<SourceGroup>,
    gsim_logic_tree: BTreeMap<u16, Vec<GsimBranch>>,
}

/// Application entrypoint: load the job file named on the command line, run
/// the calculation, print a run summary.
pub fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .context("usage: hazflow <job.json>")?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read job file {path}"))?;
    let job: JobFile =
        serde_json::from_str(&raw).with_context(|| format!("cannot parse job file {path}"))?;

    let sites = Arc::new(SiteCollection::from_points(&job.sites));
    let ltree = GsimLogicTree::new(job.gsim_logic_tree.clone());
    let mut registry = GsimRegistry::new();
    for branches in job.gsim_logic_tree.values() {
        for branch in branches {
            registry = registry.register(
                branch.gsim.clone(),
                Arc::new(SimpleAttenuation::default()),
            );
        }
    }

    let calculator = EventBasedCalculator::new(job.config, sites, ltree, Arc::new(registry))
        .with_logger(RunLogger::new(LogLevel::Info, true));
    let output = calculator.run(CalculationMode::FromSources {
        groups: job.source_groups,
        generator: Arc::new(PoissonGenerator),
    })?;

    println!(
        "events: {}  gmf rows: {}  gmf data: {}",
        output.telemetry.events_stored,
        output.telemetry.gmf_rows_stored,
        humansize(output.telemetry.gmf_bytes),
    );
    if !output.stats_written.is_empty() {
        println!("statistics: {}", output.stats_written.join(", "));
    }
    Ok(())
}
