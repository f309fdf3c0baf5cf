use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, JobConfig};
use crate::engine::aggregator::{AggregationError, AggregatorState};
use crate::engine::gmf::{
    estimate_gmf_bytes, GmfComputer, GmfParams, GmfTaskResult, GsimRegistry, RuptureInput,
};
use crate::event_model::{CodecError, EventCodec, EventRecord};
use crate::guard::{CapacityError, OverflowGuard};
use crate::logging::{humansize, LoggingError, RunLogger};
use crate::ltree::{GsimLogicTree, LogicTreeError, RealizationSet};
use crate::rupture::{Rupture, SourceGroup};
use crate::runtime::orchestrator::{OrchestratorError, TaskFault, TaskOrchestrator};
use crate::sampler::{RuptureGenerator, RuptureSampler, SamplerError, SamplingParams};
use crate::site::SiteCollection;
use crate::stats::{StatisticsFinalizer, StatsError};
use crate::store::{Datastore, StoreError, StoredRuptureHandle};
use crate::telemetry::RunTelemetry;

/// Run-level states. None is ever re-entered; a failure in any state aborts
/// the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    Sampling,
    ComputingGmfs,
    Aggregating,
    FinalizingStats,
    Done,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Sampling => "sampling",
            RunPhase::ComputingGmfs => "computing_gmfs",
            RunPhase::Aggregating => "aggregating",
            RunPhase::FinalizingStats => "finalizing_stats",
            RunPhase::Done => "done",
        }
    }
}

/// Where this run's ruptures come from.
pub enum CalculationMode {
    /// Sample ruptures from source groups in this run.
    FromSources {
        groups: Vec<SourceGroup>,
        generator: Arc<dyn RuptureGenerator>,
    },
    /// Reuse the rupture table of a previously completed run.
    FromRuptures { parent: Arc<Datastore> },
}

/// Everything a finished run hands back to the job driver.
#[derive(Debug)]
pub struct RunOutput {
    pub store: Datastore,
    pub telemetry: RunTelemetry,
    pub log_lines: Vec<String>,
    pub stats_written: Vec<String>,
}

struct GmfTask {
    input: RuptureInput,
    rlzs_by_gsim: BTreeMap<String, Vec<u16>>,
}

/// Event-based PSHA calculator: samples ruptures, fans ground-motion tasks
/// out to a worker pool, folds the results into curves and the store.
pub struct EventBasedCalculator {
    config: JobConfig,
    sites: Arc<SiteCollection>,
    ltree: GsimLogicTree,
    registry: Arc<GsimRegistry>,
    logger: RunLogger,
    telemetry: RunTelemetry,
    phase: RunPhase,
}

impl EventBasedCalculator {
    pub fn new(
        config: JobConfig,
        sites: Arc<SiteCollection>,
        ltree: GsimLogicTree,
        registry: Arc<GsimRegistry>,
    ) -> Self {
        Self {
            config,
            sites,
            ltree,
            registry,
            logger: RunLogger::default(),
            telemetry: RunTelemetry::new(),
            phase: RunPhase::Init,
        }
    }

    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) -> Result<(), LoggingError> {
        self.phase = phase;
        self.logger.info(phase.as_str(), "entering phase")
    }

    /// Executes the whole run and returns the populated store.
    pub fn run(mut self, mode: CalculationMode) -> Result<RunOutput, CalcError> {
        self.config.validate()?;
        let realizations = self.ltree.enumerate()?;
        let mut store = Datastore::new();

        self.enter(RunPhase::Sampling)?;
        let (blocks, from_sources) = match mode {
            CalculationMode::FromSources { groups, generator } => (
                self.sample_sources(&groups, generator.as_ref(), &realizations, &mut store)?,
                true,
            ),
            CalculationMode::FromRuptures { parent } => {
                (self.plan_from_ruptures(&parent), false)
            }
        };

        // the global event set is a deterministic function of the ruptures,
        // so the dense eid -> row index table can be built before the reduce
        let all_events = self.derive_all_events(&blocks, &realizations)?;
        if all_events.is_empty() {
            return Err(CalcError::NoSeismicEvents);
        }
        let eids: Vec<u64> = all_events.iter().map(|e| e.eid).collect();
        self.logger.info(
            RunPhase::Sampling.as_str(),
            &format!("{} events from {} task blocks", eids.len(), blocks.len()),
        )?;

        if !self.config.ground_motion_fields {
            // ruptures/events are still persisted; fields are skipped
            store.extend_events(all_events)?;
            self.finish_event_table(&mut store, from_sources)?;
            OverflowGuard::check(
                self.sites.len() as u64,
                store.events().len() as u64,
                self.config.imtls.num_imts() as u64,
            )?;
            self.enter(RunPhase::Done)?;
            return Ok(self.into_output(store, Vec::new()));
        }

        self.enter(RunPhase::ComputingGmfs)?;
        let emit_events = !(from_sources && self.config.save_ruptures);
        if from_sources && self.config.save_ruptures {
            // events already minted: persist them with the ruptures
            store.extend_events(all_events)?;
        }
        let params = GmfParams {
            imtls: self.config.imtls.clone(),
            min_iml: self.config.minimum_intensity.clone(),
            num_ses: self.config.ses_per_logic_tree_path,
            emit_events,
            hazard_curves: self.config.hazard_curves_from_gmfs,
            record_bytes: self.config.gmf_record_bytes(),
        };
        let computer = Arc::new(GmfComputer::new(
            self.sites.clone(),
            self.registry.clone(),
            params,
        ));
        let tasks: Vec<GmfTask> = blocks
            .into_iter()
            .map(|(grp_id, input)| GmfTask {
                rlzs_by_gsim: realizations.rlzs_by_gsim(grp_id),
                input,
            })
            .collect();
        self.telemetry.tasks_submitted = tasks.len() as u64;

        let mut agg = AggregatorState::new(
            self.sites.len(),
            self.config.imtls.num_levels(),
            realizations.len() as u16,
        );
        agg.set_event_index(&eids);

        let orchestrator = TaskOrchestrator::new(self.config.concurrent_tasks);
        let (mut store, agg) = orchestrator.map_reduce(
            tasks,
            move |task: GmfTask| {
                computer
                    .compute(task.input, &task.rlzs_by_gsim)
                    .map_err(|err| Box::new(err) as TaskFault)
            },
            (store, agg),
            |state: &mut (Datastore, AggregatorState), result: GmfTaskResult| {
                state
                    .1
                    .fold(&mut state.0, result)
                    .map_err(|err| Box::new(err) as TaskFault)
            },
        )?;

        self.enter(RunPhase::Aggregating)?;
        OverflowGuard::check(
            self.sites.len() as u64,
            store.events().len() as u64,
            self.config.imtls.num_imts() as u64,
        )?;
        self.telemetry.gmf_rows_stored = agg.row_offset();
        self.telemetry.gmf_bytes = agg.gmf_bytes();
        self.telemetry.events_stored = store.events().len() as u64;
        self.telemetry.add_eff_ruptures(agg.eff_ruptures());
        self.telemetry.compute_time_ms = agg.calc_time_ms();

        if agg.has_gmf_rows() {
            self.logger.info(
                RunPhase::Aggregating.as_str(),
                &format!("saved {} of gmf_data", humansize(agg.gmf_bytes())),
            )?;
            let imts: Vec<&str> = self.config.imtls.imts().collect();
            store.set_attr("gmf_data", "imts", json!(imts.join(" ")))?;
        } else {
            return Err(CalcError::NoGmfs);
        }
        let (indices, pmaps) = agg.into_parts();
        store.set_indices(indices)?;
        self.finish_event_table(&mut store, from_sources)?;

        self.enter(RunPhase::FinalizingStats)?;
        let mut stats_written = Vec::new();
        if self.config.hazard_curves_from_gmfs {
            let finalizer = StatisticsFinalizer::new(
                realizations.weights(),
                self.config.imtls.clone(),
                self.config.poes.clone(),
                self.config.quantiles.clone(),
            );
            for output in finalizer.finalize(&pmaps, self.sites.len())? {
                store.set_curve(output.name.clone(), output.curves)?;
                if let Some(map) = output.map {
                    store.set_map(output.name.clone(), map)?;
                }
                stats_written.push(output.name);
            }
            self.logger.info(
                RunPhase::FinalizingStats.as_str(),
                &format!("computed statistical hazard curves: {}", stats_written.join(", ")),
            )?;
        }

        self.enter(RunPhase::Done)?;
        Ok(self.into_output(store, stats_written))
    }

    /// Samples every source group into dispatch blocks, persisting ruptures
    /// when requested and logging the upper-bound GMF size estimate.
    fn sample_sources(
        &mut self,
        groups: &[SourceGroup],
        generator: &dyn RuptureGenerator,
        realizations: &RealizationSet,
        store: &mut Datastore,
    ) -> Result<Vec<(u16, RuptureInput)>, CalcError> {
        let params = SamplingParams {
            ses_per_logic_tree_path: self.config.ses_per_logic_tree_path,
            investigation_time: self.config.investigation_time,
            seed: self.config.ses_seed,
        };
        let mut sampler = RuptureSampler::new(
            &self.sites,
            self.config.filter_distance_km,
            self.config.ruptures_per_block,
        );
        let mut blocks = Vec::new();
        let mut estimate: u64 = 0;
        for group in groups {
            if group.is_empty() {
                self.logger.debug(
                    RunPhase::Sampling.as_str(),
                    &format!("source group {} has no sources", group.grp_id()),
                )?;
                continue;
            }
            let sample = sampler.sample_group(group, generator, &params)?;
            self.telemetry.ruptures_filtered_out += sample.filtered_out;
            self.telemetry.add_eff_ruptures(&sample.eff_ruptures);
            self.telemetry.add_sampling_times(&sample.calc_time_ms);
            for block in sample.blocks {
                self.telemetry.ruptures_sampled += block.len() as u64;
                estimate += estimate_gmf_bytes(
                    block.ruptures(),
                    realizations.len(),
                    self.config.gmf_record_bytes(),
                );
                if self.config.save_ruptures {
                    store.save_ruptures(block.ruptures())?;
                }
                blocks.push((block.grp_id(), RuptureInput::Inline(block.into_ruptures())));
            }
        }
        if estimate > 0 {
            let qualifier = if self.config.minimum_intensity.is_active() {
                "less than "
            } else {
                ""
            };
            self.logger.info(
                RunPhase::Sampling.as_str(),
                &format!("estimating {qualifier}{} of GMFs", humansize(estimate)),
            )?;
            store.set_attr("events", "max_gmf_size", json!(estimate))?;
            self.telemetry.gmf_bytes_estimate = estimate;
        }
        Ok(blocks)
    }

    /// Plans task blocks over a parent run's rupture table: one handle per
    /// (table slice, source group) pair.
    fn plan_from_ruptures(&self, parent: &Arc<Datastore>) -> Vec<(u16, RuptureInput)> {
        let total = parent.ruptures().len();
        if total == 0 {
            return Vec::new();
        }
        let slices = self.config.concurrent_tasks.max(1);
        let chunk = total.div_ceil(slices);
        let mut blocks = Vec::new();
        let mut start = 0;
        while start < total {
            let stop = (start + chunk).min(total);
            for grp_id in self.ltree.group_ids() {
                let handle = StoredRuptureHandle::new(parent.clone(), grp_id, start, stop);
                if !handle.read().is_empty() {
                    blocks.push((grp_id, RuptureInput::Stored(handle)));
                }
            }
            start = stop;
        }
        blocks
    }

    /// Mints the full event set of the run; deterministic, so the same
    /// records come out of the workers later.
    fn derive_all_events(
        &self,
        blocks: &[(u16, RuptureInput)],
        realizations: &RealizationSet,
    ) -> Result<Vec<EventRecord>, CalcError> {
        let mut events = Vec::new();
        for (grp_id, input) in blocks {
            let rlzs_by_gsim = realizations.rlzs_by_gsim(*grp_id);
            let ruptures: Vec<Rupture> = match input {
                RuptureInput::Inline(ruptures) => ruptures.clone(),
                RuptureInput::Stored(handle) => handle.read(),
            };
            for rupture in &ruptures {
                events.extend(EventCodec::derive_events(
                    rupture,
                    &rlzs_by_gsim,
                    self.config.ses_per_logic_tree_path,
                )?);
            }
        }
        Ok(events)
    }

    /// Completes the events table: per-group counts attribute plus the
    /// deferred year backfill (one bulk read-modify-write pass; from-sources
    /// runs only, since a parent's events already carry years).
    fn finish_event_table(
        &mut self,
        store: &mut Datastore,
        from_sources: bool,
    ) -> Result<(), CalcError> {
        let mut by_grp: BTreeMap<u16, u64> = BTreeMap::new();
        for event in store.events() {
            *by_grp.entry(event.grp_id).or_insert(0) += 1;
        }
        let counts: Vec<(u16, u64)> = by_grp.into_iter().collect();
        store.set_attr("events", "by_grp", json!(counts))?;
        if !from_sources {
            return Ok(());
        }
        let num_events = store.events().len();
        self.logger.info(
            self.phase.as_str(),
            &format!("setting {num_events} event years"),
        )?;
        let eids: Vec<u64> = store.events().iter().map(|e| e.eid).collect();
        let years =
            EventCodec::assign_years(&eids, self.config.ses_seed, self.config.investigation_time);
        let mut events = store.events().to_vec();
        for event in &mut events {
            if let Some(year) = years.get(&event.eid) {
                event.year = *year;
            }
        }
        store.replace_events(events)?;
        Ok(())
    }

    fn into_output(self, mut store: Datastore, stats_written: Vec<String>) -> RunOutput {
        store.close();
        RunOutput {
            store,
            telemetry: self.telemetry,
            log_lines: self.logger.lines().to_vec(),
            stats_written,
        }
    }
}

/// Fatal run-level errors.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    LogicTree(#[from] LogicTreeError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(
        "no seismic events! perhaps the investigation time is too small or the maximum distance is too small"
    )]
    NoSeismicEvents,
    #[error("no GMFs were generated, perhaps they were all below the minimum intensity threshold")]
    NoGmfs,
}
