//! Event-based probabilistic seismic hazard engine: stochastic rupture
//! sampling, distributed ground-motion-field computation, and streaming
//! map-reduce aggregation into hazard curves.

pub mod app;
pub mod config;
pub mod engine;
pub mod event_model;
pub mod guard;
pub mod logging;
pub mod ltree;
pub mod pmap;
pub mod rupture;
pub mod runtime;
pub mod sampler;
pub mod site;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, ImtLevels, JobConfig, MinIml};
pub use engine::aggregator::{AggregationError, AggregatorState};
pub use engine::calculator::{
    CalcError, CalculationMode, EventBasedCalculator, RunOutput, RunPhase,
};
pub use engine::gmf::{
    estimate_gmf_bytes, GmfComputer, GmfError, GmfParams, GmfRecord, GmfTaskResult,
    GroundMotionModel, GsimRegistry, RuptureInput, SimpleAttenuation,
};
pub use event_model::{CodecError, EventCodec, EventRecord, TWO32};
pub use guard::{CapacityError, OverflowGuard, MAX_EVENTS, MAX_IMTS, MAX_SITES};
pub use logging::{humansize, LogLevel, LoggingError, RunLogger};
pub use ltree::{GsimBranch, GsimLogicTree, LogicTreeError, Realization, RealizationSet};
pub use pmap::{PmapError, ProbabilityMap};
pub use rupture::{Rupture, SeismicSource, SourceGroup};
pub use runtime::orchestrator::{OrchestratorError, TaskFault, TaskOrchestrator};
pub use sampler::{
    GroupSample, PoissonGenerator, RuptureBlock, RuptureGenerator, RuptureSampler, SamplerError,
    SamplingParams,
};
pub use site::{Site, SiteCollection};
pub use stats::{invert_curve, weighted_quantile, StatOutput, StatisticsFinalizer, StatsError};
pub use store::{Datastore, StoreError, StoredRuptureHandle};
pub use telemetry::RunTelemetry;
