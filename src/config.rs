use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const DEFAULT_RUPTURES_PER_BLOCK: f64 = 30_000.0;
const DEFAULT_FILTER_DISTANCE_KM: f64 = 300.0;

/// Intensity measure levels keyed by IMT name, flattened in key order.
///
/// The flattened level axis is the one hazard curves are computed over;
/// `imt_slice` recovers the contiguous range belonging to a single IMT.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImtLevels {
    levels: BTreeMap<String, Vec<f64>>,
}

impl ImtLevels {
    pub fn new(levels: BTreeMap<String, Vec<f64>>) -> Self {
        Self { levels }
    }

    /// Number of intensity measure types.
    pub fn num_imts(&self) -> usize {
        self.levels.len()
    }

    /// Total number of levels across all IMTs.
    pub fn num_levels(&self) -> usize {
        self.levels.values().map(Vec::len).sum()
    }

    /// IMT names in canonical (sorted) order.
    pub fn imts(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    /// Levels for one IMT, if declared.
    pub fn levels_for(&self, imt: &str) -> Option<&[f64]> {
        self.levels.get(imt).map(Vec::as_slice)
    }

    /// Offset and length of an IMT's levels within the flattened axis.
    pub fn imt_slice(&self, imt: &str) -> Option<(usize, usize)> {
        let mut offset = 0;
        for (name, levels) in &self.levels {
            if name == imt {
                return Some((offset, levels.len()));
            }
            offset += levels.len();
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn entries(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.levels.iter()
    }
}

/// Per-IMT minimum intensity thresholds; values below are discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MinIml {
    thresholds: BTreeMap<String, f64>,
}

impl MinIml {
    pub fn new(thresholds: BTreeMap<String, f64>) -> Self {
        Self { thresholds }
    }

    pub fn threshold_for(&self, imt: &str) -> f64 {
        self.thresholds.get(imt).copied().unwrap_or(0.0)
    }

    /// True when any threshold is active, which makes GMF size estimates
    /// upper bounds rather than exact counts.
    pub fn is_active(&self) -> bool {
        self.thresholds.values().any(|v| *v > 0.0)
    }
}

/// Parameter bundle for one calculation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Stochastic event sets sampled per logic-tree path.
    pub ses_per_logic_tree_path: u32,
    /// Investigation time in years; event years are drawn in `[1, T]`.
    pub investigation_time: u32,
    /// Intensity measure levels per IMT.
    pub imtls: ImtLevels,
    /// Minimum intensity thresholds per IMT.
    #[serde(default)]
    pub minimum_intensity: MinIml,
    /// Probability-of-exceedance thresholds for hazard maps.
    #[serde(default)]
    pub poes: Vec<f64>,
    /// Quantile statistics to compute alongside the weighted mean.
    #[serde(default)]
    pub quantiles: Vec<f64>,
    /// Weight budget per rupture block (bounds worker memory).
    #[serde(default = "default_ruptures_per_block")]
    pub ruptures_per_block: f64,
    /// Ruptures farther than this from every site are dropped.
    #[serde(default = "default_filter_distance")]
    pub filter_distance_km: f64,
    /// Worker pool size; `0` or `1` runs sequentially in-process.
    #[serde(default)]
    pub concurrent_tasks: usize,
    /// Seed for the deterministic year assignment pass.
    pub ses_seed: u64,
    /// Compute ground-motion fields (otherwise stop after sampling).
    #[serde(default = "default_true")]
    pub ground_motion_fields: bool,
    /// Persist sampled ruptures alongside events.
    #[serde(default)]
    pub save_ruptures: bool,
    /// Derive hazard curves from the generated fields.
    #[serde(default)]
    pub hazard_curves_from_gmfs: bool,
}

fn default_ruptures_per_block() -> f64 {
    DEFAULT_RUPTURES_PER_BLOCK
}

fn default_filter_distance() -> f64 {
    DEFAULT_FILTER_DISTANCE_KM
}

fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Validates the bundle before any sampling starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ses_per_logic_tree_path == 0 {
            return Err(ConfigError::ZeroSes);
        }
        if self.investigation_time == 0 {
            return Err(ConfigError::ZeroInvestigationTime);
        }
        if self.imtls.is_empty() {
            return Err(ConfigError::NoImts);
        }
        for (imt, levels) in self.imtls.entries() {
            if levels.is_empty() {
                return Err(ConfigError::EmptyLevels { imt: imt.clone() });
            }
            if levels.windows(2).any(|w| w[1] <= w[0]) {
                return Err(ConfigError::UnsortedLevels { imt: imt.clone() });
            }
        }
        for poe in &self.poes {
            if !(0.0..=1.0).contains(poe) {
                return Err(ConfigError::PoeOutOfRange { poe: *poe });
            }
        }
        for q in &self.quantiles {
            if !(0.0..=1.0).contains(q) {
                return Err(ConfigError::QuantileOutOfRange { quantile: *q });
            }
        }
        if self.ruptures_per_block <= 0.0 {
            return Err(ConfigError::NonPositiveBlockWeight {
                value: self.ruptures_per_block,
            });
        }
        if self.hazard_curves_from_gmfs && !self.ground_motion_fields {
            return Err(ConfigError::CurvesWithoutFields);
        }
        Ok(())
    }

    /// Fixed GMF record width used for size estimates: rlz + sid + eid +
    /// one f32 per IMT.
    pub fn gmf_record_bytes(&self) -> u64 {
        2 + 4 + 8 + 4 * self.imtls.num_imts() as u64
    }
}

/// Errors surfaced while validating a job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ses_per_logic_tree_path must be at least 1")]
    ZeroSes,
    #[error("investigation_time must be at least 1 year")]
    ZeroInvestigationTime,
    #[error("at least one intensity measure type with levels is required")]
    NoImts,
    #[error("IMT '{imt}' declares no intensity levels")]
    EmptyLevels { imt: String },
    #[error("IMT '{imt}' levels must be strictly increasing")]
    UnsortedLevels { imt: String },
    #[error("poe {poe} is outside [0, 1]")]
    PoeOutOfRange { poe: f64 },
    #[error("quantile {quantile} is outside [0, 1]")]
    QuantileOutOfRange { quantile: f64 },
    #[error("ruptures_per_block must be positive, got {value}")]
    NonPositiveBlockWeight { value: f64 },
    #[error("hazard_curves_from_gmfs requires ground_motion_fields")]
    CurvesWithoutFields,
}
