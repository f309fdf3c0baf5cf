use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::{ImtLevels, MinIml};
use crate::event_model::{CodecError, EventCodec, EventRecord};
use crate::rupture::Rupture;
use crate::site::SiteCollection;
use crate::store::StoredRuptureHandle;

/// One simulated ground-motion value set: a row of the `gmf_data/data`
/// table. `gmvs` holds one value per IMT in canonical order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GmfRecord {
    pub rlz: u16,
    pub sid: u32,
    pub eid: u64,
    pub gmvs: Vec<f32>,
}

/// Ground-motion prediction seam (external collaborator): median intensity
/// and lognormal dispersion for one IMT given magnitude and distance.
pub trait GroundMotionModel: Send + Sync {
    fn median_and_sigma(&self, magnitude: f64, distance_km: f64, imt: &str) -> (f64, f64);
}

/// Reference attenuation relation: log-linear magnitude scaling with
/// geometric spreading and a constant dispersion.
#[derive(Debug, Clone, Copy)]
pub struct SimpleAttenuation {
    pub coeff_a: f64,
    pub coeff_b: f64,
    pub coeff_c: f64,
    pub sigma: f64,
}

impl Default for SimpleAttenuation {
    fn default() -> Self {
        Self {
            coeff_a: -4.0,
            coeff_b: 1.0,
            coeff_c: 1.2,
            sigma: 0.6,
        }
    }
}

impl GroundMotionModel for SimpleAttenuation {
    fn median_and_sigma(&self, magnitude: f64, distance_km: f64, _imt: &str) -> (f64, f64) {
        let ln_median =
            self.coeff_a + self.coeff_b * magnitude - self.coeff_c * (distance_km + 10.0).ln();
        (ln_median.exp(), self.sigma)
    }
}

/// Named ground-motion models available to a run.
#[derive(Default, Clone)]
pub struct GsimRegistry {
    models: BTreeMap<String, Arc<dyn GroundMotionModel>>,
}

impl GsimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        model: Arc<dyn GroundMotionModel>,
    ) -> Self {
        self.models.insert(name.into(), model);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn GroundMotionModel>> {
        self.models.get(name)
    }
}

/// Rupture input of one task: a live in-memory batch or a handle over a
/// previous run's rupture table. The computer branches on the tag, never on
/// introspection.
#[derive(Debug, Clone)]
pub enum RuptureInput {
    Inline(Vec<Rupture>),
    Stored(StoredRuptureHandle),
}

impl RuptureInput {
    fn into_ruptures(self) -> Vec<Rupture> {
        match self {
            RuptureInput::Inline(ruptures) => ruptures,
            RuptureInput::Stored(handle) => handle.read(),
        }
    }
}

/// Read-only per-task parameter bundle.
#[derive(Debug, Clone)]
pub struct GmfParams {
    pub imtls: ImtLevels,
    pub min_iml: MinIml,
    pub num_ses: u32,
    /// Mint event records in-task (set when the store has no events yet for
    /// these ruptures: always in from-ruptures mode, and in from-sources
    /// mode when ruptures are not persisted eagerly).
    pub emit_events: bool,
    /// Also derive per-realization hazard-curve contributions.
    pub hazard_curves: bool,
    /// Fixed record width for the byte estimate (never sizes allocations).
    pub record_bytes: u64,
}

/// Self-contained result bundle returned by one worker task.
#[derive(Debug, Default)]
pub struct GmfTaskResult {
    pub grp_id: u16,
    pub events: Vec<EventRecord>,
    pub gmf_rows: Vec<GmfRecord>,
    /// Local `(sid, start, stop)` row ranges; rows of one site are
    /// contiguous within this task's output.
    pub site_ranges: Vec<(u16, u32, u32)>,
    /// PoE contribution per (rlz, sid) over the flattened level axis.
    pub hcurves: BTreeMap<(u16, u16), Vec<f64>>,
    /// Bytes of GMF data in this bundle (row count times record width).
    pub gmf_bytes: u64,
    pub eff_ruptures: BTreeMap<u16, u64>,
    pub calc_time_ms: u64,
}

/// Computes simulated ground-motion values per site, realization, IMT and
/// event, with optional hazard-curve derivation.
pub struct GmfComputer {
    sites: Arc<SiteCollection>,
    registry: Arc<GsimRegistry>,
    params: GmfParams,
}

impl GmfComputer {
    pub fn new(sites: Arc<SiteCollection>, registry: Arc<GsimRegistry>, params: GmfParams) -> Self {
        Self {
            sites,
            registry,
            params,
        }
    }

    pub fn params(&self) -> &GmfParams {
        &self.params
    }

    /// Runs one task: every rupture of the input, against every GSIM its
    /// group is associated with, for every sampled occurrence.
    ///
    /// Values below the per-IMT minimum are zeroed and rows where every IMT
    /// fell below threshold are dropped, so the byte estimate computed at
    /// sampling time is an upper bound on what tasks actually return.
    pub fn compute(
        &self,
        input: RuptureInput,
        rlzs_by_gsim: &BTreeMap<String, Vec<u16>>,
    ) -> Result<GmfTaskResult, GmfError> {
        let started = Instant::now();
        let ruptures = input.into_ruptures();
        let mut result = GmfTaskResult::default();
        let Some(first) = ruptures.first() else {
            return Ok(result);
        };
        result.grp_id = first.grp_id();

        let num_levels = self.params.imtls.num_levels();
        let imts: Vec<String> = self.params.imtls.imts().map(str::to_string).collect();
        // site-major staging keeps each site's rows contiguous in the output
        let mut rows_by_sid: BTreeMap<u16, Vec<GmfRecord>> = BTreeMap::new();
        let mut ses_hits: BTreeMap<(u16, u16), Vec<BTreeSet<u32>>> = BTreeMap::new();

        for rupture in &ruptures {
            *result.eff_ruptures.entry(rupture.grp_id()).or_insert(0) += 1;
            let events =
                EventCodec::derive_events(rupture, rlzs_by_gsim, self.params.num_ses)?;
            let mut event_cursor = 0usize;
            for (gsim_name, rlzs) in rlzs_by_gsim {
                let model = self
                    .registry
                    .get(gsim_name)
                    .ok_or_else(|| GmfError::UnknownGsim {
                        gsim: gsim_name.clone(),
                    })?;
                for _rlz in rlzs {
                    for _occurrence in 0..rupture.multiplicity() {
                        let event = events[event_cursor];
                        event_cursor += 1;
                        self.simulate_event(
                            rupture,
                            &event,
                            model.as_ref(),
                            &imts,
                            num_levels,
                            &mut rows_by_sid,
                            &mut ses_hits,
                        );
                    }
                }
            }
            if self.params.emit_events {
                result.events.extend(events);
            }
        }

        let mut cursor: u32 = 0;
        for (sid, rows) in rows_by_sid {
            let start = cursor;
            cursor += rows.len() as u32;
            result.site_ranges.push((sid, start, cursor));
            result.gmf_rows.extend(rows);
        }
        result.gmf_bytes = result.gmf_rows.len() as u64 * self.params.record_bytes;

        if self.params.hazard_curves {
            for ((rlz, sid), level_sets) in ses_hits {
                let poes = level_sets
                    .iter()
                    .map(|ses| ses.len() as f64 / f64::from(self.params.num_ses))
                    .collect();
                result.hcurves.insert((rlz, sid), poes);
            }
        }
        result.calc_time_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn simulate_event(
        &self,
        rupture: &Rupture,
        event: &EventRecord,
        model: &dyn GroundMotionModel,
        imts: &[String],
        num_levels: usize,
        rows_by_sid: &mut BTreeMap<u16, Vec<GmfRecord>>,
        ses_hits: &mut BTreeMap<(u16, u16), Vec<BTreeSet<u32>>>,
    ) {
        for sid in rupture.sids() {
            let Some(site) = self.sites.get(*sid) else {
                continue;
            };
            let distance = site.distance_to(rupture.hypo_x_km(), rupture.hypo_y_km());
            let mut rng = ChaCha8Rng::seed_from_u64(residual_seed(event.eid, *sid));
            let mut gmvs = Vec::with_capacity(imts.len());
            let mut any_above = false;
            for imt in imts {
                let (median, sigma) = model.median_and_sigma(rupture.magnitude(), distance, imt);
                let epsilon: f64 = StandardNormal.sample(&mut rng);
                let mut gmv = median * (sigma * epsilon).exp();
                if gmv < self.params.min_iml.threshold_for(imt) {
                    gmv = 0.0;
                } else {
                    any_above = true;
                }
                gmvs.push(gmv as f32);
            }
            if !any_above {
                continue;
            }
            if self.params.hazard_curves {
                let level_sets = ses_hits
                    .entry((event.rlz, *sid))
                    .or_insert_with(|| vec![BTreeSet::new(); num_levels]);
                let mut offset = 0;
                for (imt, gmv) in imts.iter().zip(&gmvs) {
                    if let Some(levels) = self.params.imtls.levels_for(imt) {
                        for (i, level) in levels.iter().enumerate() {
                            if f64::from(*gmv) > *level {
                                level_sets[offset + i].insert(event.ses);
                            }
                        }
                        offset += levels.len();
                    }
                }
            }
            rows_by_sid.entry(*sid).or_default().push(GmfRecord {
                rlz: event.rlz,
                sid: u32::from(*sid),
                eid: event.eid,
                gmvs,
            });
        }
    }
}

/// Mixes the event id and site ordinal into a residual-draw seed, so every
/// (event, site) pair sees an independent, reproducible epsilon.
fn residual_seed(eid: u64, sid: u16) -> u64 {
    eid.wrapping_mul(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(u64::from(sid))
}

/// Estimated GMF bytes for a rupture set, by excess when thresholds apply.
///
/// One row per (realization, occurrence, site) before thresholding, times
/// the fixed record width. Used for progress reporting and capacity
/// pre-checks only.
pub fn estimate_gmf_bytes(ruptures: &[Rupture], num_rlzs: usize, record_bytes: u64) -> u64 {
    let rows: u64 = ruptures
        .iter()
        .map(|r| r.sids().len() as u64 * u64::from(r.multiplicity()))
        .sum();
    rows * num_rlzs as u64 * record_bytes
}

/// Errors raised inside a GMF task.
#[derive(Debug, Error)]
pub enum GmfError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no ground-motion model registered under '{gsim}'")]
    UnknownGsim { gsim: String },
}
