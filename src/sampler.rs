use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use crate::rupture::{Rupture, SeismicSource, SourceGroup};
use crate::site::SiteCollection;

/// Read-only parameters handed to rupture generation.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub ses_per_logic_tree_path: u32,
    pub investigation_time: u32,
    pub seed: u64,
}

/// Per-source stochastic rupture generation (external collaborator seam).
///
/// Implementations mint ruptures with sequential serials starting at
/// `serial_base`; the sampler owns the counter, so serials stay unique and
/// stable across the whole run.
pub trait RuptureGenerator: Send + Sync {
    fn sample(
        &self,
        source: &SeismicSource,
        grp_id: u16,
        serial_base: u32,
        params: &SamplingParams,
    ) -> Vec<Rupture>;
}

/// Reference generator: one rupture per source with a Poisson occurrence
/// count over `investigation_time * ses` years of seismicity.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoissonGenerator;

impl RuptureGenerator for PoissonGenerator {
    fn sample(
        &self,
        source: &SeismicSource,
        grp_id: u16,
        serial_base: u32,
        params: &SamplingParams,
    ) -> Vec<Rupture> {
        let span_years =
            f64::from(params.investigation_time) * f64::from(params.ses_per_logic_tree_path);
        let lambda = source.annual_rate() * span_years;
        let mut rng =
            ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(u64::from(serial_base)));
        let multiplicity = poisson_draw(lambda, &mut rng).min(u64::from(u16::MAX)) as u16;
        if multiplicity == 0 {
            return Vec::new();
        }
        vec![Rupture::new(
            serial_base,
            grp_id,
            multiplicity,
            source.magnitude(),
            source.x_km(),
            source.y_km(),
        )]
    }
}

/// Knuth's inversion; adequate for the occurrence rates of a demo source.
fn poisson_draw(lambda: f64, rng: &mut ChaCha8Rng) -> u64 {
    if lambda <= 0.0 {
        return 0;
    }
    let threshold = (-lambda).exp();
    let mut k: u64 = 0;
    let mut p = 1.0;
    loop {
        p *= rng.random::<f64>();
        if p <= threshold {
            return k;
        }
        k += 1;
    }
}

/// Block of ruptures from one source group: the unit of worker dispatch.
#[derive(Debug, Clone)]
pub struct RuptureBlock {
    grp_id: u16,
    ruptures: Vec<Rupture>,
}

impl RuptureBlock {
    pub fn new(grp_id: u16, ruptures: Vec<Rupture>) -> Self {
        Self { grp_id, ruptures }
    }

    pub fn grp_id(&self) -> u16 {
        self.grp_id
    }

    pub fn ruptures(&self) -> &[Rupture] {
        &self.ruptures
    }

    pub fn into_ruptures(self) -> Vec<Rupture> {
        self.ruptures
    }

    pub fn len(&self) -> usize {
        self.ruptures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ruptures.is_empty()
    }
}

/// Outcome of sampling one source group.
#[derive(Debug, Default)]
pub struct GroupSample {
    pub blocks: Vec<RuptureBlock>,
    /// Ruptures that survived filtering, by group.
    pub eff_ruptures: BTreeMap<u16, u64>,
    /// Ruptures dropped because no site lies within the filter distance.
    pub filtered_out: u64,
    /// Wall time spent sampling, per source id.
    pub calc_time_ms: BTreeMap<String, u64>,
}

/// Samples source groups into weight-bounded rupture blocks.
///
/// Blocks never mix source groups; the cumulative block weight
/// (`sqrt(multiplicity * affected_sites)` per rupture) is capped by
/// `ruptures_per_block`, which bounds worker memory rather than the bare
/// rupture count, since one rupture can carry many occurrences.
pub struct RuptureSampler<'a> {
    sites: &'a SiteCollection,
    filter_distance_km: f64,
    ruptures_per_block: f64,
    next_serial: u32,
}

impl<'a> RuptureSampler<'a> {
    pub fn new(sites: &'a SiteCollection, filter_distance_km: f64, ruptures_per_block: f64) -> Self {
        Self {
            sites,
            filter_distance_km,
            ruptures_per_block,
            next_serial: 0,
        }
    }

    /// Samples one group. Empty groups yield an empty sample (not an
    /// error); the caller decides whether zero ruptures overall is fatal.
    pub fn sample_group(
        &mut self,
        group: &SourceGroup,
        generator: &dyn RuptureGenerator,
        params: &SamplingParams,
    ) -> Result<GroupSample, SamplerError> {
        let mut sample = GroupSample::default();
        if group.is_empty() {
            return Ok(sample);
        }
        let mut pending: Vec<Rupture> = Vec::new();
        let mut pending_weight = 0.0;
        for source in group.sources() {
            let started = Instant::now();
            let ruptures =
                generator.sample(source, group.grp_id(), self.next_serial, params);
            for rupture in ruptures {
                if rupture.serial() < self.next_serial {
                    return Err(SamplerError::NonMonotonicSerial {
                        serial: rupture.serial(),
                        expected_at_least: self.next_serial,
                    });
                }
                self.next_serial = rupture
                    .serial()
                    .checked_add(1)
                    .ok_or(SamplerError::SerialSpaceExhausted)?;
                let sids = self.sites.within(
                    rupture.hypo_x_km(),
                    rupture.hypo_y_km(),
                    self.filter_distance_km,
                );
                if sids.is_empty() {
                    sample.filtered_out += 1;
                    continue;
                }
                let rupture = rupture.with_sids(sids);
                *sample.eff_ruptures.entry(group.grp_id()).or_insert(0) += 1;
                pending_weight += rupture.weight();
                pending.push(rupture);
                if pending_weight > self.ruptures_per_block {
                    sample
                        .blocks
                        .push(RuptureBlock::new(group.grp_id(), std::mem::take(&mut pending)));
                    pending_weight = 0.0;
                }
            }
            let elapsed = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
            *sample
                .calc_time_ms
                .entry(source.source_id().to_string())
                .or_insert(0) += elapsed;
        }
        if !pending.is_empty() {
            sample
                .blocks
                .push(RuptureBlock::new(group.grp_id(), pending));
        }
        Ok(sample)
    }
}

/// Errors raised while sampling ruptures.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("generator returned serial {serial}, below the run cursor {expected_at_least}")]
    NonMonotonicSerial { serial: u32, expected_at_least: u32 },
    #[error("the 32-bit rupture serial space is exhausted")]
    SerialSpaceExhausted,
}
