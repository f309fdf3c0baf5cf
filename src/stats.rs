use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::ImtLevels;
use crate::pmap::ProbabilityMap;

/// One finalized statistic: dense curves and, when PoE thresholds are
/// configured, the corresponding hazard map.
#[derive(Debug, Clone)]
pub struct StatOutput {
    /// Statistic name as stored (`mean`, `quantile-0.15`, ...).
    pub name: String,
    /// `sites x levels` probability-of-exceedance curves.
    pub curves: Vec<Vec<f64>>,
    /// `sites x (imts * poes)` intensity values, column
    /// `imt_index * num_poes + poe_index`; `None` without thresholds.
    pub map: Option<Vec<Vec<f64>>>,
}

/// Combines per-realization curves into weighted statistics and inverts
/// them into hazard maps.
pub struct StatisticsFinalizer {
    weights: Vec<f64>,
    imtls: ImtLevels,
    poes: Vec<f64>,
    quantiles: Vec<f64>,
}

impl StatisticsFinalizer {
    pub fn new(weights: Vec<f64>, imtls: ImtLevels, poes: Vec<f64>, quantiles: Vec<f64>) -> Self {
        Self {
            weights,
            imtls,
            poes,
            quantiles,
        }
    }

    /// Computes the weighted mean and every requested quantile over the
    /// per-realization curves.
    pub fn finalize(
        &self,
        pmaps: &BTreeMap<u16, ProbabilityMap>,
        num_sites: usize,
    ) -> Result<Vec<StatOutput>, StatsError> {
        if pmaps.is_empty() {
            return Err(StatsError::NoRealizations);
        }
        if pmaps.len() != self.weights.len() {
            return Err(StatsError::WeightMismatch {
                curves: pmaps.len(),
                weights: self.weights.len(),
            });
        }
        let num_levels = self.imtls.num_levels();
        let dense: Vec<Vec<Vec<f64>>> = pmaps
            .values()
            .map(|pmap| pmap.to_dense(num_sites))
            .collect();

        let mut outputs = Vec::with_capacity(1 + self.quantiles.len());
        outputs.push(self.build_output("mean", mean_curves(&dense, &self.weights, num_levels)));
        for q in &self.quantiles {
            let curves = quantile_curves(&dense, &self.weights, num_levels, *q);
            outputs.push(self.build_output(format!("quantile-{q}"), curves));
        }
        Ok(outputs)
    }

    fn build_output(&self, name: impl Into<String>, curves: Vec<Vec<f64>>) -> StatOutput {
        let map = if self.poes.is_empty() {
            None
        } else {
            Some(self.hazard_map(&curves))
        };
        StatOutput {
            name: name.into(),
            curves,
            map,
        }
    }

    /// Inverts each site's curve into intensity values at the requested
    /// exceedance probabilities by monotone interpolation along the curve.
    fn hazard_map(&self, curves: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let num_cols = self.imtls.num_imts() * self.poes.len();
        curves
            .iter()
            .map(|site_curve| {
                let mut row = Vec::with_capacity(num_cols);
                for imt in self.imtls.imts() {
                    let (offset, len) = self.imtls.imt_slice(imt).unwrap_or((0, 0));
                    let imls = self.imtls.levels_for(imt).unwrap_or(&[]);
                    let poes_slice = &site_curve[offset..offset + len];
                    for target in &self.poes {
                        row.push(invert_curve(imls, poes_slice, *target));
                    }
                }
                row
            })
            .collect()
    }
}

fn mean_curves(dense: &[Vec<Vec<f64>>], weights: &[f64], num_levels: usize) -> Vec<Vec<f64>> {
    let num_sites = dense.first().map_or(0, Vec::len);
    let total: f64 = weights.iter().sum();
    let mut mean = vec![vec![0.0; num_levels]; num_sites];
    for (curves, weight) in dense.iter().zip(weights) {
        for (site, curve) in curves.iter().enumerate() {
            for (level, poe) in curve.iter().enumerate() {
                mean[site][level] += weight * poe;
            }
        }
    }
    if total > 0.0 {
        for site_curve in &mut mean {
            for poe in site_curve.iter_mut() {
                *poe /= total;
            }
        }
    }
    mean
}

fn quantile_curves(
    dense: &[Vec<Vec<f64>>],
    weights: &[f64],
    num_levels: usize,
    quantile: f64,
) -> Vec<Vec<f64>> {
    let num_sites = dense.first().map_or(0, Vec::len);
    let mut out = vec![vec![0.0; num_levels]; num_sites];
    for site in 0..num_sites {
        for level in 0..num_levels {
            let values: Vec<f64> = dense.iter().map(|curves| curves[site][level]).collect();
            out[site][level] = weighted_quantile(&values, weights, quantile);
        }
    }
    out
}

/// Weighted quantile by linear interpolation over the cumulative weight of
/// the value-sorted sample.
pub fn weighted_quantile(values: &[f64], weights: &[f64], quantile: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 || pairs.is_empty() {
        return 0.0;
    }
    let mut cum = 0.0;
    let mut prev_frac = 0.0;
    let mut prev_value = pairs[0].0;
    for (value, weight) in &pairs {
        cum += weight;
        let frac = cum / total;
        if frac >= quantile {
            if frac == prev_frac {
                return *value;
            }
            let t = (quantile - prev_frac) / (frac - prev_frac);
            return prev_value + t * (value - prev_value);
        }
        prev_frac = frac;
        prev_value = *value;
    }
    pairs[pairs.len() - 1].0
}

/// Intensity value at a target exceedance probability along a curve of
/// decreasing PoEs over increasing intensity levels.
///
/// A target above the whole curve maps to zero (no level is exceeded that
/// often); a target below the whole curve clamps to the highest level.
pub fn invert_curve(imls: &[f64], poes: &[f64], target: f64) -> f64 {
    if imls.is_empty() || poes.is_empty() {
        return 0.0;
    }
    if target > poes[0] {
        return 0.0;
    }
    for i in 1..poes.len() {
        if poes[i] <= target {
            let (p0, p1) = (poes[i - 1], poes[i]);
            if p0 == p1 {
                return imls[i];
            }
            let t = (p0 - target) / (p0 - p1);
            return imls[i - 1] + t * (imls[i] - imls[i - 1]);
        }
    }
    imls[imls.len() - 1]
}

/// Errors raised while finalizing statistics.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("no realization curves to combine")]
    NoRealizations,
    #[error("{curves} realization curves but {weights} weights")]
    WeightMismatch { curves: usize, weights: usize },
}
