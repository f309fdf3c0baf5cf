use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Probability-of-exceedance curves for one realization: site ordinal to a
/// PoE array over the flattened intensity-level axis.
///
/// Merging uses the independent-event survival rule
/// `p' = 1 - (1 - p)(1 - q)`, which is commutative and associative, so the
/// final state does not depend on the order worker results arrive in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbabilityMap {
    num_levels: usize,
    sites: BTreeMap<u16, Vec<f64>>,
}

impl ProbabilityMap {
    pub fn new(num_levels: usize) -> Self {
        Self {
            num_levels,
            sites: BTreeMap::new(),
        }
    }

    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn site_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.sites.keys().copied()
    }

    pub fn poes(&self, sid: u16) -> Option<&[f64]> {
        self.sites.get(&sid).map(Vec::as_slice)
    }

    /// Folds one contribution into a site's curve with the complement rule.
    pub fn merge_site(&mut self, sid: u16, contribution: &[f64]) -> Result<(), PmapError> {
        if contribution.len() != self.num_levels {
            return Err(PmapError::LevelMismatch {
                expected: self.num_levels,
                got: contribution.len(),
            });
        }
        let curve = self
            .sites
            .entry(sid)
            .or_insert_with(|| vec![0.0; self.num_levels]);
        for (existing, poe) in curve.iter_mut().zip(contribution) {
            *existing = 1.0 - (1.0 - *existing) * (1.0 - poe);
        }
        Ok(())
    }

    /// Dense `num_sites x num_levels` array; sites without records are zero.
    pub fn to_dense(&self, num_sites: usize) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.num_levels]; num_sites];
        for (sid, curve) in &self.sites {
            if let Some(row) = dense.get_mut(usize::from(*sid)) {
                row.copy_from_slice(curve);
            }
        }
        dense
    }
}

/// Errors raised while merging probability curves.
#[derive(Debug, Error)]
pub enum PmapError {
    #[error("contribution carries {got} levels, expected {expected}")]
    LevelMismatch { expected: usize, got: usize },
}
