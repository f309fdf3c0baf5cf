use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// One weighted ground-motion-model branch for a source group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GsimBranch {
    pub gsim: String,
    pub weight: f64,
}

impl GsimBranch {
    pub fn new(gsim: impl Into<String>, weight: f64) -> Self {
        Self {
            gsim: gsim.into(),
            weight,
        }
    }
}

/// Ground-motion-model branches declared per source group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GsimLogicTree {
    branches_by_grp: BTreeMap<u16, Vec<GsimBranch>>,
}

impl GsimLogicTree {
    pub fn new(branches_by_grp: BTreeMap<u16, Vec<GsimBranch>>) -> Self {
        Self { branches_by_grp }
    }

    /// Declares branches for one source group.
    pub fn with_group(mut self, grp_id: u16, branches: Vec<GsimBranch>) -> Self {
        self.branches_by_grp.insert(grp_id, branches);
        self
    }

    pub fn group_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.branches_by_grp.keys().copied()
    }

    pub fn branches_for(&self, grp_id: u16) -> Option<&[GsimBranch]> {
        self.branches_by_grp.get(&grp_id).map(Vec::as_slice)
    }

    /// Enumerates every path through the tree: the cartesian product of the
    /// per-group branches, with the path weight as the product of branch
    /// weights. Paths are ordinal-indexed in enumeration order and never
    /// mutated afterwards.
    pub fn enumerate(&self) -> Result<RealizationSet, LogicTreeError> {
        if self.branches_by_grp.is_empty() {
            return Err(LogicTreeError::Empty);
        }
        for (grp_id, branches) in &self.branches_by_grp {
            if branches.is_empty() {
                return Err(LogicTreeError::GroupWithoutBranches { grp_id: *grp_id });
            }
        }
        let mut paths: Vec<(f64, BTreeMap<u16, String>)> = vec![(1.0, BTreeMap::new())];
        for (grp_id, branches) in &self.branches_by_grp {
            let mut next = Vec::with_capacity(paths.len() * branches.len());
            for (weight, gsim_by_grp) in &paths {
                for branch in branches {
                    let mut extended = gsim_by_grp.clone();
                    extended.insert(*grp_id, branch.gsim.clone());
                    next.push((weight * branch.weight, extended));
                }
            }
            paths = next;
        }
        if paths.len() > usize::from(u16::MAX) {
            return Err(LogicTreeError::TooManyRealizations { count: paths.len() });
        }
        let realizations = paths
            .into_iter()
            .enumerate()
            .map(|(ordinal, (weight, gsim_by_grp))| Realization {
                rlz: ordinal as u16,
                weight,
                gsim_by_grp,
            })
            .collect();
        Ok(RealizationSet { realizations })
    }
}

/// One full path through the logic tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Realization {
    pub rlz: u16,
    pub weight: f64,
    gsim_by_grp: BTreeMap<u16, String>,
}

impl Realization {
    pub fn gsim_for(&self, grp_id: u16) -> Option<&str> {
        self.gsim_by_grp.get(&grp_id).map(String::as_str)
    }
}

/// All realizations of a run, enumerated once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealizationSet {
    realizations: Vec<Realization>,
}

impl RealizationSet {
    pub fn len(&self) -> usize {
        self.realizations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realizations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Realization> {
        self.realizations.iter()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.realizations.iter().map(|r| r.weight).collect()
    }

    /// Realization ordinals grouped by the GSIM they picked for `grp_id`.
    ///
    /// Every worker receives this mapping read-only; it is the association
    /// that turns one sampled rupture into events across realizations.
    pub fn rlzs_by_gsim(&self, grp_id: u16) -> BTreeMap<String, Vec<u16>> {
        let mut map: BTreeMap<String, Vec<u16>> = BTreeMap::new();
        for realization in &self.realizations {
            if let Some(gsim) = realization.gsim_for(grp_id) {
                map.entry(gsim.to_string()).or_default().push(realization.rlz);
            }
        }
        map
    }
}

/// Errors raised while enumerating the logic tree.
#[derive(Debug, Error)]
pub enum LogicTreeError {
    #[error("the logic tree declares no source groups")]
    Empty,
    #[error("source group {grp_id} declares no GSIM branches")]
    GroupWithoutBranches { grp_id: u16 },
    #[error("logic tree enumerates {count} realizations, more than the supported 65535")]
    TooManyRealizations { count: usize },
}
