use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::engine::gmf::GmfTaskResult;
use crate::event_model::TWO32;
use crate::pmap::{PmapError, ProbabilityMap};
use crate::store::{Datastore, StoreError};

/// All cross-task state of a run, owned exclusively by the single-threaded
/// reduce step. Worker tasks never see this value.
#[derive(Debug)]
pub struct AggregatorState {
    eid_to_idx: HashMap<u64, u32>,
    row_offset: u64,
    indices: Vec<Vec<(u32, u32)>>,
    pmaps: BTreeMap<u16, ProbabilityMap>,
    gmf_bytes: u64,
    eff_ruptures: BTreeMap<u16, u64>,
    calc_time_ms: u64,
    events_stored: u64,
}

impl AggregatorState {
    /// Zero accumulator: one empty probability map per realization, empty
    /// per-site index lists, a row cursor at zero.
    pub fn new(num_sites: usize, num_levels: usize, num_rlzs: u16) -> Self {
        let pmaps = (0..num_rlzs)
            .map(|rlz| (rlz, ProbabilityMap::new(num_levels)))
            .collect();
        Self {
            eid_to_idx: HashMap::new(),
            row_offset: 0,
            indices: vec![Vec::new(); num_sites],
            pmaps,
            gmf_bytes: 0,
            eff_ruptures: BTreeMap::new(),
            calc_time_ms: 0,
            events_stored: 0,
        }
    }

    /// Installs the global event-id translation table, built once from the
    /// full sorted event-id set before the reduce begins. Translation is
    /// then O(1) per record regardless of arrival order.
    pub fn set_event_index(&mut self, eids: &[u64]) {
        let mut sorted: Vec<u64> = eids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        self.eid_to_idx = sorted
            .into_iter()
            .enumerate()
            .map(|(idx, eid)| (eid, idx as u32))
            .collect();
    }

    /// Folds one worker result into the accumulator and the store.
    ///
    /// The externally observable effect is associative-commutative: curves
    /// merge with the complement rule, counters add, and row placement is
    /// only ever exposed through the per-site index ranges, never through
    /// on-disk order.
    pub fn fold(
        &mut self,
        store: &mut Datastore,
        result: GmfTaskResult,
    ) -> Result<(), AggregationError> {
        if !result.events.is_empty() {
            self.events_stored += result.events.len() as u64;
            store.extend_events(result.events)?;
        }

        if !result.gmf_rows.is_empty() {
            let appended = result.gmf_rows.len() as u64;
            let mut rows = result.gmf_rows;
            for row in &mut rows {
                let idx = self
                    .eid_to_idx
                    .get(&row.eid)
                    .ok_or(AggregationError::UnknownEvent { eid: row.eid })?;
                // stored rows carry the dense event index in the eid column
                row.eid = u64::from(*idx);
            }
            store.extend_gmf_rows(rows)?;
            store.set_attr("gmf_data/data", "nbytes", json!(self.gmf_bytes + result.gmf_bytes))?;
            for (sid, start, stop) in &result.site_ranges {
                let ranges = self
                    .indices
                    .get_mut(usize::from(*sid))
                    .ok_or(AggregationError::UnknownSite { sid: *sid })?;
                ranges.push((
                    (u64::from(*start) + self.row_offset) as u32,
                    (u64::from(*stop) + self.row_offset) as u32,
                ));
            }
            self.row_offset += appended;
            if self.row_offset >= TWO32 {
                return Err(AggregationError::RowCursorOverflow {
                    rows: self.row_offset,
                });
            }
        }

        for ((rlz, sid), poes) in &result.hcurves {
            let pmap = self
                .pmaps
                .get_mut(rlz)
                .ok_or(AggregationError::UnknownRealization { rlz: *rlz })?;
            pmap.merge_site(*sid, poes)?;
        }

        self.gmf_bytes += result.gmf_bytes;
        for (grp_id, count) in &result.eff_ruptures {
            *self.eff_ruptures.entry(*grp_id).or_insert(0) += count;
        }
        self.calc_time_ms += result.calc_time_ms;
        Ok(())
    }

    pub fn row_offset(&self) -> u64 {
        self.row_offset
    }

    pub fn gmf_bytes(&self) -> u64 {
        self.gmf_bytes
    }

    pub fn events_stored(&self) -> u64 {
        self.events_stored
    }

    pub fn eff_ruptures(&self) -> &BTreeMap<u16, u64> {
        &self.eff_ruptures
    }

    pub fn calc_time_ms(&self) -> u64 {
        self.calc_time_ms
    }

    pub fn pmaps(&self) -> &BTreeMap<u16, ProbabilityMap> {
        &self.pmaps
    }

    pub fn has_gmf_rows(&self) -> bool {
        self.row_offset > 0
    }

    /// Consumes the accumulator into its per-site index table and the
    /// per-realization probability maps.
    pub fn into_parts(self) -> (Vec<Vec<(u32, u32)>>, BTreeMap<u16, ProbabilityMap>) {
        (self.indices, self.pmaps)
    }
}

/// Errors raised by the reduce step.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("the gmf_data table would exceed 2^32 rows (cursor at {rows})")]
    RowCursorOverflow { rows: u64 },
    #[error("GMF row references event id {eid} missing from the event index")]
    UnknownEvent { eid: u64 },
    #[error("GMF index range references unknown site {sid}")]
    UnknownSite { sid: u16 },
    #[error("hazard-curve contribution references unknown realization {rlz}")]
    UnknownRealization { rlz: u16 },
    #[error(transparent)]
    Pmap(#[from] PmapError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
