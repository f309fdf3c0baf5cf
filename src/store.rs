use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::engine::gmf::GmfRecord;
use crate::event_model::EventRecord;
use crate::rupture::Rupture;

/// Append-only columnar store for one calculation run.
///
/// Tables are typed columns appended only by the aggregating thread; the
/// sole in-place rewrite permitted is the bulk year backfill on the events
/// table. String-keyed JSON attributes hang off each table, mirroring the
/// `events` / `gmf_data/data` / `gmf_data/indices` naming used throughout.
#[derive(Debug, Default)]
pub struct Datastore {
    events: Vec<EventRecord>,
    gmf_rows: Vec<GmfRecord>,
    ruptures: Vec<Rupture>,
    indices: Vec<Vec<(u32, u32)>>,
    curves: BTreeMap<String, Vec<Vec<f64>>>,
    maps: BTreeMap<String, Vec<Vec<f64>>>,
    attrs: BTreeMap<String, Map<String, Value>>,
    closed: bool,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends event records, returning the new table length.
    pub fn extend_events(&mut self, events: Vec<EventRecord>) -> Result<usize, StoreError> {
        self.ensure_open("events")?;
        self.events.extend(events);
        Ok(self.events.len())
    }

    /// Appends GMF rows, returning the new table length.
    pub fn extend_gmf_rows(&mut self, rows: Vec<GmfRecord>) -> Result<usize, StoreError> {
        self.ensure_open("gmf_data/data")?;
        self.gmf_rows.extend(rows);
        Ok(self.gmf_rows.len())
    }

    /// Appends sampled ruptures, returning the new table length.
    pub fn save_ruptures(&mut self, ruptures: &[Rupture]) -> Result<usize, StoreError> {
        self.ensure_open("ruptures")?;
        self.ruptures.extend_from_slice(ruptures);
        Ok(self.ruptures.len())
    }

    /// Bulk rewrite of the events table; only the year backfill uses this.
    pub fn replace_events(&mut self, events: Vec<EventRecord>) -> Result<(), StoreError> {
        self.ensure_open("events")?;
        self.events = events;
        Ok(())
    }

    /// Creates the `(num_sites, 2)` index table of per-site row ranges.
    pub fn set_indices(&mut self, indices: Vec<Vec<(u32, u32)>>) -> Result<(), StoreError> {
        self.ensure_open("gmf_data/indices")?;
        self.indices = indices;
        Ok(())
    }

    /// Stores a dense `sites x levels` curve array under `hcurves/<stat>`.
    pub fn set_curve(
        &mut self,
        stat: impl Into<String>,
        array: Vec<Vec<f64>>,
    ) -> Result<(), StoreError> {
        self.ensure_open("hcurves")?;
        self.curves.insert(stat.into(), array);
        Ok(())
    }

    /// Stores a dense `sites x (poes * imts)` map array under `hmaps/<stat>`.
    pub fn set_map(
        &mut self,
        stat: impl Into<String>,
        array: Vec<Vec<f64>>,
    ) -> Result<(), StoreError> {
        self.ensure_open("hmaps")?;
        self.maps.insert(stat.into(), array);
        Ok(())
    }

    pub fn set_attr(
        &mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), StoreError> {
        let table = table.into();
        self.ensure_open(&table)?;
        self.attrs.entry(table).or_default().insert(key.into(), value);
        Ok(())
    }

    pub fn get_attr(&self, table: &str, key: &str) -> Option<&Value> {
        self.attrs.get(table).and_then(|map| map.get(key))
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn gmf_rows(&self) -> &[GmfRecord] {
        &self.gmf_rows
    }

    pub fn ruptures(&self) -> &[Rupture] {
        &self.ruptures
    }

    pub fn indices(&self) -> &[Vec<(u32, u32)>] {
        &self.indices
    }

    pub fn curve(&self, stat: &str) -> Option<&Vec<Vec<f64>>> {
        self.curves.get(stat)
    }

    pub fn map(&self, stat: &str) -> Option<&Vec<Vec<f64>>> {
        self.maps.get(stat)
    }

    /// The weighted-mean hazard curves, when statistics have been finalized.
    pub fn mean_curves(&self) -> Option<&Vec<Vec<f64>>> {
        self.curve("mean")
    }

    /// Marks the store read-only; later mutations fail.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self, table: &str) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed {
                table: table.to_string(),
            });
        }
        Ok(())
    }
}

/// Storage-backed rupture source: a slice of a parent run's rupture table
/// restricted to one source group. Workers iterate it instead of a live
/// batch when a calculation reuses a previous run's ruptures.
#[derive(Debug, Clone)]
pub struct StoredRuptureHandle {
    parent: Arc<Datastore>,
    grp_id: u16,
    start: usize,
    stop: usize,
}

impl StoredRuptureHandle {
    pub fn new(parent: Arc<Datastore>, grp_id: u16, start: usize, stop: usize) -> Self {
        Self {
            parent,
            grp_id,
            start,
            stop,
        }
    }

    pub fn grp_id(&self) -> u16 {
        self.grp_id
    }

    /// Reads the slice back, keeping only ruptures of the handle's group.
    pub fn read(&self) -> Vec<Rupture> {
        let table = self.parent.ruptures();
        let stop = self.stop.min(table.len());
        table[self.start.min(stop)..stop]
            .iter()
            .filter(|rupture| rupture.grp_id() == self.grp_id)
            .cloned()
            .collect()
    }
}

/// Errors surfaced by the datastore.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore is closed; cannot write table '{table}'")]
    Closed { table: String },
}
