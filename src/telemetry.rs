use serde::Serialize;
use std::collections::BTreeMap;

/// Additive diagnostic counters for one run, exported with the summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTelemetry {
    pub ruptures_sampled: u64,
    pub ruptures_filtered_out: u64,
    pub events_stored: u64,
    pub gmf_rows_stored: u64,
    pub gmf_bytes: u64,
    pub gmf_bytes_estimate: u64,
    pub tasks_submitted: u64,
    pub eff_ruptures_by_grp: BTreeMap<u16, u64>,
    pub sampling_time_ms_by_source: BTreeMap<String, u64>,
    pub compute_time_ms: u64,
}

impl RunTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_eff_ruptures(&mut self, counts: &BTreeMap<u16, u64>) {
        for (grp_id, count) in counts {
            *self.eff_ruptures_by_grp.entry(*grp_id).or_insert(0) += count;
        }
    }

    pub fn add_sampling_times(&mut self, times: &BTreeMap<String, u64>) {
        for (source_id, elapsed) in times {
            *self
                .sampling_time_ms_by_source
                .entry(source_id.clone())
                .or_insert(0) += elapsed;
        }
    }

    /// Serializes the counters for the run summary.
    pub fn snapshot_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
