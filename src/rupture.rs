use serde::{Deserialize, Serialize};

/// A seismic source: a point location with an annual occurrence rate and a
/// characteristic magnitude. Rupture geometry beyond the hypocenter is the
/// generator's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeismicSource {
    source_id: String,
    x_km: f64,
    y_km: f64,
    annual_rate: f64,
    magnitude: f64,
}

impl SeismicSource {
    pub fn new(
        source_id: impl Into<String>,
        x_km: f64,
        y_km: f64,
        annual_rate: f64,
        magnitude: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            x_km,
            y_km,
            annual_rate,
            magnitude,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn x_km(&self) -> f64 {
        self.x_km
    }

    pub fn y_km(&self) -> f64 {
        self.y_km
    }

    pub fn annual_rate(&self) -> f64 {
        self.annual_rate
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }
}

/// A group of sources sharing one set of GSIM branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceGroup {
    grp_id: u16,
    sources: Vec<SeismicSource>,
}

impl SourceGroup {
    pub fn new(grp_id: u16, sources: Vec<SeismicSource>) -> Self {
        Self { grp_id, sources }
    }

    pub fn grp_id(&self) -> u16 {
        self.grp_id
    }

    pub fn sources(&self) -> &[SeismicSource] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// One sampled earthquake occurrence. Immutable once built: the serial is
/// stable for the run and is the high half of every event id this rupture
/// mints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rupture {
    serial: u32,
    grp_id: u16,
    multiplicity: u16,
    sids: Vec<u16>,
    magnitude: f64,
    hypo_x_km: f64,
    hypo_y_km: f64,
}

impl Rupture {
    pub fn new(
        serial: u32,
        grp_id: u16,
        multiplicity: u16,
        magnitude: f64,
        hypo_x_km: f64,
        hypo_y_km: f64,
    ) -> Self {
        Self {
            serial,
            grp_id,
            multiplicity,
            sids: Vec::new(),
            magnitude,
            hypo_x_km,
            hypo_y_km,
        }
    }

    /// Attaches the ordinals of the sites this rupture can affect.
    pub fn with_sids(mut self, sids: Vec<u16>) -> Self {
        self.sids = sids;
        self
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn grp_id(&self) -> u16 {
        self.grp_id
    }

    pub fn multiplicity(&self) -> u16 {
        self.multiplicity
    }

    pub fn sids(&self) -> &[u16] {
        &self.sids
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn hypo_x_km(&self) -> f64 {
        self.hypo_x_km
    }

    pub fn hypo_y_km(&self) -> f64 {
        self.hypo_y_km
    }

    /// Scheduling weight; grows with both occurrence count and footprint so
    /// one heavy rupture cannot blow a worker's memory budget.
    pub fn weight(&self) -> f64 {
        (f64::from(self.multiplicity) * self.sids.len() as f64).sqrt()
    }
}
