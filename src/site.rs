use serde::{Deserialize, Serialize};

/// A hazard site: a dense ordinal plus planar coordinates in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub sid: u16,
    pub x_km: f64,
    pub y_km: f64,
}

impl Site {
    pub fn new(sid: u16, x_km: f64, y_km: f64) -> Self {
        Self { sid, x_km, y_km }
    }

    /// Planar distance to a point, in kilometres.
    pub fn distance_to(&self, x_km: f64, y_km: f64) -> f64 {
        let dx = self.x_km - x_km;
        let dy = self.y_km - y_km;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Read-only collection of sites, shared across all workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteCollection {
    sites: Vec<Site>,
}

impl SiteCollection {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Builds a collection from coordinates, assigning ordinals in order.
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let sites = points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| Site::new(i as u16, *x, *y))
            .collect();
        Self { sites }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn get(&self, sid: u16) -> Option<&Site> {
        self.sites.get(sid as usize)
    }

    /// Ordinals of the sites within `max_distance_km` of a point.
    pub fn within(&self, x_km: f64, y_km: f64, max_distance_km: f64) -> Vec<u16> {
        self.sites
            .iter()
            .filter(|site| site.distance_to(x_km, y_km) <= max_distance_km)
            .map(|site| site.sid)
            .collect()
    }
}
