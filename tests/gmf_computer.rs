use hazflow::{
    GmfComputer, GmfParams, GroundMotionModel, GsimRegistry, ImtLevels, MinIml, Rupture,
    RuptureInput, SiteCollection,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Dispersion-free model: the median is returned exactly, per IMT.
struct FixedModel {
    medians: BTreeMap<String, f64>,
}

impl GroundMotionModel for FixedModel {
    fn median_and_sigma(&self, _magnitude: f64, _distance_km: f64, imt: &str) -> (f64, f64) {
        (self.medians.get(imt).copied().unwrap_or(0.0), 0.0)
    }
}

fn imtls() -> ImtLevels {
    ImtLevels::new(BTreeMap::from([
        ("PGA".to_string(), vec![0.05, 0.1, 0.2]),
        ("SA(1.0)".to_string(), vec![0.01, 0.05]),
    ]))
}

fn registry(pga: f64, sa: f64) -> Arc<GsimRegistry> {
    let model = FixedModel {
        medians: BTreeMap::from([("PGA".to_string(), pga), ("SA(1.0)".to_string(), sa)]),
    };
    Arc::new(GsimRegistry::new().register("gsim-a", Arc::new(model)))
}

fn params(min_iml: MinIml, hazard_curves: bool) -> GmfParams {
    GmfParams {
        imtls: imtls(),
        min_iml,
        num_ses: 10,
        emit_events: true,
        hazard_curves,
        record_bytes: 2 + 4 + 8 + 4 * 2,
    }
}

fn one_rupture() -> Vec<Rupture> {
    vec![Rupture::new(9, 0, 3, 6.0, 0.0, 0.0).with_sids(vec![0, 1])]
}

fn mapping() -> BTreeMap<String, Vec<u16>> {
    BTreeMap::from([("gsim-a".to_string(), vec![0, 1])])
}

#[test]
fn rows_cover_every_site_event_pair() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0), (3.0, 4.0)]));
    let computer = GmfComputer::new(
        sites,
        registry(0.3, 0.1),
        params(MinIml::default(), false),
    );
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .expect("computation should succeed");
    // 2 rlzs x 3 occurrences x 2 sites
    assert_eq!(result.gmf_rows.len(), 12);
    assert_eq!(result.events.len(), 6);
    assert_eq!(result.gmf_bytes, 12 * (2 + 4 + 8 + 8));
    assert_eq!(result.eff_ruptures.get(&0), Some(&1));
}

#[test]
fn site_ranges_partition_the_rows_contiguously() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0), (3.0, 4.0)]));
    let computer = GmfComputer::new(
        sites,
        registry(0.3, 0.1),
        params(MinIml::default(), false),
    );
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .unwrap();
    let mut cursor = 0u32;
    for (sid, start, stop) in &result.site_ranges {
        assert_eq!(*start, cursor, "ranges must tile the output");
        assert!(stop > start);
        for row in &result.gmf_rows[*start as usize..*stop as usize] {
            assert_eq!(row.sid, u32::from(*sid));
        }
        cursor = *stop;
    }
    assert_eq!(cursor as usize, result.gmf_rows.len());
}

#[test]
fn values_below_the_threshold_never_appear() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0)]));
    // SA median 0.02 sits below its 0.05 floor; PGA survives
    let min_iml = MinIml::new(BTreeMap::from([
        ("PGA".to_string(), 0.05),
        ("SA(1.0)".to_string(), 0.05),
    ]));
    let computer = GmfComputer::new(sites, registry(0.3, 0.02), params(min_iml, false));
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .unwrap();
    assert!(!result.gmf_rows.is_empty());
    for row in &result.gmf_rows {
        assert_eq!(row.gmvs[1], 0.0, "sub-threshold SA must be zeroed");
        assert!(row.gmvs[0] >= 0.05);
    }
}

#[test]
fn rows_fully_below_threshold_are_dropped() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0)]));
    let min_iml = MinIml::new(BTreeMap::from([
        ("PGA".to_string(), 1.0),
        ("SA(1.0)".to_string(), 1.0),
    ]));
    let computer = GmfComputer::new(sites, registry(0.3, 0.1), params(min_iml, false));
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .unwrap();
    assert!(result.gmf_rows.is_empty());
    assert!(result.site_ranges.is_empty());
    assert_eq!(result.gmf_bytes, 0);
    assert_eq!(result.events.len(), 6, "events are minted regardless");
}

#[test]
fn hazard_contributions_follow_the_ses_fraction() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0)]));
    let computer = GmfComputer::new(
        sites,
        registry(0.3, 0.02),
        params(MinIml::default(), true),
    );
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .unwrap();
    for poes in result.hcurves.values() {
        assert_eq!(poes.len(), 5, "flattened PGA(3) + SA(2) axis");
        for poe in poes {
            assert!((0.0..=1.0).contains(poe));
        }
        // PGA median 0.3 exceeds every PGA level in every event
        assert!(poes[0] > 0.0);
        // SA median 0.02 only exceeds its lowest level (0.01)
        assert!(poes[3] > 0.0);
        assert_eq!(poes[4], 0.0);
    }
}

#[test]
fn event_emission_honors_the_capability_flag() {
    let sites = Arc::new(SiteCollection::from_points(&[(0.0, 0.0)]));
    let mut p = params(MinIml::default(), false);
    p.emit_events = false;
    let computer = GmfComputer::new(sites, registry(0.3, 0.1), p);
    let result = computer
        .compute(RuptureInput::Inline(one_rupture()), &mapping())
        .unwrap();
    assert!(result.events.is_empty());
    assert!(!result.gmf_rows.is_empty());
}
