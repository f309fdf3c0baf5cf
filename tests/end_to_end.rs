use hazflow::{
    CalcError, CalculationMode, EventBasedCalculator, EventCodec, GroundMotionModel, GsimBranch,
    GsimLogicTree, GsimRegistry, ImtLevels, JobConfig, MinIml, Rupture, RuptureGenerator,
    SamplingParams, SeismicSource, SiteCollection, SourceGroup,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Dispersion-free model so every run is exactly reproducible.
struct FixedModel {
    median: f64,
}

impl GroundMotionModel for FixedModel {
    fn median_and_sigma(&self, _magnitude: f64, _distance_km: f64, _imt: &str) -> (f64, f64) {
        (self.median, 0.0)
    }
}

/// Generator minting exactly one rupture with a fixed multiplicity.
struct OneRupture {
    multiplicity: u16,
}

impl RuptureGenerator for OneRupture {
    fn sample(
        &self,
        source: &SeismicSource,
        grp_id: u16,
        serial_base: u32,
        _params: &SamplingParams,
    ) -> Vec<Rupture> {
        vec![Rupture::new(
            serial_base,
            grp_id,
            self.multiplicity,
            source.magnitude(),
            source.x_km(),
            source.y_km(),
        )]
    }
}

struct NoRuptures;

impl RuptureGenerator for NoRuptures {
    fn sample(&self, _: &SeismicSource, _: u16, _: u32, _: &SamplingParams) -> Vec<Rupture> {
        Vec::new()
    }
}

fn config() -> JobConfig {
    JobConfig {
        ses_per_logic_tree_path: 10,
        investigation_time: 50,
        imtls: ImtLevels::new(BTreeMap::from([(
            "PGA".to_string(),
            vec![0.05, 0.1, 0.2],
        )])),
        minimum_intensity: MinIml::default(),
        poes: vec![0.05],
        quantiles: vec![],
        ruptures_per_block: 1000.0,
        filter_distance_km: 300.0,
        concurrent_tasks: 2,
        ses_seed: 42,
        ground_motion_fields: true,
        save_ruptures: false,
        hazard_curves_from_gmfs: true,
    }
}

fn ltree() -> GsimLogicTree {
    GsimLogicTree::default().with_group(
        0,
        vec![GsimBranch::new("gsim-a", 0.6), GsimBranch::new("gsim-b", 0.4)],
    )
}

fn registry(median: f64) -> Arc<GsimRegistry> {
    Arc::new(
        GsimRegistry::new()
            .register("gsim-a", Arc::new(FixedModel { median }))
            .register("gsim-b", Arc::new(FixedModel { median })),
    )
}

fn sites() -> Arc<SiteCollection> {
    Arc::new(SiteCollection::from_points(&[(0.0, 0.0), (5.0, 5.0)]))
}

fn groups() -> Vec<SourceGroup> {
    vec![SourceGroup::new(
        0,
        vec![SeismicSource::new("src-1", 0.0, 0.0, 0.1, 6.5)],
    )]
}

fn run(config: JobConfig, median: f64, multiplicity: u16) -> hazflow::RunOutput {
    EventBasedCalculator::new(config, sites(), ltree(), registry(median))
        .run(CalculationMode::FromSources {
            groups: groups(),
            generator: Arc::new(OneRupture { multiplicity }),
        })
        .expect("the run should complete")
}

#[test]
fn scenario_one_rupture_two_rlzs_ten_ses() {
    let output = run(config(), 0.3, 3);
    let events = output.store.events();
    assert_eq!(events.len(), 6, "three occurrences per realization");

    let mut eids = BTreeSet::new();
    for event in events {
        assert!(eids.insert(event.eid), "event ids must be distinct");
        let (serial, _) = EventCodec::decode(event.eid);
        assert_eq!(serial, event.serial, "the rupture serial rides the high bits");
        assert!((1..=10).contains(&event.ses));
        assert!((1..=50).contains(&event.year), "years backfilled in [1, T]");
    }
    for rlz in [0u16, 1u16] {
        assert_eq!(events.iter().filter(|e| e.rlz == rlz).count(), 3);
    }

    // every affected site carries a well-formed, non-decreasing range list
    let indices = output.store.indices();
    assert_eq!(indices.len(), 2);
    for ranges in indices {
        assert!(!ranges.is_empty(), "both sites lie within filter distance");
        let mut last_stop = 0;
        for (start, stop) in ranges {
            assert!(start <= stop);
            assert!(*start >= last_stop, "ranges never move backwards");
            last_stop = *stop;
        }
    }
    // 6 events x 2 sites, nothing under threshold
    assert_eq!(output.store.gmf_rows().len(), 12);
    assert_eq!(output.telemetry.gmf_rows_stored, 12);
}

#[test]
fn index_ranges_exactly_cover_each_sites_rows() {
    let output = run(config(), 0.3, 3);
    let rows = output.store.gmf_rows();
    for (sid, ranges) in output.store.indices().iter().enumerate() {
        let mut covered = 0usize;
        for (start, stop) in ranges {
            for row in &rows[*start as usize..*stop as usize] {
                assert_eq!(row.sid, sid as u32, "range points into another site");
            }
            covered += (stop - start) as usize;
        }
        let expected = rows.iter().filter(|r| r.sid == sid as u32).count();
        assert_eq!(covered, expected, "gaps or overlaps for site {sid}");
    }
}

#[test]
fn mean_curves_and_maps_are_written() {
    let output = run(config(), 0.3, 3);
    assert_eq!(output.stats_written, vec!["mean".to_string()]);
    let mean = output.store.mean_curves().expect("mean curves stored");
    assert_eq!(mean.len(), 2);
    for site_curve in mean {
        assert_eq!(site_curve.len(), 3);
        for poe in site_curve {
            assert!((0.0..=1.0).contains(poe));
        }
        assert!(site_curve[0] > 0.0, "the 0.3 median exceeds every level");
    }
    assert!(output.store.map("mean").is_some());
}

#[test]
fn rerunning_with_the_same_seed_reproduces_the_store() {
    let a = run(config(), 0.3, 3);
    let b = run(config(), 0.3, 3);
    assert_eq!(a.store.events(), b.store.events());
    assert_eq!(a.store.gmf_rows(), b.store.gmf_rows());
    assert_eq!(a.store.mean_curves(), b.store.mean_curves());
}

#[test]
fn disabling_fields_still_persists_events_and_years() {
    let mut cfg = config();
    cfg.ground_motion_fields = false;
    cfg.hazard_curves_from_gmfs = false;
    let output = run(cfg, 0.3, 3);
    assert_eq!(output.store.events().len(), 6);
    assert!(output.store.events().iter().all(|e| (1..=50).contains(&e.year)));
    assert!(output.store.gmf_rows().is_empty());
    assert!(output.store.indices().is_empty());
    assert!(output.stats_written.is_empty());
}

#[test]
fn zero_events_is_fatal() {
    let err = EventBasedCalculator::new(config(), sites(), ltree(), registry(0.3))
        .run(CalculationMode::FromSources {
            groups: groups(),
            generator: Arc::new(NoRuptures),
        })
        .unwrap_err();
    assert!(matches!(err, CalcError::NoSeismicEvents));
    assert!(err.to_string().contains("no seismic events"));
}

#[test]
fn all_fields_below_threshold_is_fatal() {
    let mut cfg = config();
    cfg.minimum_intensity = MinIml::new(BTreeMap::from([("PGA".to_string(), 10.0)]));
    let err = EventBasedCalculator::new(cfg, sites(), ltree(), registry(0.3))
        .run(CalculationMode::FromSources {
            groups: groups(),
            generator: Arc::new(OneRupture { multiplicity: 3 }),
        })
        .unwrap_err();
    assert!(matches!(err, CalcError::NoGmfs));
}

#[test]
fn a_parent_runs_ruptures_can_be_reused() {
    let mut parent_cfg = config();
    parent_cfg.save_ruptures = true;
    parent_cfg.hazard_curves_from_gmfs = false;
    parent_cfg.poes = vec![];
    let parent = run(parent_cfg, 0.3, 3);
    assert_eq!(parent.store.ruptures().len(), 1);
    let parent_eids: BTreeSet<u64> =
        parent.store.events().iter().map(|e| e.eid).collect();

    let mut child_cfg = config();
    child_cfg.hazard_curves_from_gmfs = false;
    child_cfg.poes = vec![];
    let child = EventBasedCalculator::new(child_cfg, sites(), ltree(), registry(0.3))
        .run(CalculationMode::FromRuptures {
            parent: Arc::new(parent.store),
        })
        .expect("the child run should complete");

    let child_eids: BTreeSet<u64> = child.store.events().iter().map(|e| e.eid).collect();
    assert_eq!(
        child_eids, parent_eids,
        "re-derived events mint identical ids"
    );
    assert_eq!(child.store.gmf_rows().len(), 12);
}

#[test]
fn per_group_event_counts_are_recorded() {
    let output = run(config(), 0.3, 3);
    let by_grp = output
        .store
        .get_attr("events", "by_grp")
        .expect("per-group counts attribute");
    assert_eq!(by_grp, &serde_json::json!([[0, 6]]));
}

#[test]
fn run_log_narrates_the_phases() {
    let output = run(config(), 0.3, 3);
    let joined = output.log_lines.join("\n");
    for phase in [
        "sampling",
        "computing_gmfs",
        "aggregating",
        "finalizing_stats",
        "done",
    ] {
        assert!(joined.contains(phase), "missing phase {phase} in log");
    }
    assert!(joined.contains("GMFs"), "the size estimate is logged");
}
