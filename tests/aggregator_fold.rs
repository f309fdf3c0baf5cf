use hazflow::{AggregationError, AggregatorState, Datastore, GmfRecord, GmfTaskResult};
use std::collections::BTreeMap;

fn row(rlz: u16, sid: u16, eid: u64, gmv: f32) -> GmfRecord {
    GmfRecord {
        rlz,
        sid: u32::from(sid),
        eid,
        gmvs: vec![gmv],
    }
}

fn result_with_rows(grp_id: u16, rows: Vec<GmfRecord>) -> GmfTaskResult {
    // rows arrive site-major from the computer; mirror that here
    let mut by_sid: BTreeMap<u32, Vec<GmfRecord>> = BTreeMap::new();
    for r in rows {
        by_sid.entry(r.sid).or_default().push(r);
    }
    let mut result = GmfTaskResult {
        grp_id,
        ..Default::default()
    };
    let mut cursor = 0u32;
    for (sid, rows) in by_sid {
        let start = cursor;
        cursor += rows.len() as u32;
        result.site_ranges.push((sid as u16, start, cursor));
        result.gmf_rows.extend(rows);
    }
    result.gmf_bytes = result.gmf_rows.len() as u64 * 18;
    result
}

fn result_with_curves(contribs: Vec<(u16, u16, Vec<f64>)>) -> GmfTaskResult {
    let mut result = GmfTaskResult::default();
    for (rlz, sid, poes) in contribs {
        result.hcurves.insert((rlz, sid), poes);
    }
    result
}

#[test]
fn curve_merge_is_permutation_invariant() {
    let partials = vec![
        result_with_curves(vec![(0, 0, vec![0.5, 0.2]), (1, 0, vec![0.1, 0.0])]),
        result_with_curves(vec![(0, 0, vec![0.3, 0.3])]),
        result_with_curves(vec![(0, 0, vec![0.9, 0.05]), (1, 1, vec![0.4, 0.4])]),
    ];
    let orders: Vec<Vec<usize>> = vec![
        vec![0, 1, 2],
        vec![2, 1, 0],
        vec![1, 2, 0],
        vec![2, 0, 1],
    ];
    let mut reference: Option<Vec<Vec<Vec<f64>>>> = None;
    for order in orders {
        let mut store = Datastore::new();
        let mut state = AggregatorState::new(2, 2, 2);
        for idx in &order {
            let partial = clone_curves(&partials[*idx]);
            state.fold(&mut store, partial).expect("fold should succeed");
        }
        let dense: Vec<Vec<Vec<f64>>> =
            state.pmaps().values().map(|p| p.to_dense(2)).collect();
        match &reference {
            None => reference = Some(dense),
            Some(expected) => {
                for (a, b) in expected.iter().flatten().flatten().zip(
                    dense.iter().flatten().flatten(),
                ) {
                    assert!((a - b).abs() < 1e-12, "merge order changed the curves");
                }
            }
        }
    }
}

fn clone_curves(result: &GmfTaskResult) -> GmfTaskResult {
    let mut cloned = GmfTaskResult::default();
    for (key, poes) in &result.hcurves {
        cloned.hcurves.insert(*key, poes.clone());
    }
    cloned
}

#[test]
fn complement_rule_matches_the_survival_formula() {
    let mut store = Datastore::new();
    let mut state = AggregatorState::new(1, 1, 1);
    state
        .fold(&mut store, result_with_curves(vec![(0, 0, vec![0.5])]))
        .unwrap();
    state
        .fold(&mut store, result_with_curves(vec![(0, 0, vec![0.5])]))
        .unwrap();
    let poes = state.pmaps()[&0].poes(0).expect("site 0 has a curve");
    assert!((poes[0] - 0.75).abs() < 1e-12, "1 - 0.5 * 0.5");
}

#[test]
fn site_ranges_accumulate_with_the_global_offset() {
    let eids: Vec<u64> = vec![100, 101, 102, 103];
    let mut state = AggregatorState::new(2, 1, 1);
    state.set_event_index(&eids);
    let mut store = Datastore::new();

    state
        .fold(
            &mut store,
            result_with_rows(0, vec![row(0, 0, 100, 0.1), row(0, 1, 101, 0.2)]),
        )
        .unwrap();
    state
        .fold(
            &mut store,
            result_with_rows(0, vec![row(0, 0, 102, 0.3), row(0, 0, 103, 0.4)]),
        )
        .unwrap();

    assert_eq!(state.row_offset(), 4);
    let (indices, _) = state.into_parts();
    // every row bearing a site id is covered by exactly one of its ranges
    for (sid, ranges) in indices.iter().enumerate() {
        let mut covered: Vec<usize> = Vec::new();
        for (start, stop) in ranges {
            assert!(start <= stop);
            for row_idx in *start..*stop {
                assert!(
                    !covered.contains(&(row_idx as usize)),
                    "overlapping ranges for site {sid}"
                );
                covered.push(row_idx as usize);
                assert_eq!(
                    store.gmf_rows()[row_idx as usize].sid,
                    sid as u32,
                    "range points at a foreign row"
                );
            }
        }
        let expected = store
            .gmf_rows()
            .iter()
            .filter(|r| r.sid == sid as u32)
            .count();
        assert_eq!(covered.len(), expected, "gaps in coverage for site {sid}");
    }
}

#[test]
fn row_eids_are_translated_to_dense_indices() {
    let eids: Vec<u64> = vec![500, 7, 1_000_000];
    let mut state = AggregatorState::new(1, 1, 1);
    state.set_event_index(&eids);
    let mut store = Datastore::new();
    state
        .fold(
            &mut store,
            result_with_rows(
                0,
                vec![row(0, 0, 7, 0.1), row(0, 0, 500, 0.2), row(0, 0, 1_000_000, 0.3)],
            ),
        )
        .unwrap();
    let stored: Vec<u64> = store.gmf_rows().iter().map(|r| r.eid).collect();
    // sorted id set: 7 -> 0, 500 -> 1, 1000000 -> 2
    assert_eq!(stored, vec![0, 1, 2]);
}

#[test]
fn unknown_event_ids_are_rejected() {
    let mut state = AggregatorState::new(1, 1, 1);
    state.set_event_index(&[1, 2, 3]);
    let mut store = Datastore::new();
    let err = state
        .fold(&mut store, result_with_rows(0, vec![row(0, 0, 99, 0.1)]))
        .unwrap_err();
    assert!(matches!(err, AggregationError::UnknownEvent { eid: 99 }));
}

#[test]
fn diagnostic_counters_accumulate_additively() {
    let mut state = AggregatorState::new(1, 1, 1);
    state.set_event_index(&[1]);
    let mut store = Datastore::new();
    let mut a = result_with_rows(0, vec![row(0, 0, 1, 0.5)]);
    a.eff_ruptures.insert(0, 3);
    a.calc_time_ms = 10;
    let mut b = GmfTaskResult::default();
    b.eff_ruptures.insert(0, 2);
    b.eff_ruptures.insert(1, 5);
    b.calc_time_ms = 7;
    state.fold(&mut store, a).unwrap();
    state.fold(&mut store, b).unwrap();
    assert_eq!(state.eff_ruptures().get(&0), Some(&5));
    assert_eq!(state.eff_ruptures().get(&1), Some(&5));
    assert_eq!(state.calc_time_ms(), 17);
}
