// tests/param_space_tests.rs
//
// Mapping and constraint properties of the parameter space.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use qledrl::{
    BoundKind, Constraint, Dimension, EnvError, ParameterSpace, PhysicalParams,
    HARD_INVALID_THRESHOLD,
};

#[test]
fn round_trip_recovers_the_normalized_vector() {
    let space = ParameterSpace::qled_default();
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    for _ in 0..200 {
        let x = space.sample_normalized(&mut rng);
        let back = space.to_normalized(&space.to_real(&x)).unwrap();
        for (a, b) in x.iter().zip(&back) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }
}

#[test]
fn interior_physical_values_survive_the_round_trip() {
    let space = ParameterSpace::qled_default();
    for frac in [0.25, 0.5, 0.75] {
        let params: PhysicalParams = space
            .dimensions()
            .iter()
            .map(|d| (d.name.clone(), d.low + frac * (d.high - d.low)))
            .collect();
        let back = space.to_real(&space.to_normalized(&params).unwrap());
        for d in space.dimensions() {
            let (v, w) = (params[&d.name], back[&d.name]);
            assert!(
                (v - w).abs() <= 1e-9 * (d.high - d.low).max(1.0),
                "{} at {frac}: {v} vs {w}",
                d.name
            );
        }
    }
}

#[test]
fn corners_map_exactly_to_bounds() {
    let space = ParameterSpace::qled_default();
    let low = space.to_real(&vec![-1.0; space.dim()]);
    let high = space.to_real(&vec![1.0; space.dim()]);
    for d in space.dimensions() {
        assert_eq!(low[&d.name], d.low);
        assert_eq!(high[&d.name], d.high);
    }
}

#[test]
fn out_of_range_inputs_are_clamped() {
    let space = ParameterSpace::qled_default();
    let wild = space.to_real(&vec![7.5; space.dim()]);
    for d in space.dimensions() {
        assert_eq!(wild[&d.name], d.high);
    }

    let mut params = space.to_real(&vec![0.0; space.dim()]);
    params.insert("V_drive".into(), 100.0);
    params.insert("t_EML_nm".into(), -3.0);
    let x = space.to_normalized(&params).unwrap();
    let v_idx = space.index_of("V_drive").unwrap();
    let t_idx = space.index_of("t_EML_nm").unwrap();
    assert_eq!(x[v_idx], 1.0);
    assert_eq!(x[t_idx], -1.0);
}

#[test]
fn samples_stay_in_the_unit_box() {
    let space = ParameterSpace::qled_default();
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    for _ in 0..500 {
        let x = space.sample_normalized(&mut rng);
        assert_eq!(x.len(), 13);
        assert!(x.iter().all(|v| (-1.0..=1.0).contains(v)));
    }
}

#[test]
fn missing_dimension_is_reported_by_name() {
    let space = ParameterSpace::qled_default();
    let mut params = space.to_real(&vec![0.0; space.dim()]);
    params.remove("sl_gap_um");
    assert_eq!(
        space.to_normalized(&params).unwrap_err(),
        EnvError::missing_dimension("sl_gap_um")
    );
}

#[test]
fn default_constraints_fire_where_expected() {
    let space = ParameterSpace::qled_default();
    let mut params = space.to_real(&vec![0.0; space.dim()]);
    params.insert("t_HTL_nm".into(), 60.0);
    params.insert("t_EML_nm".into(), 70.0);
    params.insert("t_ETL_nm".into(), 60.0);
    params.insert("sl_gap_um".into(), 0.3);
    params.insert("V_drive".into(), 6.0);

    let v = space.constraint_violation(&params);
    assert!((v.get("t_total_over_180nm").unwrap() - 10.0).abs() < 1e-9);
    assert!((v.get("sl_gap_under_0p5um").unwrap() - 0.2).abs() < 1e-9);
    assert!((v.get("V_drive_over_5p5V").unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(v.get("ps_fill_frac_over_0p45"), Some(0.0));
    assert!(!space.is_hard_invalid(&v));
}

#[test]
fn hard_invalid_gate_accepts_map_and_scalar() {
    let space = ParameterSpace::new(
        vec![Dimension::new("a", 0.0, 1.0)],
        vec![Constraint {
            name: "a_under_50".into(),
            terms: vec!["a".into()],
            limit: 50.0,
            bound: BoundKind::Lower,
        }],
    )
    .unwrap();
    let params: PhysicalParams = [("a".to_string(), 0.0)].into_iter().collect();
    let v = space.constraint_violation(&params);
    assert_eq!(v.get("a_under_50"), Some(50.0));
    assert!(space.is_hard_invalid(&v));

    assert!(!space.is_hard_invalid(HARD_INVALID_THRESHOLD));
    assert!(space.is_hard_invalid(HARD_INVALID_THRESHOLD + 1e-6));
}

#[test]
fn invalid_space_definitions_are_rejected() {
    let dup = ParameterSpace::new(
        vec![Dimension::new("a", 0.0, 1.0), Dimension::new("a", 0.0, 2.0)],
        vec![],
    );
    assert!(matches!(dup, Err(EnvError::InvalidSpace(_))));

    let inverted = ParameterSpace::new(vec![Dimension::new("a", 1.0, 0.0)], vec![]);
    assert!(matches!(inverted, Err(EnvError::InvalidSpace(_))));
}
