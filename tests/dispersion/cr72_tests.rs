use crate::test_helpers::cpmg_spin;
use relaxopt_rs::experiment::R20Key;
use relaxopt_rs::parameters::{
    assemble_param_vector, disassemble_param_vector, linear_constraints, param_index_to_param_info,
    param_num, scaling_vector, ParamName,
};
use relaxopt_rs::{ModelId, Spin};

fn cluster() -> (Vec<Spin>, Vec<R20Key>) {
    let spins = vec![
        cpmg_spin(":4@N", ModelId::Cr72, &[600e6, 800e6], 0.2),
        cpmg_spin(":5@N", ModelId::Cr72, &[600e6, 800e6], 0.2),
    ];
    let keys: Vec<R20Key> = spins[0].r20_keys().into_iter().collect();
    (spins, keys)
}

#[test]
fn test_round_trip_onto_fresh_spins() {
    let (spins, keys) = cluster();
    // r2 x 4, pA, dw x 2, kex
    assert_eq!(param_num(&spins, &keys).unwrap(), 8);

    let mut params = assemble_param_vector(&spins, &keys, None).unwrap();
    for (i, p) in params.iter_mut().enumerate() {
        *p *= 1.0 + 0.01 * (i + 1) as f64;
    }

    let mut fresh: Vec<Spin> = spins.clone();
    for spin in fresh.iter_mut() {
        spin.reset_results();
    }
    disassemble_param_vector(&mut fresh, &keys, &params, None).unwrap();
    let again = assemble_param_vector(&fresh, &keys, None).unwrap();
    assert_eq!(again, params);

    // The global kex is written to both spins.
    let kex = params[7];
    assert_eq!(fresh[0].values.get(ParamName::Kex, None), Some(kex));
    assert_eq!(fresh[1].values.get(ParamName::Kex, None), Some(kex));

    let info = param_index_to_param_info(5, &fresh, &keys).unwrap().unwrap();
    assert_eq!(info.name, ParamName::Dw);
    assert_eq!(info.spin_index, Some(0));
}

#[test]
fn test_constraints_reject_out_of_range_values() {
    let spins = vec![cpmg_spin(":4@N", ModelId::Cr72, &[600e6], 0.2)];
    let keys: Vec<R20Key> = spins[0].r20_keys().into_iter().collect();
    let scaling = scaling_vector(&spins, &keys).unwrap();
    let constraints = linear_constraints(&spins, &keys, &scaling).unwrap();
    let defaults = assemble_param_vector(&spins, &keys, None).unwrap() / &scaling;
    assert!(constraints.is_feasible(&defaults, 1e-10));
    assert_eq!(constraints.violation(&defaults), 0.0);

    // [r2, pA, dw, kex]
    let mut pa = defaults.clone();
    pa[1] = 1.5 / scaling[1];
    assert!(!constraints.is_feasible(&pa, 1e-10));
    assert!(constraints.violation(&pa) > 0.0);

    let mut kex = defaults.clone();
    kex[3] = -10.0 / scaling[3];
    assert!(!constraints.is_feasible(&kex, 1e-10));

    let snapped = constraints.snap(&kex);
    assert!(constraints.is_feasible(&snapped, 1e-10));
}
