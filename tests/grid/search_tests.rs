use crate::test_helpers::{cpmg_spin, fill_back_calculated};
use relaxopt_rs::grid::{grid_search, GridConfig, GridInfo};
use relaxopt_rs::parameters::{grid_bounds, linear_constraints, scaling_vector, ParamName};
use relaxopt_rs::problem::Problem;
use relaxopt_rs::session::Pipe;
use relaxopt_rs::target::{ClusterTarget, ScaledProblem};
use relaxopt_rs::ModelId;

fn cr72_pipe() -> Pipe {
    let mut pipe = Pipe::new("CR72");
    let mut spin = cpmg_spin(":10@N", ModelId::Cr72, &[600e6], 0.2);
    let key = spin.r20_keys().into_iter().next().unwrap();
    spin.values.set(ParamName::R2, Some(key), 12.0);
    spin.values.set(ParamName::PA, None, 0.92);
    spin.values.set(ParamName::Dw, None, 2.5);
    spin.values.set(ParamName::Kex, None, 1500.0);
    pipe.add_spin(spin).unwrap();
    let keys = pipe.r20_keys();
    fill_back_calculated(&mut pipe.spins, &keys);
    pipe.spins[0].values.clear();
    pipe
}

#[test]
fn test_minimum_independent_of_chunking() {
    let pipe = cr72_pipe();
    let keys = pipe.r20_keys();
    let spins = &pipe.spins;
    let target = ClusterTarget::new(spins, &keys, None).unwrap();
    let scaling = scaling_vector(spins, &keys).unwrap();
    let problem = ScaledProblem::new(&target, scaling.clone()).unwrap();
    let constraints = linear_constraints(spins, &keys, &scaling).unwrap();
    let bounds: Vec<(f64, f64)> = grid_bounds(spins, &keys)
        .unwrap()
        .iter()
        .zip(scaling.iter())
        .map(|(&(lo, hi), &s)| (lo / s, hi / s))
        .collect();
    let info = GridInfo::from_bounds(&bounds, &[6, 6, 6, 6]).unwrap();

    let reference = grid_search(
        &problem,
        &info,
        Some(&constraints),
        &GridConfig::default().with_chunks(1),
        None,
    )
    .unwrap();
    for chunks in [2, 7, 64] {
        let result = grid_search(
            &problem,
            &info,
            Some(&constraints),
            &GridConfig::default().with_chunks(chunks),
            None,
        )
        .unwrap();
        assert_eq!(result.index, reference.index);
        assert_eq!(result.params, reference.params);
        assert_eq!(result.evaluated, reference.evaluated);
        assert_eq!(result.skipped, reference.skipped);
    }
    assert_eq!(
        (reference.evaluated + reference.skipped + reference.failed) as u128,
        info.total_steps()
    );
    assert!(constraints.is_feasible(&reference.params, 1e-10));
    assert_eq!(problem.eval_cost(&reference.params).unwrap(), reference.chi2);
}

#[test]
fn test_sobol_sampling_of_a_large_grid() {
    let pipe = cr72_pipe();
    let keys = pipe.r20_keys();
    let target = ClusterTarget::new(&pipe.spins, &keys, None).unwrap();
    let scaling = scaling_vector(&pipe.spins, &keys).unwrap();
    let problem = ScaledProblem::new(&target, scaling.clone()).unwrap();
    let bounds: Vec<(f64, f64)> = grid_bounds(&pipe.spins, &keys)
        .unwrap()
        .iter()
        .zip(scaling.iter())
        .map(|(&(lo, hi), &s)| (lo / s, hi / s))
        .collect();
    let info = GridInfo::from_bounds(&bounds, &[21, 21, 21, 21]).unwrap();
    let config = GridConfig::default().with_sobol(500, 3);

    let first = grid_search(&problem, &info, None, &config, None).unwrap();
    let second = grid_search(&problem, &info, None, &config.clone().with_chunks(3), None).unwrap();
    assert!(first.sobol);
    assert!(first.evaluated + first.failed <= 500);
    assert_eq!(first.index, second.index);
    assert_eq!(first.params, second.params);
}
