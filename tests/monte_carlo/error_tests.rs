use crate::test_helpers::{cpmg_spin, fill_back_calculated};
use approx::assert_relative_eq;
use relaxopt_rs::monte_carlo::{self, MonteCarloConfig, ResampleMethod};
use relaxopt_rs::optimise::{minimise_pipe, MinimiseConfig};
use relaxopt_rs::parameters::{assemble_param_vector, loop_parameters, ParamName};
use relaxopt_rs::problem::Problem;
use relaxopt_rs::session::Pipe;
use relaxopt_rs::statistics::{multifit_covar, standard_errors};
use relaxopt_rs::target::ClusterTarget;
use relaxopt_rs::ModelId;

/// A No Rex spin at two fields with uneven errors.
fn no_rex_pipe(scale: f64) -> Pipe {
    let mut spin = cpmg_spin(":3@N", ModelId::NoRex, &[600e6, 800e6], 1.0);
    for (i, obs) in spin.observations.iter_mut().enumerate() {
        let r2 = if i < 7 { 10.0 } else { 13.0 };
        obs.error = scale * (0.3 + 0.05 * (i % 7) as f64);
        let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
        obs.value = r2 + sign * 0.5 * obs.error;
    }
    let mut pipe = Pipe::new("No Rex");
    pipe.add_spin(spin).unwrap();
    pipe
}

fn run(pipe: &mut Pipe, n_sims: usize) -> usize {
    let minimise = MinimiseConfig::default().with_grid(None);
    minimise_pipe(pipe, &minimise, None, None).unwrap();
    let config = MonteCarloConfig::default()
        .with_n_sims(n_sims)
        .with_seed(42)
        .with_method(ResampleMethod::BackCalculated);
    monte_carlo::setup(pipe, n_sims).unwrap();
    monte_carlo::create_data(pipe, &config).unwrap();
    let report = monte_carlo::run(pipe, &config, &minimise, None, None).unwrap();
    monte_carlo::error_analysis(pipe);
    report.failures.len()
}

#[test]
fn test_vanishing_noise_gives_vanishing_errors() {
    let mut pipe = no_rex_pipe(1e-8);
    assert_eq!(run(&mut pipe, 20), 0);
    let spin = &pipe.spins[0];
    for key in pipe.r20_keys() {
        let err = spin.errors.get(ParamName::R2, Some(key)).unwrap();
        assert!(err < 1e-7, "err = {}", err);
    }
}

#[test]
fn test_errors_agree_with_covariance() {
    let mut pipe = no_rex_pipe(1.0);
    assert_eq!(run(&mut pipe, 400), 0);

    let keys = pipe.r20_keys();
    let spins = &pipe.spins;
    let params = assemble_param_vector(spins, &keys, None).unwrap();
    let target = ClusterTarget::new(spins, &keys, None).unwrap();
    let covar = multifit_covar(&target.jacobian(&params).unwrap(), 0.0, None).unwrap();
    let expected = standard_errors(&covar.matrix);

    for (i, key) in keys.iter().enumerate() {
        // For a constant model the error is 1 / sqrt(sum 1 / sigma^2).
        let analytic = spins[0]
            .dispersion_observations()
            .filter(|(point, _)| point.r20_key() == *key)
            .map(|(_, obs)| obs.error.powi(-2))
            .sum::<f64>()
            .powf(-0.5);
        assert_relative_eq!(expected[i], analytic, max_relative = 1e-5);

        let mc = spins[0].errors.get(ParamName::R2, Some(*key)).unwrap();
        assert_relative_eq!(mc, expected[i], max_relative = 0.15);
    }
}

/// Noise-free CR72 data at three fields, intermediate exchange.
fn cr72_pipe(error: f64) -> Pipe {
    let mut spins = vec![cpmg_spin(":5@N", ModelId::Cr72, &[500e6, 600e6, 800e6], error)];
    let keys: Vec<_> = spins[0].r20_keys().into_iter().collect();
    for key in &keys {
        spins[0].values.set(ParamName::R2, Some(*key), 12.0);
    }
    spins[0].values.set(ParamName::PA, None, 0.9);
    spins[0].values.set(ParamName::Dw, None, 2.0);
    spins[0].values.set(ParamName::Kex, None, 1500.0);
    fill_back_calculated(&mut spins, &keys);
    let mut pipe = Pipe::new("CR72");
    pipe.add_spin(spins.remove(0)).unwrap();
    pipe
}

#[test]
fn test_exchange_errors_agree_with_covariance() {
    let mut pipe = cr72_pipe(0.05);
    let n_sims = 300;
    let failures = run(&mut pipe, n_sims);
    assert!(failures * 20 < n_sims, "{} failed replicates", failures);

    let keys = pipe.r20_keys();
    let spins = &pipe.spins;
    let params = assemble_param_vector(spins, &keys, None).unwrap();
    let target = ClusterTarget::new(spins, &keys, None).unwrap();
    let covar = multifit_covar(&target.jacobian(&params).unwrap(), 0.0, None).unwrap();
    assert!(covar.flagged.is_empty());
    let expected = standard_errors(&covar.matrix);

    let entries: Vec<_> = loop_parameters(spins, &keys).unwrap().collect();
    assert_eq!(entries.len(), 6);
    for entry in entries {
        let mc = spins[0].errors.get(entry.name, entry.r20_key).unwrap();
        // 300 replicates estimate a standard deviation to about 4%.
        assert_relative_eq!(mc, expected[entry.index], max_relative = 0.2);
    }
    let dw_err = spins[0].errors.get(ParamName::Dw, None).unwrap();
    let kex_err = spins[0].errors.get(ParamName::Kex, None).unwrap();
    // Both stay resolved: errors well below the values themselves.
    assert!(dw_err > 0.0 && dw_err < 1.0, "dw error {}", dw_err);
    assert!(kex_err > 0.0 && kex_err < 1500.0, "kex error {}", kex_err);
}
