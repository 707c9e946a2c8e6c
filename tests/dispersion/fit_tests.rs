use crate::test_helpers::{cpmg_spin, fill_back_calculated};
use approx::assert_relative_eq;
use relaxopt_rs::analysis::{run_analysis, AnalysisConfig};
use relaxopt_rs::optimise::{minimise_pipe, MinimiseConfig};
use relaxopt_rs::experiment::{DispersionPoint, ExpType, R20Key};
use relaxopt_rs::parameters::{param_num, ParamName};
use relaxopt_rs::session::{Pipe, Session};
use relaxopt_rs::{ModelId, Spin};

/// A CR72 spin at 600 and 800 MHz with back-calculated data.
fn exchanging_spin(id: &str, r2: f64, pa: f64, dw: f64, kex: f64) -> Spin {
    let mut spins = vec![cpmg_spin(id, ModelId::Cr72, &[600e6, 800e6], 0.2)];
    let keys: Vec<_> = spins[0].r20_keys().into_iter().collect();
    for key in &keys {
        spins[0].values.set(ParamName::R2, Some(*key), r2);
    }
    spins[0].values.set(ParamName::PA, None, pa);
    spins[0].values.set(ParamName::Dw, None, dw);
    spins[0].values.set(ParamName::Kex, None, kex);
    fill_back_calculated(&mut spins, &keys);
    let mut spin = spins.remove(0);
    spin.reset_results();
    spin
}

#[test]
fn test_clustered_cr72_fit() {
    let mut pipe = Pipe::new("CR72");
    pipe.add_spin(exchanging_spin(":20@N", 10.0, 0.9, 2.0, 1500.0))
        .unwrap();
    pipe.add_spin(exchanging_spin(":21@N", 14.0, 0.9, 3.0, 1500.0))
        .unwrap();
    pipe.cluster(&[":20@N", ":21@N"]).unwrap();
    assert_eq!(pipe.cluster_units(), vec![vec![0, 1]]);

    // Start next to the shared exchange process.
    for spin in pipe.spins.iter_mut() {
        spin.values.set(ParamName::PA, None, 0.88);
        spin.values.set(ParamName::Kex, None, 1300.0);
    }
    pipe.spins[0].values.set(ParamName::Dw, None, 1.8);
    pipe.spins[1].values.set(ParamName::Dw, None, 2.7);
    let config = MinimiseConfig::default().with_grid(None);
    let report = minimise_pipe(&mut pipe, &config, None, None).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.fitted, 1);
    assert!(report.chi2 < 1e-4, "chi2 = {}", report.chi2);
    for (spin, dw) in pipe.spins.iter().zip([2.0, 3.0]) {
        assert_relative_eq!(spin.values.get(ParamName::Dw, None).unwrap(), dw, max_relative = 1e-2);
        assert_relative_eq!(spin.values.get(ParamName::Kex, None).unwrap(), 1500.0, max_relative = 1e-2);
        assert_eq!(spin.fit.chi2, Some(report.chi2));
    }
}

#[test]
fn test_analysis_selects_exchange_only_where_present() {
    let mut session = Session::new();
    let base = session.create_pipe("base").unwrap();
    base.add_spin(exchanging_spin(":30@N", 10.0, 0.85, 3.0, 800.0))
        .unwrap();
    let mut flat = cpmg_spin(":31@N", ModelId::NoRex, &[600e6, 800e6], 0.2);
    for (i, obs) in flat.observations.iter_mut().enumerate() {
        obs.value = 11.0 + if i % 2 == 0 { 0.05 } else { -0.05 };
    }
    flat.model = None;
    base.add_spin(flat).unwrap();

    let config = AnalysisConfig::default()
        .with_models(&["No Rex", "LM63", "CR72"])
        .with_grid_increments(Some(5))
        .with_insignificance(1.0)
        .with_mc_sims(0);
    let report = run_analysis(&mut session, &config).unwrap();

    assert_eq!(report.insignificant, vec![":31@N".to_string()]);
    assert_eq!(report.models[2].model, ModelId::Cr72);
    assert_eq!(report.models[2].nested_from, Some(ModelId::Lm63));
    assert!(report.monte_carlo.is_none());

    let final_pipe = session.pipe("final").unwrap();
    assert_ne!(final_pipe.spins[0].model, Some(ModelId::NoRex));
    assert_eq!(final_pipe.spins[1].model, Some(ModelId::NoRex));
    let no_rex = session.pipe("No Rex").unwrap();
    assert!(final_pipe.spins[0].fit.chi2.unwrap() < no_rex.spins[0].fit.chi2.unwrap());
}

#[test]
fn test_cpmg_fit_ignores_r1rho_points() {
    let mut spin = exchanging_spin(":40@N", 10.0, 0.9, 2.0, 1500.0);
    for nu1 in [1000.0, 2000.0, 4000.0] {
        spin.add_dispersion(DispersionPoint::r1rho(600e6, nu1, 0.0, 0.05), 25.0, 0.2);
    }
    spin.values.set(ParamName::PA, None, 0.88);
    spin.values.set(ParamName::Dw, None, 1.8);
    spin.values.set(ParamName::Kex, None, 1300.0);
    let mut pipe = Pipe::new("CR72");
    pipe.add_spin(spin).unwrap();

    let keys = pipe.r20_keys();
    assert_eq!(
        keys,
        vec![R20Key::new(ExpType::Cpmg, 600e6), R20Key::new(ExpType::Cpmg, 800e6)]
    );
    assert_eq!(param_num(&pipe.spins, &keys).unwrap(), 5);
    assert_eq!(pipe.count_observations(), 14);

    let config = MinimiseConfig::default().with_grid(None);
    let report = minimise_pipe(&mut pipe, &config, None, None).unwrap();
    assert!(report.is_complete());

    let spin = &pipe.spins[0];
    assert!(spin.fit.converged);
    assert!(spin.fit.chi2.unwrap() < 1e-4);
    let r1rho_key = R20Key::new(ExpType::R1rho, 600e6);
    assert_eq!(spin.values.get(ParamName::R2, Some(r1rho_key)), None);
    assert_relative_eq!(spin.values.get(ParamName::Dw, None).unwrap(), 2.0, max_relative = 1e-2);
}
