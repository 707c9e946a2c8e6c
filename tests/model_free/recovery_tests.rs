use crate::test_helpers::fill_back_calculated;
use approx::assert_relative_eq;
use relaxopt_rs::experiment::{Observable, Observation, RiType};
use relaxopt_rs::grid::GridConfig;
use relaxopt_rs::models::spectral_density::{jw, DiffusionGeometry, SpectralDensityForm};
use relaxopt_rs::models::{MfModel, ModelId};
use relaxopt_rs::optimise::{minimise_pipe, MinimiseConfig};
use relaxopt_rs::parameters::ParamName;
use relaxopt_rs::session::Pipe;
use relaxopt_rs::Spin;

const TM: f64 = 8e-9;

fn m2() -> ModelId {
    ModelId::ModelFree(MfModel::preset(2, false).unwrap())
}

#[test]
fn test_recover_s2_te_from_spectral_densities() {
    let geometry = DiffusionGeometry::sphere(TM);
    let mut spin = Spin::new(":7@N").with_diffusion(geometry.clone());
    spin.model = Some(m2());
    for omega in [0.0, 3.8e8, 3.39e9, 3.77e9, 4.15e9, 5.03e9] {
        let value = jw(SpectralDensityForm::S2Te, omega, &[0.8, 50e-12], &geometry).unwrap();
        spin.add_observation(Observation::new(
            Observable::SpectralDensity { omega },
            value,
            0.02 * value,
        ));
    }
    let mut pipe = Pipe::new("m2");
    pipe.add_spin(spin).unwrap();

    // Eight increments keep the grid off the true values.
    let config = MinimiseConfig::default().with_grid(Some(GridConfig::default().with_increments(8)));
    let report = minimise_pipe(&mut pipe, &config, None, None).unwrap();
    assert!(report.is_complete());

    let values = &pipe.spins[0].values;
    assert_relative_eq!(values.get(ParamName::S2, None).unwrap(), 0.8, max_relative = 1e-4);
    assert_relative_eq!(values.get(ParamName::Te, None).unwrap(), 50e-12, max_relative = 1e-4);
    assert!(pipe.spins[0].fit.chi2.unwrap() < 1e-8);
}

#[test]
fn test_recover_s2_te_from_relaxation_rates() {
    let mut spin = Spin::new(":8@N").with_diffusion(DiffusionGeometry::sphere(TM));
    spin.model = Some(m2());
    for frq in [600e6, 800e6] {
        for kind in [RiType::R1, RiType::R2, RiType::Noe] {
            spin.add_observation(Observation::new(Observable::Relaxation { kind, frq }, 0.0, 0.02));
        }
    }
    spin.values.set(ParamName::S2, None, 0.8);
    spin.values.set(ParamName::Te, None, 50e-12);
    let mut spins = vec![spin];
    fill_back_calculated(&mut spins, &[]);
    spins[0].reset_results();

    let mut pipe = Pipe::new("m2");
    pipe.add_spin(spins.remove(0)).unwrap();
    let config = MinimiseConfig::default().with_grid(Some(GridConfig::default().with_increments(8)));
    minimise_pipe(&mut pipe, &config, None, None).unwrap();

    let spin = &pipe.spins[0];
    assert!(spin.fit.converged);
    assert_relative_eq!(spin.values.get(ParamName::S2, None).unwrap(), 0.8, max_relative = 1e-4);
    assert_relative_eq!(spin.values.get(ParamName::Te, None).unwrap(), 50e-12, max_relative = 1e-4);
}
