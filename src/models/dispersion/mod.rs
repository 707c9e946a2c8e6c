//! Relaxation dispersion equations.
//!
//! Every model of the dispersion catalogue is a pure function from the
//! exchange parameters of one spin at one field, plus the factors of one
//! dispersion point, to a back-calculated R2eff (CPMG) or R1rho value. The
//! closed forms live in [`cpmg`] and [`r1rho`], the numerical Bloch-McConnell
//! solutions in [`numeric`].
//!
//! Models are reached through the [`DispersionEquation`] trait, so further
//! closed forms can be plugged into a [`crate::target::DispersionTarget`]
//! without touching the catalogue.

use crate::error::{RelaxError, Result};
use crate::experiment::{DispersionPoint, ExpType};
use crate::models::ModelId;
use crate::parameters::names::ParamName;
use crate::spin::Spin;
use std::f64::consts::PI;
use std::sync::Arc;

pub mod cpmg;
pub mod numeric;
pub mod r1rho;

pub use cpmg::{cr72, it99, lm63, lm63_3site, tsmfk01};
pub use numeric::{ns_cpmg_2site_3d, ns_r1rho, ExchangeSites};
pub use r1rho::{dpl94, m61, m61_skew, tp02};

/// Value returned in place of an R2eff when the magnetisation has fully
/// decayed and the logarithm is undefined.
pub const R2EFF_OVERFLOW: f64 = 1e99;

/// Exchange parameter values of one spin at one R20 key, in the units they
/// are optimised in (rates in s^-1, dw in ppm, phi_ex in ppm^2).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExchangeParams {
    pub r20a: f64,
    pub r20b: f64,
    pub pa: f64,
    pub pb: f64,
    pub dw: f64,
    pub dw_ab: f64,
    pub dw_bc: f64,
    pub kex: f64,
    pub tex: f64,
    pub k_ab: f64,
    pub kb: f64,
    pub kc: f64,
    pub kex_ab: f64,
    pub kex_bc: f64,
    pub kex_ac: f64,
    pub phi_ex: f64,
    pub phi_ex_b: f64,
    pub phi_ex_c: f64,
}

impl ExchangeParams {
    /// Set a parameter by name. `r2` sets both state rates.
    pub fn set(&mut self, name: ParamName, value: f64) {
        match name {
            ParamName::R2 => {
                self.r20a = value;
                self.r20b = value;
            }
            ParamName::R2a => self.r20a = value,
            ParamName::R2b => self.r20b = value,
            ParamName::PA => self.pa = value,
            ParamName::PB => self.pb = value,
            ParamName::Dw => self.dw = value,
            ParamName::DwAB => self.dw_ab = value,
            ParamName::DwBC => self.dw_bc = value,
            ParamName::Kex => self.kex = value,
            ParamName::Tex => self.tex = value,
            ParamName::KAB => self.k_ab = value,
            ParamName::KB => self.kb = value,
            ParamName::KC => self.kc = value,
            ParamName::KexAB => self.kex_ab = value,
            ParamName::KexBC => self.kex_bc = value,
            ParamName::KexAC => self.kex_ac = value,
            ParamName::PhiEx => self.phi_ex = value,
            ParamName::PhiExB => self.phi_ex_b = value,
            ParamName::PhiExC => self.phi_ex_c = value,
            _ => {}
        }
    }

    pub fn get(&self, name: ParamName) -> Option<f64> {
        let value = match name {
            ParamName::R2 | ParamName::R2a => self.r20a,
            ParamName::R2b => self.r20b,
            ParamName::PA => self.pa,
            ParamName::PB => self.pb,
            ParamName::Dw => self.dw,
            ParamName::DwAB => self.dw_ab,
            ParamName::DwBC => self.dw_bc,
            ParamName::Kex => self.kex,
            ParamName::Tex => self.tex,
            ParamName::KAB => self.k_ab,
            ParamName::KB => self.kb,
            ParamName::KC => self.kc,
            ParamName::KexAB => self.kex_ab,
            ParamName::KexBC => self.kex_bc,
            ParamName::KexAC => self.kex_ac,
            ParamName::PhiEx => self.phi_ex,
            ParamName::PhiExB => self.phi_ex_b,
            ParamName::PhiExC => self.phi_ex_c,
            _ => return None,
        };
        Some(value)
    }
}

/// Precomputed factors of one dispersion point of one spin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointContext {
    pub exp_type: ExpType,
    /// Proton frequency (Hz).
    pub frq: f64,
    /// ppm to rad/s conversion factor of the spin's nucleus at this field.
    pub ppm_to_rad: f64,
    /// CPMG pulse train frequency (Hz).
    pub cpmg_frq: f64,
    /// Spin-lock field strength (rad/s).
    pub omega1: f64,
    /// Chemical shift of the spin (rad/s).
    pub omega: f64,
    /// Spin-lock carrier position (rad/s).
    pub offset: f64,
    /// Relaxation period (s).
    pub relax_time: f64,
    /// Longitudinal relaxation rate at this field, for off-resonance R1rho.
    pub r1: Option<f64>,
}

impl PointContext {
    /// Collect the factors of `point` for `spin`. A spin without a chemical
    /// shift is treated as on resonance with the spin-lock carrier.
    pub fn new(point: &DispersionPoint, spin: &Spin) -> Self {
        let ppm_to_rad = spin.isotope.ppm_to_rad(point.frq);
        let offset = point.offset * ppm_to_rad;
        let omega = spin.chemical_shift.map(|cs| cs * ppm_to_rad).unwrap_or(offset);
        let (cpmg_frq, omega1) = match point.exp_type {
            ExpType::Cpmg => (point.point, 0.0),
            ExpType::R1rho => (0.0, 2.0 * PI * point.point),
        };
        Self {
            exp_type: point.exp_type,
            frq: point.frq,
            ppm_to_rad,
            cpmg_frq,
            omega1,
            omega,
            offset,
            relax_time: point.relax_time,
            r1: spin.r1_at(point.frq),
        }
    }

    fn require_r1(&self, model: &str) -> Result<f64> {
        self.r1.ok_or_else(|| RelaxError::InsufficientData {
            required: 1,
            available: 0,
            context: format!("{} needs R1 at {:.3} MHz", model, self.frq / 1e6),
        })
    }
}

/// A dispersion model equation.
pub trait DispersionEquation: Send + Sync {
    /// The catalogue model this equation evaluates.
    fn model(&self) -> ModelId;

    /// Back-calculate R2eff or R1rho for one point.
    fn r2eff(&self, params: &ExchangeParams, point: &PointContext) -> Result<f64>;
}

/// The equations of the built-in catalogue.
#[derive(Debug, Clone, Copy)]
struct CatalogueEquation {
    model: ModelId,
}

impl CatalogueEquation {
    fn check(&self, params: &ExchangeParams) -> Result<()> {
        let model = self.model.name();
        for name in self.model.params() {
            let value = params.get(name).unwrap_or(f64::NAN);
            if !value.is_finite() {
                return Err(RelaxError::domain(&model, name.as_str(), value, "must be finite"));
            }
            match name {
                ParamName::PA | ParamName::PB if !(0.0..=1.0).contains(&value) => {
                    return Err(RelaxError::domain(
                        &model,
                        name.as_str(),
                        value,
                        "populations must lie in [0, 1]",
                    ));
                }
                ParamName::R2
                | ParamName::R2a
                | ParamName::R2b
                | ParamName::Kex
                | ParamName::Tex
                | ParamName::KAB
                | ParamName::KB
                | ParamName::KC
                | ParamName::KexAB
                | ParamName::KexBC
                | ParamName::KexAC
                | ParamName::PhiEx
                | ParamName::PhiExB
                | ParamName::PhiExC
                    if value < 0.0 =>
                {
                    return Err(RelaxError::domain(
                        &model,
                        name.as_str(),
                        value,
                        "rates and times must be non-negative",
                    ));
                }
                _ => {}
            }
        }
        if self.model == ModelId::NsR1rho3Site && params.pa + params.pb > 1.0 {
            return Err(RelaxError::domain(
                &model,
                "pC",
                1.0 - params.pa - params.pb,
                "populations must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

impl DispersionEquation for CatalogueEquation {
    fn model(&self) -> ModelId {
        self.model
    }

    fn r2eff(&self, p: &ExchangeParams, point: &PointContext) -> Result<f64> {
        self.check(p)?;
        let name = self.model.name();
        let f = point.ppm_to_rad;
        let f2 = f * f;
        let nu = point.cpmg_frq;
        let value = match self.model {
            ModelId::NoRex => p.r20a,
            ModelId::Lm63 => lm63(p.r20a, p.phi_ex * f2, p.kex, nu),
            ModelId::Lm63ThreeSite => {
                lm63_3site(p.r20a, p.phi_ex_b * f2, p.phi_ex_c * f2, p.kb, p.kc, nu)
            }
            ModelId::Cr72 | ModelId::Cr72Full => cr72(p.r20a, p.r20b, p.pa, p.dw * f, p.kex, nu),
            ModelId::It99 => it99(p.r20a, p.pa, p.dw * f, p.tex, nu),
            ModelId::Tsmfk01 => tsmfk01(p.r20a, p.dw * f, p.k_ab, nu),
            ModelId::NsCpmg2Site3d | ModelId::NsCpmg2Site3dFull => ns_cpmg_2site_3d(
                p.r20a,
                p.r20b,
                p.pa,
                p.dw * f,
                p.kex,
                nu,
                point.relax_time,
            )?,
            ModelId::M61 => m61(p.r20a, p.phi_ex * f2, p.kex, point.omega1),
            ModelId::M61Skew => m61_skew(p.r20a, p.pa, p.dw * f, p.kex, point.omega1),
            ModelId::Dpl94 => dpl94(
                p.r20a,
                p.phi_ex * f2,
                p.kex,
                point.require_r1(&name)?,
                point.omega1,
                point.omega - point.offset,
            ),
            ModelId::Tp02 => tp02(
                p.r20a,
                p.pa,
                p.dw * f,
                p.kex,
                point.require_r1(&name)?,
                point.omega1,
                point.omega,
                point.offset,
            ),
            ModelId::NsR1rho2Site => {
                let sites = ExchangeSites::two_site(p.pa, point.omega, p.dw * f, p.kex);
                ns_r1rho(&sites, p.r20a, point.require_r1(&name)?, point.omega1, point.offset, point.relax_time)?
            }
            ModelId::NsR1rho3Site => {
                let sites = ExchangeSites::three_site(
                    [p.pa, p.pb],
                    point.omega,
                    [p.dw_ab * f, p.dw_bc * f],
                    [p.kex_ab, p.kex_bc, p.kex_ac],
                );
                ns_r1rho(&sites, p.r20a, point.require_r1(&name)?, point.omega1, point.offset, point.relax_time)?
            }
            ModelId::ModelFree(_) | ModelId::R2eff => {
                return Err(RelaxError::UnknownModel(format!("{} is not a dispersion model", name)))
            }
        };
        Ok(value)
    }
}

/// The catalogue equation of a dispersion model.
pub fn equation(model: ModelId) -> Result<Arc<dyn DispersionEquation>> {
    if !model.is_dispersion() {
        return Err(RelaxError::UnknownModel(format!(
            "{} is not a dispersion model",
            model
        )));
    }
    Ok(Arc::new(CatalogueEquation { model }))
}

/// The No Rex model: a flat line at R20.
pub fn no_rex(r20: f64) -> f64 {
    r20
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Isotope;
    use approx::assert_relative_eq;

    fn cpmg_point(nu: f64) -> PointContext {
        let spin = Spin::new(":1@N");
        PointContext::new(&DispersionPoint::cpmg(600e6, nu, 0.04), &spin)
    }

    fn cr72_params() -> ExchangeParams {
        let mut p = ExchangeParams::default();
        p.set(ParamName::R2, 10.0);
        p.set(ParamName::PA, 0.9);
        p.set(ParamName::Dw, 2.0);
        p.set(ParamName::Kex, 1000.0);
        p
    }

    #[test]
    fn test_r2_sets_both_states() {
        let p = cr72_params();
        assert_eq!(p.r20a, 10.0);
        assert_eq!(p.r20b, 10.0);
        assert_eq!(p.get(ParamName::R2b), Some(10.0));
        assert_eq!(p.get(ParamName::S2), None);
    }

    #[test]
    fn test_point_context() {
        let spin = Spin::new(":1@N").with_isotope(Isotope::N15).with_chemical_shift(120.0);
        let ctx = PointContext::new(&DispersionPoint::r1rho(600e6, 1000.0, 118.0, 0.1), &spin);
        assert_relative_eq!(ctx.omega1, 2.0 * PI * 1000.0);
        assert_relative_eq!(ctx.omega - ctx.offset, 2.0 * ctx.ppm_to_rad, max_relative = 1e-12);
        assert_eq!(ctx.r1, None);
    }

    #[test]
    fn test_catalogue_dispatch() {
        let eq = equation(ModelId::Cr72).unwrap();
        assert_eq!(eq.model(), ModelId::Cr72);
        let p = cr72_params();
        let point = cpmg_point(100.0);
        let value = eq.r2eff(&p, &point).unwrap();
        let direct = cr72(10.0, 10.0, 0.9, 2.0 * point.ppm_to_rad, 1000.0, 100.0);
        assert_eq!(value, direct);
        assert!(equation(ModelId::R2eff).is_err());
    }

    #[test]
    fn test_domain_errors() {
        let eq = equation(ModelId::Cr72).unwrap();
        let point = cpmg_point(100.0);
        let mut p = cr72_params();
        p.set(ParamName::PA, 1.5);
        assert!(matches!(eq.r2eff(&p, &point), Err(RelaxError::DomainError { .. })));
        let mut p = cr72_params();
        p.set(ParamName::Kex, -10.0);
        assert!(matches!(eq.r2eff(&p, &point), Err(RelaxError::DomainError { .. })));
        let mut p = cr72_params();
        p.set(ParamName::Dw, f64::NAN);
        assert!(matches!(eq.r2eff(&p, &point), Err(RelaxError::DomainError { .. })));
    }

    #[test]
    fn test_off_resonance_needs_r1() {
        let eq = equation(ModelId::Tp02).unwrap();
        let spin = Spin::new(":1@N");
        let point = PointContext::new(&DispersionPoint::r1rho(600e6, 1000.0, 118.0, 0.1), &spin);
        let err = eq.r2eff(&cr72_params(), &point).unwrap_err();
        assert!(matches!(err, RelaxError::InsufficientData { .. }));
    }

    /// A plug-in equation outside the catalogue.
    struct Scaled(f64);

    impl DispersionEquation for Scaled {
        fn model(&self) -> ModelId {
            ModelId::NoRex
        }

        fn r2eff(&self, params: &ExchangeParams, _point: &PointContext) -> Result<f64> {
            Ok(self.0 * params.r20a)
        }
    }

    #[test]
    fn test_plugin_equation() {
        let eq: Arc<dyn DispersionEquation> = Arc::new(Scaled(2.0));
        assert_eq!(eq.r2eff(&cr72_params(), &cpmg_point(50.0)).unwrap(), 20.0);
        assert_eq!(no_rex(7.5), 7.5);
    }
}
