//! The closed set of parameter names.
//!
//! Every parameter of every model in the catalogue has one [`ParamName`]. The
//! name carries its traversal class ([`ParamKind`]), its default starting
//! value, its default grid search bounds, its optimisation scaling and its
//! linear constraint interval.

use crate::error::RelaxError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a parameter is laid out in the flat parameter vector of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// One value per spin and per R20 key.
    R20,
    /// One value per spin.
    Spin,
    /// One value shared by the whole cluster.
    Global,
}

/// Parameter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamName {
    // Baseline transverse rates.
    R2,
    R2a,
    R2b,
    // Chemical shift differences and fast-exchange amplitudes.
    PhiEx,
    PhiExB,
    PhiExC,
    Dw,
    DwAB,
    DwBC,
    // Populations and exchange rates.
    PA,
    PB,
    Kex,
    Tex,
    KAB,
    KB,
    KC,
    KexAB,
    KexBC,
    KexAC,
    // Derived only, never optimised.
    PC,
    KBA,
    DwAC,
    // Model-free.
    LocalTm,
    S2,
    S2f,
    S2s,
    Te,
    Tf,
    Ts,
    Rex,
    // Exponential curve.
    R2eff,
    I0,
}

/// Upper constraint for the exchange rates (s^-1).
pub const KEX_MAX: f64 = 2e6;

/// Upper constraint for the R20-type rates (s^-1).
pub const R20_MAX: f64 = 200.0;

impl ParamName {
    pub const ALL: [ParamName; 32] = [
        ParamName::R2,
        ParamName::R2a,
        ParamName::R2b,
        ParamName::PhiEx,
        ParamName::PhiExB,
        ParamName::PhiExC,
        ParamName::Dw,
        ParamName::DwAB,
        ParamName::DwBC,
        ParamName::PA,
        ParamName::PB,
        ParamName::Kex,
        ParamName::Tex,
        ParamName::KAB,
        ParamName::KB,
        ParamName::KC,
        ParamName::KexAB,
        ParamName::KexBC,
        ParamName::KexAC,
        ParamName::PC,
        ParamName::KBA,
        ParamName::DwAC,
        ParamName::LocalTm,
        ParamName::S2,
        ParamName::S2f,
        ParamName::S2s,
        ParamName::Te,
        ParamName::Tf,
        ParamName::Ts,
        ParamName::Rex,
        ParamName::R2eff,
        ParamName::I0,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::R2 => "r2",
            ParamName::R2a => "r2a",
            ParamName::R2b => "r2b",
            ParamName::PhiEx => "phi_ex",
            ParamName::PhiExB => "phi_ex_B",
            ParamName::PhiExC => "phi_ex_C",
            ParamName::Dw => "dw",
            ParamName::DwAB => "dw_AB",
            ParamName::DwBC => "dw_BC",
            ParamName::PA => "pA",
            ParamName::PB => "pB",
            ParamName::Kex => "kex",
            ParamName::Tex => "tex",
            ParamName::KAB => "k_AB",
            ParamName::KB => "kB",
            ParamName::KC => "kC",
            ParamName::KexAB => "kex_AB",
            ParamName::KexBC => "kex_BC",
            ParamName::KexAC => "kex_AC",
            ParamName::PC => "pC",
            ParamName::KBA => "k_BA",
            ParamName::DwAC => "dw_AC",
            ParamName::LocalTm => "local_tm",
            ParamName::S2 => "s2",
            ParamName::S2f => "s2f",
            ParamName::S2s => "s2s",
            ParamName::Te => "te",
            ParamName::Tf => "tf",
            ParamName::Ts => "ts",
            ParamName::Rex => "rex",
            ParamName::R2eff => "r2eff",
            ParamName::I0 => "i0",
        }
    }

    /// Traversal class of the parameter.
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b => ParamKind::R20,
            ParamName::PhiEx
            | ParamName::PhiExB
            | ParamName::PhiExC
            | ParamName::Dw
            | ParamName::DwAB
            | ParamName::DwBC
            | ParamName::DwAC
            | ParamName::LocalTm
            | ParamName::S2
            | ParamName::S2f
            | ParamName::S2s
            | ParamName::Te
            | ParamName::Tf
            | ParamName::Ts
            | ParamName::Rex
            | ParamName::R2eff
            | ParamName::I0 => ParamKind::Spin,
            ParamName::PA
            | ParamName::PB
            | ParamName::PC
            | ParamName::Kex
            | ParamName::Tex
            | ParamName::KAB
            | ParamName::KBA
            | ParamName::KB
            | ParamName::KC
            | ParamName::KexAB
            | ParamName::KexBC
            | ParamName::KexAC => ParamKind::Global,
        }
    }

    /// Whether this is one of the baseline rates fitted per R20 key.
    pub fn is_r20(&self) -> bool {
        self.kind() == ParamKind::R20
    }

    /// Default starting value, used when no value has been set or nested in.
    pub fn default_value(&self) -> f64 {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b => 10.0,
            ParamName::PhiEx | ParamName::PhiExB | ParamName::PhiExC => 5.0,
            ParamName::Dw | ParamName::DwAB | ParamName::DwBC | ParamName::DwAC => 1.0,
            ParamName::PA => 0.9,
            ParamName::PB => 0.05,
            ParamName::PC => 0.05,
            ParamName::Kex
            | ParamName::KB
            | ParamName::KC
            | ParamName::KexAB
            | ParamName::KexBC
            | ParamName::KexAC
            | ParamName::KBA => 1000.0,
            ParamName::KAB => 10.0,
            ParamName::Tex => 1e-3,
            ParamName::LocalTm => 10e-9,
            ParamName::S2 => 0.8,
            ParamName::S2f => 0.9,
            ParamName::S2s => 0.9,
            ParamName::Te => 100e-12,
            ParamName::Tf => 10e-12,
            ParamName::Ts => 1e-9,
            ParamName::Rex => 0.0,
            ParamName::R2eff => 10.0,
            ParamName::I0 => 1.0,
        }
    }

    /// Default grid search bounds `(lower, upper)` in physical units.
    pub fn grid_bounds(&self) -> (f64, f64) {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b | ParamName::R2eff => (1.0, 40.0),
            ParamName::PhiEx | ParamName::PhiExB | ParamName::PhiExC => (0.0, 10.0),
            ParamName::Dw | ParamName::DwAB | ParamName::DwBC | ParamName::DwAC => (0.0, 10.0),
            ParamName::PA => (0.5, 1.0),
            ParamName::PB | ParamName::PC => (0.0, 0.5),
            ParamName::Kex
            | ParamName::KB
            | ParamName::KC
            | ParamName::KexAB
            | ParamName::KexBC
            | ParamName::KexAC
            | ParamName::KBA => (1.0, 1e5),
            ParamName::KAB => (1.0, 100.0),
            ParamName::Tex => (1.0 / 200_000.0, 0.5),
            ParamName::LocalTm => (1e-9, 20e-9),
            ParamName::S2 | ParamName::S2f | ParamName::S2s => (0.0, 1.0),
            ParamName::Te | ParamName::Tf => (0.0, 500e-12),
            ParamName::Ts => (0.0, 10e-9),
            ParamName::Rex => (0.0, 5.0),
            ParamName::I0 => (1e-4, 1.0),
        }
    }

    /// Diagonal scaling factor: the optimiser works on `value / scaling`.
    pub fn scaling(&self) -> f64 {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b | ParamName::R2eff => 10.0,
            ParamName::Kex
            | ParamName::KB
            | ParamName::KC
            | ParamName::KexAB
            | ParamName::KexBC
            | ParamName::KexAC
            | ParamName::KBA => 10_000.0,
            ParamName::KAB => 10.0,
            ParamName::Tex => 1e-4,
            ParamName::LocalTm | ParamName::Te | ParamName::Tf | ParamName::Ts => 1e-12,
            _ => 1.0,
        }
    }

    /// Single-parameter constraint interval `(lower, upper)`, either end optional.
    pub fn constraint_bounds(&self) -> (Option<f64>, Option<f64>) {
        match self {
            ParamName::R2 | ParamName::R2a | ParamName::R2b => (Some(0.0), Some(R20_MAX)),
            ParamName::PA => (Some(0.5), Some(1.0)),
            ParamName::PB => (Some(0.0), None),
            ParamName::Kex
            | ParamName::KB
            | ParamName::KC
            | ParamName::KexAB
            | ParamName::KexBC
            | ParamName::KexAC => (Some(0.0), Some(KEX_MAX)),
            ParamName::KAB => (Some(0.0), Some(100.0)),
            ParamName::Tex => (Some(0.0), Some(0.5)),
            ParamName::PhiEx | ParamName::PhiExB | ParamName::PhiExC => (Some(0.0), None),
            ParamName::Dw | ParamName::DwAB | ParamName::DwBC => (Some(0.0), None),
            ParamName::S2 | ParamName::S2f | ParamName::S2s => (Some(0.0), Some(1.0)),
            ParamName::Te | ParamName::Tf | ParamName::Ts | ParamName::Rex => (Some(0.0), None),
            ParamName::LocalTm => (Some(0.0), Some(200e-9)),
            ParamName::R2eff | ParamName::I0 => (Some(0.0), None),
            ParamName::PC | ParamName::KBA | ParamName::DwAC => (None, None),
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParamName {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParamName::ALL
            .iter()
            .find(|name| name.as_str() == s)
            .copied()
            .ok_or_else(|| RelaxError::InvalidParameter(format!("Unknown parameter name '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for name in ParamName::ALL {
            assert_eq!(name.as_str().parse::<ParamName>().unwrap(), name);
        }
        assert!("nope".parse::<ParamName>().is_err());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(ParamName::R2a.kind(), ParamKind::R20);
        assert_eq!(ParamName::Dw.kind(), ParamKind::Spin);
        assert_eq!(ParamName::Kex.kind(), ParamKind::Global);
        assert_eq!(ParamName::S2.kind(), ParamKind::Spin);
    }

    #[test]
    fn test_defaults_inside_constraints() {
        for name in ParamName::ALL {
            let value = name.default_value();
            let (lower, upper) = name.constraint_bounds();
            if let Some(lower) = lower {
                assert!(value >= lower, "{} default below constraint", name);
            }
            if let Some(upper) = upper {
                assert!(value <= upper, "{} default above constraint", name);
            }
            let (lo, hi) = name.grid_bounds();
            assert!(lo < hi, "{} has an empty grid", name);
            assert!(name.scaling() > 0.0);
        }
    }
}
