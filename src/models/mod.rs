//! The model catalogue and model function library.
//!
//! A [`ModelId`] names one model of the catalogue. It fixes the ordered
//! parameter list of the model, the experiment type its data must come from,
//! and which function library evaluates it:
//!
//! - [`dispersion`]: CPMG and R1rho relaxation dispersion equations
//! - [`spectral_density`] and [`relaxation`]: model-free J(w) and R1/R2/NOE
//! - [`exponential`]: two-parameter intensity decays for the R2eff stage

use crate::error::RelaxError;
use crate::experiment::ExpType;
use crate::parameters::names::ParamName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod dispersion;
pub mod exponential;
pub mod relaxation;
pub mod spectral_density;

pub use spectral_density::SpectralDensityForm;

/// Which function library a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Dispersion,
    ModelFree,
    Exponential,
}

/// A model-free model: a spectral density form, optional chemical exchange
/// and an optional local correlation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MfModel {
    pub form: SpectralDensityForm,
    pub rex: bool,
    pub local_tm: bool,
}

const MF_PRESETS: [(SpectralDensityForm, bool); 9] = [
    (SpectralDensityForm::Rigid, false),
    (SpectralDensityForm::S2, false),
    (SpectralDensityForm::S2Te, false),
    (SpectralDensityForm::S2, true),
    (SpectralDensityForm::S2Te, true),
    (SpectralDensityForm::S2fS2Ts, false),
    (SpectralDensityForm::S2fTfS2Ts, false),
    (SpectralDensityForm::S2fS2Ts, true),
    (SpectralDensityForm::S2fTfS2Ts, true),
];

impl MfModel {
    pub fn new(form: SpectralDensityForm, rex: bool, local_tm: bool) -> Self {
        Self {
            form,
            rex,
            local_tm,
        }
    }

    /// Model `m<index>` (or `tm<index>` with a local tm), `index` in 0..=8.
    pub fn preset(index: usize, local_tm: bool) -> Option<Self> {
        MF_PRESETS
            .get(index)
            .map(|&(form, rex)| Self::new(form, rex, local_tm))
    }

    /// The preset number of this model, if it is one of m0 to m8.
    pub fn preset_index(&self) -> Option<usize> {
        MF_PRESETS
            .iter()
            .position(|&(form, rex)| form == self.form && rex == self.rex)
    }

    /// Parameters in fitting order: local tm, the spectral density form, Rex.
    pub fn params(&self) -> Vec<ParamName> {
        let mut params = Vec::with_capacity(self.form.params().len() + 2);
        if self.local_tm {
            params.push(ParamName::LocalTm);
        }
        params.extend_from_slice(self.form.params());
        if self.rex {
            params.push(ParamName::Rex);
        }
        params
    }

    fn name(&self) -> String {
        match self.preset_index() {
            Some(i) if self.local_tm => format!("tm{}", i),
            Some(i) => format!("m{}", i),
            None => {
                let mut name = String::new();
                if self.local_tm {
                    name.push_str("local_tm-");
                }
                name.push_str(self.form.label());
                if self.rex {
                    name.push_str("-Rex");
                }
                name
            }
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let (local_tm, rest) = match s.strip_prefix("tm") {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('m').unwrap_or("")),
        };
        if let Ok(index) = rest.parse::<usize>() {
            return Self::preset(index, local_tm);
        }

        let (local_tm, rest) = match s.strip_prefix("local_tm-") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (rex, rest) = match rest.strip_suffix("-Rex") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        SpectralDensityForm::ALL
            .iter()
            .find(|form| form.label() == rest)
            .map(|&form| Self::new(form, rex, local_tm))
    }
}

/// A model of the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelId {
    NoRex,
    Lm63,
    Lm63ThreeSite,
    Cr72,
    Cr72Full,
    It99,
    Tsmfk01,
    NsCpmg2Site3d,
    NsCpmg2Site3dFull,
    M61,
    M61Skew,
    Dpl94,
    Tp02,
    NsR1rho2Site,
    NsR1rho3Site,
    ModelFree(MfModel),
    R2eff,
}

impl ModelId {
    /// All dispersion models.
    pub const DISPERSION: [ModelId; 15] = [
        ModelId::NoRex,
        ModelId::Lm63,
        ModelId::Lm63ThreeSite,
        ModelId::Cr72,
        ModelId::Cr72Full,
        ModelId::It99,
        ModelId::Tsmfk01,
        ModelId::NsCpmg2Site3d,
        ModelId::NsCpmg2Site3dFull,
        ModelId::M61,
        ModelId::M61Skew,
        ModelId::Dpl94,
        ModelId::Tp02,
        ModelId::NsR1rho2Site,
        ModelId::NsR1rho3Site,
    ];

    /// Look up a model by its catalogue key, e.g. `"CR72"` or `"m4"`.
    pub fn parse(s: &str) -> Result<Self, RelaxError> {
        if let Some(model) = Self::DISPERSION.iter().find(|m| m.name() == s) {
            return Ok(*model);
        }
        if s == "R2eff" {
            return Ok(ModelId::R2eff);
        }
        MfModel::parse(s)
            .map(ModelId::ModelFree)
            .ok_or_else(|| RelaxError::UnknownModel(s.to_string()))
    }

    /// The catalogue key.
    pub fn name(&self) -> String {
        let name = match self {
            ModelId::NoRex => "No Rex",
            ModelId::Lm63 => "LM63",
            ModelId::Lm63ThreeSite => "LM63 3-site",
            ModelId::Cr72 => "CR72",
            ModelId::Cr72Full => "CR72 full",
            ModelId::It99 => "IT99",
            ModelId::Tsmfk01 => "TSMFK01",
            ModelId::NsCpmg2Site3d => "NS CPMG 2-site 3D",
            ModelId::NsCpmg2Site3dFull => "NS CPMG 2-site 3D full",
            ModelId::M61 => "M61",
            ModelId::M61Skew => "M61 skew",
            ModelId::Dpl94 => "DPL94",
            ModelId::Tp02 => "TP02",
            ModelId::NsR1rho2Site => "NS R1rho 2-site",
            ModelId::NsR1rho3Site => "NS R1rho 3-site",
            ModelId::R2eff => "R2eff",
            ModelId::ModelFree(mf) => return mf.name(),
        };
        name.to_string()
    }

    /// Ordered parameter names.
    pub fn params(&self) -> Vec<ParamName> {
        use ParamName::*;
        match self {
            ModelId::NoRex => vec![R2],
            ModelId::Lm63 | ModelId::M61 | ModelId::Dpl94 => vec![R2, PhiEx, Kex],
            ModelId::Lm63ThreeSite => vec![R2, PhiExB, PhiExC, KB, KC],
            ModelId::Cr72
            | ModelId::NsCpmg2Site3d
            | ModelId::M61Skew
            | ModelId::Tp02
            | ModelId::NsR1rho2Site => vec![R2, PA, Dw, Kex],
            ModelId::Cr72Full | ModelId::NsCpmg2Site3dFull => vec![R2a, R2b, PA, Dw, Kex],
            ModelId::It99 => vec![R2, PA, Dw, Tex],
            ModelId::Tsmfk01 => vec![R2a, Dw, KAB],
            ModelId::NsR1rho3Site => vec![R2, PA, DwAB, KexAB, PB, DwBC, KexBC, KexAC],
            ModelId::ModelFree(mf) => mf.params(),
            ModelId::R2eff => vec![R2eff, I0],
        }
    }

    /// The experiment type the model's data must come from. `None` means any
    /// (No Rex) or not a dispersion model.
    pub fn exp_type(&self) -> Option<ExpType> {
        match self {
            ModelId::Lm63
            | ModelId::Lm63ThreeSite
            | ModelId::Cr72
            | ModelId::Cr72Full
            | ModelId::It99
            | ModelId::Tsmfk01
            | ModelId::NsCpmg2Site3d
            | ModelId::NsCpmg2Site3dFull => Some(ExpType::Cpmg),
            ModelId::M61
            | ModelId::M61Skew
            | ModelId::Dpl94
            | ModelId::Tp02
            | ModelId::NsR1rho2Site
            | ModelId::NsR1rho3Site => Some(ExpType::R1rho),
            ModelId::NoRex | ModelId::ModelFree(_) | ModelId::R2eff => None,
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            ModelId::ModelFree(_) => ModelFamily::ModelFree,
            ModelId::R2eff => ModelFamily::Exponential,
            _ => ModelFamily::Dispersion,
        }
    }

    pub fn is_dispersion(&self) -> bool {
        self.family() == ModelFamily::Dispersion
    }

    pub fn is_model_free(&self) -> bool {
        self.family() == ModelFamily::ModelFree
    }

    pub fn is_exponential(&self) -> bool {
        self.family() == ModelFamily::Exponential
    }

    /// Whether the model describes chemical exchange.
    pub fn has_exchange(&self) -> bool {
        match self {
            ModelId::NoRex | ModelId::R2eff => false,
            ModelId::ModelFree(mf) => mf.rex,
            _ => true,
        }
    }

    /// Grid search bounds for a parameter of this model, where they differ
    /// from the parameter's defaults.
    pub fn grid_bounds(&self, name: ParamName) -> (f64, f64) {
        match (self, name) {
            (ModelId::M61Skew, ParamName::PA) => (0.85, 1.0),
            _ => name.grid_bounds(),
        }
    }

    /// Constraint interval for a parameter of this model.
    pub fn constraint_bounds(&self, name: ParamName) -> (Option<f64>, Option<f64>) {
        match (self, name) {
            (ModelId::M61Skew, ParamName::PA) => (Some(0.85), Some(1.0)),
            _ => name.constraint_bounds(),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ModelId {
    type Err = RelaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::parse(s)
    }
}

impl TryFrom<String> for ModelId {
    type Error = RelaxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModelId::parse(&value)
    }
}

impl From<ModelId> for String {
    fn from(model: ModelId) -> Self {
        model.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_round_trip() {
        for model in ModelId::DISPERSION {
            assert_eq!(ModelId::parse(&model.name()).unwrap(), model);
        }
        for i in 0..9 {
            for local_tm in [false, true] {
                let model = ModelId::ModelFree(MfModel::preset(i, local_tm).unwrap());
                assert_eq!(ModelId::parse(&model.name()).unwrap(), model);
            }
        }
        assert!(matches!(ModelId::parse("CR99"), Err(RelaxError::UnknownModel(_))));
        assert!(ModelId::parse("m9").is_err());
    }

    #[test]
    fn test_model_free_params() {
        let m4 = ModelId::parse("m4").unwrap();
        assert_eq!(m4.params(), vec![ParamName::S2, ParamName::Te, ParamName::Rex]);
        let tm8 = ModelId::parse("tm8").unwrap();
        assert_eq!(
            tm8.params(),
            vec![
                ParamName::LocalTm,
                ParamName::S2f,
                ParamName::Tf,
                ParamName::S2,
                ParamName::Ts,
                ParamName::Rex
            ]
        );
        assert!(ModelId::parse("m0").unwrap().params().is_empty());
    }

    #[test]
    fn test_custom_model_free_names() {
        let model = ModelId::ModelFree(MfModel::new(SpectralDensityForm::S2fS2sTs, true, true));
        assert_eq!(model.name(), "local_tm-S2f-S2s-ts-Rex");
        assert_eq!(ModelId::parse("local_tm-S2f-S2s-ts-Rex").unwrap(), model);
    }

    #[test]
    fn test_model_serde() {
        let json = serde_json::to_string(&ModelId::Cr72).unwrap();
        assert_eq!(json, "\"CR72\"");
        let model: ModelId = serde_json::from_str("\"NS R1rho 3-site\"").unwrap();
        assert_eq!(model, ModelId::NsR1rho3Site);
        assert_eq!(model.exp_type(), Some(ExpType::R1rho));
    }

    #[test]
    fn test_m61_skew_population_bounds() {
        assert_eq!(ModelId::M61Skew.grid_bounds(ParamName::PA), (0.85, 1.0));
        assert_eq!(ModelId::Cr72.grid_bounds(ParamName::PA), (0.5, 1.0));
    }
}
