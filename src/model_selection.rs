//! Information-criterion model selection between fitted pipes.

use crate::error::{RelaxError, Result};
use crate::parameters::param_num;
use crate::session::{Pipe, Session};
use crate::spin::Spin;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Akaike's Information Criterion, `chi2 + 2k`.
pub fn aic(chi2: f64, k: usize) -> f64 {
    chi2 + 2.0 * k as f64
}

/// Small-sample corrected AIC, `AIC + 2k(k + 1) / (n - k - 1)`.
///
/// Infinite when `n <= k + 1`.
pub fn aicc(chi2: f64, k: usize, n: usize) -> f64 {
    if n <= k + 1 {
        return f64::INFINITY;
    }
    let kf = k as f64;
    aic(chi2, k) + 2.0 * kf * (kf + 1.0) / (n as f64 - kf - 1.0)
}

/// Bayesian Information Criterion, `chi2 + k ln(n)`.
pub fn bic(chi2: f64, k: usize, n: usize) -> f64 {
    chi2 + k as f64 * (n as f64).ln()
}

/// The criterion used to rank models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Criterion {
    #[default]
    #[serde(rename = "AIC")]
    Aic,
    #[serde(rename = "AICc")]
    Aicc,
    #[serde(rename = "BIC")]
    Bic,
}

impl Criterion {
    pub fn value(&self, chi2: f64, k: usize, n: usize) -> f64 {
        match self {
            Criterion::Aic => aic(chi2, k),
            Criterion::Aicc => aicc(chi2, k, n),
            Criterion::Bic => bic(chi2, k, n),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Criterion::Aic => "AIC",
            Criterion::Aicc => "AICc",
            Criterion::Bic => "BIC",
        })
    }
}

/// The model chosen for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub spins: Vec<String>,
    pub pipe: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    pub selections: Vec<Selection>,
    /// Units without a fitted candidate; they are deselected in the destination.
    pub unresolved: Vec<Vec<String>>,
}

/// Criterion value of a unit in one pipe, `None` if it was not fitted.
fn unit_value(pipe: &Pipe, ids: &[String], criterion: Criterion) -> Result<Option<f64>> {
    let mut spins: Vec<Spin> = Vec::with_capacity(ids.len());
    for id in ids {
        match pipe.spin(id) {
            Some(spin) => spins.push(spin.clone()),
            None => return Ok(None),
        }
    }
    let selected: Vec<&Spin> = spins.iter().filter(|s| s.select).collect();
    let chi2 = match selected.first().and_then(|s| s.fit.chi2) {
        Some(chi2) if selected.iter().all(|s| s.fit.converged) => chi2,
        _ => return Ok(None),
    };
    let k = param_num(&spins, &pipe.r20_keys())?;
    let n: usize = selected.iter().map(|s| s.n_observations()).sum();
    Ok(Some(criterion.value(chi2, k, n)))
}

/// Pick the best model per unit and copy the winners into a new pipe.
///
/// The units are those of the first candidate pipe; the destination starts
/// as a copy of it. Ties keep the earlier candidate.
///
/// # Arguments
///
/// * `session` - The session holding the candidate pipes
/// * `candidates` - Names of the fitted pipes, in order of preference
/// * `destination` - Name of the pipe to create
/// * `criterion` - The information criterion to minimise
pub fn select_model(
    session: &mut Session,
    candidates: &[&str],
    destination: &str,
    criterion: Criterion,
) -> Result<SelectionReport> {
    let first = candidates.first().ok_or_else(|| {
        RelaxError::InvalidParameter("Model selection needs at least one pipe".to_string())
    })?;
    if session.contains(destination) {
        return Err(RelaxError::PipeExists(destination.to_string()));
    }

    let template = session.pipe(first)?;
    let units: Vec<Vec<String>> = template
        .cluster_units()
        .iter()
        .map(|unit| unit.iter().map(|&i| template.spins[i].id.clone()).collect())
        .collect();

    let mut report = SelectionReport::default();
    let mut winners: Vec<(Vec<String>, Option<String>)> = Vec::with_capacity(units.len());
    for ids in units {
        let mut best: Option<(String, f64)> = None;
        for name in candidates {
            let pipe = session.pipe(name)?;
            let value = match unit_value(pipe, &ids, criterion)? {
                Some(v) if v.is_finite() => v,
                _ => continue,
            };
            debug!(pipe = *name, spins = ?ids, value, "Criterion value");
            if best.as_ref().map_or(true, |(_, b)| value < *b) {
                best = Some((name.to_string(), value));
            }
        }
        match best {
            Some((pipe, value)) => {
                report.selections.push(Selection {
                    spins: ids.clone(),
                    pipe: pipe.clone(),
                    value,
                });
                winners.push((ids, Some(pipe)));
            }
            None => {
                warn!(spins = ?ids, "No fitted model to select from");
                report.unresolved.push(ids.clone());
                winners.push((ids, None));
            }
        }
    }

    let mut dest = session.pipe(first)?.clone_as(destination);
    for (ids, winner) in winners {
        for id in &ids {
            let spin = match &winner {
                Some(pipe) => session.pipe(pipe)?.spin(id).cloned(),
                None => None,
            };
            if let Some(slot) = dest.spin_mut(id) {
                match spin {
                    Some(spin) => *slot = spin,
                    None => slot.select = false,
                }
            }
        }
    }
    session.insert_pipe(dest)?;
    info!(
        criterion = %criterion,
        selected = report.selections.len(),
        unresolved = report.unresolved.len(),
        "Model selection"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::DispersionPoint;
    use crate::models::ModelId;
    use crate::spin::FitStats;
    use approx::assert_relative_eq;

    #[test]
    fn test_criteria() {
        assert_relative_eq!(aic(10.0, 3), 16.0);
        assert_relative_eq!(aicc(10.0, 3, 10), 16.0 + 24.0 / 6.0);
        assert!(aicc(10.0, 3, 4).is_infinite());
        assert_relative_eq!(bic(10.0, 2, 100), 10.0 + 2.0 * 100f64.ln());
        assert_eq!(Criterion::Bic.value(10.0, 2, 100), bic(10.0, 2, 100));
    }

    #[test]
    fn test_criterion_serde_names() {
        let c: Criterion = serde_json::from_str("\"AICc\"").unwrap();
        assert_eq!(c, Criterion::Aicc);
        assert_eq!(serde_json::to_string(&Criterion::Bic).unwrap(), "\"BIC\"");
    }

    fn fitted_pipe(name: &str, model: ModelId, chi2: [f64; 2]) -> Pipe {
        let mut pipe = Pipe::new(name);
        for (k, chi2) in chi2.iter().enumerate() {
            let mut spin = Spin::new(format!(":{}@N", k + 1));
            for nu in [100.0, 200.0, 400.0, 800.0, 1000.0, 1200.0] {
                spin.add_dispersion(DispersionPoint::cpmg(600e6, nu, 0.04), 10.0, 0.5);
            }
            spin.model = Some(model);
            spin.fit = FitStats {
                chi2: Some(*chi2),
                converged: chi2.is_finite(),
                ..FitStats::default()
            };
            pipe.add_spin(spin).unwrap();
        }
        pipe
    }

    #[test]
    fn test_aicc_counts_only_the_fitted_experiment() {
        let mut spin = Spin::new(":9@N");
        for nu in [100.0, 200.0, 400.0, 800.0, 1000.0, 1200.0] {
            spin.add_dispersion(DispersionPoint::cpmg(600e6, nu, 0.04), 10.0, 0.5);
        }
        for nu1 in [1000.0, 2000.0, 4000.0] {
            spin.add_dispersion(DispersionPoint::r1rho(600e6, nu1, 0.0, 0.05), 11.0, 0.5);
        }
        spin.model = Some(ModelId::Cr72);
        spin.fit = FitStats {
            chi2: Some(2.0),
            converged: true,
            ..FitStats::default()
        };
        let mut pipe = Pipe::new("CR72");
        pipe.add_spin(spin).unwrap();
        assert_eq!(pipe.count_observations(), 6);

        let mut session = Session::new();
        session.insert_pipe(pipe).unwrap();
        let report = select_model(&mut session, &["CR72"], "final", Criterion::Aicc).unwrap();
        // k = 4 (one R20, pA, dw, kex) and n = 6 CPMG points.
        assert_relative_eq!(report.selections[0].value, aicc(2.0, 4, 6));
        assert_relative_eq!(report.selections[0].value, 50.0);
    }

    #[test]
    fn test_select_model_per_unit() {
        let mut session = Session::new();
        // No Rex: k = 1; CR72: k = 4. AIC differences of 6 need chi2 gains above 6.
        session.insert_pipe(fitted_pipe("No Rex", ModelId::NoRex, [20.0, 5.0])).unwrap();
        session.insert_pipe(fitted_pipe("CR72", ModelId::Cr72, [2.0, 4.0])).unwrap();
        let report = select_model(&mut session, &["No Rex", "CR72"], "final", Criterion::Aic).unwrap();

        assert_eq!(report.selections.len(), 2);
        assert_eq!(report.selections[0].pipe, "CR72");
        assert_eq!(report.selections[1].pipe, "No Rex");
        let dest = session.pipe("final").unwrap();
        assert_eq!(dest.spins[0].model, Some(ModelId::Cr72));
        assert_eq!(dest.spins[1].model, Some(ModelId::NoRex));
        assert!(matches!(
            select_model(&mut session, &["CR72"], "final", Criterion::Aic),
            Err(RelaxError::PipeExists(_))
        ));
    }

    #[test]
    fn test_unfitted_units_deselected() {
        let mut session = Session::new();
        session
            .insert_pipe(fitted_pipe("No Rex", ModelId::NoRex, [f64::NAN, 5.0]))
            .unwrap();
        let report = select_model(&mut session, &["No Rex"], "final", Criterion::Bic).unwrap();
        assert_eq!(report.unresolved, vec![vec![":1@N".to_string()]]);
        assert!(!session.pipe("final").unwrap().spins[0].select);
    }
}
