//! Model-free spectral density functions J(w), with analytic gradients and Hessians.
//!
//! The spectral density is a sum over the diffusion modes `i` of the
//! overall tumbling, each with weight `ci` and correlation time `ti`:
//!
//! ```text
//! J(w) = 2/5 sum_i ci ti ( A0 / (1 + (w ti)^2)
//!                          + sum_k Ak (tk + ti) tk / ((tk + ti)^2 + (w tk ti)^2) )
//! ```
//!
//! where the amplitudes `A` and internal correlation times `tk` depend on the
//! Lipari-Szabo form. For S2-te this is
//! `S2 / (1 + (w ti)^2) + (1 - S2) (te + ti) te / ((te + ti)^2 + (w te ti)^2)`.
//!
//! Derivatives are taken with respect to the diffusion parameters (first)
//! followed by the form parameters, through the effective correlation time
//! `u = tk ti / (tk + ti)`, for which the Lorentzian reads `u / (1 + w^2 u^2)`.
//! A term whose denominator `tk + ti` vanishes contributes zero.

use crate::error::{RelaxError, Result};
use crate::parameters::names::ParamName;
use ndarray::{Array1, Array2, Array3};

/// Lipari-Szabo and extended model-free spectral density forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralDensityForm {
    /// Rigid rotor, `{}`.
    Rigid,
    /// `{S2}`.
    S2,
    /// `{S2, te}`.
    S2Te,
    /// `{S2f, S2, ts}`.
    S2fS2Ts,
    /// `{S2f, tf, S2, ts}`.
    S2fTfS2Ts,
    /// `{S2f, S2s, ts}`.
    S2fS2sTs,
    /// `{S2f, tf, S2s, ts}`.
    S2fTfS2sTs,
}

impl SpectralDensityForm {
    pub const ALL: [SpectralDensityForm; 7] = [
        SpectralDensityForm::Rigid,
        SpectralDensityForm::S2,
        SpectralDensityForm::S2Te,
        SpectralDensityForm::S2fS2Ts,
        SpectralDensityForm::S2fTfS2Ts,
        SpectralDensityForm::S2fS2sTs,
        SpectralDensityForm::S2fTfS2sTs,
    ];

    /// Parameters of the form, in the order `jw` expects them.
    pub fn params(&self) -> &'static [ParamName] {
        use ParamName::*;
        match self {
            SpectralDensityForm::Rigid => &[],
            SpectralDensityForm::S2 => &[S2],
            SpectralDensityForm::S2Te => &[S2, Te],
            SpectralDensityForm::S2fS2Ts => &[S2f, S2, Ts],
            SpectralDensityForm::S2fTfS2Ts => &[S2f, Tf, S2, Ts],
            SpectralDensityForm::S2fS2sTs => &[S2f, S2s, Ts],
            SpectralDensityForm::S2fTfS2sTs => &[S2f, Tf, S2s, Ts],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpectralDensityForm::Rigid => "rigid",
            SpectralDensityForm::S2 => "S2",
            SpectralDensityForm::S2Te => "S2-te",
            SpectralDensityForm::S2fS2Ts => "S2f-S2-ts",
            SpectralDensityForm::S2fTfS2Ts => "S2f-tf-S2-ts",
            SpectralDensityForm::S2fS2sTs => "S2f-S2s-ts",
            SpectralDensityForm::S2fTfS2sTs => "S2f-tf-S2s-ts",
        }
    }

    fn model_name(&self) -> String {
        format!("model-free {}", self.label())
    }
}

/// Weights and correlation times of the diffusion modes, with their
/// derivatives with respect to the diffusion parameters.
///
/// `dci[[j, i]]` is the derivative of `ci[i]` with respect to diffusion
/// parameter `j`, `d2ci[[j, k, i]]` the second derivative, and likewise for `ti`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionGeometry {
    ci: Array1<f64>,
    ti: Array1<f64>,
    dci: Array2<f64>,
    dti: Array2<f64>,
    d2ci: Array3<f64>,
    d2ti: Array3<f64>,
}

impl DiffusionGeometry {
    /// A geometry with fixed diffusion parameters.
    pub fn new(ci: Array1<f64>, ti: Array1<f64>) -> Result<Self> {
        let n = ci.len();
        Self::with_derivatives(
            ci,
            ti,
            Array2::zeros((0, n)),
            Array2::zeros((0, n)),
            Array3::zeros((0, 0, n)),
            Array3::zeros((0, 0, n)),
        )
    }

    /// A geometry whose diffusion parameters are optimised alongside the
    /// model-free parameters.
    pub fn with_derivatives(
        ci: Array1<f64>,
        ti: Array1<f64>,
        dci: Array2<f64>,
        dti: Array2<f64>,
        d2ci: Array3<f64>,
        d2ti: Array3<f64>,
    ) -> Result<Self> {
        let n_modes = ci.len();
        let n_diff = dci.nrows();
        if ti.len() != n_modes {
            return Err(RelaxError::DimensionMismatch(format!(
                "{} weights but {} correlation times",
                n_modes,
                ti.len()
            )));
        }
        if dci.dim() != (n_diff, n_modes) || dti.dim() != (n_diff, n_modes) {
            return Err(RelaxError::DimensionMismatch(format!(
                "First derivative arrays must be {}x{}",
                n_diff, n_modes
            )));
        }
        if d2ci.dim() != (n_diff, n_diff, n_modes) || d2ti.dim() != (n_diff, n_diff, n_modes) {
            return Err(RelaxError::DimensionMismatch(format!(
                "Second derivative arrays must be {}x{}x{}",
                n_diff, n_diff, n_modes
            )));
        }
        Ok(Self {
            ci,
            ti,
            dci,
            dti,
            d2ci,
            d2ti,
        })
    }

    /// Isotropic tumbling with a fixed global correlation time `tm`.
    pub fn sphere(tm: f64) -> Self {
        Self {
            ci: Array1::from_elem(1, 1.0),
            ti: Array1::from_elem(1, tm),
            dci: Array2::zeros((0, 1)),
            dti: Array2::zeros((0, 1)),
            d2ci: Array3::zeros((0, 0, 1)),
            d2ti: Array3::zeros((0, 0, 1)),
        }
    }

    /// Isotropic tumbling with an optimised local correlation time `tm`,
    /// the single diffusion parameter.
    pub fn local_tm(tm: f64) -> Self {
        Self {
            ci: Array1::from_elem(1, 1.0),
            ti: Array1::from_elem(1, tm),
            dci: Array2::zeros((1, 1)),
            dti: Array2::from_elem((1, 1), 1.0),
            d2ci: Array3::zeros((1, 1, 1)),
            d2ti: Array3::zeros((1, 1, 1)),
        }
    }

    pub fn n_modes(&self) -> usize {
        self.ci.len()
    }

    /// Number of diffusion parameters the derivatives are taken against.
    pub fn n_diff_params(&self) -> usize {
        self.dci.nrows()
    }

    pub fn ci(&self) -> &Array1<f64> {
        &self.ci
    }

    pub fn ti(&self) -> &Array1<f64> {
        &self.ti
    }
}

/// One Lorentzian term `A * L(u)` of the spectral density.
struct Term {
    amp: f64,
    damp: [f64; 4],
    d2amp: [[f64; 4]; 4],
    /// Index of the internal correlation time among the form parameters,
    /// `None` for the overall tumbling term.
    tau: Option<usize>,
}

impl Term {
    fn rigid(amp: f64, damp: [f64; 4]) -> Self {
        Self {
            amp,
            damp,
            d2amp: [[0.0; 4]; 4],
            tau: None,
        }
    }

    fn internal(amp: f64, damp: [f64; 4], tau: usize) -> Self {
        Self {
            amp,
            damp,
            d2amp: [[0.0; 4]; 4],
            tau: Some(tau),
        }
    }

    fn with_cross(mut self, a: usize, b: usize, value: f64) -> Self {
        self.d2amp[a][b] = value;
        self.d2amp[b][a] = value;
        self
    }
}

fn unit(i: usize) -> [f64; 4] {
    let mut e = [0.0; 4];
    e[i] = 1.0;
    e
}

fn combine(a: [f64; 4], fa: f64, b: [f64; 4], fb: f64) -> [f64; 4] {
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = fa * a[i] + fb * b[i];
    }
    out
}

fn terms(form: SpectralDensityForm, p: &[f64]) -> Vec<Term> {
    let zero = [0.0; 4];
    match form {
        SpectralDensityForm::Rigid => vec![Term::rigid(1.0, zero)],
        SpectralDensityForm::S2 => vec![Term::rigid(p[0], unit(0))],
        SpectralDensityForm::S2Te => vec![
            Term::rigid(p[0], unit(0)),
            Term::internal(1.0 - p[0], combine(unit(0), -1.0, zero, 0.0), 1),
        ],
        SpectralDensityForm::S2fS2Ts => vec![
            Term::rigid(p[1], unit(1)),
            Term::internal(p[0] - p[1], combine(unit(0), 1.0, unit(1), -1.0), 2),
        ],
        SpectralDensityForm::S2fTfS2Ts => vec![
            Term::rigid(p[2], unit(2)),
            Term::internal(1.0 - p[0], combine(unit(0), -1.0, zero, 0.0), 1),
            Term::internal(p[0] - p[2], combine(unit(0), 1.0, unit(2), -1.0), 3),
        ],
        SpectralDensityForm::S2fS2sTs => vec![
            Term::rigid(p[0] * p[1], combine(unit(0), p[1], unit(1), p[0])).with_cross(0, 1, 1.0),
            Term::internal(
                p[0] * (1.0 - p[1]),
                combine(unit(0), 1.0 - p[1], unit(1), -p[0]),
                2,
            )
            .with_cross(0, 1, -1.0),
        ],
        SpectralDensityForm::S2fTfS2sTs => vec![
            Term::rigid(p[0] * p[2], combine(unit(0), p[2], unit(2), p[0])).with_cross(0, 2, 1.0),
            Term::internal(1.0 - p[0], combine(unit(0), -1.0, zero, 0.0), 1),
            Term::internal(
                p[0] * (1.0 - p[2]),
                combine(unit(0), 1.0 - p[2], unit(2), -p[0]),
                3,
            )
            .with_cross(0, 2, -1.0),
        ],
    }
}

/// A Lorentzian `g = ti * fact` and its derivatives with respect to the
/// internal correlation time and the mode correlation time.
#[derive(Default, Clone, Copy)]
struct Lorentzian {
    fact: f64,
    g: f64,
    g_tau: f64,
    g_ti: f64,
    g_tautau: f64,
    g_titi: f64,
    g_tauti: f64,
}

/// `h(u) = u / (1 + w^2 u^2)` derivatives.
fn h_derivs(u: f64, omega: f64) -> (f64, f64) {
    let w2 = omega * omega;
    let wu2 = w2 * u * u;
    let q = 1.0 + wu2;
    let h1 = (1.0 - wu2) / (q * q);
    let h2 = -2.0 * w2 * u * (3.0 - wu2) / (q * q * q);
    (h1, h2)
}

fn rigid_lorentzian(ti: f64, omega: f64) -> Lorentzian {
    let fact = 1.0 / (1.0 + (omega * ti).powi(2));
    let (h1, h2) = h_derivs(ti, omega);
    Lorentzian {
        fact,
        g: ti * fact,
        g_ti: h1,
        g_titi: h2,
        ..Lorentzian::default()
    }
}

fn internal_lorentzian(tau: f64, ti: f64, omega: f64) -> Lorentzian {
    let s = tau + ti;
    if s == 0.0 {
        return Lorentzian::default();
    }
    let denom = s * s + (omega * tau * ti).powi(2);
    let fact = s * tau / denom;

    let u = tau * ti / s;
    let (h1, h2) = h_derivs(u, omega);
    let s2 = s * s;
    let s3 = s2 * s;
    let u_tau = ti * ti / s2;
    let u_ti = tau * tau / s2;
    let u_tautau = -2.0 * ti * ti / s3;
    let u_titi = -2.0 * tau * tau / s3;
    let u_tauti = 2.0 * tau * ti / s3;

    Lorentzian {
        fact,
        g: ti * fact,
        g_tau: h1 * u_tau,
        g_ti: h1 * u_ti,
        g_tautau: h2 * u_tau * u_tau + h1 * u_tautau,
        g_titi: h2 * u_ti * u_ti + h1 * u_titi,
        g_tauti: h2 * u_tau * u_ti + h1 * u_tauti,
    }
}

fn lorentzians(terms: &[Term], params: &[f64], ti: f64, omega: f64) -> Vec<Lorentzian> {
    terms
        .iter()
        .map(|term| match term.tau {
            Some(k) => internal_lorentzian(params[k], ti, omega),
            None => rigid_lorentzian(ti, omega),
        })
        .collect()
}

fn validate(
    form: SpectralDensityForm,
    omega: f64,
    params: &[f64],
    geometry: &DiffusionGeometry,
) -> Result<()> {
    let names = form.params();
    if params.len() != names.len() {
        return Err(RelaxError::DimensionMismatch(format!(
            "{} expects {} parameters, got {}",
            form.model_name(),
            names.len(),
            params.len()
        )));
    }
    if !omega.is_finite() {
        return Err(RelaxError::domain(&form.model_name(), "omega", omega, "must be finite"));
    }
    for (name, &value) in names.iter().zip(params) {
        if !value.is_finite() {
            return Err(RelaxError::domain(&form.model_name(), name.as_str(), value, "must be finite"));
        }
        if matches!(name, ParamName::Te | ParamName::Tf | ParamName::Ts) && value < 0.0 {
            return Err(RelaxError::domain(
                &form.model_name(),
                name.as_str(),
                value,
                "correlation times must be non-negative",
            ));
        }
    }
    for (&ci, &ti) in geometry.ci.iter().zip(geometry.ti.iter()) {
        if !ci.is_finite() {
            return Err(RelaxError::domain(&form.model_name(), "ci", ci, "must be finite"));
        }
        if !ti.is_finite() || ti < 0.0 {
            return Err(RelaxError::domain(
                &form.model_name(),
                "ti",
                ti,
                "correlation times must be finite and non-negative",
            ));
        }
    }
    Ok(())
}

/// The spectral density J(w).
///
/// # Arguments
///
/// * `form` - The model-free form
/// * `omega` - Angular frequency (rad/s)
/// * `params` - Form parameters in the order of [`SpectralDensityForm::params`]
/// * `geometry` - Diffusion mode weights and correlation times
pub fn jw(
    form: SpectralDensityForm,
    omega: f64,
    params: &[f64],
    geometry: &DiffusionGeometry,
) -> Result<f64> {
    validate(form, omega, params, geometry)?;
    let terms = terms(form, params);

    let mut sum = 0.0;
    for (&ci, &ti) in geometry.ci.iter().zip(geometry.ti.iter()) {
        let lor = lorentzians(&terms, params, ti, omega);
        let mut inner = 0.0;
        for (term, l) in terms.iter().zip(&lor) {
            inner += term.amp * l.fact;
        }
        sum += ci * ti * inner;
    }
    Ok(0.4 * sum)
}

/// Gradient of J(w): diffusion parameters first, then the form parameters.
pub fn djw(
    form: SpectralDensityForm,
    omega: f64,
    params: &[f64],
    geometry: &DiffusionGeometry,
) -> Result<Array1<f64>> {
    validate(form, omega, params, geometry)?;
    let terms = terms(form, params);
    let n_diff = geometry.n_diff_params();
    let n_form = params.len();
    let mut grad = Array1::zeros(n_diff + n_form);

    for i in 0..geometry.n_modes() {
        let ci = geometry.ci[i];
        let lor = lorentzians(&terms, params, geometry.ti[i], omega);
        let (g, g_ti) = terms.iter().zip(&lor).fold((0.0, 0.0), |(g, g_ti), (t, l)| {
            (g + t.amp * l.g, g_ti + t.amp * l.g_ti)
        });

        for j in 0..n_diff {
            grad[j] += geometry.dci[[j, i]] * g + ci * geometry.dti[[j, i]] * g_ti;
        }
        for a in 0..n_form {
            grad[n_diff + a] += ci * form_first(&terms, &lor, a).0;
        }
    }
    Ok(grad * 0.4)
}

/// First derivatives of `sum_k Ak g_k` with respect to form parameter `a`,
/// and of its mode correlation time derivative.
fn form_first(terms: &[Term], lor: &[Lorentzian], a: usize) -> (f64, f64) {
    let mut p = 0.0;
    let mut p_ti = 0.0;
    for (t, l) in terms.iter().zip(lor) {
        p += t.damp[a] * l.g;
        p_ti += t.damp[a] * l.g_ti;
        if t.tau == Some(a) {
            p += t.amp * l.g_tau;
            p_ti += t.amp * l.g_tauti;
        }
    }
    (p, p_ti)
}

/// Hessian of J(w), ordered as [`djw`].
pub fn d2jw(
    form: SpectralDensityForm,
    omega: f64,
    params: &[f64],
    geometry: &DiffusionGeometry,
) -> Result<Array2<f64>> {
    validate(form, omega, params, geometry)?;
    let terms = terms(form, params);
    let n_diff = geometry.n_diff_params();
    let n_form = params.len();
    let n = n_diff + n_form;
    let mut hess = Array2::zeros((n, n));

    for i in 0..geometry.n_modes() {
        let ci = geometry.ci[i];
        let lor = lorentzians(&terms, params, geometry.ti[i], omega);
        let mut g = 0.0;
        let mut g_ti = 0.0;
        let mut g_titi = 0.0;
        for (t, l) in terms.iter().zip(&lor) {
            g += t.amp * l.g;
            g_ti += t.amp * l.g_ti;
            g_titi += t.amp * l.g_titi;
        }

        // Diffusion-diffusion block.
        for j in 0..n_diff {
            for k in 0..=j {
                let dci_j = geometry.dci[[j, i]];
                let dci_k = geometry.dci[[k, i]];
                let dti_j = geometry.dti[[j, i]];
                let dti_k = geometry.dti[[k, i]];
                let value = geometry.d2ci[[j, k, i]] * g
                    + (dci_j * dti_k + dci_k * dti_j) * g_ti
                    + ci * geometry.d2ti[[j, k, i]] * g_ti
                    + ci * dti_j * dti_k * g_titi;
                hess[[j, k]] += value;
                if j != k {
                    hess[[k, j]] += value;
                }
            }
        }

        // Diffusion-model and model-model blocks.
        for a in 0..n_form {
            let (p_a, p_ti_a) = form_first(&terms, &lor, a);
            for j in 0..n_diff {
                let value = geometry.dci[[j, i]] * p_a + ci * geometry.dti[[j, i]] * p_ti_a;
                hess[[j, n_diff + a]] += value;
                hess[[n_diff + a, j]] += value;
            }
            for b in 0..=a {
                let mut q = 0.0;
                for (t, l) in terms.iter().zip(&lor) {
                    q += t.d2amp[a][b] * l.g;
                    if t.tau == Some(b) {
                        q += t.damp[a] * l.g_tau;
                    }
                    if t.tau == Some(a) {
                        q += t.damp[b] * l.g_tau;
                    }
                    if t.tau == Some(a) && a == b {
                        q += t.amp * l.g_tautau;
                    }
                }
                hess[[n_diff + a, n_diff + b]] += ci * q;
                if a != b {
                    hess[[n_diff + b, n_diff + a]] += ci * q;
                }
            }
        }
    }
    Ok(hess * 0.4)
}
