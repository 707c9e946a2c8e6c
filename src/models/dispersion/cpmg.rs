//! Closed-form CPMG dispersion equations.
//!
//! All frequencies are in rad/s except the CPMG pulse train frequency
//! `nu_cpmg` (Hz). The CPMG delay is `tcp = 1 / (4 nu_cpmg)`. Parameter
//! combinations without exchange return the flat R20 line.

/// Carver-Richards 1972 two-site exchange, valid for all time scales.
///
/// # Arguments
///
/// * `r20a`, `r20b` - Transverse relaxation rates of states A and B
/// * `pa` - Population of state A
/// * `dw` - Chemical shift difference (rad/s)
/// * `kex` - Exchange rate (s^-1)
/// * `nu_cpmg` - CPMG frequency (Hz)
pub fn cr72(r20a: f64, r20b: f64, pa: f64, dw: f64, kex: f64, nu_cpmg: f64) -> f64 {
    if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        return r20a;
    }

    let pb = 1.0 - pa;
    let k_ba = pa * kex;
    let k_ab = pb * kex;
    let r20_kex = (r20a + r20b + kex) / 2.0;

    let dw2 = dw * dw;
    let fact = r20a - r20b - k_ba + k_ab;
    let psi = fact * fact - dw2 + 4.0 * k_ba * k_ab;
    let zeta = 2.0 * dw * fact;
    let sqrt_psi2_zeta2 = (psi * psi + zeta * zeta).sqrt();

    let d_part = (psi + 2.0 * dw2) / sqrt_psi2_zeta2;
    let d_pos = 0.5 * (1.0 + d_part);
    let d_neg = 0.5 * (-1.0 + d_part);

    let eta_scale = 2.0f64.powf(-1.5) / nu_cpmg;
    let eta_pos = eta_scale * (psi + sqrt_psi2_zeta2).sqrt();
    let eta_neg = eta_scale * (-psi + sqrt_psi2_zeta2).max(0.0).sqrt();

    // cosh overflows well before this.
    if eta_pos > 100.0 {
        return 1e100;
    }

    let f = d_pos * eta_pos.cosh() - d_neg * eta_neg.cos();
    if f < 1.0 {
        return r20_kex;
    }
    r20_kex - nu_cpmg * f.acosh()
}

/// Luz-Meiboom 1963 two-site fast exchange.
///
/// `phi_ex = pA pB dw^2` in (rad/s)^2.
pub fn lm63(r20: f64, phi_ex: f64, kex: f64, nu_cpmg: f64) -> f64 {
    r20 + lm63_term(phi_ex, kex, nu_cpmg)
}

fn lm63_term(phi_ex: f64, kex: f64, nu_cpmg: f64) -> f64 {
    if phi_ex == 0.0 || kex == 0.0 {
        return 0.0;
    }
    let quart_k = kex / 4.0;
    phi_ex / kex * (1.0 - nu_cpmg / quart_k * (quart_k / nu_cpmg).tanh())
}

/// Luz-Meiboom 1963 three-site fast exchange: A exchanging with B and with C.
pub fn lm63_3site(r20: f64, phi_ex_b: f64, phi_ex_c: f64, kb: f64, kc: f64, nu_cpmg: f64) -> f64 {
    r20 + lm63_term(phi_ex_b, kb, nu_cpmg) + lm63_term(phi_ex_c, kc, nu_cpmg)
}

/// Ishima-Torchia 1999 two-site exchange, for all time scales with pA >> pB.
pub fn it99(r20: f64, pa: f64, dw: f64, tex: f64, nu_cpmg: f64) -> f64 {
    if dw == 0.0 || pa == 1.0 || tex == 0.0 {
        return r20;
    }
    let pb = 1.0 - pa;
    let phi_ex = pa * pb * dw * dw;
    let padw2 = pa * dw * dw;
    let tcp = 1.0 / (4.0 * nu_cpmg);
    let omega_a2 = (padw2 * padw2 + 144.0 / tcp.powi(4)).sqrt();
    r20 + phi_ex * tex / (1.0 + omega_a2 * tex * tex)
}

/// Tollinger, Skrynnikov, Mulder, Forman-Kay and Kay 2001 two-site exchange
/// with a very small minor-state population.
pub fn tsmfk01(r20a: f64, dw: f64, k_ab: f64, nu_cpmg: f64) -> f64 {
    if dw == 0.0 || k_ab == 0.0 {
        return r20a;
    }
    let tcp = 1.0 / (4.0 * nu_cpmg);
    let x = dw * tcp;
    r20a + k_ab - k_ab * x.sin() / x
}
