//! Closed-form R1rho dispersion equations.
//!
//! `omega1` is the spin-lock field strength in rad/s. For the off-resonance
//! forms the rotating-frame tilt angle `theta` satisfies
//! `tan(theta) = omega1 / offset`, and the observed rate mixes R1 and the
//! transverse rate: `R1rho = R1 cos^2(theta) + R1rho_trans sin^2(theta)`.

/// Meiboom 1961 on-resonance fast exchange.
///
/// `phi_ex = pA pB dw^2` in (rad/s)^2.
pub fn m61(r1rho_prime: f64, phi_ex: f64, kex: f64, omega1: f64) -> f64 {
    if phi_ex == 0.0 || kex == 0.0 {
        return r1rho_prime;
    }
    r1rho_prime + phi_ex * kex / (kex * kex + omega1 * omega1)
}

/// Meiboom 1961 on-resonance exchange for skewed populations (pA >> pB).
pub fn m61_skew(r1rho_prime: f64, pa: f64, dw: f64, kex: f64, omega1: f64) -> f64 {
    if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        return r1rho_prime;
    }
    let pb = 1.0 - pa;
    let pa2dw2 = pa * pa * dw * dw;
    r1rho_prime + pa2dw2 * pb * kex / (kex * kex + pa2dw2 + omega1 * omega1)
}

/// Davis, Perlman and London 1994 off-resonance fast exchange.
///
/// # Arguments
///
/// * `r1rho_prime` - R1rho in the absence of exchange
/// * `phi_ex` - `pA pB dw^2` in (rad/s)^2
/// * `kex` - Exchange rate (s^-1)
/// * `r1` - Longitudinal relaxation rate
/// * `omega1` - Spin-lock field strength (rad/s)
/// * `offset` - Offset of the population-averaged resonance from the carrier (rad/s)
pub fn dpl94(r1rho_prime: f64, phi_ex: f64, kex: f64, r1: f64, omega1: f64, offset: f64) -> f64 {
    let we2 = omega1 * omega1 + offset * offset;
    let (sin2, cos2) = tilt(omega1, we2);
    let rex = if phi_ex == 0.0 || kex == 0.0 {
        0.0
    } else {
        phi_ex * kex / (kex * kex + we2)
    };
    r1 * cos2 + (r1rho_prime + rex) * sin2
}

/// Trott and Palmer 2002 off-resonance two-site exchange.
///
/// `omega` is the resonance of state A and `offset` the carrier position,
/// both in rad/s; state B resonates at `omega + dw`.
#[allow(clippy::too_many_arguments)]
pub fn tp02(
    r1rho_prime: f64,
    pa: f64,
    dw: f64,
    kex: f64,
    r1: f64,
    omega1: f64,
    omega: f64,
    offset: f64,
) -> f64 {
    let pb = 1.0 - pa;
    let w1_2 = omega1 * omega1;
    let wa = omega;
    let wb = omega + dw;
    let w_avg = pa * wa + pb * wb;
    let da = wa - offset;
    let db = wb - offset;
    let d = w_avg - offset;

    let waeff2 = w1_2 + da * da;
    let wbeff2 = w1_2 + db * db;
    let weff2 = w1_2 + d * d;
    let (sin2, cos2) = tilt(omega1, weff2);

    let rex = if dw == 0.0 || pa == 1.0 || kex == 0.0 {
        0.0
    } else {
        pa * pb * dw * dw * kex / (waeff2 * wbeff2 / weff2 + kex * kex)
    };
    r1 * cos2 + (r1rho_prime + rex) * sin2
}

/// `(sin^2(theta), cos^2(theta))` of the tilt angle.
fn tilt(omega1: f64, weff2: f64) -> (f64, f64) {
    if weff2 == 0.0 {
        return (1.0, 0.0);
    }
    let sin2 = omega1 * omega1 / weff2;
    (sin2, 1.0 - sin2)
}
