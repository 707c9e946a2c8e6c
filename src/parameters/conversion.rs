//! Derived parameters written after each fit.
//!
//! The optimised parameter set of a model is minimal; populations, rate
//! constants and lifetimes that follow from it are back-calculated here,
//! either on the point values or on one Monte Carlo replicate.

use super::ParamName;
use crate::error::Result;
use crate::models::ModelId;
use crate::spin::{ParamKey, Spin};

fn read(spin: &Spin, name: ParamName, sim_index: Option<usize>) -> Option<f64> {
    let key = ParamKey::new(name);
    match sim_index {
        Some(i) => spin.sims.get(&key, i).filter(|v| !v.is_nan()),
        None => spin.values.get_key(&key),
    }
}

fn write(spin: &mut Spin, name: ParamName, sim_index: Option<usize>, value: f64) {
    let key = ParamKey::new(name);
    match sim_index {
        Some(i) => spin.sims.insert(key, i, value),
        None => spin.values.set_key(key, value),
    }
}

/// Derived values of one spin, as `(name, value)` pairs.
fn derived(spin: &Spin, model: ModelId, sim_index: Option<usize>) -> Vec<(ParamName, f64)> {
    let params = model.params();
    let has = |name: ParamName| params.contains(&name);
    let get = |name: ParamName| read(spin, name, sim_index);
    let mut out = Vec::new();

    if model == ModelId::NsR1rho3Site {
        if let (Some(pa), Some(pb)) = (get(ParamName::PA), get(ParamName::PB)) {
            out.push((ParamName::PC, 1.0 - pa - pb));
            if let Some(kex_ab) = get(ParamName::KexAB) {
                let total = pa + pb;
                if total > 0.0 {
                    out.push((ParamName::KAB, kex_ab * pb / total));
                    out.push((ParamName::KBA, kex_ab * pa / total));
                }
            }
        }
        if let (Some(ab), Some(bc)) = (get(ParamName::DwAB), get(ParamName::DwBC)) {
            out.push((ParamName::DwAC, ab + bc));
        }
        return out;
    }

    let pa = if has(ParamName::PA) { get(ParamName::PA) } else { None };
    if let Some(pa) = pa {
        out.push((ParamName::PB, 1.0 - pa));
    }

    if has(ParamName::Kex) {
        if let Some(kex) = get(ParamName::Kex) {
            if kex != 0.0 {
                out.push((ParamName::Tex, 1.0 / kex));
            }
            if let Some(pa) = pa {
                out.push((ParamName::KAB, (1.0 - pa) * kex));
                out.push((ParamName::KBA, pa * kex));
            }
        }
    } else if has(ParamName::Tex) {
        if let Some(tex) = get(ParamName::Tex) {
            if tex != 0.0 {
                let kex = 1.0 / tex;
                out.push((ParamName::Kex, kex));
                if let Some(pa) = pa {
                    out.push((ParamName::KAB, (1.0 - pa) * kex));
                    out.push((ParamName::KBA, pa * kex));
                }
            }
        }
    }
    out
}

/// Back-calculate the derived parameters of every selected spin.
///
/// With `sim_index` the replicate values are read and written, otherwise
/// the point values. Spins without a model are skipped.
pub fn param_conversion(spins: &mut [Spin], sim_index: Option<usize>) -> Result<()> {
    for spin in spins.iter_mut().filter(|s| s.select) {
        let model = match spin.model {
            Some(model) if model.is_dispersion() => model,
            _ => continue,
        };
        for (name, value) in derived(spin, model, sim_index) {
            write(spin, name, sim_index, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spin(model: ModelId) -> Spin {
        let mut spin = Spin::new(":1@N");
        spin.model = Some(model);
        spin
    }

    #[test]
    fn test_two_site_conversion() {
        let mut spins = vec![spin(ModelId::Cr72)];
        spins[0].values.set(ParamName::PA, None, 0.9);
        spins[0].values.set(ParamName::Kex, None, 2000.0);
        param_conversion(&mut spins, None).unwrap();
        let v = &spins[0].values;
        assert_relative_eq!(v.get(ParamName::PB, None).unwrap(), 0.1, epsilon = 1e-12);
        assert_relative_eq!(v.get(ParamName::Tex, None).unwrap(), 5e-4);
        assert_relative_eq!(v.get(ParamName::KAB, None).unwrap(), 200.0, epsilon = 1e-9);
        assert_relative_eq!(v.get(ParamName::KBA, None).unwrap(), 1800.0);
    }

    #[test]
    fn test_tex_conversion_on_sims() {
        let mut spins = vec![spin(ModelId::It99)];
        spins[0].sims.insert(ParamKey::new(ParamName::PA), 2, 0.8);
        spins[0].sims.insert(ParamKey::new(ParamName::Tex), 2, 1e-3);
        param_conversion(&mut spins, Some(2)).unwrap();
        let kex = spins[0].sims.get(&ParamKey::new(ParamName::Kex), 2).unwrap();
        assert_relative_eq!(kex, 1000.0);
        // Point values are untouched.
        assert!(spins[0].values.is_empty());
    }

    #[test]
    fn test_three_site_conversion() {
        let mut spins = vec![spin(ModelId::NsR1rho3Site)];
        let v = &mut spins[0].values;
        v.set(ParamName::PA, None, 0.8);
        v.set(ParamName::PB, None, 0.15);
        v.set(ParamName::KexAB, None, 1000.0);
        v.set(ParamName::DwAB, None, 2.0);
        v.set(ParamName::DwBC, None, -1.0);
        param_conversion(&mut spins, None).unwrap();
        let v = &spins[0].values;
        assert_relative_eq!(v.get(ParamName::PC, None).unwrap(), 0.05, epsilon = 1e-12);
        assert_relative_eq!(v.get(ParamName::KAB, None).unwrap(), 1000.0 * 0.15 / 0.95);
        assert_relative_eq!(v.get(ParamName::KBA, None).unwrap(), 1000.0 * 0.8 / 0.95);
        assert_relative_eq!(v.get(ParamName::DwAC, None).unwrap(), 1.0);
    }

    #[test]
    fn test_no_exchange_model_untouched() {
        let mut spins = vec![spin(ModelId::NoRex)];
        spins[0].values.set(ParamName::R2, None, 10.0);
        param_conversion(&mut spins, None).unwrap();
        assert_eq!(spins[0].values.len(), 1);
    }
}
