//! Levenberg-Marquardt damping, adapted from how well the quadratic model
//! predicted the last step.

use super::config::LmConfig;

/// Steps whose gain ratio does not exceed this are rejected.
const ACCEPT_RATIO: f64 = 1e-3;
/// Steps at least this good relax the damping.
const RELAX_RATIO: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct Damping {
    pub lambda: f64,
    floor: f64,
    ceiling: f64,
    up: f64,
    down: f64,
}

impl Damping {
    pub fn from_config(config: &LmConfig) -> Self {
        Self {
            lambda: config.initial_lambda,
            floor: config.min_lambda,
            ceiling: config.max_lambda,
            up: config.lambda_up_factor,
            down: config.lambda_down_factor,
        }
    }

    /// Accept or reject a step with gain ratio `ratio`, adjusting lambda.
    pub fn judge(&mut self, ratio: f64) -> bool {
        if ratio <= ACCEPT_RATIO {
            self.raise();
            return false;
        }
        if ratio >= RELAX_RATIO {
            self.lambda = self.floor.max(self.lambda * self.down);
        }
        true
    }

    /// Stiffen after a step that could not be taken at all.
    pub fn raise(&mut self) {
        self.lambda = self.ceiling.min(self.lambda * self.up);
    }

    pub fn is_saturated(&self) -> bool {
        self.lambda >= self.ceiling
    }
}

/// Actual over predicted drop in chi-squared.
///
/// A step predicted to change nothing counts as perfect when nothing changed
/// and as useless otherwise.
pub fn gain_ratio(chi2: f64, new_chi2: f64, predicted_drop: f64) -> f64 {
    const TINY: f64 = 1e-30;
    let actual_drop = chi2 - new_chi2;
    match (predicted_drop.abs() < TINY, actual_drop.abs() < TINY) {
        (false, _) => actual_drop / predicted_drop,
        (true, true) => 1.0,
        (true, false) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lambda_follows_step_quality() {
        let mut damping = Damping::from_config(&LmConfig::default().with_lambda(1.0));
        assert!(damping.judge(0.9));
        assert_eq!(damping.lambda, 0.1);
        // Acceptable but not good: unchanged.
        assert!(damping.judge(0.5));
        assert_eq!(damping.lambda, 0.1);
        assert!(!damping.judge(-1.0));
        assert!((damping.lambda - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_is_capped() {
        let mut damping = Damping::from_config(&LmConfig::default());
        while !damping.is_saturated() {
            damping.raise();
        }
        assert_eq!(damping.lambda, LmConfig::default().max_lambda);
        damping.raise();
        assert_eq!(damping.lambda, LmConfig::default().max_lambda);
    }

    #[test]
    fn test_gain_ratio() {
        assert_eq!(gain_ratio(10.0, 8.0, 4.0), 0.5);
        assert_eq!(gain_ratio(1.0, 1.0, 0.0), 1.0);
        assert_eq!(gain_ratio(1.0, 2.0, 0.0), 0.0);
    }
}
