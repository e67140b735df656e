//! Power and sample-size planning for two-arm comparisons.
//!
//! Normal approximations matching the two-proportion z-test and the
//! Welch t-test in [`crate::hypothesis`]. Useful before launch to decide
//! how long an experiment must run to detect a given lift.

use abkit_core::{AnalysisError, AnalysisResult};
use statrs::distribution::ContinuousCDF;

use crate::hypothesis::standard_normal;

const POWER: &str = "power";

fn check_probability(name: &str, p: f64) -> AnalysisResult<()> {
    if p > 0.0 && p < 1.0 {
        Ok(())
    } else {
        Err(AnalysisError::InvalidInput(format!(
            "{name} must be in (0, 1), got {p}"
        )))
    }
}

/// Approximate power of the pooled two-proportion z-test with `n_per_arm`
/// units in each arm.
pub fn proportion_power(rate_a: f64, rate_b: f64, n_per_arm: u64, alpha: f64) -> AnalysisResult<f64> {
    check_probability("rate_a", rate_a)?;
    check_probability("rate_b", rate_b)?;
    check_probability("alpha", alpha)?;
    if n_per_arm == 0 {
        return Err(AnalysisError::degenerate(POWER, "n_per_arm is 0"));
    }

    let normal = standard_normal();
    let z_alpha = normal.inverse_cdf(1.0 - alpha / 2.0);
    let pooled = (rate_a + rate_b) / 2.0;
    let null_sd = (2.0 * pooled * (1.0 - pooled)).sqrt();
    let alt_sd = (rate_a * (1.0 - rate_a) + rate_b * (1.0 - rate_b)).sqrt();
    let delta = (rate_b - rate_a).abs();

    let z = (delta * (n_per_arm as f64).sqrt() - z_alpha * null_sd) / alt_sd;
    Ok(normal.cdf(z))
}

/// Units needed per arm for the two-proportion z-test to reach `power`.
pub fn proportion_sample_size(
    rate_a: f64,
    rate_b: f64,
    alpha: f64,
    power: f64,
) -> AnalysisResult<u64> {
    check_probability("rate_a", rate_a)?;
    check_probability("rate_b", rate_b)?;
    check_probability("alpha", alpha)?;
    check_probability("power", power)?;
    if rate_a == rate_b {
        return Err(AnalysisError::degenerate(
            POWER,
            "rates are equal, no finite sample size detects a zero lift",
        ));
    }

    let normal = standard_normal();
    let z_alpha = normal.inverse_cdf(1.0 - alpha / 2.0);
    let z_beta = normal.inverse_cdf(power);
    let pooled = (rate_a + rate_b) / 2.0;
    let null_sd = (2.0 * pooled * (1.0 - pooled)).sqrt();
    let alt_sd = (rate_a * (1.0 - rate_a) + rate_b * (1.0 - rate_b)).sqrt();

    let n = ((z_alpha * null_sd + z_beta * alt_sd) / (rate_b - rate_a)).powi(2);
    Ok(n.ceil() as u64)
}

/// Smallest mean difference detectable with `n_per_arm` units per arm,
/// given a common standard deviation.
pub fn minimum_detectable_effect(
    std_dev: f64,
    n_per_arm: u64,
    alpha: f64,
    power: f64,
) -> AnalysisResult<f64> {
    check_probability("alpha", alpha)?;
    check_probability("power", power)?;
    if n_per_arm == 0 || !(std_dev > 0.0) {
        return Err(AnalysisError::degenerate(
            POWER,
            format!("need n_per_arm > 0 and std_dev > 0 (got {n_per_arm}, {std_dev})"),
        ));
    }
    let normal = standard_normal();
    let z_alpha = normal.inverse_cdf(1.0 - alpha / 2.0);
    let z_beta = normal.inverse_cdf(power);
    Ok((z_alpha + z_beta) * std_dev * (2.0 / n_per_arm as f64).sqrt())
}
