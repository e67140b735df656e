//! Generalized linear models: ordinary least squares for the identity link
//! and iteratively reweighted least squares for the logistic link.

use abkit_core::config::RegressionConfig;
use abkit_core::{AnalysisError, AnalysisResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use abkit_stats::hypothesis::{normal_two_sided_p, students_t, t_two_sided_p};
use tracing::{debug, warn};

use crate::design::DesignMatrix;

const OLS: &str = "ols";
const LOGISTIC: &str = "logistic_irls";

/// Working weights are floored here so X'WX stays invertible near 0 or 1.
const MIN_WEIGHT: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Identity link, normal errors.
    Gaussian,
    /// Logit link for 0/1 outcomes. Coefficients are log-odds.
    Binomial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub standard_error: f64,
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    pub family: Family,
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub standard_errors: Vec<f64>,
    /// t statistics for Gaussian fits, Wald z for Binomial fits.
    pub statistics: Vec<f64>,
    pub p_values: Vec<f64>,
    /// Residual degrees of freedom, Gaussian only.
    pub degrees_of_freedom: Option<f64>,
    pub n_obs: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl RegressionFit {
    pub fn coefficient(&self, name: &str) -> Option<Coefficient> {
        let j = self.names.iter().position(|n| n == name)?;
        Some(Coefficient {
            name: self.names[j].clone(),
            estimate: self.coefficients[j],
            standard_error: self.standard_errors[j],
            statistic: self.statistics[j],
            p_value: self.p_values[j],
        })
    }

    /// Linear predictor Xβ for each row of `design`.
    pub fn linear_predictor(&self, design: &DesignMatrix) -> Vec<f64> {
        let beta = DVector::from_column_slice(&self.coefficients);
        (design.to_matrix() * beta).iter().copied().collect()
    }
}

/// Fit with default iteration limits.
pub fn fit(design: &DesignMatrix, outcome: &[f64], family: Family) -> AnalysisResult<RegressionFit> {
    fit_with(design, outcome, family, &RegressionConfig::default())
}

pub fn fit_with(
    design: &DesignMatrix,
    outcome: &[f64],
    family: Family,
    config: &RegressionConfig,
) -> AnalysisResult<RegressionFit> {
    if design.n_rows() != outcome.len() {
        return Err(AnalysisError::InvalidInput(format!(
            "design has {} rows but outcome has {} values",
            design.n_rows(),
            outcome.len()
        )));
    }
    if outcome.iter().any(|y| !y.is_finite()) {
        return Err(AnalysisError::InvalidInput(
            "outcome contains a non-finite value".to_string(),
        ));
    }

    match family {
        Family::Gaussian => fit_ols(design, outcome),
        Family::Binomial => fit_logistic(design, outcome, config),
    }
}

fn invert(test: &str, m: &DMatrix<f64>) -> AnalysisResult<DMatrix<f64>> {
    m.clone().try_inverse().ok_or_else(|| {
        AnalysisError::degenerate(test, "design matrix is singular (collinear or constant columns)")
    })
}

fn fit_ols(design: &DesignMatrix, outcome: &[f64]) -> AnalysisResult<RegressionFit> {
    let (n, p) = (design.n_rows(), design.n_cols());
    if n <= p {
        return Err(AnalysisError::insufficient(OLS, "design", p + 1, n));
    }

    let x = design.to_matrix();
    let y = DVector::from_column_slice(outcome);
    let xtx_inv = invert(OLS, &(x.transpose() * &x))?;
    let beta = &xtx_inv * x.transpose() * &y;

    let residuals = &y - &x * &beta;
    let df = (n - p) as f64;
    let sigma2 = residuals.norm_squared() / df;

    let dist = students_t(OLS, df)?;

    let mut standard_errors = Vec::with_capacity(p);
    let mut statistics = Vec::with_capacity(p);
    let mut p_values = Vec::with_capacity(p);
    for j in 0..p {
        let se = (sigma2 * xtx_inv[(j, j)]).sqrt();
        let t = if se > 0.0 { beta[j] / se } else { 0.0 };
        standard_errors.push(se);
        statistics.push(t);
        p_values.push(if se > 0.0 { t_two_sided_p(&dist, t) } else { 1.0 });
    }

    debug!(n, p, sigma2, "OLS fit complete");

    Ok(RegressionFit {
        family: Family::Gaussian,
        names: design.names().to_vec(),
        coefficients: beta.iter().copied().collect(),
        standard_errors,
        statistics,
        p_values,
        degrees_of_freedom: Some(df),
        n_obs: n,
        iterations: 1,
        converged: true,
    })
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn fit_logistic(
    design: &DesignMatrix,
    outcome: &[f64],
    config: &RegressionConfig,
) -> AnalysisResult<RegressionFit> {
    let (n, p) = (design.n_rows(), design.n_cols());
    if n <= p {
        return Err(AnalysisError::insufficient(LOGISTIC, "design", p + 1, n));
    }
    if outcome.iter().any(|&y| y != 0.0 && y != 1.0) {
        return Err(AnalysisError::InvalidInput(
            "logistic regression needs 0/1 outcomes".to_string(),
        ));
    }
    if config.max_iterations == 0 {
        return Err(AnalysisError::InvalidInput(
            "logistic regression needs at least one IRLS iteration".to_string(),
        ));
    }

    let x = design.to_matrix();
    let y = DVector::from_column_slice(outcome);
    let mut beta = DVector::<f64>::zeros(p);
    let mut xtwx_inv = DMatrix::<f64>::identity(p, p);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        let eta = &x * &beta;
        let mu = eta.map(sigmoid);
        let w = mu.map(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
        let z = DVector::from_fn(n, |i, _| eta[i] + (y[i] - mu[i]) / w[i]);

        let wx = DMatrix::from_fn(n, p, |i, j| x[(i, j)] * w[i]);
        xtwx_inv = invert(LOGISTIC, &(x.transpose() * &wx))?;
        let next = &xtwx_inv * (wx.transpose() * &z);

        let step = (&next - &beta).amax();
        beta = next;
        if step < config.tolerance {
            converged = true;
            break;
        }
    }

    if converged {
        // Covariance at the converged estimate.
        let mu = (&x * &beta).map(sigmoid);
        let w = mu.map(|m| (m * (1.0 - m)).max(MIN_WEIGHT));
        let wx = DMatrix::from_fn(n, p, |i, j| x[(i, j)] * w[i]);
        xtwx_inv = invert(LOGISTIC, &(x.transpose() * &wx))?;
    } else {
        warn!(
            iterations,
            "Logistic regression did not converge, possible separation"
        );
    }

    let mut standard_errors = Vec::with_capacity(p);
    let mut statistics = Vec::with_capacity(p);
    let mut p_values = Vec::with_capacity(p);
    for j in 0..p {
        let se = xtwx_inv[(j, j)].max(0.0).sqrt();
        let z = if se > 0.0 { beta[j] / se } else { 0.0 };
        standard_errors.push(se);
        statistics.push(z);
        p_values.push(normal_two_sided_p(z));
    }

    debug!(n, p, iterations, converged, "Logistic fit complete");

    Ok(RegressionFit {
        family: Family::Binomial,
        names: design.names().to_vec(),
        coefficients: beta.iter().copied().collect(),
        standard_errors,
        statistics,
        p_values,
        degrees_of_freedom: None,
        n_obs: n,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn design(rows: &[Vec<f64>]) -> DesignMatrix {
        let names = (0..rows[0].len())
            .map(|j| if j == 0 { "intercept".to_string() } else { format!("x{j}") })
            .collect();
        DesignMatrix::from_rows(names, rows).unwrap()
    }

    #[test]
    fn test_ols_exact_line() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| 2.0 + 3.0 * i as f64 + if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let fit = fit(&design(&rows), &y, Family::Gaussian).unwrap();
        assert!((fit.coefficients[1] - 3.0).abs() < 0.05);
        assert!((fit.coefficients[0] - 2.0).abs() < 0.2);
        assert!(fit.p_values[1] < 1e-6);
        assert_eq!(fit.degrees_of_freedom, Some(8.0));
    }

    #[test]
    fn test_ols_binary_regressor_is_mean_difference() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![1.0, (i % 2) as f64]).collect();
        let y = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0, 2.0, 5.0];
        let fit = fit(&design(&rows), &y, Family::Gaussian).unwrap();
        // mean(odd) − mean(even) = 5 − 2
        assert!((fit.coefficients[1] - 3.0).abs() < 1e-10);
        let c = fit.coefficient("x1").unwrap();
        assert_eq!(c.estimate, fit.coefficients[1]);
        assert!(fit.coefficient("missing").is_none());
    }

    #[test]
    fn test_singular_design_is_degenerate() {
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![1.0, i as f64, 2.0 * i as f64]).collect();
        let y = [1.0, 2.0, 3.0, 4.0, 5.0];
        let err = fit(&design(&rows), &y, Family::Gaussian).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateInput { .. }));
    }

    #[test]
    fn test_too_few_rows() {
        let rows = vec![vec![1.0, 0.0], vec![1.0, 1.0]];
        let err = fit(&design(&rows), &[0.0, 1.0], Family::Gaussian).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn test_logistic_recovers_coefficients() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for _ in 0..4000 {
            let x: f64 = rng.gen_range(-2.0..2.0);
            let p = sigmoid(-0.5 + 1.2 * x);
            rows.push(vec![1.0, x]);
            y.push(if rng.gen::<f64>() < p { 1.0 } else { 0.0 });
        }
        let fit = fit(&design(&rows), &y, Family::Binomial).unwrap();
        assert!(fit.converged);
        assert!((fit.coefficients[0] + 0.5).abs() < 0.15, "{:?}", fit.coefficients);
        assert!((fit.coefficients[1] - 1.2).abs() < 0.15, "{:?}", fit.coefficients);
        assert!(fit.p_values[1] < 1e-6);
    }

    #[test]
    fn test_logistic_binary_regressor_matches_log_odds_ratio() {
        // Control 20/100, treatment 35/100.
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..100 {
            rows.push(vec![1.0, 0.0]);
            y.push(if i < 20 { 1.0 } else { 0.0 });
            rows.push(vec![1.0, 1.0]);
            y.push(if i < 35 { 1.0 } else { 0.0 });
        }
        let fit = fit(&design(&rows), &y, Family::Binomial).unwrap();
        let expected = (0.35f64 / 0.65).ln() - (0.20f64 / 0.80).ln();
        assert!((fit.coefficients[1] - expected).abs() < 1e-6);
        // Wald SE for a 2x2 table: √(1/a + 1/b + 1/c + 1/d)
        let se = (1.0 / 20.0 + 1.0 / 80.0 + 1.0 / 35.0 + 1.0 / 65.0f64).sqrt();
        assert!((fit.standard_errors[1] - se).abs() < 1e-6);
    }

    #[test]
    fn test_logistic_rejects_non_binary() {
        let rows: Vec<Vec<f64>> = (0..5).map(|i| vec![1.0, i as f64]).collect();
        let err = fit(&design(&rows), &[0.0, 1.0, 2.0, 0.0, 1.0], Family::Binomial).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn test_logistic_separation_reports_non_convergence() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![1.0, i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 0.0 } else { 1.0 }).collect();
        let config = RegressionConfig {
            max_iterations: 15,
            tolerance: 1e-10,
        };
        match fit_with(&design(&rows), &y, Family::Binomial, &config) {
            Ok(fit) => assert!(!fit.converged),
            Err(err) => assert!(matches!(err, AnalysisError::DegenerateInput { .. })),
        }
    }

    #[test]
    fn test_logistic_needs_an_iteration() {
        let rows: Vec<Vec<f64>> = (0..6).map(|i| vec![1.0, (i % 2) as f64]).collect();
        let y = [0.0, 1.0, 1.0, 0.0, 0.0, 1.0];
        let config = RegressionConfig {
            max_iterations: 0,
            ..RegressionConfig::default()
        };
        let err = fit_with(&design(&rows), &y, Family::Binomial, &config).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(ref m) if m.contains("iteration")));
    }
}
