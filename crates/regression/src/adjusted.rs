//! Covariate-adjusted treatment effects, reported next to the naive
//! treatment-only model fitted on the same rows and scale.

use abkit_core::config::RegressionConfig;
use abkit_core::{
    AnalysisConfig, AnalysisError, AnalysisResult, ArmSample, Arms, AssumptionWarning,
    ConfidenceInterval, Dataset, EffectEstimate, IdentificationStrategy, Inference, Metric,
    OutcomeWindow, Unit,
};
use abkit_stats::hypothesis::{normal_critical, students_t, t_critical};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::design::{CategoricalEncoding, DesignRow, DesignSpec, EncodedDesign, TREATMENT};
use crate::glm::{fit_with, Family, RegressionFit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedEffect {
    /// Treatment coefficient without covariates.
    pub naive: EffectEstimate,
    /// Treatment coefficient with covariates.
    pub adjusted: EffectEstimate,
    /// adjusted − naive: the shift attributable to confounding control.
    pub confounding_delta: f64,
    pub fit: RegressionFit,
    pub encodings: Vec<CategoricalEncoding>,
}

#[derive(Debug, Clone)]
pub struct RegressionAdjustedEstimator {
    pub family: Family,
    pub spec: DesignSpec,
    pub confidence_level: f64,
    pub regression: RegressionConfig,
}

impl RegressionAdjustedEstimator {
    pub fn new(family: Family, spec: DesignSpec) -> Self {
        Self {
            family,
            spec,
            confidence_level: 0.95,
            regression: RegressionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: &AnalysisConfig) -> Self {
        self.confidence_level = config.confidence_level;
        self.regression = config.regression.clone();
        self
    }

    pub fn estimate(
        &self,
        dataset: &Dataset,
        arms: &Arms,
        metric: Metric,
        window: OutcomeWindow,
    ) -> AnalysisResult<AdjustedEffect> {
        let outcomes = dataset.unit_outcomes(metric, window);
        let units: HashMap<&str, &Unit> =
            dataset.units.iter().map(|u| (u.id.as_str(), u)).collect();

        let mut rows = Vec::new();
        let mut y = Vec::new();
        for outcome in &outcomes {
            let Some(treatment) = arms.indicator(&outcome.assignment) else {
                continue;
            };
            let unit = units.get(outcome.unit_id.as_str()).ok_or_else(|| {
                AnalysisError::InvalidInput(format!("unknown unit '{}'", outcome.unit_id))
            })?;
            rows.push(DesignRow {
                covariates: &unit.covariates,
                treatment,
            });
            y.push(outcome.outcome);
        }

        let n_treated = rows.iter().filter(|r| r.treatment == 1.0).count();
        let arm_sizes = [rows.len() - n_treated, n_treated];

        let full = self.spec.build(&rows)?;
        let bare = self.spec.treatment_only().build(&rows)?;

        let adjusted_fit = fit_with(&full.matrix, &y, self.family, &self.regression)?;
        let naive_fit = fit_with(&bare.matrix, &y, self.family, &self.regression)?;

        let naive = self.treatment_estimate(&naive_fit, IdentificationStrategy::Naive, arms, arm_sizes)?;
        let adjusted = self.treatment_estimate(
            &adjusted_fit,
            IdentificationStrategy::RegressionAdjusted,
            arms,
            arm_sizes,
        )?;
        let confounding_delta = adjusted.estimate - naive.estimate;

        info!(
            family = ?self.family,
            n = y.len(),
            naive = naive.estimate,
            adjusted = adjusted.estimate,
            confounding_delta,
            "Regression-adjusted effect computed"
        );

        let EncodedDesign { encodings, .. } = full;
        Ok(AdjustedEffect {
            naive,
            adjusted,
            confounding_delta,
            fit: adjusted_fit,
            encodings,
        })
    }

    fn treatment_estimate(
        &self,
        fit: &RegressionFit,
        strategy: IdentificationStrategy,
        arms: &Arms,
        arm_sizes: [usize; 2],
    ) -> AnalysisResult<EffectEstimate> {
        let coef = fit.coefficient(TREATMENT).ok_or_else(|| {
            AnalysisError::InvalidInput("fit has no treatment column".to_string())
        })?;

        let critical = match fit.degrees_of_freedom {
            Some(df) => t_critical(&students_t("regression", df)?, self.confidence_level),
            None => normal_critical(self.confidence_level),
        };

        let mut warnings = Vec::new();
        if !fit.converged {
            warnings.push(AssumptionWarning::NonConvergence {
                iterations: fit.iterations,
            });
        }

        Ok(EffectEstimate {
            strategy,
            inference: match fit.family {
                Family::Gaussian => Inference::OrdinaryLeastSquares,
                Family::Binomial => Inference::LogisticWald,
            },
            estimate: coef.estimate,
            standard_error: Some(coef.standard_error),
            confidence_interval: Some(ConfidenceInterval {
                lower: coef.estimate - critical * coef.standard_error,
                upper: coef.estimate + critical * coef.standard_error,
                level: self.confidence_level,
            }),
            statistic: coef.statistic,
            degrees_of_freedom: fit.degrees_of_freedom,
            p_value: coef.p_value,
            arms: vec![
                ArmSample {
                    label: arms.control.clone(),
                    n: arm_sizes[0],
                },
                ArmSample {
                    label: arms.treatment.clone(),
                    n: arm_sizes[1],
                },
            ],
            segment: None,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abkit_core::Observation;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Older users are both more likely to be treated and spend more.
    fn confounded_dataset(seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut units = Vec::new();
        let mut observations = Vec::new();
        for i in 0..2000 {
            let age: f64 = rng.gen_range(20.0..60.0);
            let treated = rng.gen::<f64>() < (age - 20.0) / 40.0;
            let device = if rng.gen::<bool>() { "mobile" } else { "desktop" };
            let device_shift = if device == "mobile" { -1.0 } else { 0.0 };
            let spend = 10.0
                + 0.5 * age
                + 2.0 * f64::from(u8::from(treated))
                + device_shift
                + rng.gen_range(-1.0..1.0);
            let id = format!("u{i}");
            units.push(
                Unit::new(&id, if treated { "treatment" } else { "control" })
                    .with_numeric("age", age)
                    .with_category("device", device),
            );
            observations.push(Observation::continuous(&id, 0, spend, treated));
        }
        Dataset::new(units, observations)
    }

    #[test]
    fn test_adjustment_removes_confounding() {
        let ds = confounded_dataset(11);
        let estimator = RegressionAdjustedEstimator::new(
            Family::Gaussian,
            DesignSpec::new().numeric("age").categorical("device", None),
        );
        let result = estimator
            .estimate(&ds, &Arms::new("control", "treatment"), Metric::Value, OutcomeWindow::All)
            .unwrap();

        assert!((result.adjusted.estimate - 2.0).abs() < 0.15, "{}", result.adjusted.estimate);
        // Naive comparison absorbs the age gap between arms.
        assert!(result.naive.estimate > 5.0, "{}", result.naive.estimate);
        assert!(result.confounding_delta < -3.0);
        assert_eq!(result.adjusted.strategy, IdentificationStrategy::RegressionAdjusted);
        assert_eq!(result.naive.strategy, IdentificationStrategy::Naive);
        assert_eq!(result.encodings[0].reference, "desktop");
        let device = result.fit.coefficient("device[mobile]").unwrap();
        assert!((device.estimate + 1.0).abs() < 0.15);
        assert_eq!(result.adjusted.total_sample_size(), 2000);
    }

    #[test]
    fn test_rows_follow_outcomes_whatever_the_unit_order() {
        let ds = confounded_dataset(3);
        let mut shuffled = ds.clone();
        shuffled.units.reverse();
        shuffled.units.push(Unit::new("holdout", "holdout").with_numeric("age", 30.0));
        shuffled
            .observations
            .push(Observation::continuous("holdout", 0, 99.0, false));

        let estimator = RegressionAdjustedEstimator::new(Family::Gaussian, DesignSpec::new().numeric("age"));
        let arms = Arms::new("control", "treatment");
        let a = estimator.estimate(&ds, &arms, Metric::Value, OutcomeWindow::All).unwrap();
        let b = estimator
            .estimate(&shuffled, &arms, Metric::Value, OutcomeWindow::All)
            .unwrap();
        assert!((a.adjusted.estimate - b.adjusted.estimate).abs() < 1e-9);
        assert_eq!(b.adjusted.total_sample_size(), 2000);
    }

    #[test]
    fn test_interval_uses_t_critical_value() {
        let config = AnalysisConfig {
            confidence_level: 0.90,
            ..AnalysisConfig::default()
        };
        let result = RegressionAdjustedEstimator::new(Family::Gaussian, DesignSpec::new().numeric("age"))
            .with_config(&config)
            .estimate(
                &confounded_dataset(4),
                &Arms::new("control", "treatment"),
                Metric::Value,
                OutcomeWindow::All,
            )
            .unwrap();
        let est = &result.adjusted;
        let df = est.degrees_of_freedom.unwrap();
        let critical = t_critical(&students_t("t", df).unwrap(), 0.90);
        let ci = est.confidence_interval.as_ref().unwrap();
        let se = est.standard_error.unwrap();
        assert!((ci.upper - est.estimate - critical * se).abs() < 1e-9);
        assert_eq!(ci.level, 0.90);
    }

    #[test]
    fn test_logistic_adjustment_on_conversions() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut units = Vec::new();
        let mut observations = Vec::new();
        for i in 0..3000 {
            let cart: f64 = rng.gen_range(0.0..100.0);
            let treated = rng.gen::<bool>();
            let logit = -2.0 + 0.02 * cart + if treated { 0.5 } else { 0.0 };
            let converted = rng.gen::<f64>() < 1.0 / (1.0 + (-logit).exp());
            let id = format!("u{i}");
            units.push(
                Unit::new(&id, if treated { "B" } else { "A" }).with_numeric("cart_value", cart),
            );
            observations.push(Observation::binary(&id, 0, converted, treated));
        }
        let ds = Dataset::new(units, observations);
        let estimator =
            RegressionAdjustedEstimator::new(Family::Binomial, DesignSpec::new().numeric("cart_value"));
        let result = estimator
            .estimate(&ds, &Arms::new("A", "B"), Metric::Conversion, OutcomeWindow::All)
            .unwrap();
        assert!((result.adjusted.estimate - 0.5).abs() < 0.25);
        assert!(result.adjusted.p_value < 0.01);
        assert_eq!(result.adjusted.inference, Inference::LogisticWald);
        assert!(result.adjusted.warnings.is_empty());
    }
}
