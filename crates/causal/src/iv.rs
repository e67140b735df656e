//! Instrumental-variable estimation by two-stage least squares, with random
//! assignment instrumenting actual receipt of treatment.

use abkit_core::{
    AnalysisError, AnalysisResult, ArmSample, Arms, AssumptionWarning, ConfidenceInterval,
    Dataset, EffectEstimate, IdentificationStrategy, Inference, Metric, OutcomeWindow,
};
use abkit_regression::design::{INTERCEPT, TREATMENT};
use abkit_regression::{fit, DesignMatrix, Family};
use abkit_stats::hypothesis::{students_t, t_critical, t_two_sided_p};
use abkit_stats::EffectEstimator;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const IV: &str = "two_stage_least_squares";

/// Below this the first-stage slope is treated as zero.
const MIN_FIRST_STAGE: f64 = 1e-12;

/// Regression of received treatment on assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstStage {
    pub intercept: f64,
    /// Compliance gap: P(received | assigned) − P(received | not assigned).
    pub coefficient: f64,
    pub standard_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    /// F statistic for the single excluded instrument (t²). Infinite when
    /// compliance is perfect.
    pub f_statistic: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvEstimate {
    pub effect: EffectEstimate,
    pub first_stage: FirstStage,
}

pub fn estimate_iv(
    estimator: &EffectEstimator,
    dataset: &Dataset,
    arms: &Arms,
    metric: Metric,
    window: OutcomeWindow,
    weak_instrument_f: f64,
) -> AnalysisResult<IvEstimate> {
    let outcomes = dataset.unit_outcomes(metric, window);

    let mut z = Vec::new();
    let mut d = Vec::new();
    let mut y = Vec::new();
    for outcome in &outcomes {
        let Some(assigned) = arms.indicator(&outcome.assignment) else {
            continue;
        };
        z.push(assigned);
        d.push(if outcome.received_treatment { 1.0 } else { 0.0 });
        y.push(outcome.outcome);
    }

    let n = y.len();
    let n_treated = z.iter().filter(|&&v| v == 1.0).count();
    if n_treated == 0 || n_treated == n {
        return Err(AnalysisError::degenerate(
            IV,
            "instrument has no variation (one arm is empty)",
        ));
    }
    if n < 3 {
        return Err(AnalysisError::insufficient(IV, "all", 3, n));
    }

    // Stage 1: D ~ 1 + Z
    let stage1_design = DesignMatrix::from_rows(
        vec![INTERCEPT.to_string(), "assignment".to_string()],
        &z.iter().map(|&zi| vec![1.0, zi]).collect::<Vec<_>>(),
    )?;
    let stage1 = fit(&stage1_design, &d, Family::Gaussian)?;
    let first_stage = first_stage(&stage1.coefficients, &stage1.standard_errors, &stage1.p_values)?;

    // Stage 2: Y ~ 1 + D̂
    let fitted = stage1.linear_predictor(&stage1_design);
    let stage2_design = DesignMatrix::from_rows(
        vec![INTERCEPT.to_string(), TREATMENT.to_string()],
        &fitted.iter().map(|&dh| vec![1.0, dh]).collect::<Vec<_>>(),
    )?;
    let stage2 = fit(&stage2_design, &y, Family::Gaussian)?;
    let (alpha, beta) = (stage2.coefficients[0], stage2.coefficients[1]);

    // Second-stage residuals use D̂ and understate the error. The structural
    // residuals use actual receipt.
    let df = (n - 2) as f64;
    let sigma2 = y
        .iter()
        .zip(&d)
        .map(|(yi, di)| (yi - alpha - beta * di).powi(2))
        .sum::<f64>()
        / df;
    let fitted_mean = fitted.iter().sum::<f64>() / n as f64;
    let fitted_ss: f64 = fitted.iter().map(|f| (f - fitted_mean).powi(2)).sum();
    let se = (sigma2 / fitted_ss).sqrt();
    if !(se > 0.0) || !se.is_finite() {
        return Err(AnalysisError::degenerate(
            IV,
            "structural standard error is zero or undefined",
        ));
    }

    let dist = students_t(IV, df)?;
    let t = beta / se;
    let p_value = t_two_sided_p(&dist, t);
    let level = estimator.confidence_level();
    let critical = t_critical(&dist, level);

    let mut effect = EffectEstimate {
        strategy: IdentificationStrategy::InstrumentalVariable,
        inference: Inference::TwoStageLeastSquares,
        estimate: beta,
        standard_error: Some(se),
        confidence_interval: Some(ConfidenceInterval {
            lower: beta - critical * se,
            upper: beta + critical * se,
            level,
        }),
        statistic: t,
        degrees_of_freedom: Some(df),
        p_value,
        arms: vec![
            ArmSample {
                label: arms.control.clone(),
                n: n - n_treated,
            },
            ArmSample {
                label: arms.treatment.clone(),
                n: n_treated,
            },
        ],
        segment: None,
        warnings: vec![AssumptionWarning::ExclusionRestrictionUnverified],
    };

    if first_stage.f_statistic < weak_instrument_f {
        warn!(
            f_statistic = first_stage.f_statistic,
            threshold = weak_instrument_f,
            "Weak instrument, IV estimate is unreliable"
        );
        effect = effect.with_warning(AssumptionWarning::WeakInstrument {
            first_stage_f: first_stage.f_statistic,
            threshold: weak_instrument_f,
        });
    }

    info!(
        late = beta,
        compliance = first_stage.coefficient,
        first_stage_f = first_stage.f_statistic,
        p_value,
        "IV estimate computed"
    );

    Ok(IvEstimate {
        effect,
        first_stage,
    })
}

fn first_stage(coefficients: &[f64], standard_errors: &[f64], p_values: &[f64]) -> AnalysisResult<FirstStage> {
    let (intercept, coefficient) = (coefficients[0], coefficients[1]);
    if coefficient.abs() < MIN_FIRST_STAGE {
        return Err(AnalysisError::degenerate(
            IV,
            "assignment does not shift treatment receipt (first-stage coefficient is zero)",
        ));
    }
    let standard_error = standard_errors[1];
    let (statistic, f_statistic, p_value) = if standard_error > 0.0 {
        let t = coefficient / standard_error;
        (t, t * t, p_values[1])
    } else {
        (f64::INFINITY, f64::INFINITY, 0.0)
    };
    Ok(FirstStage {
        intercept,
        coefficient,
        standard_error,
        statistic,
        p_value,
        f_statistic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use abkit_core::{Observation, TestKind, Unit};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// One-sided noncompliance: assigned units take up treatment with
    /// probability `uptake`, and receipt adds `effect`.
    fn noncompliant(uptake: f64, effect: f64, n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut units = Vec::new();
        let mut observations = Vec::new();
        for i in 0..n {
            let assigned = i % 2 == 0;
            let received = assigned && rng.gen::<f64>() < uptake;
            let value = 20.0 + if received { effect } else { 0.0 } + rng.gen_range(-2.0..2.0);
            let id = format!("u{i}");
            units.push(Unit::new(&id, if assigned { "treatment" } else { "control" }));
            observations.push(Observation::continuous(&id, 0, value, received));
        }
        Dataset::new(units, observations)
    }

    #[test]
    fn test_iv_rescales_itt_by_compliance() {
        let ds = noncompliant(0.5, 4.0, 4000, 3);
        let result = estimate_iv(
            &EffectEstimator::default(),
            &ds,
            &Arms::new("control", "treatment"),
            Metric::Value,
            OutcomeWindow::All,
            10.0,
        )
        .unwrap();
        assert!((result.first_stage.coefficient - 0.5).abs() < 0.05);
        assert!((result.effect.estimate - 4.0).abs() < 0.4, "{}", result.effect.estimate);
        assert!(result.first_stage.f_statistic > 100.0);
        assert_eq!(result.effect.inference, Inference::TwoStageLeastSquares);
        assert_eq!(
            result.effect.warnings,
            vec![AssumptionWarning::ExclusionRestrictionUnverified]
        );
        let ci = result.effect.confidence_interval.unwrap();
        assert!(ci.contains(result.effect.estimate));
    }

    #[test]
    fn test_full_compliance_matches_itt() {
        let ds = noncompliant(1.0, 3.0, 400, 8);
        let arms = Arms::new("control", "treatment");
        let iv = estimate_iv(
            &EffectEstimator::default(),
            &ds,
            &arms,
            Metric::Value,
            OutcomeWindow::All,
            10.0,
        )
        .unwrap();
        let itt = crate::itt::estimate_itt(
            &EffectEstimator::default(),
            &ds,
            &arms,
            Metric::Value,
            TestKind::WelchT,
            OutcomeWindow::All,
        )
        .unwrap();
        assert!((iv.effect.estimate - itt.estimate).abs() < 1e-9);
        assert!(iv.first_stage.f_statistic > 1e6);
        assert!(!iv
            .effect
            .warnings
            .iter()
            .any(|w| matches!(w, AssumptionWarning::WeakInstrument { .. })));
    }

    #[test]
    fn test_weak_instrument_flagged() {
        // 5 of 200 assigned units take up treatment.
        let units: Vec<Unit> = (0..400)
            .map(|i| Unit::new(format!("u{i}"), if i % 2 == 0 { "treatment" } else { "control" }))
            .collect();
        let observations: Vec<Observation> = (0..400)
            .map(|i| {
                let received = i % 80 == 0;
                let value = 20.0 + if received { 4.0 } else { 0.0 } + (i % 7) as f64 * 0.5;
                Observation::continuous(format!("u{i}"), 0, value, received)
            })
            .collect();
        let result = estimate_iv(
            &EffectEstimator::default(),
            &Dataset::new(units, observations),
            &Arms::new("control", "treatment"),
            Metric::Value,
            OutcomeWindow::All,
            10.0,
        )
        .unwrap();
        assert!((result.first_stage.coefficient - 0.025).abs() < 1e-9);
        assert!(result.first_stage.f_statistic < 10.0, "{}", result.first_stage.f_statistic);
        assert!(result.effect.warnings.iter().any(
            |w| matches!(w, AssumptionWarning::WeakInstrument { threshold, .. } if *threshold == 10.0)
        ));
    }

    #[test]
    fn test_no_uptake_is_degenerate() {
        let ds = noncompliant(0.0, 4.0, 100, 1);
        let err = estimate_iv(
            &EffectEstimator::default(),
            &ds,
            &Arms::new("control", "treatment"),
            Metric::Value,
            OutcomeWindow::All,
            10.0,
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateInput { .. }));
    }
}
