//! Intention-to-treat: compare units by assignment, ignoring whether they
//! actually received treatment.

use abkit_core::{
    AnalysisResult, Arms, Dataset, EffectEstimate, IdentificationStrategy, Metric, OutcomeWindow,
    TestKind, UnitOutcome,
};
use abkit_stats::{EffectEstimator, MetricSeries};
use tracing::debug;

/// Wrap unit outcomes as the series type a metric implies.
pub(crate) fn series(metric: Metric, outcomes: &[&UnitOutcome]) -> MetricSeries {
    match metric {
        Metric::Value => MetricSeries::Continuous(outcomes.iter().map(|o| o.outcome).collect()),
        Metric::Conversion => MetricSeries::Binary(outcomes.iter().map(|o| o.outcome > 0.5).collect()),
    }
}

pub fn estimate_itt(
    estimator: &EffectEstimator,
    dataset: &Dataset,
    arms: &Arms,
    metric: Metric,
    kind: TestKind,
    window: OutcomeWindow,
) -> AnalysisResult<EffectEstimate> {
    let outcomes = dataset.unit_outcomes(metric, window);
    let (control, treatment) = arms.split(&outcomes);

    debug!(
        control = control.len(),
        treatment = treatment.len(),
        test = ?kind,
        "Computing intention-to-treat estimate"
    );

    Ok(estimator
        .estimate_labeled(
            &series(metric, &control),
            &series(metric, &treatment),
            kind,
            &arms.control,
            &arms.treatment,
        )?
        .with_strategy(IdentificationStrategy::IntentionToTreat))
}
