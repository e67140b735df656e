//! Difference-in-differences: per-unit post − pre change, compared between
//! assignment groups. Removes any baseline gap between the groups.

use abkit_core::{
    AnalysisError, AnalysisResult, Arms, AssumptionWarning, Dataset, EffectEstimate,
    IdentificationStrategy, Metric, Period, TestKind,
};
use abkit_stats::{EffectEstimator, MetricSeries};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingPeriodPolicy {
    /// Fail on the first unit lacking a pre- or post-period reading.
    #[default]
    Fail,
    /// Drop such units and record how many were dropped.
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidOptions {
    /// First post-period time index.
    pub treatment_start: u32,
    #[serde(default)]
    pub missing_period: MissingPeriodPolicy,
}

impl DidOptions {
    pub fn new(treatment_start: u32) -> Self {
        Self {
            treatment_start,
            missing_period: MissingPeriodPolicy::Fail,
        }
    }

    pub fn excluding_incomplete(mut self) -> Self {
        self.missing_period = MissingPeriodPolicy::Exclude;
        self
    }
}

pub fn estimate_did(
    estimator: &EffectEstimator,
    dataset: &Dataset,
    arms: &Arms,
    metric: Metric,
    options: DidOptions,
) -> AnalysisResult<EffectEstimate> {
    dataset.check_time_order()?;
    let pre_post = dataset.pre_post(metric, options.treatment_start);

    let mut control = Vec::new();
    let mut treatment = Vec::new();
    let mut excluded = 0usize;

    for unit in &dataset.units {
        let Some(indicator) = arms.indicator(&unit.assignment) else {
            continue;
        };
        let (pre, post) = pre_post.get(&unit.id).copied().unwrap_or((None, None));
        let diff = match (pre, post) {
            (Some(pre), Some(post)) => post - pre,
            (pre, _) => {
                if options.missing_period == MissingPeriodPolicy::Fail {
                    return Err(AnalysisError::MissingPeriod {
                        unit_id: unit.id.clone(),
                        period: if pre.is_none() { Period::Pre } else { Period::Post },
                        treatment_start: options.treatment_start,
                    });
                }
                excluded += 1;
                continue;
            }
        };
        if indicator == 1.0 {
            treatment.push(diff);
        } else {
            control.push(diff);
        }
    }

    let mut estimate = estimator
        .estimate_labeled(
            &MetricSeries::Continuous(control),
            &MetricSeries::Continuous(treatment),
            TestKind::WelchT,
            &arms.control,
            &arms.treatment,
        )?
        .with_strategy(IdentificationStrategy::DifferenceInDifferences);

    if excluded > 0 {
        warn!(excluded, "Units without both periods excluded from DiD");
        estimate = estimate.with_warning(AssumptionWarning::UnitsExcluded {
            count: excluded,
            reason: "missing pre- or post-period observation".to_string(),
        });
    }

    info!(
        did = estimate.estimate,
        p_value = estimate.p_value,
        treatment_start = options.treatment_start,
        "Difference-in-differences estimate computed"
    );

    Ok(estimate)
}
