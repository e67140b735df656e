//! Effect estimates over time, for watching an experiment mature.

use abkit_core::{AnalysisResult, Arms, Dataset, EffectEstimate, Metric, OutcomeWindow, TestKind};
use abkit_stats::EffectEstimator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::itt::estimate_itt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendMode {
    /// Only observations at each time index.
    #[default]
    PerPeriod,
    /// Everything from the first period up to and including each index.
    Cumulative,
}

/// Intention-to-treat estimate at every time index present in the data.
/// Periods too sparse to estimate keep their error.
pub fn effect_by_period(
    estimator: &EffectEstimator,
    dataset: &Dataset,
    arms: &Arms,
    metric: Metric,
    kind: TestKind,
    mode: TrendMode,
) -> AnalysisResult<BTreeMap<u32, AnalysisResult<EffectEstimate>>> {
    dataset.check_time_order()?;
    let periods = dataset.periods();
    let Some(&first) = periods.first() else {
        return Ok(BTreeMap::new());
    };

    let mut trend = BTreeMap::new();
    for &period in &periods {
        let end = period.saturating_add(1);
        let window = match mode {
            TrendMode::PerPeriod => OutcomeWindow::Range { start: period, end },
            TrendMode::Cumulative => OutcomeWindow::Range { start: first, end },
        };
        let result = estimate_itt(estimator, dataset, arms, metric, kind, window);
        debug!(period, ok = result.is_ok(), "Period estimate computed");
        trend.insert(period, result);
    }
    Ok(trend)
}
