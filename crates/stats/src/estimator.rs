//! Effect estimator façade: one entry point that dispatches to the test
//! the caller names. The test is never inferred from the data.

use abkit_core::{AnalysisConfig, AnalysisError, AnalysisResult, EffectEstimate, TestKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::hypothesis::{
    compare_counts_categorical, compare_distributions_rank, compare_means_at,
    compare_proportions_at, DEFAULT_CONFIDENCE,
};

/// Per-unit metric values for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "values")]
pub enum MetricSeries {
    Continuous(Vec<f64>),
    Binary(Vec<bool>),
    Categorical(Vec<String>),
}

impl MetricSeries {
    pub fn len(&self) -> usize {
        match self {
            MetricSeries::Continuous(v) => v.len(),
            MetricSeries::Binary(v) => v.len(),
            MetricSeries::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn type_name(&self) -> &'static str {
        match self {
            MetricSeries::Continuous(_) => "continuous",
            MetricSeries::Binary(_) => "binary",
            MetricSeries::Categorical(_) => "categorical",
        }
    }

    /// Numeric view: binary values map to 0/1, categories have none.
    fn numeric(&self) -> Option<Vec<f64>> {
        match self {
            MetricSeries::Continuous(v) => Some(v.clone()),
            MetricSeries::Binary(v) => Some(v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()),
            MetricSeries::Categorical(_) => None,
        }
    }

    /// (successes, trials) for binary series.
    fn counts(&self) -> Option<(u64, u64)> {
        match self {
            MetricSeries::Binary(v) => Some((v.iter().filter(|&&b| b).count() as u64, v.len() as u64)),
            _ => None,
        }
    }

    fn categories(&self) -> Option<Vec<String>> {
        match self {
            MetricSeries::Binary(v) => Some(v.iter().map(|b| b.to_string()).collect()),
            MetricSeries::Categorical(v) => Some(v.clone()),
            MetricSeries::Continuous(_) => None,
        }
    }
}

/// Build a groups × levels contingency table, levels in sorted order.
pub fn contingency_table(a: &[String], b: &[String]) -> (Vec<String>, Vec<Vec<u64>>) {
    let levels: Vec<String> = a
        .iter()
        .chain(b.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row = |values: &[String]| -> Vec<u64> {
        levels
            .iter()
            .map(|level| values.iter().filter(|v| *v == level).count() as u64)
            .collect()
    };
    let table = vec![row(a), row(b)];
    (levels, table)
}

#[derive(Debug, Clone)]
pub struct EffectEstimator {
    confidence_level: f64,
}

impl EffectEstimator {
    pub fn new(confidence_level: f64) -> Self {
        Self { confidence_level }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.confidence_level)
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Compare arm B against arm A with the named test.
    pub fn estimate(
        &self,
        a: &MetricSeries,
        b: &MetricSeries,
        kind: TestKind,
    ) -> AnalysisResult<EffectEstimate> {
        let mismatch = || {
            AnalysisError::InvalidInput(format!(
                "{kind:?} cannot be applied to {} vs {} series",
                a.type_name(),
                b.type_name()
            ))
        };

        debug!(
            test = ?kind,
            n_a = a.len(),
            n_b = b.len(),
            "Dispatching effect estimate"
        );

        match kind {
            TestKind::WelchT => {
                let (xa, xb) = a.numeric().zip(b.numeric()).ok_or_else(mismatch)?;
                compare_means_at(&xa, &xb, self.confidence_level)
            }
            TestKind::MannWhitneyU => {
                let (xa, xb) = a.numeric().zip(b.numeric()).ok_or_else(mismatch)?;
                compare_distributions_rank(&xa, &xb)
            }
            TestKind::TwoProportionZ => {
                let ((sa, na), (sb, nb)) = a.counts().zip(b.counts()).ok_or_else(mismatch)?;
                compare_proportions_at(sa, na, sb, nb, self.confidence_level)
            }
            TestKind::ChiSquare => {
                let (ca, cb) = a.categories().zip(b.categories()).ok_or_else(mismatch)?;
                let (_, table) = contingency_table(&ca, &cb);
                compare_counts_categorical(&table)
            }
        }
    }

    /// Same as [`estimate`](Self::estimate) with the arms named.
    pub fn estimate_labeled(
        &self,
        a: &MetricSeries,
        b: &MetricSeries,
        kind: TestKind,
        label_a: &str,
        label_b: &str,
    ) -> AnalysisResult<EffectEstimate> {
        Ok(self.estimate(a, b, kind)?.with_arm_labels(label_a, label_b))
    }
}

impl Default for EffectEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE)
    }
}

/// Dispatch with the default 95% confidence level.
pub fn estimate(a: &MetricSeries, b: &MetricSeries, kind: TestKind) -> AnalysisResult<EffectEstimate> {
    EffectEstimator::default().estimate(a, b, kind)
}
