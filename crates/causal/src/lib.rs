//! Causal adjustment layer: intention-to-treat, difference-in-differences
//! and instrumental-variable estimates over host-supplied experiment data,
//! plus per-segment and over-time views of any of them.

pub mod did;
pub mod itt;
pub mod iv;
pub mod segmented;
pub mod trend;

pub use did::{estimate_did, DidOptions, MissingPeriodPolicy};
pub use itt::estimate_itt;
pub use iv::{estimate_iv, FirstStage, IvEstimate};
pub use segmented::{by_segment, Pooling, SegmentedEstimates};
pub use trend::{effect_by_period, TrendMode};

use abkit_core::{
    AnalysisConfig, AnalysisResult, Arms, Dataset, EffectEstimate, Metric, OutcomeWindow, TestKind,
};
use abkit_stats::EffectEstimator;

/// Config-bound entry point over the estimators in this crate.
#[derive(Debug, Clone)]
pub struct CausalEstimator {
    estimator: EffectEstimator,
    weak_instrument_f: f64,
}

impl CausalEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            estimator: EffectEstimator::from_config(config),
            weak_instrument_f: config.iv.weak_instrument_f,
        }
    }

    pub fn itt(
        &self,
        dataset: &Dataset,
        arms: &Arms,
        metric: Metric,
        kind: TestKind,
        window: OutcomeWindow,
    ) -> AnalysisResult<EffectEstimate> {
        estimate_itt(&self.estimator, dataset, arms, metric, kind, window)
    }

    pub fn did(
        &self,
        dataset: &Dataset,
        arms: &Arms,
        metric: Metric,
        options: DidOptions,
    ) -> AnalysisResult<EffectEstimate> {
        estimate_did(&self.estimator, dataset, arms, metric, options)
    }

    pub fn iv(
        &self,
        dataset: &Dataset,
        arms: &Arms,
        metric: Metric,
        window: OutcomeWindow,
    ) -> AnalysisResult<IvEstimate> {
        estimate_iv(&self.estimator, dataset, arms, metric, window, self.weak_instrument_f)
    }

    pub fn trend(
        &self,
        dataset: &Dataset,
        arms: &Arms,
        metric: Metric,
        kind: TestKind,
        mode: TrendMode,
    ) -> AnalysisResult<std::collections::BTreeMap<u32, AnalysisResult<EffectEstimate>>> {
        effect_by_period(&self.estimator, dataset, arms, metric, kind, mode)
    }
}

impl Default for CausalEstimator {
    fn default() -> Self {
        Self::new(&AnalysisConfig::default())
    }
}
