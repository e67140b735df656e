//! Statistical test library and effect estimator: Welch t, pooled
//! two-proportion z, chi-square independence and Mann-Whitney U tests
//! behind a single dispatch contract, plus power planning.

pub mod estimator;
pub mod hypothesis;
pub mod power;
pub mod summary;

pub use estimator::{estimate, EffectEstimator, MetricSeries};
pub use hypothesis::{
    compare_counts_categorical, compare_distributions_rank, compare_means, compare_proportions,
};
