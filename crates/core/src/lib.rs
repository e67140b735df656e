pub mod config;
pub mod dataset;
pub mod error;
pub mod experimentation;
pub mod types;

pub use config::AnalysisConfig;
pub use dataset::{Arms, Dataset, Metric, OutcomeWindow, UnitOutcome};
pub use error::{AnalysisError, AnalysisResult, Period};
pub use experimentation::TrafficSplit;
pub use types::{
    ArmSample, AssumptionWarning, ConfidenceInterval, CovariateValue, EffectEstimate,
    IdentificationStrategy, Inference, Observation, SegmentId, TestKind, Unit, UnitId,
};
