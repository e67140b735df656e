use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type UnitId = String;
pub type SegmentId = usize;

/// A named feature value attached to a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CovariateValue {
    Numeric(f64),
    Categorical(String),
}

/// An experimental subject. Assignment is fixed once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub assignment: String,
    #[serde(default)]
    pub covariates: BTreeMap<String, CovariateValue>,
}

impl Unit {
    pub fn new(id: impl Into<String>, assignment: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            assignment: assignment.into(),
            covariates: BTreeMap::new(),
        }
    }

    pub fn with_numeric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.covariates
            .insert(name.into(), CovariateValue::Numeric(value));
        self
    }

    pub fn with_category(mut self, name: impl Into<String>, level: impl Into<String>) -> Self {
        self.covariates
            .insert(name.into(), CovariateValue::Categorical(level.into()));
        self
    }
}

/// One outcome record for a unit at an ordinal time index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub unit_id: UnitId,
    pub time: u32,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub converted: Option<bool>,
    /// Whether the unit actually received treatment at this point,
    /// which may disagree with its assignment.
    #[serde(default)]
    pub received_treatment: bool,
}

impl Observation {
    pub fn continuous(
        unit_id: impl Into<String>,
        time: u32,
        value: f64,
        received_treatment: bool,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            time,
            value: Some(value),
            converted: None,
            received_treatment,
        }
    }

    pub fn binary(
        unit_id: impl Into<String>,
        time: u32,
        converted: bool,
        received_treatment: bool,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            time,
            value: None,
            converted: Some(converted),
            received_treatment,
        }
    }
}

// ─── Estimates ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationStrategy {
    Naive,
    IntentionToTreat,
    DifferenceInDifferences,
    InstrumentalVariable,
    RegressionAdjusted,
}

/// Hypothesis tests the effect estimator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    WelchT,
    TwoProportionZ,
    ChiSquare,
    MannWhitneyU,
}

/// How the uncertainty on an estimate was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "test")]
pub enum Inference {
    Test(TestKind),
    OrdinaryLeastSquares,
    LogisticWald,
    TwoStageLeastSquares,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub level: f64,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSample {
    pub label: String,
    pub n: usize,
}

/// Non-fatal conditions attached to an estimate instead of failing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AssumptionWarning {
    /// The instrument is assumed to affect the outcome only through
    /// received treatment; the data cannot confirm this.
    ExclusionRestrictionUnverified,
    WeakInstrument { first_stage_f: f64, threshold: f64 },
    UnitsExcluded { count: usize, reason: String },
    PooledAcrossSegments { segments: usize },
    NonConvergence { iterations: usize },
}

/// Result of any estimator. Always records the identification strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    pub strategy: IdentificationStrategy,
    pub inference: Inference,
    pub estimate: f64,
    pub standard_error: Option<f64>,
    pub confidence_interval: Option<ConfidenceInterval>,
    pub statistic: f64,
    pub degrees_of_freedom: Option<f64>,
    pub p_value: f64,
    pub arms: Vec<ArmSample>,
    pub segment: Option<SegmentId>,
    pub warnings: Vec<AssumptionWarning>,
}

impl EffectEstimate {
    pub fn with_strategy(mut self, strategy: IdentificationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Relabel the two arms, A first, keeping their sample sizes.
    pub fn with_arm_labels(mut self, label_a: &str, label_b: &str) -> Self {
        for (arm, label) in self.arms.iter_mut().zip([label_a, label_b]) {
            arm.label = label.to_string();
        }
        self
    }

    pub fn with_segment(mut self, segment: SegmentId) -> Self {
        self.segment = Some(segment);
        self
    }

    pub fn with_warning(mut self, warning: AssumptionWarning) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }

    pub fn total_sample_size(&self) -> usize {
        self.arms.iter().map(|a| a.n).sum()
    }
}
