use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case", tag = "error", content = "detail")]
pub enum AnalysisError {
    #[error("Insufficient data for {test}: {arm} has {actual} observations, need at least {required}")]
    InsufficientData {
        test: String,
        arm: String,
        required: usize,
        actual: usize,
    },

    #[error("Degenerate input for {test}: {reason}")]
    DegenerateInput { test: String, reason: String },

    #[error("Unit {unit_id} is missing its {period} observation (treatment start {treatment_start})")]
    MissingPeriod {
        unit_id: String,
        period: Period,
        treatment_start: u32,
    },

    #[error("Unit {unit_id} has out-of-order observations: time {next} follows {previous}")]
    UnorderedInput {
        unit_id: String,
        previous: u32,
        next: u32,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Which side of the treatment start an observation falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Pre,
    Post,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Pre => write!(f, "pre-period"),
            Period::Post => write!(f, "post-period"),
        }
    }
}

impl AnalysisError {
    pub fn degenerate(test: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalysisError::DegenerateInput {
            test: test.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(
        test: impl Into<String>,
        arm: impl Into<String>,
        required: usize,
        actual: usize,
    ) -> Self {
        AnalysisError::InsufficientData {
            test: test.into(),
            arm: arm.into(),
            required,
            actual,
        }
    }
}

impl From<config::ConfigError> for AnalysisError {
    fn from(err: config::ConfigError) -> Self {
        AnalysisError::Config(err.to_string())
    }
}
