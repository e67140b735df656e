//! Regression-adjusted effect estimation: design-matrix encoding,
//! Gaussian and logistic GLM fits, and naive-versus-adjusted reporting.

pub mod adjusted;
pub mod design;
pub mod glm;

pub use adjusted::{AdjustedEffect, RegressionAdjustedEstimator};
pub use design::{DesignMatrix, DesignRow, DesignSpec, EncodedDesign};
pub use glm::{fit, fit_with, Family, RegressionFit};
