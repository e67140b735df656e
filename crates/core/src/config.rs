use serde::Deserialize;

/// Root analysis configuration. Loaded from an optional config file and
/// environment variables with the prefix `ABKIT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,
    #[serde(default)]
    pub regression: RegressionConfig,
    #[serde(default)]
    pub iv: InstrumentConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegressionConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    /// First-stage F below this flags a weak instrument.
    #[serde(default = "default_weak_instrument_f")]
    pub weak_instrument_f: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationConfig {
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default = "default_kmeans_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_standardize")]
    pub standardize: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocatorConfig {
    /// Continuous rewards strictly above this count as a success.
    #[serde(default)]
    pub reward_threshold: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

// Default functions
fn default_confidence_level() -> f64 {
    0.95
}
fn default_significance_level() -> f64 {
    0.05
}
fn default_max_iterations() -> usize {
    50
}
fn default_tolerance() -> f64 {
    1e-8
}
fn default_weak_instrument_f() -> f64 {
    10.0
}
fn default_clusters() -> usize {
    4
}
fn default_kmeans_iterations() -> usize {
    100
}
fn default_seed() -> u64 {
    42
}
fn default_standardize() -> bool {
    true
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            weak_instrument_f: default_weak_instrument_f(),
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            clusters: default_clusters(),
            max_iterations: default_kmeans_iterations(),
            seed: default_seed(),
            standardize: default_standardize(),
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            reward_threshold: 0.0,
            seed: default_seed(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            confidence_level: default_confidence_level(),
            significance_level: default_significance_level(),
            regression: RegressionConfig::default(),
            iv: InstrumentConfig::default(),
            segmentation: SegmentationConfig::default(),
            allocator: AllocatorConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from an optional file and environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("ABKIT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), crate::AnalysisError> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(crate::AnalysisError::Config(format!(
                "confidence_level must be in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(crate::AnalysisError::Config(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            )));
        }
        if self.segmentation.clusters == 0 {
            return Err(crate::AnalysisError::Config(
                "segmentation.clusters must be at least 1".to_string(),
            ));
        }
        if self.segmentation.max_iterations == 0 {
            return Err(crate::AnalysisError::Config(
                "segmentation.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.regression.max_iterations == 0 {
            return Err(crate::AnalysisError::Config(
                "regression.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.confidence_level, 0.95);
        assert_eq!(cfg.iv.weak_instrument_f, 10.0);
        assert_eq!(cfg.segmentation.clusters, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"confidence_level": 0.9, "segmentation": {"clusters": 3}}"#)
                .unwrap();
        assert_eq!(cfg.confidence_level, 0.9);
        assert_eq!(cfg.segmentation.clusters, 3);
        assert_eq!(cfg.segmentation.seed, 42);
        assert_eq!(cfg.regression.max_iterations, 50);
    }

    #[test]
    fn test_validate_rejects_bad_levels() {
        let cfg = AnalysisConfig {
            confidence_level: 1.5,
            ..AnalysisConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_iteration_limits() {
        let mut cfg = AnalysisConfig::default();
        cfg.segmentation.max_iterations = 0;
        assert!(matches!(
            cfg.validate(),
            Err(crate::AnalysisError::Config(ref m)) if m.contains("segmentation.max_iterations")
        ));

        let mut cfg = AnalysisConfig::default();
        cfg.regression.max_iterations = 0;
        assert!(matches!(
            cfg.validate(),
            Err(crate::AnalysisError::Config(ref m)) if m.contains("regression.max_iterations")
        ));
    }
}
