//! Deterministic variant assignment for randomized experiments.

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::Unit;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantWeight {
    pub label: String,
    pub weight: f64,
}

/// Hash-based traffic split. The same salt and unit id always land in the
/// same variant, so assignment can be recomputed for audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSplit {
    salt: String,
    variants: Vec<VariantWeight>,
}

impl TrafficSplit {
    pub fn new(salt: impl Into<String>, variants: Vec<VariantWeight>) -> AnalysisResult<Self> {
        if variants.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "traffic split needs at least one variant".to_string(),
            ));
        }
        if variants.iter().any(|v| !(v.weight > 0.0) || !v.weight.is_finite()) {
            return Err(AnalysisError::InvalidInput(
                "variant weights must be positive and finite".to_string(),
            ));
        }
        let total: f64 = variants.iter().map(|v| v.weight).sum();
        let variants = variants
            .into_iter()
            .map(|v| VariantWeight {
                weight: v.weight / total,
                label: v.label,
            })
            .collect();
        Ok(Self {
            salt: salt.into(),
            variants,
        })
    }

    /// Even split over the given labels.
    pub fn uniform<S: AsRef<str>>(salt: impl Into<String>, labels: &[S]) -> AnalysisResult<Self> {
        let variants = labels
            .iter()
            .map(|l| VariantWeight {
                label: l.as_ref().to_string(),
                weight: 1.0,
            })
            .collect();
        Self::new(salt, variants)
    }

    pub fn assign(&self, unit_id: &str) -> &str {
        let hash = Self::hash_unit(&self.salt, unit_id);
        let normalized = (hash % 10_000) as f64 / 10_000.0;

        let mut cumulative = 0.0;
        for variant in &self.variants {
            cumulative += variant.weight;
            if normalized < cumulative {
                return &variant.label;
            }
        }
        // Rounding can leave the cumulative sum just under 1.0.
        &self.variants[self.variants.len() - 1].label
    }

    /// Build a unit carrying this split's assignment.
    pub fn enroll(&self, unit_id: impl Into<String>) -> Unit {
        let id = unit_id.into();
        let assignment = self.assign(&id).to_string();
        Unit::new(id, assignment)
    }

    fn hash_unit(salt: &str, unit_id: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in salt.bytes().chain(std::iter::once(b':')).chain(unit_id.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_is_deterministic() {
        let split = TrafficSplit::uniform("exp-1", &["control", "treatment"]).unwrap();
        for i in 0..100 {
            let id = format!("user-{i}");
            assert_eq!(split.assign(&id), split.assign(&id));
        }
    }

    #[test]
    fn test_split_is_roughly_balanced() {
        let split = TrafficSplit::uniform("exp-2", &["control", "treatment"]).unwrap();
        let treated = (0..10_000)
            .filter(|i| split.assign(&format!("user-{i}")) == "treatment")
            .count();
        assert!((4_500..5_500).contains(&treated), "treated = {treated}");
    }

    #[test]
    fn test_salt_changes_assignment() {
        let a = TrafficSplit::uniform("exp-a", &["x", "y"]).unwrap();
        let b = TrafficSplit::uniform("exp-b", &["x", "y"]).unwrap();
        let differ = (0..1_000)
            .filter(|i| {
                let id = format!("user-{i}");
                a.assign(&id) != b.assign(&id)
            })
            .count();
        assert!(differ > 100);
    }

    #[test]
    fn test_rejects_bad_weights() {
        assert!(TrafficSplit::new("e", vec![]).is_err());
        let bad = vec![VariantWeight {
            label: "a".into(),
            weight: 0.0,
        }];
        assert!(TrafficSplit::new("e", bad).is_err());
    }

    #[test]
    fn test_enroll_sets_assignment() {
        let split = TrafficSplit::uniform("exp", &["only"]).unwrap();
        let unit = split.enroll("u-1");
        assert_eq!(unit.assignment, "only");
        assert_eq!(unit.id, "u-1");
    }
}
