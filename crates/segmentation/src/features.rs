//! Covariates encoded as a dense feature matrix for distance computations.

use abkit_core::{AnalysisError, AnalysisResult, CovariateValue, Unit, UnitId};
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    Categorical,
}

/// One row per unit, in the order the units were given.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub unit_ids: Vec<UnitId>,
    /// Numeric covariates keep their name; categorical levels appear as
    /// `name=level`.
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

/// Numeric covariates are z-scored when `standardize` is set (a constant
/// column is only centered). Every categorical level gets its own
/// indicator column.
pub fn encode_units(units: &[&Unit], standardize: bool) -> AnalysisResult<FeatureMatrix> {
    let mut kinds: BTreeMap<&str, ColumnKind> = BTreeMap::new();
    let mut levels: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for unit in units {
        for (name, value) in &unit.covariates {
            let kind = match value {
                CovariateValue::Numeric(x) if !x.is_finite() => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "unit '{}' has a non-finite value for covariate '{name}'",
                        unit.id
                    )))
                }
                CovariateValue::Numeric(_) => ColumnKind::Numeric,
                CovariateValue::Categorical(level) => {
                    levels.entry(name.as_str()).or_default().insert(level.as_str());
                    ColumnKind::Categorical
                }
            };
            match kinds.insert(name.as_str(), kind) {
                Some(previous) if previous != kind => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "covariate '{name}' is numeric on some units and categorical on others"
                    )))
                }
                _ => {}
            }
        }
    }

    if kinds.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "units carry no covariates to segment on".to_string(),
        ));
    }

    let mut columns = Vec::new();
    for (name, kind) in &kinds {
        match kind {
            ColumnKind::Numeric => columns.push(name.to_string()),
            ColumnKind::Categorical => {
                for level in levels.get(name).into_iter().flatten() {
                    columns.push(format!("{name}={level}"));
                }
            }
        }
    }

    let mut values = Array2::<f64>::zeros((units.len(), columns.len()));
    for (i, unit) in units.iter().enumerate() {
        let mut j = 0;
        for (name, kind) in &kinds {
            let value = unit.covariates.get(*name).ok_or_else(|| {
                AnalysisError::InvalidInput(format!(
                    "unit '{}' lacks covariate '{name}' present on other units",
                    unit.id
                ))
            })?;
            match (kind, value) {
                (ColumnKind::Numeric, CovariateValue::Numeric(x)) => {
                    values[[i, j]] = *x;
                    j += 1;
                }
                (ColumnKind::Categorical, CovariateValue::Categorical(level)) => {
                    for l in levels.get(name).into_iter().flatten() {
                        values[[i, j]] = if *l == level.as_str() { 1.0 } else { 0.0 };
                        j += 1;
                    }
                }
                _ => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "unit '{}' has the wrong kind of value for covariate '{name}'",
                        unit.id
                    )))
                }
            }
        }
    }

    if standardize {
        let mut j = 0;
        for (name, kind) in &kinds {
            match kind {
                ColumnKind::Numeric => {
                    zscore_column(&mut values, j);
                    j += 1;
                }
                ColumnKind::Categorical => j += levels.get(name).map_or(0, BTreeSet::len),
            }
        }
    }

    Ok(FeatureMatrix {
        unit_ids: units.iter().map(|u| u.id.clone()).collect(),
        columns,
        values,
    })
}

fn zscore_column(values: &mut Array2<f64>, j: usize) {
    let mut column = values.column_mut(j);
    let n = column.len() as f64;
    let mean = column.sum() / n;
    let sd = (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    let scale = if sd > 0.0 { sd } else { 1.0 };
    column.mapv_inplace(|x| (x - mean) / scale);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_standardized_and_categorical_one_hot() {
        let units = [
            Unit::new("a", "A").with_numeric("spend", 10.0).with_category("device", "mobile"),
            Unit::new("b", "A").with_numeric("spend", 20.0).with_category("device", "desktop"),
            Unit::new("c", "B").with_numeric("spend", 30.0).with_category("device", "mobile"),
        ];
        let refs: Vec<&Unit> = units.iter().collect();
        let features = encode_units(&refs, true).unwrap();
        assert_eq!(features.columns, vec!["device=desktop", "device=mobile", "spend"]);
        assert_eq!(features.values.column(0).to_vec(), vec![0.0, 1.0, 0.0]);
        let spend = features.values.column(2).to_vec();
        assert!((spend[1]).abs() < 1e-12);
        assert!((spend[0] + spend[2]).abs() < 1e-12);
        assert!((spend[2] - 1.224_744_871).abs() < 1e-6);

        let raw = encode_units(&refs, false).unwrap();
        assert_eq!(raw.values[[2, 2]], 30.0);
    }

    #[test]
    fn test_missing_covariate_rejected() {
        let units = [
            Unit::new("a", "A").with_numeric("spend", 10.0),
            Unit::new("b", "A"),
        ];
        let refs: Vec<&Unit> = units.iter().collect();
        let err = encode_units(&refs, true).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(ref m) if m.contains("'b'")));
    }

    #[test]
    fn test_mixed_kinds_rejected() {
        let units = [
            Unit::new("a", "A").with_numeric("tier", 1.0),
            Unit::new("b", "A").with_category("tier", "gold"),
        ];
        let refs: Vec<&Unit> = units.iter().collect();
        assert!(encode_units(&refs, true).is_err());
    }
}
