//! Design-matrix encoding. Numeric covariates enter as-is so coefficients
//! stay in natural units; categorical covariates are one-hot encoded
//! against a reference level that gets no column.

use abkit_core::{AnalysisError, AnalysisResult, CovariateValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const INTERCEPT: &str = "intercept";
pub const TREATMENT: &str = "treatment";

/// Dense row-major design matrix with named columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignMatrix {
    names: Vec<String>,
    rows: usize,
    data: Vec<f64>,
}

impl DesignMatrix {
    pub fn from_rows(names: Vec<String>, rows: &[Vec<f64>]) -> AnalysisResult<Self> {
        let cols = names.len();
        if cols == 0 {
            return Err(AnalysisError::InvalidInput(
                "design matrix needs at least one column".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(AnalysisError::InvalidInput(format!(
                    "design row {i} has {} values, expected {cols}",
                    row.len()
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(AnalysisError::InvalidInput(format!(
                    "design row {i} contains a non-finite value"
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            names,
            rows: rows.len(),
            data,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn n_rows(&self) -> usize {
        self.rows
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.data[i * self.n_cols() + j]).collect()
    }

    pub(crate) fn to_matrix(&self) -> nalgebra::DMatrix<f64> {
        nalgebra::DMatrix::from_row_slice(self.rows, self.n_cols(), &self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CovariateSpec {
    Numeric {
        name: String,
    },
    Categorical {
        name: String,
        /// Baseline level. Defaults to the lexicographically smallest.
        reference: Option<String>,
    },
}

impl CovariateSpec {
    pub fn name(&self) -> &str {
        match self {
            CovariateSpec::Numeric { name } | CovariateSpec::Categorical { name, .. } => name,
        }
    }
}

/// How a categorical covariate was encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoding {
    pub name: String,
    pub reference: String,
    pub levels: Vec<String>,
}

/// One row to encode: a unit's covariates and its treatment indicator.
#[derive(Debug, Clone, Copy)]
pub struct DesignRow<'a> {
    pub covariates: &'a BTreeMap<String, CovariateValue>,
    pub treatment: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedDesign {
    pub matrix: DesignMatrix,
    pub encodings: Vec<CategoricalEncoding>,
}

/// Column layout: intercept, treatment, then covariates in the order added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSpec {
    pub intercept: bool,
    pub covariates: Vec<CovariateSpec>,
}

impl DesignSpec {
    pub fn new() -> Self {
        Self {
            intercept: true,
            covariates: Vec::new(),
        }
    }

    pub fn numeric(mut self, name: impl Into<String>) -> Self {
        self.covariates.push(CovariateSpec::Numeric { name: name.into() });
        self
    }

    pub fn categorical(mut self, name: impl Into<String>, reference: Option<&str>) -> Self {
        self.covariates.push(CovariateSpec::Categorical {
            name: name.into(),
            reference: reference.map(str::to_string),
        });
        self
    }

    /// The same layout with every covariate dropped.
    pub fn treatment_only(&self) -> Self {
        Self {
            intercept: self.intercept,
            covariates: Vec::new(),
        }
    }

    pub fn build(&self, rows: &[DesignRow<'_>]) -> AnalysisResult<EncodedDesign> {
        let mut names = Vec::new();
        if self.intercept {
            names.push(INTERCEPT.to_string());
        }
        names.push(TREATMENT.to_string());

        let mut encodings = Vec::new();
        for spec in &self.covariates {
            match spec {
                CovariateSpec::Numeric { name } => names.push(name.clone()),
                CovariateSpec::Categorical { name, reference } => {
                    let encoding = Self::encode_levels(name, reference.as_deref(), rows)?;
                    for level in encoding.levels.iter().filter(|l| **l != encoding.reference) {
                        names.push(format!("{name}[{level}]"));
                    }
                    encodings.push(encoding);
                }
            }
        }

        let mut matrix_rows = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(names.len());
            if self.intercept {
                values.push(1.0);
            }
            values.push(row.treatment);

            let mut encoding_iter = encodings.iter();
            for spec in &self.covariates {
                let value = row.covariates.get(spec.name()).ok_or_else(|| {
                    AnalysisError::InvalidInput(format!(
                        "design row {i} is missing covariate '{}'",
                        spec.name()
                    ))
                })?;
                match (spec, value) {
                    (CovariateSpec::Numeric { .. }, CovariateValue::Numeric(x)) => values.push(*x),
                    (CovariateSpec::Categorical { .. }, CovariateValue::Categorical(level)) => {
                        // Encodings were pushed in covariate order.
                        if let Some(encoding) = encoding_iter.next() {
                            for l in encoding.levels.iter().filter(|l| **l != encoding.reference) {
                                values.push(if l == level { 1.0 } else { 0.0 });
                            }
                        }
                    }
                    _ => {
                        return Err(AnalysisError::InvalidInput(format!(
                            "design row {i}: covariate '{}' has the wrong type",
                            spec.name()
                        )))
                    }
                }
            }
            matrix_rows.push(values);
        }

        Ok(EncodedDesign {
            matrix: DesignMatrix::from_rows(names, &matrix_rows)?,
            encodings,
        })
    }

    fn encode_levels(
        name: &str,
        reference: Option<&str>,
        rows: &[DesignRow<'_>],
    ) -> AnalysisResult<CategoricalEncoding> {
        let levels: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| match r.covariates.get(name) {
                Some(CovariateValue::Categorical(level)) => Some(level.clone()),
                _ => None,
            })
            .collect();
        let levels: Vec<String> = levels.into_iter().collect();
        let reference = match reference {
            Some(r) if levels.iter().any(|l| l == r) => r.to_string(),
            Some(r) => {
                return Err(AnalysisError::InvalidInput(format!(
                    "reference level '{r}' does not occur in covariate '{name}'"
                )))
            }
            None => levels.first().cloned().ok_or_else(|| {
                AnalysisError::InvalidInput(format!("covariate '{name}' has no categorical values"))
            })?,
        };
        Ok(CategoricalEncoding {
            name: name.to_string(),
            reference,
            levels,
        })
    }
}

impl Default for DesignSpec {
    fn default() -> Self {
        Self::new()
    }
}
