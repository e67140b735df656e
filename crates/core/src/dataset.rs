//! In-memory experiment data supplied by the host, plus read-only views
//! that collapse a unit's observation sequence into a single outcome.

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{Observation, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Which metric on an observation an analysis reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Continuous `value`, averaged per unit.
    Value,
    /// Binary `converted`, a unit converts if any observation converted.
    Conversion,
}

impl Metric {
    fn read(&self, obs: &Observation) -> Option<f64> {
        match self {
            Metric::Value => obs.value.filter(|v| v.is_finite()),
            Metric::Conversion => obs.converted.map(|c| if c { 1.0 } else { 0.0 }),
        }
    }

    fn aggregate(&self, values: &[f64]) -> f64 {
        match self {
            Metric::Value => values.iter().sum::<f64>() / values.len() as f64,
            Metric::Conversion => values.iter().cloned().fold(0.0, f64::max),
        }
    }
}

/// Time indices an outcome is computed over. Ranges are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeWindow {
    #[default]
    All,
    Since(u32),
    Before(u32),
    Range { start: u32, end: u32 },
}

impl OutcomeWindow {
    pub fn contains(&self, time: u32) -> bool {
        match *self {
            OutcomeWindow::All => true,
            OutcomeWindow::Since(start) => time >= start,
            OutcomeWindow::Before(end) => time < end,
            OutcomeWindow::Range { start, end } => time >= start && time < end,
        }
    }
}

/// The two assignment labels being compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arms {
    pub control: String,
    pub treatment: String,
}

impl Arms {
    pub fn new(control: impl Into<String>, treatment: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            treatment: treatment.into(),
        }
    }

    /// Split outcomes into (control, treatment) by assignment. Units on
    /// any other variant are left out.
    pub fn split<'a>(&self, outcomes: &'a [UnitOutcome]) -> (Vec<&'a UnitOutcome>, Vec<&'a UnitOutcome>) {
        let control = outcomes
            .iter()
            .filter(|o| o.assignment == self.control)
            .collect();
        let treatment = outcomes
            .iter()
            .filter(|o| o.assignment == self.treatment)
            .collect();
        (control, treatment)
    }

    /// 1.0 for the treatment label, 0.0 for control, `None` otherwise.
    pub fn indicator(&self, assignment: &str) -> Option<f64> {
        if assignment == self.treatment {
            Some(1.0)
        } else if assignment == self.control {
            Some(0.0)
        } else {
            None
        }
    }
}

/// One unit's observations collapsed over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub assignment: String,
    pub outcome: f64,
    pub received_treatment: bool,
    pub observations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub units: Vec<Unit>,
    pub observations: Vec<Observation>,
}

impl Dataset {
    pub fn new(units: Vec<Unit>, observations: Vec<Observation>) -> Self {
        Self {
            units,
            observations,
        }
    }

    pub fn from_json(json: &str) -> AnalysisResult<Self> {
        serde_json::from_str(json).map_err(|e| AnalysisError::InvalidInput(e.to_string()))
    }

    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Observations grouped per unit, each group in the order supplied.
    pub fn observations_by_unit(&self) -> BTreeMap<&str, Vec<&Observation>> {
        let mut grouped: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
        for obs in &self.observations {
            grouped.entry(obs.unit_id.as_str()).or_default().push(obs);
        }
        grouped
    }

    /// Fails on the first unit whose time indices decrease.
    pub fn check_time_order(&self) -> AnalysisResult<()> {
        for (unit_id, observations) in self.observations_by_unit() {
            for pair in observations.windows(2) {
                if pair[1].time < pair[0].time {
                    return Err(AnalysisError::UnorderedInput {
                        unit_id: unit_id.to_string(),
                        previous: pair[0].time,
                        next: pair[1].time,
                    });
                }
            }
        }
        Ok(())
    }

    /// One outcome per unit, in unit order. Units with no reading of the
    /// metric inside the window are skipped.
    pub fn unit_outcomes(&self, metric: Metric, window: OutcomeWindow) -> Vec<UnitOutcome> {
        let grouped = self.observations_by_unit();
        let mut outcomes = Vec::with_capacity(self.units.len());

        for unit in &self.units {
            let Some(observations) = grouped.get(unit.id.as_str()) else {
                continue;
            };
            let in_window: Vec<&&Observation> = observations
                .iter()
                .filter(|o| window.contains(o.time))
                .collect();
            let values: Vec<f64> = in_window.iter().filter_map(|o| metric.read(o)).collect();
            if values.is_empty() {
                continue;
            }
            outcomes.push(UnitOutcome {
                unit_id: unit.id.clone(),
                assignment: unit.assignment.clone(),
                outcome: metric.aggregate(&values),
                received_treatment: in_window.iter().any(|o| o.received_treatment),
                observations: values.len(),
            });
        }

        outcomes
    }

    /// Mean metric value per unit split at `start`: (pre, post). Either
    /// side is `None` when the unit has no reading there.
    pub fn pre_post(
        &self,
        metric: Metric,
        start: u32,
    ) -> BTreeMap<String, (Option<f64>, Option<f64>)> {
        let mut result = BTreeMap::new();
        for (unit_id, observations) in self.observations_by_unit() {
            let (mut pre, mut post) = (Vec::new(), Vec::new());
            for obs in observations {
                if let Some(v) = metric.read(obs) {
                    if obs.time < start {
                        pre.push(v);
                    } else {
                        post.push(v);
                    }
                }
            }
            let mean = |v: &[f64]| (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64);
            result.insert(unit_id.to_string(), (mean(&pre), mean(&post)));
        }
        result
    }

    /// Distinct time indices present, ascending.
    pub fn periods(&self) -> Vec<u32> {
        let mut periods: Vec<u32> = self.observations.iter().map(|o| o.time).collect();
        periods.sort_unstable();
        periods.dedup();
        periods
    }

    /// A new dataset restricted to the given units and their observations.
    pub fn subset(&self, unit_ids: &HashSet<&str>) -> Dataset {
        Dataset {
            units: self
                .units
                .iter()
                .filter(|u| unit_ids.contains(u.id.as_str()))
                .cloned()
                .collect(),
            observations: self
                .observations
                .iter()
                .filter(|o| unit_ids.contains(o.unit_id.as_str()))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        Dataset::new(
            vec![Unit::new("u1", "control"), Unit::new("u2", "treatment")],
            vec![
                Observation::continuous("u1", 0, 1.0, false),
                Observation::continuous("u1", 1, 3.0, false),
                Observation::continuous("u2", 0, 2.0, false),
                Observation::continuous("u2", 1, 6.0, true),
            ],
        )
    }

    #[test]
    fn test_unit_outcomes_average_window() {
        let ds = sample();
        let all = ds.unit_outcomes(Metric::Value, OutcomeWindow::All);
        assert_eq!(all.len(), 2);
        assert!((all[0].outcome - 2.0).abs() < 1e-12);
        assert!(all[1].received_treatment);

        let post = ds.unit_outcomes(Metric::Value, OutcomeWindow::Since(1));
        assert!((post[1].outcome - 6.0).abs() < 1e-12);

        let pre = ds.unit_outcomes(Metric::Value, OutcomeWindow::Before(1));
        assert!(!pre[1].received_treatment);
    }

    #[test]
    fn test_conversion_is_any() {
        let ds = Dataset::new(
            vec![Unit::new("u1", "a")],
            vec![
                Observation::binary("u1", 0, false, false),
                Observation::binary("u1", 1, true, false),
            ],
        );
        let out = ds.unit_outcomes(Metric::Conversion, OutcomeWindow::All);
        assert_eq!(out[0].outcome, 1.0);
        assert!(ds.unit_outcomes(Metric::Value, OutcomeWindow::All).is_empty());
    }

    #[test]
    fn test_check_time_order() {
        let mut ds = sample();
        assert!(ds.check_time_order().is_ok());
        ds.observations.push(Observation::continuous("u1", 0, 5.0, false));
        match ds.check_time_order() {
            Err(AnalysisError::UnorderedInput { unit_id, previous, next }) => {
                assert_eq!(unit_id, "u1");
                assert_eq!((previous, next), (1, 0));
            }
            other => panic!("expected unordered input, got {other:?}"),
        }
    }

    #[test]
    fn test_pre_post_and_subset() {
        let ds = sample();
        let pp = ds.pre_post(Metric::Value, 1);
        assert_eq!(pp["u2"], (Some(2.0), Some(6.0)));

        let ids: HashSet<&str> = ["u2"].into_iter().collect();
        let sub = ds.subset(&ids);
        assert_eq!(sub.units.len(), 1);
        assert_eq!(sub.observations.len(), 2);
        assert_eq!(ds.periods(), vec![0, 1]);
    }

    #[test]
    fn test_arms_split_ignores_other_variants() {
        let outcomes = vec![
            UnitOutcome {
                unit_id: "a".into(),
                assignment: "control".into(),
                outcome: 1.0,
                received_treatment: false,
                observations: 1,
            },
            UnitOutcome {
                unit_id: "b".into(),
                assignment: "other".into(),
                outcome: 1.0,
                received_treatment: false,
                observations: 1,
            },
        ];
        let arms = Arms::new("control", "treatment");
        let (c, t) = arms.split(&outcomes);
        assert_eq!(c.len(), 1);
        assert!(t.is_empty());
        assert_eq!(arms.indicator("other"), None);
    }

    #[test]
    fn test_dataset_from_json() {
        let json = r#"{
            "units": [{"id": "u1", "assignment": "control", "covariates": {"age": 31, "device": "mobile"}}],
            "observations": [{"unit_id": "u1", "time": 0, "converted": true}]
        }"#;
        let ds = Dataset::from_json(json).unwrap();
        assert_eq!(ds.units[0].covariates.len(), 2);
        assert_eq!(ds.observations[0].converted, Some(true));
        assert!(!ds.observations[0].received_treatment);
    }
}
