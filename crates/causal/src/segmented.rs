//! Run any estimator within each segment, or once across all of them.

use abkit_core::{
    AnalysisError, AnalysisResult, AssumptionWarning, Dataset, EffectEstimate, SegmentId, UnitId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// One independent estimate per segment.
    #[default]
    PerSegment,
    /// A single estimate over every segmented unit.
    Pooled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedEstimates {
    /// A segment whose estimate failed keeps its error; the others still report.
    pub per_segment: BTreeMap<SegmentId, AnalysisResult<EffectEstimate>>,
    pub pooled: Option<EffectEstimate>,
}

impl SegmentedEstimates {
    /// Segments whose estimate succeeded.
    pub fn successful(&self) -> impl Iterator<Item = (&SegmentId, &EffectEstimate)> {
        self.per_segment
            .iter()
            .filter_map(|(segment, result)| result.as_ref().ok().map(|est| (segment, est)))
    }
}

/// Apply `estimate` per segment (or pooled) according to `pooling`.
///
/// Every unit in `dataset` must have a segment. Units with an assignment
/// outside the compared arms are passed through and ignored by the
/// estimator as usual.
pub fn by_segment<F>(
    dataset: &Dataset,
    segments: &BTreeMap<UnitId, SegmentId>,
    pooling: Pooling,
    estimate: F,
) -> AnalysisResult<SegmentedEstimates>
where
    F: Fn(&Dataset) -> AnalysisResult<EffectEstimate>,
{
    let mut members: BTreeMap<SegmentId, HashSet<&str>> = BTreeMap::new();
    for unit in &dataset.units {
        let segment = segments.get(&unit.id).ok_or_else(|| {
            AnalysisError::InvalidInput(format!("unit '{}' has no segment", unit.id))
        })?;
        members.entry(*segment).or_default().insert(unit.id.as_str());
    }

    match pooling {
        Pooling::PerSegment => {
            let mut per_segment = BTreeMap::new();
            for (segment, ids) in &members {
                let result = estimate(&dataset.subset(ids)).map(|est| est.with_segment(*segment));
                if let Err(e) = &result {
                    warn!(segment, error = %e, "Segment estimate failed");
                } else {
                    debug!(segment, units = ids.len(), "Segment estimate computed");
                }
                per_segment.insert(*segment, result);
            }
            Ok(SegmentedEstimates {
                per_segment,
                pooled: None,
            })
        }
        Pooling::Pooled => {
            let pooled = estimate(dataset)?.with_warning(AssumptionWarning::PooledAcrossSegments {
                segments: members.len(),
            });
            Ok(SegmentedEstimates {
                per_segment: BTreeMap::new(),
                pooled: Some(pooled),
            })
        }
    }
}
