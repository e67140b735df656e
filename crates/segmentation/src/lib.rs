//! Segmentation index: partitions units into segments by clustering their
//! covariates, so effects can be estimated within comparable groups.

pub mod features;
pub mod kmeans;

pub use features::{encode_units, FeatureMatrix};
pub use kmeans::{kmeans, KMeansFit};

use abkit_core::config::SegmentationConfig;
use abkit_core::{AnalysisError, AnalysisResult, SegmentId, Unit, UnitId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

const KMEANS: &str = "kmeans";

/// Every unit's segment. Segments are numbered in order of their first
/// member by unit id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentAssignment {
    pub segments: BTreeMap<UnitId, SegmentId>,
    pub columns: Vec<String>,
    /// One row per segment, in encoded feature space.
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl SegmentAssignment {
    pub fn segment_of(&self, unit_id: &str) -> Option<SegmentId> {
        self.segments.get(unit_id).copied()
    }

    pub fn members(&self, segment: SegmentId) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|(_, &s)| s == segment)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn sizes(&self) -> BTreeMap<SegmentId, usize> {
        let mut sizes = BTreeMap::new();
        for segment in self.segments.values() {
            *sizes.entry(*segment).or_insert(0) += 1;
        }
        sizes
    }
}

pub fn assign_segments<R: Rng + ?Sized>(
    units: &[Unit],
    config: &SegmentationConfig,
    rng: &mut R,
) -> AnalysisResult<SegmentAssignment> {
    let k = config.clusters;
    if k == 0 {
        return Err(AnalysisError::InvalidInput(
            "cluster count must be at least 1".to_string(),
        ));
    }
    if config.max_iterations == 0 {
        return Err(AnalysisError::InvalidInput(
            "k-means needs at least one iteration".to_string(),
        ));
    }
    if units.len() < k {
        return Err(AnalysisError::insufficient(KMEANS, "units", k, units.len()));
    }

    let mut sorted: Vec<&Unit> = units.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    let mut seen = HashSet::with_capacity(sorted.len());
    for unit in &sorted {
        if !seen.insert(unit.id.as_str()) {
            return Err(AnalysisError::InvalidInput(format!(
                "unit '{}' appears more than once",
                unit.id
            )));
        }
    }

    let features = encode_units(&sorted, config.standardize)?;
    let fit = kmeans(&features.values, k, config.max_iterations, rng);
    if !fit.converged {
        warn!(
            iterations = fit.iterations,
            "k-means stopped before assignments settled"
        );
    }

    // Renumber by first appearance so segment ids do not depend on seeding order.
    let mut renumber = vec![None; k];
    let mut next = 0;
    for &label in &fit.labels {
        if renumber[label].is_none() {
            renumber[label] = Some(next);
            next += 1;
        }
    }
    let mut order: Vec<(usize, usize)> = renumber
        .iter()
        .enumerate()
        .filter_map(|(old, new)| new.map(|n| (n, old)))
        .collect();
    order.sort_unstable();

    let segments = features
        .unit_ids
        .iter()
        .zip(&fit.labels)
        .map(|(id, &label)| (id.clone(), renumber[label].unwrap_or(label)))
        .collect();
    let centroids = order
        .iter()
        .map(|&(_, old)| fit.centroids.row(old).to_vec())
        .collect();

    info!(
        units = sorted.len(),
        clusters = k,
        inertia = fit.inertia,
        iterations = fit.iterations,
        "Segments assigned"
    );

    Ok(SegmentAssignment {
        segments,
        columns: features.columns,
        centroids,
        inertia: fit.inertia,
        iterations: fit.iterations,
        converged: fit.converged,
    })
}

/// [`assign_segments`] driven by a generator seeded from `config.seed`.
pub fn assign_segments_seeded(
    units: &[Unit],
    config: &SegmentationConfig,
) -> AnalysisResult<SegmentAssignment> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    assign_segments(units, config, &mut rng)
}
