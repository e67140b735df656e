//! Live allocators keyed by experiment and optional segment. Each arm set
//! sits behind its own mutex, so selects and updates on one experiment
//! never block another.

use abkit_core::config::AllocatorConfig;
use abkit_core::{AnalysisError, AnalysisResult, SegmentId};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::bandit::{AllocationPolicy, ArmStats, Reward, ThompsonAllocator};

pub type AllocatorKey = (Uuid, Option<SegmentId>);

pub struct AllocatorRegistry {
    allocators: DashMap<AllocatorKey, Arc<Mutex<ThompsonAllocator>>>,
    reward_threshold: f64,
}

impl AllocatorRegistry {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            allocators: DashMap::new(),
            reward_threshold: config.reward_threshold,
        }
    }

    /// Start allocating over `labels`. Replaces any allocator already
    /// registered under the same key.
    pub fn register<S: AsRef<str>>(
        &self,
        experiment_id: Uuid,
        segment: Option<SegmentId>,
        labels: &[S],
        policy: AllocationPolicy,
    ) -> AnalysisResult<()> {
        let allocator = ThompsonAllocator::new(labels)?
            .with_policy(policy)
            .with_reward_threshold(self.reward_threshold);
        self.allocators
            .insert((experiment_id, segment), Arc::new(Mutex::new(allocator)));
        info!(
            experiment_id = %experiment_id,
            segment = ?segment,
            arms = labels.len(),
            policy = ?policy,
            "Registered allocator"
        );
        Ok(())
    }

    pub fn get(&self, experiment_id: Uuid, segment: Option<SegmentId>) -> Option<Arc<Mutex<ThompsonAllocator>>> {
        self.allocators
            .get(&(experiment_id, segment))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn require(&self, experiment_id: Uuid, segment: Option<SegmentId>) -> AnalysisResult<Arc<Mutex<ThompsonAllocator>>> {
        self.get(experiment_id, segment).ok_or_else(|| {
            AnalysisError::InvalidInput(format!(
                "no allocator for experiment {experiment_id} segment {segment:?}"
            ))
        })
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        experiment_id: Uuid,
        segment: Option<SegmentId>,
        rng: &mut R,
    ) -> AnalysisResult<usize> {
        let allocator = self.require(experiment_id, segment)?;
        let arm = allocator.lock().select_arm(rng);
        Ok(arm)
    }

    pub fn update(
        &self,
        experiment_id: Uuid,
        segment: Option<SegmentId>,
        arm: usize,
        reward: Reward,
    ) -> AnalysisResult<()> {
        let allocator = self.require(experiment_id, segment)?;
        let result = allocator.lock().update(arm, reward);
        result
    }

    pub fn stats(&self, experiment_id: Uuid, segment: Option<SegmentId>) -> AnalysisResult<Vec<ArmStats>> {
        let allocator = self.require(experiment_id, segment)?;
        let stats = allocator.lock().stats();
        Ok(stats)
    }

    pub fn remove(&self, experiment_id: Uuid, segment: Option<SegmentId>) -> bool {
        self.allocators.remove(&(experiment_id, segment)).is_some()
    }

    pub fn len(&self) -> usize {
        self.allocators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocators.is_empty()
    }
}

impl Default for AllocatorRegistry {
    fn default() -> Self {
        Self::new(&AllocatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_segments_are_independent() {
        let registry = AllocatorRegistry::default();
        let experiment = Uuid::new_v4();
        registry
            .register(experiment, Some(0), &["a", "b"], AllocationPolicy::ThompsonSampling)
            .unwrap();
        registry
            .register(experiment, Some(1), &["a", "b"], AllocationPolicy::ThompsonSampling)
            .unwrap();

        for _ in 0..200 {
            registry.update(experiment, Some(0), 0, Reward::Binary(true)).unwrap();
            registry.update(experiment, Some(0), 1, Reward::Binary(false)).unwrap();
            registry.update(experiment, Some(1), 0, Reward::Binary(false)).unwrap();
            registry.update(experiment, Some(1), 1, Reward::Binary(true)).unwrap();
        }

        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(registry.select(experiment, Some(0), &mut rng).unwrap(), 0);
        assert_eq!(registry.select(experiment, Some(1), &mut rng).unwrap(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_key_is_invalid_input() {
        let registry = AllocatorRegistry::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = registry.select(Uuid::new_v4(), None, &mut rng).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
        assert!(registry.stats(Uuid::new_v4(), None).is_err());
    }

    #[test]
    fn test_concurrent_updates_are_all_recorded() {
        let registry = AllocatorRegistry::default();
        let experiment = Uuid::new_v4();
        registry
            .register(experiment, None, &["a", "b"], AllocationPolicy::ThompsonSampling)
            .unwrap();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..250 {
                        registry
                            .update(experiment, None, t % 2, Reward::Binary(i % 2 == 0))
                            .unwrap();
                    }
                });
            }
        });

        let stats = registry.stats(experiment, None).unwrap();
        assert_eq!(stats[0].pulls + stats[1].pulls, 1000);
        assert_eq!(stats[0].successes, 250);
        assert!(registry.remove(experiment, None));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_threshold_from_config() {
        let registry = AllocatorRegistry::new(&AllocatorConfig {
            reward_threshold: 10.0,
            seed: 0,
        });
        let experiment = Uuid::new_v4();
        registry
            .register(experiment, None, &["a"], AllocationPolicy::Ucb1)
            .unwrap();
        registry.update(experiment, None, 0, Reward::Continuous(9.0)).unwrap();
        let stats = registry.stats(experiment, None).unwrap();
        assert_eq!(stats[0].successes, 0);
        assert_eq!(stats[0].pulls, 1);
    }
}
