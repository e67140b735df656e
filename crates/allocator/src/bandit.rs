//! Multi-armed bandit over experiment arms: Thompson sampling on
//! Beta-Bernoulli beliefs, with UCB1 as a deterministic alternative.

use abkit_core::{AnalysisError, AnalysisResult};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use statrs::distribution::ContinuousCDF;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    #[default]
    ThompsonSampling,
    Ucb1,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reward {
    Binary(bool),
    /// Compared against the allocator's reward threshold.
    Continuous(f64),
}

/// Beta(successes, failures) belief for one arm. Both counters start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmBelief {
    pub label: String,
    pub successes: u64,
    pub failures: u64,
}

impl ArmBelief {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            successes: 1,
            failures: 1,
        }
    }

    pub fn pulls(&self) -> u64 {
        self.successes + self.failures - 2
    }

    pub fn posterior_mean(&self) -> f64 {
        self.successes as f64 / (self.successes + self.failures) as f64
    }

    fn observed_rate(&self) -> f64 {
        match self.pulls() {
            0 => 0.0,
            n => (self.successes - 1) as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub label: String,
    pub pulls: u64,
    pub successes: u64,
    pub posterior_mean: f64,
    pub credible_interval_lower: f64,
    pub credible_interval_upper: f64,
    pub traffic_share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThompsonAllocator {
    arms: Vec<ArmBelief>,
    policy: AllocationPolicy,
    reward_threshold: f64,
}

impl ThompsonAllocator {
    pub fn new<S: AsRef<str>>(labels: &[S]) -> AnalysisResult<Self> {
        if labels.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "allocator needs at least one arm".to_string(),
            ));
        }
        Ok(Self {
            arms: labels.iter().map(|l| ArmBelief::new(l.as_ref())).collect(),
            policy: AllocationPolicy::ThompsonSampling,
            reward_threshold: 0.0,
        })
    }

    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reward_threshold(mut self, threshold: f64) -> Self {
        self.reward_threshold = threshold;
        self
    }

    pub fn arms(&self) -> &[ArmBelief] {
        &self.arms
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    pub fn arm_index(&self, label: &str) -> Option<usize> {
        self.arms.iter().position(|a| a.label == label)
    }

    /// Pick the arm to serve next. UCB1 ignores `rng`.
    pub fn select_arm<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self.policy {
            AllocationPolicy::ThompsonSampling => self.thompson(rng),
            AllocationPolicy::Ucb1 => self.ucb1(),
        }
    }

    fn thompson<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let mut best_sample = f64::NEG_INFINITY;
        let mut best_arm = 0;

        for (i, arm) in self.arms.iter().enumerate() {
            let sample = Beta::new(arm.successes as f64, arm.failures as f64)
                .map(|beta| beta.sample(rng))
                .unwrap_or_else(|_| arm.posterior_mean());
            if sample > best_sample {
                best_sample = sample;
                best_arm = i;
            }
        }

        best_arm
    }

    fn ucb1(&self) -> usize {
        if let Some(unpulled) = self.arms.iter().position(|a| a.pulls() == 0) {
            return unpulled;
        }

        let log_total = (self.total_pulls() as f64).ln();
        let mut best_score = f64::NEG_INFINITY;
        let mut best_arm = 0;

        for (i, arm) in self.arms.iter().enumerate() {
            let exploration = (2.0 * log_total / arm.pulls() as f64).sqrt();
            let score = arm.observed_rate() + exploration;
            if score > best_score {
                best_score = score;
                best_arm = i;
            }
        }

        best_arm
    }

    /// Fold one observed reward into the arm's belief.
    pub fn update(&mut self, arm: usize, reward: Reward) -> AnalysisResult<()> {
        let success = match reward {
            Reward::Binary(converted) => converted,
            Reward::Continuous(value) if value.is_nan() => {
                return Err(AnalysisError::InvalidInput(format!(
                    "reward for arm {arm} is NaN"
                )))
            }
            Reward::Continuous(value) => value > self.reward_threshold,
        };

        let n_arms = self.arms.len();
        let belief = self.arms.get_mut(arm).ok_or_else(|| {
            AnalysisError::InvalidInput(format!("arm {arm} out of range for {n_arms} arms"))
        })?;
        if success {
            belief.successes += 1;
        } else {
            belief.failures += 1;
        }

        debug!(
            arm = %belief.label,
            success,
            successes = belief.successes,
            failures = belief.failures,
            "Allocator belief updated"
        );
        Ok(())
    }

    fn total_pulls(&self) -> u64 {
        self.arms.iter().map(ArmBelief::pulls).sum()
    }

    pub fn stats(&self) -> Vec<ArmStats> {
        let total = self.total_pulls();
        self.arms
            .iter()
            .map(|arm| {
                let (lower, upper) =
                    statrs::distribution::Beta::new(arm.successes as f64, arm.failures as f64)
                        .map(|beta| (beta.inverse_cdf(0.025), beta.inverse_cdf(0.975)))
                        .unwrap_or((0.0, 1.0));
                let traffic_share = if total > 0 {
                    arm.pulls() as f64 / total as f64
                } else {
                    1.0 / self.arms.len() as f64
                };
                ArmStats {
                    label: arm.label.clone(),
                    pulls: arm.pulls(),
                    successes: arm.successes - 1,
                    posterior_mean: arm.posterior_mean(),
                    credible_interval_lower: lower,
                    credible_interval_upper: upper,
                    traffic_share,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn run(allocator: &mut ThompsonAllocator, rates: &[f64], rounds: usize, seed: u64) -> Vec<usize> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut chosen = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            let arm = allocator.select_arm(&mut rng);
            let converted = rng.gen::<f64>() < rates[arm];
            allocator.update(arm, Reward::Binary(converted)).unwrap();
            chosen.push(arm);
        }
        chosen
    }

    #[test]
    fn test_thompson_converges_on_better_arm() {
        let mut allocator = ThompsonAllocator::new(&["good", "bad"]).unwrap();
        let chosen = run(&mut allocator, &[0.9, 0.1], 1000, 7);
        let good_in_tail = chosen[900..].iter().filter(|&&a| a == 0).count();
        assert!(good_in_tail >= 90, "good arm chosen {good_in_tail}/100");

        let stats = allocator.stats();
        assert!(stats[0].traffic_share > 0.8);
        assert!(stats[0].posterior_mean > 0.8);
    }

    #[test]
    fn test_same_seed_same_choices() {
        let mut a = ThompsonAllocator::new(&["x", "y", "z"]).unwrap();
        let mut b = ThompsonAllocator::new(&["x", "y", "z"]).unwrap();
        assert_eq!(
            run(&mut a, &[0.3, 0.5, 0.4], 200, 99),
            run(&mut b, &[0.3, 0.5, 0.4], 200, 99)
        );
    }

    #[test]
    fn test_continuous_reward_threshold() {
        let mut allocator = ThompsonAllocator::new(&["a"]).unwrap().with_reward_threshold(5.0);
        allocator.update(0, Reward::Continuous(5.0)).unwrap();
        allocator.update(0, Reward::Continuous(5.5)).unwrap();
        assert_eq!(allocator.arms()[0].successes, 2);
        assert_eq!(allocator.arms()[0].failures, 2);
    }

    #[test]
    fn test_invalid_updates() {
        let mut allocator = ThompsonAllocator::new(&["a", "b"]).unwrap();
        assert!(allocator.update(2, Reward::Binary(true)).is_err());
        assert!(allocator.update(0, Reward::Continuous(f64::NAN)).is_err());
        assert_eq!(allocator.arms()[0].pulls(), 0);
        assert!(ThompsonAllocator::new::<&str>(&[]).is_err());
    }

    #[test]
    fn test_ucb1_tries_every_arm_then_exploits() {
        let mut allocator = ThompsonAllocator::new(&["a", "b", "c"])
            .unwrap()
            .with_policy(AllocationPolicy::Ucb1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for expected in 0..3 {
            let arm = allocator.select_arm(&mut rng);
            assert_eq!(arm, expected);
            allocator.update(arm, Reward::Binary(arm == 1)).unwrap();
        }
        let chosen = run(&mut allocator, &[0.1, 0.8, 0.1], 500, 3);
        let best = chosen.iter().filter(|&&a| a == 1).count();
        assert!(best > 350, "{best}");
    }

    #[test]
    fn test_credible_interval_narrows() {
        let mut allocator = ThompsonAllocator::new(&["a"]).unwrap();
        let prior = allocator.stats()[0].clone();
        assert!((prior.credible_interval_lower - 0.025).abs() < 1e-4);
        assert!((prior.credible_interval_upper - 0.975).abs() < 1e-4);
        assert_eq!(prior.traffic_share, 1.0);
        for i in 0..200 {
            allocator.update(0, Reward::Binary(i % 4 == 0)).unwrap();
        }
        let s = allocator.stats()[0].clone();
        assert!(s.credible_interval_upper - s.credible_interval_lower < 0.15);
        assert!(s.credible_interval_lower < 0.25 && 0.25 < s.credible_interval_upper);
        assert_eq!(s.pulls, 200);
        assert_eq!(s.successes, 50);
    }
}
