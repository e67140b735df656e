//! Adaptive allocator: Thompson sampling (or UCB1) over experiment arms,
//! with a concurrent registry of live arm sets.

pub mod bandit;
pub mod registry;

pub use bandit::{AllocationPolicy, ArmBelief, ArmStats, Reward, ThompsonAllocator};
pub use registry::{AllocatorKey, AllocatorRegistry};
