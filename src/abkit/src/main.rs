//! abkit: experiment analysis from the command line.
//!
//! Reads a JSON dataset, runs one analysis and prints the result as JSON.

use abkit_allocator::{AllocationPolicy, Reward, ThompsonAllocator};
use abkit_causal::{CausalEstimator, DidOptions, TrendMode};
use abkit_core::{AnalysisConfig, Arms, Dataset, Metric, OutcomeWindow, TestKind};
use abkit_regression::{DesignSpec, Family, RegressionAdjustedEstimator};
use abkit_segmentation::assign_segments_seeded;
use abkit_stats::power;
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "abkit")]
#[command(about = "Treatment-effect estimation and adaptive allocation for A/B experiments")]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON); ABKIT__* environment variables apply on top
    #[arg(long, env = "ABKIT_CONFIG")]
    config: Option<String>,

    /// Confidence level for intervals (overrides config)
    #[arg(long, env = "ABKIT__CONFIDENCE_LEVEL")]
    confidence_level: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Estimate a treatment effect under one identification strategy
    Estimate {
        #[command(flatten)]
        input: DatasetArgs,

        #[arg(long, value_enum, default_value_t = Strategy::Itt)]
        strategy: Strategy,

        /// Hypothesis test for ITT estimates
        #[arg(long, value_enum, default_value_t = TestArg::WelchT)]
        test: TestArg,

        /// First post-treatment period (DiD), or start of the outcome window
        #[arg(long)]
        treatment_start: Option<u32>,

        /// Drop DiD units lacking a pre- or post-period observation
        #[arg(long, default_value_t = false)]
        exclude_incomplete: bool,
    },

    /// ITT estimate at every period, to follow an experiment over time
    Trend {
        #[command(flatten)]
        input: DatasetArgs,

        #[arg(long, value_enum, default_value_t = TestArg::WelchT)]
        test: TestArg,

        /// Accumulate periods instead of estimating each on its own
        #[arg(long, default_value_t = false)]
        cumulative: bool,
    },

    /// Regression-adjusted effect next to the naive one
    Adjust {
        #[command(flatten)]
        input: DatasetArgs,

        /// Numeric covariate to adjust for (repeatable)
        #[arg(long = "numeric")]
        numeric: Vec<String>,

        /// Categorical covariate to adjust for, optionally NAME=REFERENCE (repeatable)
        #[arg(long = "categorical")]
        categorical: Vec<String>,
    },

    /// Cluster units into segments by their covariates
    Segment {
        /// Dataset JSON file
        #[arg(long)]
        data: PathBuf,

        /// Number of segments (overrides config)
        #[arg(long, env = "ABKIT__SEGMENTATION__CLUSTERS")]
        clusters: Option<usize>,

        /// Random seed (overrides config)
        #[arg(long, env = "ABKIT__SEGMENTATION__SEED")]
        seed: Option<u64>,
    },

    /// Replay logged rewards into a bandit and recommend the next arm
    Allocate {
        /// Comma-separated arm labels
        #[arg(long, value_delimiter = ',', required = true)]
        arms: Vec<String>,

        /// JSON array of {"arm": LABEL, "reward": {"binary": BOOL} | {"continuous": NUMBER}}
        #[arg(long)]
        rewards: PathBuf,

        #[arg(long, value_enum, default_value_t = PolicyArg::Thompson)]
        policy: PolicyArg,

        /// Random seed (overrides config)
        #[arg(long, env = "ABKIT__ALLOCATOR__SEED")]
        seed: Option<u64>,
    },

    /// Units per arm needed to detect a conversion-rate lift
    Plan {
        #[arg(long)]
        baseline: f64,

        #[arg(long)]
        target: f64,

        #[arg(long, default_value_t = 0.8)]
        power: f64,
    },
}

#[derive(Args, Debug)]
struct DatasetArgs {
    /// Dataset JSON file
    #[arg(long)]
    data: PathBuf,

    #[arg(long, default_value = "control")]
    control: String,

    #[arg(long, default_value = "treatment")]
    treatment: String,

    #[arg(long, value_enum, default_value_t = MetricArg::Value)]
    metric: MetricArg,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    Itt,
    Did,
    Iv,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TestArg {
    WelchT,
    TwoProportionZ,
    ChiSquare,
    MannWhitneyU,
}

impl From<TestArg> for TestKind {
    fn from(arg: TestArg) -> Self {
        match arg {
            TestArg::WelchT => TestKind::WelchT,
            TestArg::TwoProportionZ => TestKind::TwoProportionZ,
            TestArg::ChiSquare => TestKind::ChiSquare,
            TestArg::MannWhitneyU => TestKind::MannWhitneyU,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MetricArg {
    Value,
    Conversion,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Value => Metric::Value,
            MetricArg::Conversion => Metric::Conversion,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Thompson,
    Ucb1,
}

#[derive(Debug, Deserialize)]
struct LoggedReward {
    arm: String,
    reward: Reward,
}

#[derive(Debug, Serialize)]
struct AllocationReport {
    policy: AllocationPolicy,
    updates: usize,
    next_arm: String,
    arms: Vec<abkit_allocator::ArmStats>,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    baseline: f64,
    target: f64,
    alpha: f64,
    power: f64,
    units_per_arm: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abkit=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AnalysisConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AnalysisConfig::default()
    });
    if let Some(level) = cli.confidence_level {
        config.confidence_level = level;
    }

    match cli.command {
        Commands::Estimate {
            input,
            strategy,
            test,
            treatment_start,
            exclude_incomplete,
        } => {
            config.validate()?;
            let (dataset, arms) = load_dataset(&input)?;
            let estimator = CausalEstimator::new(&config);
            let metric = Metric::from(input.metric);
            let window = treatment_start.map_or(OutcomeWindow::All, OutcomeWindow::Since);
            match strategy {
                Strategy::Itt => {
                    print_json(&estimator.itt(&dataset, &arms, metric, test.into(), window)?)
                }
                Strategy::Did => {
                    let start = treatment_start
                        .context("--treatment-start is required for difference-in-differences")?;
                    let mut options = DidOptions::new(start);
                    if exclude_incomplete {
                        options = options.excluding_incomplete();
                    }
                    print_json(&estimator.did(&dataset, &arms, metric, options)?)
                }
                Strategy::Iv => print_json(&estimator.iv(&dataset, &arms, metric, window)?),
            }
        }
        Commands::Trend {
            input,
            test,
            cumulative,
        } => {
            config.validate()?;
            let (dataset, arms) = load_dataset(&input)?;
            let mode = if cumulative {
                TrendMode::Cumulative
            } else {
                TrendMode::PerPeriod
            };
            let trend = CausalEstimator::new(&config).trend(
                &dataset,
                &arms,
                input.metric.into(),
                test.into(),
                mode,
            )?;
            print_json(&trend)
        }
        Commands::Adjust {
            input,
            numeric,
            categorical,
        } => {
            config.validate()?;
            let (dataset, arms) = load_dataset(&input)?;
            let metric = Metric::from(input.metric);
            let family = match metric {
                Metric::Value => Family::Gaussian,
                Metric::Conversion => Family::Binomial,
            };
            let mut spec = DesignSpec::new();
            for name in numeric {
                spec = spec.numeric(name);
            }
            for entry in &categorical {
                spec = match entry.split_once('=') {
                    Some((name, reference)) => spec.categorical(name, Some(reference)),
                    None => spec.categorical(entry.as_str(), None),
                };
            }
            let result = RegressionAdjustedEstimator::new(family, spec)
                .with_config(&config)
                .estimate(&dataset, &arms, metric, OutcomeWindow::All)?;
            print_json(&result)
        }
        Commands::Segment {
            data,
            clusters,
            seed,
        } => {
            if let Some(clusters) = clusters {
                config.segmentation.clusters = clusters;
            }
            if let Some(seed) = seed {
                config.segmentation.seed = seed;
            }
            config.validate()?;
            let dataset = read_dataset(&data)?;
            let assignment = assign_segments_seeded(&dataset.units, &config.segmentation)?;
            info!(
                segments = assignment.sizes().len(),
                inertia = assignment.inertia,
                "Segmentation complete"
            );
            print_json(&assignment)
        }
        Commands::Allocate {
            arms,
            rewards,
            policy,
            seed,
        } => {
            let seed = seed.unwrap_or(config.allocator.seed);
            let policy = match policy {
                PolicyArg::Thompson => AllocationPolicy::ThompsonSampling,
                PolicyArg::Ucb1 => AllocationPolicy::Ucb1,
            };
            let raw = std::fs::read_to_string(&rewards)
                .with_context(|| format!("reading rewards from {}", rewards.display()))?;
            let log: Vec<LoggedReward> =
                serde_json::from_str(&raw).context("parsing reward log")?;

            let mut allocator = ThompsonAllocator::new(&arms)?
                .with_policy(policy)
                .with_reward_threshold(config.allocator.reward_threshold);
            for entry in &log {
                let arm = allocator
                    .arm_index(&entry.arm)
                    .with_context(|| format!("reward logged for unknown arm '{}'", entry.arm))?;
                allocator.update(arm, entry.reward)?;
            }

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let next = allocator.select_arm(&mut rng);
            print_json(&AllocationReport {
                policy,
                updates: log.len(),
                next_arm: arms[next].clone(),
                arms: allocator.stats(),
            })
        }
        Commands::Plan {
            baseline,
            target,
            power,
        } => {
            config.validate()?;
            let alpha = config.significance_level;
            let units_per_arm = power::proportion_sample_size(baseline, target, alpha, power)?;
            print_json(&PlanReport {
                baseline,
                target,
                alpha,
                power,
                units_per_arm,
            })
        }
    }
}

fn read_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading dataset from {}", path.display()))?;
    let dataset = Dataset::from_json(&raw)?;
    info!(
        units = dataset.units.len(),
        observations = dataset.observations.len(),
        "Dataset loaded"
    );
    Ok(dataset)
}

fn load_dataset(input: &DatasetArgs) -> anyhow::Result<(Dataset, Arms)> {
    let dataset = read_dataset(&input.data)?;
    Ok((dataset, Arms::new(&input.control, &input.treatment)))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
