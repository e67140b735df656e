//! Two-sample hypothesis tests. Every test reports its directional
//! statistic as B relative to A, so swapping the samples flips the sign
//! and leaves the p-value unchanged.

use abkit_core::{
    AnalysisError, AnalysisResult, ArmSample, ConfidenceInterval, EffectEstimate,
    IdentificationStrategy, Inference, TestKind,
};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};

use crate::summary::{mean, median, mid_ranks, sample_variance};

pub const DEFAULT_CONFIDENCE: f64 = 0.95;

const WELCH: &str = "welch_t";
const PROPORTIONS: &str = "two_proportion_z";
const CHI_SQUARE: &str = "chi_square";
const MANN_WHITNEY: &str = "mann_whitney_u";

fn arms(n_a: usize, n_b: usize) -> Vec<ArmSample> {
    vec![
        ArmSample {
            label: "A".to_string(),
            n: n_a,
        },
        ArmSample {
            label: "B".to_string(),
            n: n_b,
        },
    ]
}

fn naive(test: TestKind) -> EffectEstimate {
    EffectEstimate {
        strategy: IdentificationStrategy::Naive,
        inference: Inference::Test(test),
        estimate: 0.0,
        standard_error: None,
        confidence_interval: None,
        statistic: 0.0,
        degrees_of_freedom: None,
        p_value: 1.0,
        arms: Vec::new(),
        segment: None,
        warnings: Vec::new(),
    }
}

fn check_finite(test: &str, values: &[f64]) -> AnalysisResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AnalysisError::InvalidInput(format!(
            "{test}: samples must not contain NaN or infinite values"
        )))
    }
}

pub(crate) fn standard_normal() -> Normal {
    // Parameters are constant and valid.
    Normal::new(0.0, 1.0).unwrap_or_else(|_| unreachable!())
}

/// Upper-tail probability whose quantile bounds a two-sided interval at `level`.
fn two_sided_quantile(level: f64) -> f64 {
    1.0 - (1.0 - level) / 2.0
}

/// Two-sided p-value for a standard normal statistic.
pub fn normal_two_sided_p(z: f64) -> f64 {
    (2.0 * standard_normal().sf(z.abs())).min(1.0)
}

/// Two-sided critical value of the standard normal at `level`.
pub fn normal_critical(level: f64) -> f64 {
    standard_normal().inverse_cdf(two_sided_quantile(level))
}

/// Standard Student t with `df` degrees of freedom. `test` names the
/// caller in the error.
pub fn students_t(test: &str, df: f64) -> AnalysisResult<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| AnalysisError::degenerate(test, format!("invalid t distribution: {e}")))
}

pub fn t_two_sided_p(dist: &StudentsT, t: f64) -> f64 {
    (2.0 * dist.sf(t.abs())).min(1.0)
}

pub fn t_critical(dist: &StudentsT, level: f64) -> f64 {
    dist.inverse_cdf(two_sided_quantile(level))
}

/// Welch's unequal-variance t-test on the difference mean(b) − mean(a).
pub fn compare_means(a: &[f64], b: &[f64]) -> AnalysisResult<EffectEstimate> {
    compare_means_at(a, b, DEFAULT_CONFIDENCE)
}

pub fn compare_means_at(a: &[f64], b: &[f64], level: f64) -> AnalysisResult<EffectEstimate> {
    if a.len() < 2 {
        return Err(AnalysisError::insufficient(WELCH, "A", 2, a.len()));
    }
    if b.len() < 2 {
        return Err(AnalysisError::insufficient(WELCH, "B", 2, b.len()));
    }
    check_finite(WELCH, a)?;
    check_finite(WELCH, b)?;

    let (n_a, n_b) = (a.len() as f64, b.len() as f64);
    let var_a = sample_variance(a) / n_a;
    let var_b = sample_variance(b) / n_b;
    let se = (var_a + var_b).sqrt();
    if se == 0.0 {
        return Err(AnalysisError::degenerate(
            WELCH,
            "both samples have zero variance",
        ));
    }

    let diff = mean(b) - mean(a);
    let t = diff / se;
    let df = (var_a + var_b).powi(2)
        / (var_a.powi(2) / (n_a - 1.0) + var_b.powi(2) / (n_b - 1.0));

    let dist = students_t(WELCH, df)?;
    let p_value = t_two_sided_p(&dist, t);
    let critical = t_critical(&dist, level);

    Ok(EffectEstimate {
        estimate: diff,
        standard_error: Some(se),
        confidence_interval: Some(ConfidenceInterval {
            lower: diff - critical * se,
            upper: diff + critical * se,
            level,
        }),
        statistic: t,
        degrees_of_freedom: Some(df),
        p_value,
        arms: arms(a.len(), b.len()),
        ..naive(TestKind::WelchT)
    })
}

/// Pooled two-proportion z-test on rate(b) − rate(a).
///
/// The statistic uses the pooled standard error; the reported standard
/// error and interval use the unpooled one.
pub fn compare_proportions(
    successes_a: u64,
    n_a: u64,
    successes_b: u64,
    n_b: u64,
) -> AnalysisResult<EffectEstimate> {
    compare_proportions_at(successes_a, n_a, successes_b, n_b, DEFAULT_CONFIDENCE)
}

pub fn compare_proportions_at(
    successes_a: u64,
    n_a: u64,
    successes_b: u64,
    n_b: u64,
    level: f64,
) -> AnalysisResult<EffectEstimate> {
    if n_a == 0 || n_b == 0 {
        return Err(AnalysisError::degenerate(
            PROPORTIONS,
            format!("empty arm (n_a = {n_a}, n_b = {n_b})"),
        ));
    }
    if successes_a > n_a || successes_b > n_b {
        return Err(AnalysisError::InvalidInput(format!(
            "{PROPORTIONS}: successes exceed trials ({successes_a}/{n_a}, {successes_b}/{n_b})"
        )));
    }

    let rate_a = successes_a as f64 / n_a as f64;
    let rate_b = successes_b as f64 / n_b as f64;
    let pooled = (successes_a + successes_b) as f64 / (n_a + n_b) as f64;
    let se_pooled = (pooled * (1.0 - pooled) * (1.0 / n_a as f64 + 1.0 / n_b as f64)).sqrt();
    if se_pooled == 0.0 {
        return Err(AnalysisError::degenerate(
            PROPORTIONS,
            format!("pooled rate is {pooled}, no variance to test against"),
        ));
    }

    let diff = rate_b - rate_a;
    let z = diff / se_pooled;
    let se = (rate_a * (1.0 - rate_a) / n_a as f64 + rate_b * (1.0 - rate_b) / n_b as f64).sqrt();
    let critical = normal_critical(level);

    Ok(EffectEstimate {
        estimate: diff,
        standard_error: Some(se),
        confidence_interval: Some(ConfidenceInterval {
            lower: diff - critical * se,
            upper: diff + critical * se,
            level,
        }),
        statistic: z,
        p_value: normal_two_sided_p(z),
        arms: arms(n_a as usize, n_b as usize),
        ..naive(TestKind::TwoProportionZ)
    })
}

/// Chi-square test of independence on an r×c contingency table whose rows
/// are groups and columns are outcome categories. The point estimate is
/// Cramér's V.
pub fn compare_counts_categorical(table: &[Vec<u64>]) -> AnalysisResult<EffectEstimate> {
    let rows = table.len();
    let cols = table.first().map(|r| r.len()).unwrap_or(0);
    if rows < 2 || cols < 2 {
        return Err(AnalysisError::degenerate(
            CHI_SQUARE,
            format!("table must be at least 2x2, got {rows}x{cols}"),
        ));
    }
    if table.iter().any(|r| r.len() != cols) {
        return Err(AnalysisError::degenerate(CHI_SQUARE, "ragged table"));
    }

    let row_sums: Vec<f64> = table.iter().map(|r| r.iter().sum::<u64>() as f64).collect();
    let col_sums: Vec<f64> = (0..cols)
        .map(|j| table.iter().map(|r| r[j]).sum::<u64>() as f64)
        .collect();
    if let Some(i) = row_sums.iter().position(|&s| s == 0.0) {
        return Err(AnalysisError::degenerate(CHI_SQUARE, format!("row {i} is empty")));
    }
    if let Some(j) = col_sums.iter().position(|&s| s == 0.0) {
        return Err(AnalysisError::degenerate(
            CHI_SQUARE,
            format!("column {j} is empty"),
        ));
    }
    let total: f64 = row_sums.iter().sum();

    let mut chi2 = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_sums[i] * col_sums[j] / total;
            chi2 += (observed as f64 - expected).powi(2) / expected;
        }
    }

    let df = ((rows - 1) * (cols - 1)) as f64;
    let dist = ChiSquared::new(df)
        .map_err(|e| AnalysisError::degenerate(CHI_SQUARE, format!("invalid distribution: {e}")))?;
    let cramers_v = (chi2 / (total * (rows.min(cols) - 1) as f64)).sqrt();

    Ok(EffectEstimate {
        estimate: cramers_v,
        statistic: chi2,
        degrees_of_freedom: Some(df),
        p_value: dist.sf(chi2).min(1.0),
        arms: row_sums
            .iter()
            .enumerate()
            .map(|(i, &n)| ArmSample {
                label: format!("row {i}"),
                n: n as usize,
            })
            .collect(),
        ..naive(TestKind::ChiSquare)
    })
}

/// Mann-Whitney U rank-sum test with tie-corrected normal approximation.
/// The statistic is positive when B tends to exceed A; the point estimate
/// is median(b) − median(a).
pub fn compare_distributions_rank(a: &[f64], b: &[f64]) -> AnalysisResult<EffectEstimate> {
    if a.is_empty() {
        return Err(AnalysisError::insufficient(MANN_WHITNEY, "A", 1, 0));
    }
    if b.is_empty() {
        return Err(AnalysisError::insufficient(MANN_WHITNEY, "B", 1, 0));
    }
    check_finite(MANN_WHITNEY, a)?;
    check_finite(MANN_WHITNEY, b)?;

    let combined: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    let (ranks, tie_term) = mid_ranks(&combined);
    let (n_a, n_b) = (a.len() as f64, b.len() as f64);
    let n = n_a + n_b;

    let rank_sum_b: f64 = ranks[a.len()..].iter().sum();
    let u_b = rank_sum_b - n_b * (n_b + 1.0) / 2.0;
    let mu = n_a * n_b / 2.0;
    let variance = if n > 1.0 {
        n_a * n_b / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)))
    } else {
        0.0
    };
    if variance <= 0.0 {
        return Err(AnalysisError::degenerate(
            MANN_WHITNEY,
            "all observations are tied",
        ));
    }

    let diff = u_b - mu;
    let z = diff.signum() * (diff.abs() - 0.5).max(0.0) / variance.sqrt();

    Ok(EffectEstimate {
        estimate: median(b) - median(a),
        statistic: z,
        p_value: normal_two_sided_p(z),
        arms: arms(a.len(), b.len()),
        ..naive(TestKind::MannWhitneyU)
    })
}
