//! Accuracy statistics for the baseline vs. with-memory comparison.

use serde::{Deserialize, Serialize};

/// z-score for a two-sided 95% interval.
const Z_95: f64 = 1.96;

/// Wilson score interval for a binomial proportion at 95% confidence.
pub fn wilson_interval(successes: usize, n: usize) -> (f64, f64) {
    if n == 0 {
        return (0.0, 0.0);
    }
    let n_f = n as f64;
    let p = successes as f64 / n_f;
    let z2 = Z_95 * Z_95;

    let denominator = 1.0 + z2 / n_f;
    let center = (p + z2 / (2.0 * n_f)) / denominator;
    let margin = Z_95 * (p * (1.0 - p) / n_f + z2 / (4.0 * n_f * n_f)).sqrt() / denominator;

    ((center - margin).max(0.0), (center + margin).min(1.0))
}

pub fn accuracy(successes: usize, n: usize) -> f64 {
    if n == 0 {
        0.0
    } else {
        successes as f64 / n as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub baseline_accuracy: f64,
    pub baseline_ci_lower: f64,
    pub baseline_ci_upper: f64,
    pub with_memory_accuracy: f64,
    pub with_memory_ci_lower: f64,
    pub with_memory_ci_upper: f64,
    pub absolute_improvement: f64,
    pub relative_improvement: f64,
    pub confidence_intervals_overlap: bool,
    pub statistically_significant: bool,
    pub memory_bank_size: usize,
    pub problems_tested: usize,
    pub random_seed: u64,
}

impl Summary {
    /// Build from (successes, trials) for each arm.
    pub fn compute(
        baseline: (usize, usize),
        with_memory: (usize, usize),
        memory_bank_size: usize,
        random_seed: u64,
    ) -> Self {
        let baseline_accuracy = accuracy(baseline.0, baseline.1);
        let with_memory_accuracy = accuracy(with_memory.0, with_memory.1);
        let (b_lo, b_hi) = wilson_interval(baseline.0, baseline.1);
        let (m_lo, m_hi) = wilson_interval(with_memory.0, with_memory.1);

        let absolute_improvement = with_memory_accuracy - baseline_accuracy;
        let relative_improvement = if baseline_accuracy > 0.0 {
            absolute_improvement / baseline_accuracy
        } else {
            0.0
        };
        let significant = m_lo > b_hi;

        Self {
            baseline_accuracy,
            baseline_ci_lower: b_lo,
            baseline_ci_upper: b_hi,
            with_memory_accuracy,
            with_memory_ci_lower: m_lo,
            with_memory_ci_upper: m_hi,
            absolute_improvement,
            relative_improvement,
            confidence_intervals_overlap: !significant,
            statistically_significant: significant,
            memory_bank_size,
            problems_tested: baseline.1,
            random_seed,
        }
    }
}
