//! Duration statistics over item results

use serde::{Deserialize, Serialize};

/// Timing statistics in milliseconds
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Number of samples
    pub count: usize,
    pub min: u64,
    pub max: u64,
    /// Rounded mean
    pub average: u64,
    /// Element at index `n / 2` of the sorted samples
    pub median: u64,
    /// Element at index `floor(0.95 * n)`, clamped to the last sample
    pub p95: u64,
    /// Sum of all samples
    pub total: u64,
}

impl TimingStats {
    /// Calculate statistics from duration samples
    pub fn from_durations(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let n = sorted.len();
        let total: u64 = sorted.iter().sum();
        let p95_index = (n * 95 / 100).min(n - 1);

        Self {
            count: n,
            min: sorted[0],
            max: sorted[n - 1],
            average: (total as f64 / n as f64).round() as u64,
            median: sorted[n / 2],
            p95: sorted[p95_index],
            total,
        }
    }

    /// Format as summary string
    pub fn format_summary(&self) -> String {
        format!(
            "min={}ms max={}ms avg={}ms median={}ms p95={}ms total={}ms",
            self.min, self.max, self.average, self.median, self.p95, self.total
        )
    }
}
