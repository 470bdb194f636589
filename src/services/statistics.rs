//! Robust aggregation of noisy samples.

use crate::domain::models::{Metric, MetricSummary};

/// Mean after dropping `floor(n * trim_pct)` values from each end.
///
/// Trimming only happens when it leaves at least one value; otherwise the
/// plain mean is returned. An empty slice yields `0.0`.
pub fn trimmed_mean(values: &[f64], trim_pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let k = (n as f64 * trim_pct).floor() as usize;
    let kept = if k > 0 && n > 2 * k {
        &sorted[k..n - k]
    } else {
        &sorted[..]
    };

    mean(kept)
}

/// Population standard deviation over mean, in percent.
///
/// Zero for an empty slice or a zero mean.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let avg = mean(values);
    if avg == 0.0 {
        return 0.0;
    }

    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / avg * 100.0
}

/// Key-wise trimmed mean across measurement rounds.
pub fn aggregate_rounds(rounds: &[MetricSummary], trim_pct: f64) -> MetricSummary {
    let mut aggregated = MetricSummary::default();
    for metric in Metric::ALL {
        let values: Vec<f64> = rounds.iter().map(|r| r.get(metric)).collect();
        aggregated.set(metric, trimmed_mean(&values, trim_pct));
    }
    aggregated
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
