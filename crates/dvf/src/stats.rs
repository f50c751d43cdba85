//! Order statistics over price-per-m² samples.

/// Continuous percentile of an ascending slice, interpolating linearly
/// between the two closest ranks at position `p * (n - 1)`.
pub fn percentile_cont(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sorted copy of the finite `values` lying within the `[lower, upper]`
/// percentiles, bounds included.
pub fn trim(values: &[f64], lower: f64, upper: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);

    let (Some(low), Some(high)) = (percentile_cont(&sorted, lower), percentile_cont(&sorted, upper)) else {
        return sorted;
    };
    sorted.retain(|v| *v >= low && *v <= high);
    sorted
}

/// Median of an ascending slice, rounded half to even like PostgreSQL's
/// `round(double precision)`.
pub fn rounded_median(sorted: &[f64]) -> Option<i64> {
    percentile_cont(sorted, 0.5).map(|m| m.round_ties_even() as i64)
}

/// Trimmed sample size and median for one property type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimmedStats {
    pub count: usize,
    pub median: Option<i64>,
}

pub fn trimmed_stats(values: &[f64], lower: f64, upper: f64) -> TrimmedStats {
    let kept = trim(values, lower, upper);
    TrimmedStats {
        count: kept.len(),
        median: rounded_median(&kept),
    }
}
