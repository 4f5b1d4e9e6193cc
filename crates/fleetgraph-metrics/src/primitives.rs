// crates/fleetgraph-metrics/src/primitives.rs
// ============================================================================
// Module: Primitives
// Description: Small numeric helpers the calculators module builds on.
// ============================================================================

//! ## Overview
//! Ported from `app/metrics/primitives.py`. Every function is pure and
//! total over its domain; "no data" is always `None`, never a panic or a
//! sentinel value.

/// Clamps `value` into `[lower, upper]`.
#[must_use]
pub fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

/// Clamps `value` into `[0.0, 1.0]`.
#[must_use]
pub fn clamp01(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

/// Returns `numerator / denominator`, or `None` if `denominator` is zero.
#[must_use]
pub fn ratio_or_none(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Arithmetic mean, or `None` for an empty input.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation, or `None` for an empty input. A
/// single-element input has a standard deviation of `0.0`.
#[must_use]
pub fn stddev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    if values.len() == 1 {
        return Some(0.0);
    }
    let avg = mean(values)?;
    let variance = values.iter().map(|value| (value - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Continuous (linear-interpolation) percentile, matching
/// `PERCENTILE_CONT` / Python's `statistics` convention: `percentile` is in
/// `[0.0, 1.0]`, `0.0` returns the minimum, `1.0` the maximum. `None` for an
/// empty input.
#[must_use]
pub fn percentile_cont(values: &[f64], percentile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = sorted.len();
    if percentile <= 0.0 {
        return Some(sorted[0]);
    }
    if percentile >= 1.0 {
        return Some(sorted[count - 1]);
    }
    let position = 1.0 + (count as f64 - 1.0) * percentile;
    let lower_index = position.floor() as usize - 1;
    let upper_index = position.ceil() as usize - 1;
    if lower_index == upper_index {
        return Some(sorted[lower_index]);
    }
    let lower_value = sorted[lower_index];
    let upper_value = sorted[upper_index];
    let fraction = position - position.floor();
    Some(lower_value + fraction * (upper_value - lower_value))
}

#[cfg(test)]
mod tests {
    use super::clamp01;
    use super::mean;
    use super::percentile_cont;
    use super::ratio_or_none;
    use super::stddev;

    #[test]
    fn clamp01_bounds_both_sides() {
        assert_eq!(clamp01(-1.0), 0.0);
        assert_eq!(clamp01(2.0), 1.0);
        assert_eq!(clamp01(0.5), 0.5);
    }

    #[test]
    fn ratio_or_none_rejects_zero_denominator() {
        assert_eq!(ratio_or_none(1.0, 0.0), None);
        assert_eq!(ratio_or_none(1.0, 2.0), Some(0.5));
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }

    #[test]
    fn stddev_of_single_value_is_zero() {
        assert_eq!(stddev(&[5.0]), Some(0.0));
    }

    #[test]
    fn percentile_cont_matches_known_points() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_cont(&values, 0.0), Some(1.0));
        assert_eq!(percentile_cont(&values, 1.0), Some(4.0));
        assert_eq!(percentile_cont(&values, 0.5), Some(2.5));
    }
}
