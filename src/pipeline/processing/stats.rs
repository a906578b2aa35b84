//! Small numeric helpers for quality summaries.

/// `numerator / denominator`, or 0.0 for an empty denominator.
pub fn rate(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let pos = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
        }
    }
}

/// Quantile of ascending integer values, truncated to an integer.
pub fn percentile_usize(sorted: &[usize], q: f64) -> usize {
    let as_float: Vec<f64> = sorted.iter().map(|v| *v as f64).collect();
    percentile(&as_float, q) as usize
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Rounds to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_handles_empty() {
        assert_eq!(rate(3, 0), 0.0);
        assert_eq!(rate(1, 4), 0.25);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.5), 2.5);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 4.0);
        assert_eq!(percentile(&[], 0.9), 0.0);
        assert_eq!(percentile_usize(&[10, 20, 30], 0.5), 20);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.234567, 4), 1.2346);
        assert_eq!(mean(&[1.0, 3.0]), 2.0);
    }
}
