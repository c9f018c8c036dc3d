//! Small numeric helpers shared by the stream extractors, the extraction
//! engine and the trial reducer.

/// Samples further than this many standard deviations from the mean are outliers.
pub const OUTLIER_MAGNITUDE: f64 = 2.0;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Sample (n - 1) standard deviation.
pub fn standard_deviation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Round to `precision` decimal digits.
pub fn set_precision(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// Drop samples further than `magnitude` standard deviations from the mean,
/// preserving the order of the survivors.
pub fn remove_outliers(values: &[f64], magnitude: f64) -> Vec<f64> {
    let (Some(m), Some(sd)) = (mean(values), standard_deviation(values)) else {
        return values.to_vec();
    };
    if sd == 0.0 {
        return values.to_vec();
    }
    let limit = magnitude * sd;
    values
        .iter()
        .copied()
        .filter(|v| (v - m).abs() <= limit)
        .collect()
}

/// Render a number the way results are reported: no trailing `.0` on integers.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}
