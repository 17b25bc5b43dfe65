//! Moving-average helpers shared by the indicators.

/// EMA series seeded with the SMA of the first `period` values.
///
/// The result has `values.len() - period + 1` entries, the first aligned
/// with `values[period - 1]`. Empty when there is not enough input.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = Vec::with_capacity(values.len() - period + 1);

    // First EMA is SMA
    let mut current = values.iter().take(period).sum::<f64>() / period as f64;
    ema.push(current);

    for value in &values[period..] {
        current = (value - current) * multiplier + current;
        ema.push(current);
    }

    ema
}

/// Last EMA value, or `None` with insufficient input.
pub fn ema_last(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Simple mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around `mean`.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
