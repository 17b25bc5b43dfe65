//! Bollinger Bands indicator.

use super::ema::{mean, std_dev};
use crate::services::signals::{finite_or, Indicator};
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerOutput {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// %B: 0 at the lower band, 1 at the upper band.
    pub position: f64,
    /// (upper - lower) / middle
    pub bandwidth: f64,
}

impl BollingerOutput {
    fn neutral(price: f64) -> Self {
        Self {
            upper: price,
            middle: price,
            lower: price,
            position: 0.5,
            bandwidth: 0.0,
        }
    }
}

/// Bollinger Bands indicator.
///
/// - Middle Band: SMA(period)
/// - Upper Band: Middle + (std_dev * multiplier)
/// - Lower Band: Middle - (std_dev * multiplier)
pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
}

impl Default for BollingerBands {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev_multiplier: 2.0,
        }
    }
}

impl BollingerBands {
    pub fn new(period: usize, std_dev_multiplier: f64) -> Self {
        Self {
            period: period.max(2),
            std_dev_multiplier,
        }
    }
}

impl Indicator for BollingerBands {
    type Output = BollingerOutput;

    fn id(&self) -> &str {
        "bollinger"
    }

    fn min_periods(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> BollingerOutput {
        let price = candles.last().map(|c| c.close).unwrap_or(0.0);
        if candles.len() < self.period {
            return BollingerOutput::neutral(price);
        }

        let closes: Vec<f64> = candles[candles.len() - self.period..]
            .iter()
            .map(|c| c.close)
            .collect();
        let middle = mean(&closes);
        let deviation = std_dev(&closes, middle);

        let upper = middle + self.std_dev_multiplier * deviation;
        let lower = middle - self.std_dev_multiplier * deviation;
        let band_width = upper - lower;

        let position = if band_width > 0.0 {
            (price - lower) / band_width
        } else {
            0.5
        };
        let bandwidth = if middle.abs() > f64::EPSILON {
            band_width / middle
        } else {
            0.0
        };

        BollingerOutput {
            upper,
            middle,
            lower,
            position: finite_or(position, 0.5),
            bandwidth: finite_or(bandwidth, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::signals::test_support::{flat, uptrend};

    #[test]
    fn test_bollinger_insufficient_data_is_neutral() {
        let out = BollingerBands::default().calculate(&uptrend(5));
        assert_eq!(out.position, 0.5);
        assert_eq!(out.bandwidth, 0.0);
    }

    #[test]
    fn test_bollinger_bands_ordering() {
        let out = BollingerBands::default().calculate(&uptrend(40));
        assert!(out.upper > out.middle);
        assert!(out.middle > out.lower);
        assert!(out.bandwidth > 0.0);
    }

    #[test]
    fn test_bollinger_uptrend_near_upper_band() {
        let out = BollingerBands::default().calculate(&uptrend(40));
        assert!(out.position > 0.8, "position was {}", out.position);
    }

    #[test]
    fn test_bollinger_flat_market_zero_width() {
        let out = BollingerBands::default().calculate(&flat(25, 50.0));
        assert_eq!(out.position, 0.5);
        assert_eq!(out.middle, 50.0);
    }
}
