use serde::{Deserialize, Serialize};

/// Candle period used for analysis and binary-style expirations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Timeframe {
    #[serde(rename = "M1")]
    M1,
    #[default]
    #[serde(rename = "M5")]
    M5,
    #[serde(rename = "M15")]
    M15,
}

impl Timeframe {
    /// All supported timeframes.
    pub const ALL: [Timeframe; 3] = [Timeframe::M1, Timeframe::M5, Timeframe::M15];

    /// Parse from string ("M5", "m15", "5m", "300").
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "M1" | "1M" | "60" => Some(Self::M1),
            "M5" | "5M" | "300" => Some(Self::M5),
            "M15" | "15M" | "900" => Some(Self::M15),
            _ => None,
        }
    }

    /// Display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
        }
    }

    /// Period length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
        }
    }

    /// Period length in milliseconds.
    pub fn period_ms(&self) -> i64 {
        self.seconds() * 1000
    }

    /// Start of the period containing `timestamp_ms`.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.period_ms())
    }

    /// Start of the first period strictly after `timestamp_ms`.
    pub fn next_period_start(&self, timestamp_ms: i64) -> i64 {
        self.period_start(timestamp_ms) + self.period_ms()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OHLCV aggregate for one period.
///
/// `timestamp` is the period start in epoch milliseconds. A candle with
/// `closed = true` is final and is never modified afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub closed: bool,
}

/// Net movement of a candle body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandleColor {
    Green,
    Red,
    Doji,
}

impl Candle {
    /// Close time (exclusive end of the period).
    pub fn close_time(&self, timeframe: Timeframe) -> i64 {
        self.timestamp + timeframe.period_ms()
    }

    /// Typical price (H+L+C)/3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Classify the body. A doji requires exact equality of open and close.
    #[allow(clippy::float_cmp)]
    pub fn color(&self) -> CandleColor {
        if self.open == self.close {
            CandleColor::Doji
        } else if self.close > self.open {
            CandleColor::Green
        } else {
            CandleColor::Red
        }
    }

    /// All price fields finite and positive.
    pub fn is_valid(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
            && self.volume.is_finite()
    }
}

/// Sort ascending by timestamp and keep one candle per period start.
///
/// When two candles share a timestamp the first closed copy is kept; an open
/// copy is replaced by any later occurrence.
pub fn sanitize_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.timestamp == candle.timestamp => {
                if !last.closed {
                    *last = candle;
                }
            }
            _ => out.push(candle),
        }
    }
    out
}
