use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLC bar. `time_utc` is the bar open time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub time_utc: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Ordered series of OHLC bars, strictly ascending by open time. The last bar
/// may still be forming; the second-to-last bar is the most recent closed one.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn bars(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// The most recent closed bar (second-to-last).
    pub fn last_closed(&self) -> Option<&Candle> {
        let n = self.candles.len();
        if n < 2 {
            return None;
        }
        self.candles.get(n - 2)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    /// Percent returns of closes; one element shorter than the series.
    pub fn returns(&self) -> Vec<f64> {
        self.candles
            .windows(2)
            .map(|w| {
                if w[0].close != 0.0 {
                    (w[1].close - w[0].close) / w[0].close
                } else {
                    f64::NAN
                }
            })
            .collect()
    }
}
