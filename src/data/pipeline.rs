use std::sync::Arc;

use tracing::debug;

use super::features::{compute_features, FeatureBundle};
use crate::broker::BrokerConnector;
use crate::types::{CandleSeries, Timeframe};

/// Candles plus the feature bundle derived from them, fetched once per cycle
/// and reused by ranking, strategies and risk sizing.
#[derive(Debug, Clone, Default)]
pub struct CandleBundle {
    pub symbol: String,
    pub candles: CandleSeries,
    pub features: Option<FeatureBundle>,
}

pub struct DataPipeline {
    connector: Arc<dyn BrokerConnector>,
    timeframe: Timeframe,
    warmup_bars: usize,
}

impl DataPipeline {
    pub fn new(connector: Arc<dyn BrokerConnector>, timeframe: Timeframe, warmup_bars: usize) -> Self {
        Self {
            connector,
            timeframe,
            warmup_bars,
        }
    }

    pub async fn fetch(&self, symbol: &str) -> CandleBundle {
        let candles = match self
            .connector
            .get_candles(symbol, self.timeframe, self.warmup_bars)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                debug!(symbol, error = %e, "candle fetch failed");
                CandleSeries::default()
            }
        };
        let features = compute_features(&candles);
        CandleBundle {
            symbol: symbol.to_string(),
            candles,
            features,
        }
    }
}
