use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Forex,
    Metals,
    Indices,
    Stocks,
    Unknown,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Forex => "forex",
            AssetClass::Metals => "metals",
            AssetClass::Indices => "indices",
            AssetClass::Stocks => "stocks",
            AssetClass::Unknown => "unknown",
        }
    }
}

/// Static symbol metadata as reported by the broker. Refreshed on universe
/// discovery; owned by the universe manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub name: String,
    pub description: Option<String>,
    pub path: Option<String>,
    pub asset_class: AssetClass,
    pub currency_base: Option<String>,
    pub currency_profit: Option<String>,
    pub digits: Option<i64>,
    pub point: Option<f64>,
    pub trade_allowed: Option<bool>,
    pub spread_points: Option<f64>,
    pub trade_stops_level: Option<i64>,
    pub volume_min: Option<f64>,
    pub volume_max: Option<f64>,
    pub volume_step: Option<f64>,
    pub trade_tick_value: Option<f64>,
    pub trade_tick_size: Option<f64>,
    pub trade_contract_size: Option<f64>,
}

/// Per-cycle bid/ask snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub time_utc: DateTime<Utc>,
    pub spread_points: f64,
}

impl Quote {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.time_utc).num_seconds()
    }
}
