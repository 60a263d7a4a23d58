use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a position or signal. `Flat` means "no exposure" and doubles
/// as the side component of close decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
            Side::Flat => "flat",
        }
    }

    /// The side that closes a position held on this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
            Side::Flat => Side::Flat,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, Side::Long | Side::Short)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            other => Err(format!("unsupported timeframe: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountTradeMode {
    Demo,
    Real,
    Contest,
    Unknown,
}

impl AccountTradeMode {
    /// The bot refuses to trade on anything but demo/contest accounts.
    pub fn is_paper(&self) -> bool {
        matches!(self, AccountTradeMode::Demo | AccountTradeMode::Contest)
    }
}

impl fmt::Display for AccountTradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountTradeMode::Demo => write!(f, "DEMO"),
            AccountTradeMode::Real => write!(f, "REAL"),
            AccountTradeMode::Contest => write!(f, "CONTEST"),
            AccountTradeMode::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: Option<i64>,
    pub server: Option<String>,
    pub currency: Option<String>,
    pub leverage: Option<i64>,
    pub balance: Option<f64>,
    pub equity: Option<f64>,
    pub margin: Option<f64>,
    pub trade_mode: AccountTradeMode,
    pub name: Option<String>,
    pub company: Option<String>,
}

/// Broker-side open position. Positions carrying a foreign magic number are
/// never touched by the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub time_utc: DateTime<Utc>,
    pub profit: Option<f64>,
    pub swap: Option<f64>,
    pub commission: Option<f64>,
    pub magic: Option<i64>,
    pub comment: Option<String>,
}

impl Position {
    pub fn matches_magic(&self, magic: i64) -> bool {
        self.magic.map(|m| m == magic).unwrap_or(true)
    }
}

/// Whether a deal opened or closed exposure on its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DealEntry {
    In,
    Out,
    Unknown,
}

impl DealEntry {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealEntry::In => "IN",
            DealEntry::Out => "OUT",
            DealEntry::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for DealEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker-side fill record. Immutable once emitted by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub deal_ticket: i64,
    pub position_id: Option<i64>,
    pub order_ticket: Option<i64>,
    pub time_utc: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub entry: DealEntry,
    pub volume: f64,
    pub price: f64,
    pub profit: Option<f64>,
    pub commission: Option<f64>,
    pub swap: Option<f64>,
    pub magic: Option<i64>,
    pub comment: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub deviation_points: i64,
    pub magic: i64,
    pub comment: String,
    pub idempotency_key: String,
    /// When set, the request is intended to close that position.
    pub position_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub retcode: Option<i64>,
    pub order_ticket: Option<i64>,
    pub position_id: Option<i64>,
    pub comment: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_seconds_mapping() {
        assert_eq!(Timeframe::M1.seconds(), 60);
        assert_eq!(Timeframe::H1.seconds(), 3600);
        assert_eq!(Timeframe::H4.seconds(), 14400);
        assert_eq!(Timeframe::D1.seconds(), 86400);
    }

    #[test]
    fn timeframe_round_trips_from_str() {
        for tf in ["M1", "M5", "M15", "M30", "H1", "H4", "D1"] {
            let parsed: Timeframe = tf.parse().unwrap();
            assert_eq!(parsed.as_str(), tf);
        }
        assert!("H2".parse::<Timeframe>().is_err());
    }

    #[test]
    fn side_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Side::Long).unwrap(), "\"long\"");
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Flat.opposite(), Side::Flat);
    }
}
