use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::monitoring::ResourceGauges;
use crate::ranking::ScoreComponents;
use crate::types::Side;

/// Commands the UI (or any controller) can enqueue. The command channel is
/// the only way external code mutates engine inputs.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Pause,
    Resume,
    RefreshUniverse,
    ApplyConfig(serde_json::Value),
    Quit,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSymbolView {
    pub symbol: String,
    pub score: f64,
    pub components: ScoreComponents,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionView {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub profit: Option<f64>,
}

/// Read model for the UI. Writers construct a complete new value and swap it
/// in; readers always observe a consistent cross-section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub connected: bool,
    pub paused: bool,
    pub trading_enabled: bool,
    pub last_cycle_id: Option<String>,
    pub last_candle_close_time_utc: Option<String>,
    pub last_cycle_latency_ms: Option<f64>,
    pub stage_timings_ms: HashMap<String, f64>,
    pub top_ranked: Vec<RankedSymbolView>,
    pub open_positions: Vec<PositionView>,
    pub today_pnl: Option<f64>,
    pub wins: u32,
    pub losses: u32,
    pub last_events: Vec<String>,
    pub last_errors: Vec<String>,
    pub resources: ResourceGauges,
}

pub type SharedSnapshot = Arc<RwLock<EngineSnapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(EngineSnapshot::default()))
}
