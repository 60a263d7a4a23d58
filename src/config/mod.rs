use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::Timeframe;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not readable: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub timezone: String,
    pub timeframe: Timeframe,
    pub warmup_bars: usize,
    pub loop_sleep_seconds: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timezone: "Europe/London".to_string(),
            timeframe: Timeframe::H1,
            warmup_bars: 300,
            loop_sleep_seconds: 2.0,
        }
    }
}

impl RuntimeConfig {
    pub fn tz(&self) -> chrono_tz::Tz {
        chrono_tz::Tz::from_str(&self.timezone).unwrap_or(chrono_tz::UTC)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetClassToggles {
    pub forex: bool,
    pub metals: bool,
    pub indices: bool,
    pub stocks: bool,
}

impl Default for AssetClassToggles {
    fn default() -> Self {
        Self {
            forex: true,
            metals: true,
            indices: true,
            stocks: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryLimits {
    pub max_symbols_total: usize,
    pub max_per_class: usize,
}

impl Default for DiscoveryLimits {
    fn default() -> Self {
        Self {
            max_symbols_total: 40,
            max_per_class: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub use_symbol_discovery: bool,
    pub discovery_interval_minutes: u64,
    pub preferred_symbols: Vec<String>,
    /// canonical name -> broker-specific alternatives
    pub aliases: HashMap<String, Vec<String>>,
    pub include_asset_classes: AssetClassToggles,
    pub discovery_limits: DiscoveryLimits,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            use_symbol_discovery: true,
            discovery_interval_minutes: 360,
            preferred_symbols: Vec::new(),
            aliases: HashMap::new(),
            include_asset_classes: AssetClassToggles::default(),
            discovery_limits: DiscoveryLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingFilters {
    pub max_spread_points: f64,
    pub max_spread_to_atr_ratio: f64,
    pub market_open_required: bool,
}

impl Default for RankingFilters {
    fn default() -> Self {
        Self {
            max_spread_points: 50.0,
            max_spread_to_atr_ratio: 0.20,
            market_open_required: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub volatility: f64,
    pub trend: f64,
    pub momentum: f64,
    pub cost: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            volatility: 0.35,
            trend: 0.30,
            momentum: 0.20,
            cost: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub enabled: bool,
    pub window_bars: usize,
    pub max_abs_corr: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_bars: 200,
            max_abs_corr: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_n: usize,
    pub min_bars_required: usize,
    pub filters: RankingFilters,
    pub weights: RankingWeights,
    pub correlation: CorrelationConfig,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_bars_required: 300,
            filters: RankingFilters::default(),
            weights: RankingWeights::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    Manual,
    RuleBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBasedConfig {
    pub adx_trending: f64,
    pub adx_ranging: f64,
}

impl Default for RuleBasedConfig {
    fn default() -> Self {
        Self {
            adx_trending: 22.0,
            adx_ranging: 18.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub mode: StrategyMode,
    pub manual_active: String,
    pub rule_based: RuleBasedConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: StrategyMode::Manual,
            manual_active: "two_pole_momentum".to_string(),
            rule_based: RuleBasedConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SltpMode {
    Rr,
    Atr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RrConfig {
    pub stop_points: i64,
    pub take_points: i64,
}

impl Default for RrConfig {
    fn default() -> Self {
        Self {
            stop_points: 100,
            take_points: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrSltpConfig {
    pub period: usize,
    pub sl_mult: f64,
    pub tp_mult: f64,
}

impl Default for AtrSltpConfig {
    fn default() -> Self {
        Self {
            period: 14,
            sl_mult: 1.5,
            tp_mult: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooloffConfig {
    pub enabled: bool,
    pub losses: u32,
    pub minutes: i64,
}

impl Default for CooloffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            losses: 3,
            minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub risk_per_trade: f64,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_open_positions_total: usize,
    pub max_open_positions_per_symbol: usize,
    pub sltp_mode: SltpMode,
    pub rr: RrConfig,
    pub atr: AtrSltpConfig,
    pub cooloff: CooloffConfig,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.005,
            max_daily_loss_pct: 0.02,
            max_drawdown_pct: 0.06,
            max_open_positions_total: 5,
            max_open_positions_per_symbol: 1,
            sltp_mode: SltpMode::Rr,
            rr: RrConfig::default(),
            atr: AtrSltpConfig::default(),
            cooloff: CooloffConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_seconds: Vec<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: vec![1.0, 3.0, 7.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub trading_enabled: bool,
    pub close_on_exit_signal: bool,
    pub slippage_points: i64,
    pub magic_number: i64,
    pub retries: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            close_on_exit_signal: true,
            slippage_points: 20,
            magic_number: 26012026,
            retries: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub telegram_enabled: bool,
    pub throttle_seconds: f64,
    pub daily_summary_time: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            telegram_enabled: true,
            throttle_seconds: 20.0,
            daily_summary_time: "21:00".to_string(),
        }
    }
}

impl NotificationsConfig {
    pub fn daily_summary_time_of_day(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.daily_summary_time, "%H:%M").ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub db_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/bot.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub enabled: bool,
    pub refresh_hz: f64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_hz: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub universe: UniverseConfig,
    pub ranking: RankingConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub notifications: NotificationsConfig,
    pub persistence: PersistenceConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.runtime.warmup_bars < 50 {
            errors.push("runtime.warmup_bars must be >= 50".to_string());
        }
        if chrono_tz::Tz::from_str(&self.runtime.timezone).is_err() {
            errors.push(format!("runtime.timezone unknown: {}", self.runtime.timezone));
        }
        if self.ranking.top_n == 0 {
            errors.push("ranking.top_n must be > 0".to_string());
        }
        let w = &self.ranking.weights;
        if w.volatility < 0.0 || w.trend < 0.0 || w.momentum < 0.0 || w.cost < 0.0 {
            errors.push("ranking.weights must all be >= 0".to_string());
        }
        if !(self.risk.risk_per_trade > 0.0 && self.risk.risk_per_trade < 1.0) {
            errors.push("risk.risk_per_trade must be in (0, 1)".to_string());
        }
        if self.risk.max_open_positions_total == 0 {
            errors.push("risk.max_open_positions_total must be > 0".to_string());
        }
        if self.execution.retries.max_attempts == 0 {
            errors.push("execution.retries.max_attempts must be >= 1".to_string());
        }
        if self.notifications.daily_summary_time_of_day().is_none() {
            errors.push(format!(
                "notifications.daily_summary_time not HH:MM: {}",
                self.notifications.daily_summary_time
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate a dynamic config tree (e.g. received over the command
    /// channel) into a typed config.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let cfg: AppConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()
            .map_err(|errs| ConfigError::Invalid(errs.join("; ")))?;
        Ok(cfg)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Recursive deep merge: objects merge key-wise, any other value in the
/// override replaces the base leaf.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load the YAML config file and overlay the latest persisted settings
/// snapshot (JSON) via deep merge before validating into the typed config.
pub fn load_config(
    path: &Path,
    latest_snapshot_json: Option<&str>,
) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut tree: Value =
        serde_json::to_value(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    if tree.is_null() {
        tree = Value::Object(serde_json::Map::new());
    }

    if let Some(snapshot) = latest_snapshot_json {
        // A corrupt snapshot must not take the bot down; ignore it.
        match serde_json::from_str::<Value>(snapshot) {
            Ok(overlay @ Value::Object(_)) => tree = deep_merge(tree, overlay),
            _ => tracing::warn!("ignoring unparseable settings snapshot"),
        }
    }

    AppConfig::from_value(tree)
}
