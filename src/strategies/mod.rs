pub mod range_mean_reversion;
pub mod selector;
pub mod two_pole_momentum;

pub use range_mean_reversion::RangeMeanReversionStrategy;
pub use selector::{StrategySelection, StrategySelector};
pub use two_pole_momentum::TwoPoleMomentumStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::data::FeatureBundle;
use crate::types::{CandleSeries, Position, Quote, Side, SymbolMeta, Timeframe};

pub const TAG_EXIT: &str = "exit";

/// A strategy verdict for one symbol on one closed candle. `Flat` with the
/// "exit" tag means "close my current position if any".
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub side: Side,
    pub confidence: f64,
    pub reason: String,
    pub tags: Vec<String>,
}

impl Signal {
    pub fn flat(reason: &str) -> Self {
        Self {
            side: Side::Flat,
            confidence: 0.0,
            reason: reason.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn exit(confidence: f64, reason: &str) -> Self {
        Self {
            side: Side::Flat,
            confidence,
            reason: reason.to_string(),
            tags: vec![TAG_EXIT.to_string()],
        }
    }

    pub fn entry(side: Side, confidence: f64, reason: &str) -> Self {
        Self {
            side,
            confidence,
            reason: reason.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn is_exit(&self) -> bool {
        self.side == Side::Flat && self.tags.iter().any(|t| t == TAG_EXIT)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    pub candle_close_time_utc: &'a str,
    pub quote: Option<&'a Quote>,
    pub symbol_meta: Option<&'a SymbolMeta>,
    pub current_position: Option<&'a Position>,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate_signal(
        &self,
        candles: &CandleSeries,
        features: &FeatureBundle,
        ctx: &StrategyContext<'_>,
    ) -> Signal;
}

#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn with_defaults() -> Self {
        let items: Vec<Arc<dyn Strategy>> = vec![
            Arc::new(TwoPoleMomentumStrategy),
            Arc::new(RangeMeanReversionStrategy),
        ];
        Self {
            strategies: items.into_iter().map(|s| (s.name(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_both_strategies() {
        let registry = StrategyRegistry::with_defaults();
        assert!(registry.get("two_pole_momentum").is_some());
        assert!(registry.get("range_mean_reversion").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn exit_signal_tagging() {
        let s = Signal::exit(0.5, "done");
        assert!(s.is_exit());
        assert!(!Signal::flat("nothing").is_exit());
    }
}
