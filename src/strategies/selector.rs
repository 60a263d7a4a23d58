use std::sync::Arc;

use tracing::error;

use super::{Strategy, StrategyRegistry};
use crate::config::{StrategyConfig, StrategyMode};
use crate::data::FeatureBundle;

/// Outcome of strategy selection. `strategy: None` means "no strategy for
/// this regime"; the decision is still persisted downstream as no-signal.
pub struct StrategySelection {
    pub strategy: Option<Arc<dyn Strategy>>,
    pub reason: String,
}

pub struct StrategySelector {
    cfg: StrategyConfig,
    registry: StrategyRegistry,
}

impl StrategySelector {
    pub fn new(cfg: StrategyConfig, registry: StrategyRegistry) -> Self {
        Self { cfg, registry }
    }

    pub fn select(&self, features: &FeatureBundle) -> StrategySelection {
        if self.cfg.mode == StrategyMode::Manual {
            return match self.registry.get(&self.cfg.manual_active) {
                Some(s) => StrategySelection {
                    strategy: Some(s),
                    reason: "manual mode".to_string(),
                },
                None => {
                    error!(
                        name = %self.cfg.manual_active,
                        available = ?self.registry.names(),
                        "configured manual strategy unknown"
                    );
                    StrategySelection {
                        strategy: None,
                        reason: format!("unknown strategy: {}", self.cfg.manual_active),
                    }
                }
            };
        }

        let adx = features.adx14.unwrap_or(0.0);
        let trending = self.cfg.rule_based.adx_trending;
        let ranging = self.cfg.rule_based.adx_ranging;

        if adx >= trending {
            return StrategySelection {
                strategy: self.registry.get("two_pole_momentum"),
                reason: format!("ADX {:.1} >= {:.1} (trending)", adx, trending),
            };
        }
        if adx <= ranging {
            return StrategySelection {
                strategy: self.registry.get("range_mean_reversion"),
                reason: format!("ADX {:.1} <= {:.1} (ranging)", adx, ranging),
            };
        }
        StrategySelection {
            strategy: None,
            reason: format!("ADX {:.1} mid-zone: no trade", adx),
        }
    }
}
