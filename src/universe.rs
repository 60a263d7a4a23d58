use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::broker::{BrokerConnector, BrokerResult};
use crate::config::UniverseConfig;
use crate::types::{AssetClass, SymbolMeta};

/// Tradable symbol universe. The first symbol doubles as the anchor clock
/// source for the candle-close scheduler.
pub struct UniverseManager {
    cfg: UniverseConfig,
    symbols: Vec<String>,
    meta: HashMap<String, SymbolMeta>,
    last_refresh_utc: Option<DateTime<Utc>>,
}

impl UniverseManager {
    pub fn new(cfg: UniverseConfig) -> Self {
        Self {
            cfg,
            symbols: Vec::new(),
            meta: HashMap::new(),
            last_refresh_utc: None,
        }
    }

    pub fn set_config(&mut self, cfg: UniverseConfig) {
        self.cfg = cfg;
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn meta(&self) -> &HashMap<String, SymbolMeta> {
        &self.meta
    }

    pub fn anchor_symbol(&self) -> Option<&str> {
        self.symbols.first().map(|s| s.as_str())
    }

    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh_utc {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.cfg.discovery_interval_minutes as i64 * 60
            }
        }
    }

    pub async fn refresh(&mut self, connector: &Arc<dyn BrokerConnector>) -> BrokerResult<()> {
        let discovered = connector.discover_symbols().await?;
        let (symbols, meta) = build_universe(&discovered, &self.cfg);
        info!(count = symbols.len(), anchor = ?symbols.first(), "universe refreshed");
        self.symbols = symbols;
        self.meta = meta;
        self.last_refresh_utc = Some(Utc::now());
        Ok(())
    }
}

/// Assemble the ordered universe from discovered symbols: resolved preferred
/// names first, then per-class discovery up to the configured caps,
/// de-duplicated preserving order.
pub fn build_universe(
    discovered: &[SymbolMeta],
    cfg: &UniverseConfig,
) -> (Vec<String>, HashMap<String, SymbolMeta>) {
    let meta_by_name: HashMap<&str, &SymbolMeta> =
        discovered.iter().map(|m| (m.name.as_str(), m)).collect();
    let discovered_names: HashSet<&str> = meta_by_name.keys().copied().collect();

    let mut universe: Vec<String> = Vec::new();

    for canonical in &cfg.preferred_symbols {
        let aliases = cfg.aliases.get(canonical).cloned().unwrap_or_default();
        match resolve_symbol(canonical, &discovered_names, &aliases) {
            Some(resolved) => {
                let allowed = meta_by_name
                    .get(resolved.as_str())
                    .map(|m| m.trade_allowed != Some(false))
                    .unwrap_or(true);
                if allowed {
                    universe.push(resolved);
                } else {
                    warn!(symbol = %resolved, "preferred symbol not tradable");
                }
            }
            None => warn!(canonical = %canonical, "preferred symbol not found"),
        }
    }

    if cfg.use_symbol_discovery {
        let mut allowed_classes: HashSet<AssetClass> = HashSet::new();
        if cfg.include_asset_classes.forex {
            allowed_classes.insert(AssetClass::Forex);
        }
        if cfg.include_asset_classes.metals {
            allowed_classes.insert(AssetClass::Metals);
        }
        if cfg.include_asset_classes.indices {
            allowed_classes.insert(AssetClass::Indices);
        }
        if cfg.include_asset_classes.stocks {
            allowed_classes.insert(AssetClass::Stocks);
        }

        let mut by_class: HashMap<AssetClass, Vec<&str>> = HashMap::new();
        for m in discovered {
            if !allowed_classes.contains(&m.asset_class) {
                continue;
            }
            if m.trade_allowed == Some(false) {
                continue;
            }
            by_class.entry(m.asset_class).or_default().push(&m.name);
        }

        let mut extras: Vec<&str> = Vec::new();
        let mut classes: Vec<&AssetClass> = by_class.keys().collect();
        classes.sort_by_key(|c| c.as_str());
        for class in classes {
            let mut names = by_class[class].clone();
            names.sort_unstable();
            for name in names.into_iter().take(cfg.discovery_limits.max_per_class) {
                if !universe.iter().any(|u| u == name) && !extras.contains(&name) {
                    extras.push(name);
                }
            }
        }

        for name in extras {
            if universe.len() >= cfg.discovery_limits.max_symbols_total {
                break;
            }
            universe.push(name.to_string());
        }
    }

    let mut seen = HashSet::new();
    universe.retain(|s| seen.insert(s.clone()));

    let meta: HashMap<String, SymbolMeta> = universe
        .iter()
        .filter_map(|name| meta_by_name.get(name.as_str()).map(|m| (name.clone(), (*m).clone())))
        .collect();

    (universe, meta)
}

/// Resolve a canonical symbol name against discovered broker names: exact
/// match, then alias match, then case-insensitive, then shortest prefix.
pub fn resolve_symbol(
    canonical: &str,
    discovered: &HashSet<&str>,
    aliases: &[String],
) -> Option<String> {
    let mut candidates: Vec<&str> = vec![canonical];
    candidates.extend(aliases.iter().map(|a| a.as_str()));

    for c in &candidates {
        if discovered.contains(c) {
            return Some((*c).to_string());
        }
    }

    let lower_map: HashMap<String, &str> =
        discovered.iter().map(|s| (s.to_lowercase(), *s)).collect();
    for c in &candidates {
        if let Some(found) = lower_map.get(&c.to_lowercase()) {
            return Some((*found).to_string());
        }
    }

    let prefix = canonical.to_uppercase();
    let mut matches: Vec<&str> = discovered
        .iter()
        .filter(|s| s.to_uppercase().starts_with(&prefix))
        .copied()
        .collect();
    if matches.is_empty() {
        return None;
    }
    matches.sort_by_key(|s| (s.len(), s.to_string()));
    Some(matches[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetClassToggles, DiscoveryLimits};

    fn meta(name: &str, class: AssetClass, tradable: bool) -> SymbolMeta {
        SymbolMeta {
            name: name.to_string(),
            description: None,
            path: None,
            asset_class: class,
            currency_base: None,
            currency_profit: None,
            digits: Some(5),
            point: Some(0.00001),
            trade_allowed: Some(tradable),
            spread_points: Some(10.0),
            trade_stops_level: Some(0),
            volume_min: Some(0.01),
            volume_max: Some(100.0),
            volume_step: Some(0.01),
            trade_tick_value: Some(1.0),
            trade_tick_size: Some(0.00001),
            trade_contract_size: Some(100_000.0),
        }
    }

    #[test]
    fn resolution_prefers_exact_then_alias_then_case_then_prefix() {
        let discovered: HashSet<&str> = ["EURUSD", "gbpusd", "XAUUSDm", "XAUUSDmicro"]
            .into_iter()
            .collect();

        assert_eq!(
            resolve_symbol("EURUSD", &discovered, &[]),
            Some("EURUSD".to_string())
        );
        assert_eq!(
            resolve_symbol("GOLD", &discovered, &["XAUUSDm".to_string()]),
            Some("XAUUSDm".to_string())
        );
        assert_eq!(
            resolve_symbol("GBPUSD", &discovered, &[]),
            Some("gbpusd".to_string())
        );
        // shortest prefix match wins
        assert_eq!(
            resolve_symbol("XAUUSD", &discovered, &[]),
            Some("XAUUSDm".to_string())
        );
        assert_eq!(resolve_symbol("USDJPY", &discovered, &[]), None);
    }

    #[test]
    fn discovery_respects_caps_and_trade_allowed() {
        let discovered = vec![
            meta("EURUSD", AssetClass::Forex, true),
            meta("GBPUSD", AssetClass::Forex, true),
            meta("USDJPY", AssetClass::Forex, true),
            meta("XAUUSD", AssetClass::Metals, true),
            meta("US30", AssetClass::Indices, false),
        ];
        let cfg = UniverseConfig {
            use_symbol_discovery: true,
            preferred_symbols: vec!["EURUSD".to_string()],
            include_asset_classes: AssetClassToggles::default(),
            discovery_limits: DiscoveryLimits {
                max_symbols_total: 3,
                max_per_class: 2,
            },
            ..UniverseConfig::default()
        };
        let (symbols, meta_map) = build_universe(&discovered, &cfg);
        assert_eq!(symbols[0], "EURUSD");
        assert_eq!(symbols.len(), 3);
        assert!(!symbols.contains(&"US30".to_string()));
        assert!(meta_map.contains_key("EURUSD"));
    }

    #[test]
    fn anchor_is_first_symbol() {
        let discovered = vec![meta("EURUSD", AssetClass::Forex, true)];
        let cfg = UniverseConfig {
            preferred_symbols: vec!["EURUSD".to_string()],
            use_symbol_discovery: false,
            ..UniverseConfig::default()
        };
        let mut mgr = UniverseManager::new(cfg.clone());
        let (symbols, meta_map) = build_universe(&discovered, &cfg);
        mgr.symbols = symbols;
        mgr.meta = meta_map;
        assert_eq!(mgr.anchor_symbol(), Some("EURUSD"));
    }
}
