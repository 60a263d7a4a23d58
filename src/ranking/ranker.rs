use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::correlation::greedy_correlation_filter;
use super::normalizer::robust_minmax;
use super::scorer::{compute_score, ScoreComponents};
use crate::broker::BrokerConnector;
use crate::config::RankingConfig;
use crate::data::{CandleBundle, DataPipeline, FeatureBundle};
use crate::types::{Quote, SymbolMeta, Timeframe};

/// Raw (pre-normalisation) inputs behind a symbol's rank, persisted alongside
/// the decision for auditability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawRankFeatures {
    pub atr14: f64,
    pub atr14_pct: f64,
    pub adx14: f64,
    pub momentum: f64,
    pub spread_points: f64,
    pub spread_to_atr: f64,
}

#[derive(Debug, Clone)]
pub struct RankedSymbol {
    pub symbol: String,
    pub score: f64,
    pub components: ScoreComponents,
    pub raw: RawRankFeatures,
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RankOutput {
    /// Every candidate that survived the filters, sorted by score descending.
    pub ranked: Vec<RankedSymbol>,
    /// Top-N after the correlation filter, still in score order.
    pub selected: Vec<RankedSymbol>,
    /// Fetched candles, reused downstream to avoid a second fetch.
    pub bundles: HashMap<String, CandleBundle>,
    /// symbol -> reason it was dropped
    pub excluded: HashMap<String, String>,
}

pub struct Ranker {
    connector: Arc<dyn BrokerConnector>,
    pipeline: DataPipeline,
    cfg: RankingConfig,
    timeframe: Timeframe,
}

impl Ranker {
    pub fn new(
        connector: Arc<dyn BrokerConnector>,
        pipeline: DataPipeline,
        cfg: RankingConfig,
        timeframe: Timeframe,
    ) -> Self {
        Self {
            connector,
            pipeline,
            cfg,
            timeframe,
        }
    }

    pub async fn rank(
        &self,
        symbols: &[String],
        symbol_meta: &HashMap<String, SymbolMeta>,
    ) -> RankOutput {
        let mut out = RankOutput::default();
        let mut candidates: Vec<String> = Vec::new();
        let mut raw_feats: HashMap<String, RawRankFeatures> = HashMap::new();

        let now = Utc::now();
        let tick_stale_seconds = (10 * 60).min(self.timeframe.seconds());

        for sym in symbols {
            let bundle = self.pipeline.fetch(sym).await;
            let bars = bundle.candles.len();
            out.bundles.insert(sym.clone(), bundle);

            if bars < self.cfg.min_bars_required {
                out.excluded.insert(sym.clone(), "not enough bars".to_string());
                continue;
            }
            if let Some(meta) = symbol_meta.get(sym) {
                if meta.trade_allowed == Some(false) {
                    out.excluded.insert(sym.clone(), "trade not allowed".to_string());
                    continue;
                }
            }

            let quote = match self.connector.get_quote(sym).await {
                Ok(Some(q)) => q,
                Ok(None) => {
                    out.excluded.insert(sym.clone(), "no quote".to_string());
                    continue;
                }
                Err(e) => {
                    out.excluded.insert(sym.clone(), format!("quote error: {}", e));
                    continue;
                }
            };
            if self.cfg.filters.market_open_required {
                let age = quote.age_seconds(now);
                if age > tick_stale_seconds {
                    out.excluded
                        .insert(sym.clone(), format!("stale tick age={}s", age));
                    continue;
                }
            }
            if quote.spread_points > self.cfg.filters.max_spread_points {
                out.excluded.insert(
                    sym.clone(),
                    format!(
                        "spread {:.1} > {:.1}",
                        quote.spread_points, self.cfg.filters.max_spread_points
                    ),
                );
                continue;
            }

            let features = out.bundles[sym].features.clone();
            let Some(features) = features else {
                out.excluded.insert(sym.clone(), "invalid ATR/close".to_string());
                continue;
            };
            let (atr14, close) = (features.atr14.unwrap_or(0.0), features.close);
            if !(atr14 > 0.0 && close > 0.0 && atr14.is_finite() && close.is_finite()) {
                out.excluded.insert(sym.clone(), "invalid ATR/close".to_string());
                continue;
            }
            let spread_to_atr = quote.spread() / atr14;
            if spread_to_atr > self.cfg.filters.max_spread_to_atr_ratio {
                out.excluded.insert(
                    sym.clone(),
                    format!(
                        "spread/ATR {:.2} > {:.2}",
                        spread_to_atr, self.cfg.filters.max_spread_to_atr_ratio
                    ),
                );
                continue;
            }

            raw_feats.insert(sym.clone(), raw_features(&features, &quote, spread_to_atr));
            candidates.push(sym.clone());
        }

        if candidates.is_empty() {
            return out;
        }

        let vol_n = robust_minmax(&collect(&candidates, &raw_feats, |r| r.atr14_pct));
        let trend_n = robust_minmax(&collect(&candidates, &raw_feats, |r| r.adx14));
        let mom_n = robust_minmax(&collect(&candidates, &raw_feats, |r| r.momentum));
        let cost_n = robust_minmax(&collect(&candidates, &raw_feats, |r| r.spread_to_atr));

        let mut ranked: Vec<RankedSymbol> = Vec::with_capacity(candidates.len());
        for (i, sym) in candidates.iter().enumerate() {
            let raw = raw_feats.remove(sym).unwrap_or_default();
            let components = ScoreComponents {
                volatility: finite_or_zero(vol_n[i]),
                trend: finite_or_zero(trend_n[i]),
                momentum: finite_or_zero(mom_n[i]),
                cost: 1.0 - finite_or(cost_n[i], 1.0),
            };
            let score = compute_score(&components, &self.cfg.weights);
            let reasons = rank_reasons(&raw);
            ranked.push(RankedSymbol {
                symbol: sym.clone(),
                score,
                components,
                raw,
                reasons,
            });
        }

        // stable sort keeps filter-order for ties
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let selected = if self.cfg.correlation.enabled && ranked.len() > 1 {
            let ranked_syms: Vec<String> = ranked.iter().map(|r| r.symbol.clone()).collect();
            let returns = self.returns_matrix(&out.bundles, &ranked_syms);
            let decision = greedy_correlation_filter(
                &ranked_syms,
                &returns,
                self.cfg.correlation.max_abs_corr,
                self.cfg.top_n,
            );
            for (sym, why) in &decision.excluded {
                out.excluded
                    .insert(sym.clone(), format!("correlation filter: {}", why));
            }
            let mut selected: Vec<RankedSymbol> = ranked
                .iter()
                .filter(|r| decision.selected.contains(&r.symbol))
                .cloned()
                .collect();
            selected.sort_by_key(|r| {
                decision
                    .selected
                    .iter()
                    .position(|s| *s == r.symbol)
                    .unwrap_or(usize::MAX)
            });
            debug_assert!(
                selected.iter().all(|r| !out.excluded.contains_key(&r.symbol)),
                "selected and excluded must be disjoint"
            );
            selected
        } else {
            ranked.iter().take(self.cfg.top_n).cloned().collect()
        };

        debug!(
            candidates = ranked.len(),
            selected = selected.len(),
            excluded = out.excluded.len(),
            "ranking pass complete"
        );
        out.ranked = ranked;
        out.selected = selected;
        out
    }

    fn returns_matrix(
        &self,
        bundles: &HashMap<String, CandleBundle>,
        symbols: &[String],
    ) -> HashMap<String, Vec<f64>> {
        let window = self.cfg.correlation.window_bars;
        let mut returns = HashMap::new();
        for sym in symbols {
            if let Some(bundle) = bundles.get(sym) {
                let r = bundle.candles.returns();
                let start = r.len().saturating_sub(window);
                returns.insert(sym.clone(), r[start..].to_vec());
            }
        }
        returns
    }
}

fn raw_features(features: &FeatureBundle, quote: &Quote, spread_to_atr: f64) -> RawRankFeatures {
    let atr14 = features.atr14.unwrap_or(0.0);
    RawRankFeatures {
        atr14,
        atr14_pct: features
            .atr14_pct
            .unwrap_or(if features.close != 0.0 { atr14 / features.close } else { 0.0 }),
        adx14: features.adx14.unwrap_or(0.0),
        momentum: momentum_of(features),
        spread_points: quote.spread_points,
        spread_to_atr,
    }
}

/// Oscillator histogram magnitude relative to ATR, falling back to the
/// absolute 20-bar return when the oscillator is unavailable.
fn momentum_of(features: &FeatureBundle) -> f64 {
    let atr14 = features.atr14.unwrap_or(0.0);
    if let Some(hist) = features.tp_hist {
        if atr14 > 0.0 {
            return (hist / atr14).abs();
        }
    }
    features.ret20.map(|r| r.abs()).unwrap_or(0.0)
}

fn rank_reasons(raw: &RawRankFeatures) -> Vec<String> {
    let mut reasons = Vec::new();
    if raw.adx14 >= 25.0 {
        reasons.push("strong trend (ADX)".to_string());
    }
    if raw.spread_to_atr <= 0.10 {
        reasons.push("low cost (spread/ATR)".to_string());
    }
    if raw.atr14_pct >= 0.004 {
        reasons.push("good volatility (ATR%)".to_string());
    }
    if raw.momentum >= 0.5 {
        reasons.push("good momentum".to_string());
    }
    if reasons.is_empty() {
        reasons.push("meets filters".to_string());
    }
    reasons
}

fn collect(
    candidates: &[String],
    raw: &HashMap<String, RawRankFeatures>,
    f: impl Fn(&RawRankFeatures) -> f64,
) -> Vec<f64> {
    candidates.iter().map(|s| f(&raw[s])).collect()
}

fn finite_or_zero(v: f64) -> f64 {
    finite_or(v, 0.0)
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}
