use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use super::limits::{count_positions, daily_loss_pct, drawdown_pct};
use super::sizing::compute_volume;
use super::sltp::{sltp_atr, sltp_rr, Sltp};
use crate::config::{RiskConfig, SltpMode};
use crate::data::FeatureBundle;
use crate::database::HeartbeatEquity;
use crate::types::{AccountInfo, Deal, DealEntry, Position, Quote, Side, SymbolMeta};

/// Process-wide risk state. Daily fields roll over on the local calendar
/// date; peak equity only resets with the process.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub cooloff_until_utc: Option<DateTime<Utc>>,
    pub loss_streak: u32,
    pub daily_date: Option<String>,
    pub daily_start_equity: Option<f64>,
    pub peak_equity: Option<f64>,
}

/// Equity evaluation result for persistence and the UI snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EquityState {
    pub equity: Option<f64>,
    pub balance: Option<f64>,
    pub daily_start_equity: Option<f64>,
    pub daily_pnl: Option<f64>,
    pub peak_equity: Option<f64>,
    pub drawdown_pct: Option<f64>,
    pub daily_loss_pct: Option<f64>,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub loss_streak: u32,
    pub cooloff_until_utc: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reason: String,
    pub side: Side,
    pub volume: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub details: serde_json::Value,
}

impl RiskDecision {
    fn rejected(side: Side, reason: &str, details: serde_json::Value) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
            side,
            volume: None,
            sl: None,
            tp: None,
            details,
        }
    }
}

pub struct RiskManager {
    cfg: RiskConfig,
    magic_number: i64,
    pub state: RiskState,
}

impl RiskManager {
    pub fn new(cfg: RiskConfig, magic_number: i64) -> Self {
        Self {
            cfg,
            magic_number,
            state: RiskState::default(),
        }
    }

    /// Recover equity anchors from the last heartbeat so a restart keeps the
    /// monotone peak and the daily baseline.
    pub fn restore_from_heartbeat(&mut self, hb: &HeartbeatEquity) {
        self.state.daily_start_equity = hb.daily_start_equity;
        self.state.peak_equity = hb.peak_equity;
    }

    /// Track the loss streak from freshly-reconciled closing deals carrying
    /// the bot magic; engage cooloff when the configured streak is reached.
    pub fn on_new_deals(&mut self, deals: &[Deal], now: DateTime<Utc>) {
        for deal in deals {
            if let Some(magic) = deal.magic {
                if magic != self.magic_number {
                    continue;
                }
            }
            if deal.entry != DealEntry::Out {
                continue;
            }
            let profit = deal.profit.unwrap_or(0.0);
            if profit < 0.0 {
                self.state.loss_streak += 1;
            } else {
                self.state.loss_streak = 0;
            }

            if self.cfg.cooloff.enabled && self.state.loss_streak >= self.cfg.cooloff.losses {
                let until = now + Duration::minutes(self.cfg.cooloff.minutes);
                self.state.cooloff_until_utc = Some(until);
                warn!(
                    loss_streak = self.state.loss_streak,
                    cooloff_until = %until,
                    "cooloff engaged"
                );
            }
        }
    }

    /// Update daily/peak equity tracking and derive the paused flag. Called
    /// once per cycle before any entries are considered.
    pub fn update_equity_state(
        &mut self,
        account: Option<&AccountInfo>,
        now_local_date: &str,
        now_utc: DateTime<Utc>,
    ) -> EquityState {
        let equity = account.and_then(|a| a.equity);
        let balance = account.and_then(|a| a.balance);

        if self.state.daily_date.as_deref() != Some(now_local_date) {
            self.state.daily_date = Some(now_local_date.to_string());
            if let Some(eq) = equity {
                if eq > 0.0 {
                    self.state.daily_start_equity = Some(eq);
                }
            }
            self.state.loss_streak = 0;
            self.state.cooloff_until_utc = None;
        }

        if let Some(eq) = equity {
            if eq > 0.0 && self.state.peak_equity.map(|p| eq > p).unwrap_or(true) {
                self.state.peak_equity = Some(eq);
            }
        }

        let dd = match (equity, self.state.peak_equity) {
            (Some(eq), Some(peak)) if peak > 0.0 => Some(drawdown_pct(peak, eq)),
            _ => None,
        };
        let dl = match (equity, self.state.daily_start_equity) {
            (Some(eq), Some(start)) if start > 0.0 => Some(daily_loss_pct(start, eq)),
            _ => None,
        };

        let mut paused = false;
        let mut pause_reason = None;
        if let Some(dl) = dl {
            if dl >= self.cfg.max_daily_loss_pct {
                paused = true;
                pause_reason = Some(format!(
                    "max daily loss breached ({:.2}% >= {:.2}%)",
                    dl * 100.0,
                    self.cfg.max_daily_loss_pct * 100.0
                ));
            }
        }
        if let Some(dd) = dd {
            if dd >= self.cfg.max_drawdown_pct {
                paused = true;
                pause_reason = Some(format!(
                    "max drawdown breached ({:.2}% >= {:.2}%)",
                    dd * 100.0,
                    self.cfg.max_drawdown_pct * 100.0
                ));
            }
        }
        if let Some(until) = self.state.cooloff_until_utc {
            if now_utc < until {
                paused = true;
                pause_reason = Some(format!("cooloff until {}", until.to_rfc3339()));
            }
        }

        self.state.paused = paused;
        self.state.pause_reason = pause_reason.clone();

        EquityState {
            equity,
            balance,
            daily_start_equity: self.state.daily_start_equity,
            daily_pnl: match (equity, self.state.daily_start_equity) {
                (Some(eq), Some(start)) => Some(eq - start),
                _ => None,
            },
            peak_equity: self.state.peak_equity,
            drawdown_pct: dd,
            daily_loss_pct: dl,
            paused,
            pause_reason,
            loss_streak: self.state.loss_streak,
            cooloff_until_utc: self.state.cooloff_until_utc.map(|t| t.to_rfc3339()),
        }
    }

    /// Gate + size a candidate entry: pause state, position caps, SL/TP
    /// computation and risk-based volume, in that order.
    pub fn check_entry(
        &self,
        symbol: &str,
        side: Side,
        quote: &Quote,
        symbol_meta: &SymbolMeta,
        features: &FeatureBundle,
        positions: &[Position],
        account: Option<&AccountInfo>,
    ) -> RiskDecision {
        if !side.is_entry() {
            return RiskDecision::rejected(side, "side is not entry", serde_json::Value::Null);
        }
        if self.state.paused {
            return RiskDecision::rejected(
                side,
                self.state.pause_reason.as_deref().unwrap_or("risk paused"),
                serde_json::json!({"paused": true}),
            );
        }

        let counts = count_positions(positions, Some(self.magic_number));
        if counts.total >= self.cfg.max_open_positions_total {
            return RiskDecision::rejected(
                side,
                &format!("max open positions reached ({})", counts.total),
                serde_json::json!({"open_positions_total": counts.total}),
            );
        }
        let symbol_count = counts.per_symbol.get(symbol).copied().unwrap_or(0);
        if symbol_count >= self.cfg.max_open_positions_per_symbol {
            return RiskDecision::rejected(
                side,
                &format!("max positions for symbol reached ({})", symbol),
                serde_json::json!({"open_positions_symbol": symbol_count}),
            );
        }

        let point = symbol_meta.point.unwrap_or(0.0);
        if point <= 0.0 {
            return RiskDecision::rejected(side, "symbol point missing", serde_json::Value::Null);
        }

        let entry = if side == Side::Long { quote.ask } else { quote.bid };
        let sltp = self.compute_sltp(side, entry, point, features);
        let (Some(sl), Some(tp)) = (sltp.sl, sltp.tp) else {
            return RiskDecision::rejected(side, "failed to compute SL/TP", serde_json::Value::Null);
        };

        let stop_points = (entry - sl).abs() / point;
        let equity = account.and_then(|a| a.equity).unwrap_or(0.0);
        let sizing = compute_volume(equity, self.cfg.risk_per_trade, stop_points, symbol_meta);
        let Some(volume) = sizing.volume else {
            return RiskDecision::rejected(
                side,
                &format!("sizing blocked: {}", sizing.reason),
                serde_json::Value::Null,
            );
        };

        RiskDecision {
            allowed: true,
            reason: "ok".to_string(),
            side,
            volume: Some(volume),
            sl: Some(sl),
            tp: Some(tp),
            details: serde_json::json!({
                "entry": entry,
                "stop_points": stop_points,
                "volume_reason": sizing.reason,
                "sltp_mode": match self.cfg.sltp_mode {
                    SltpMode::Rr => "rr",
                    SltpMode::Atr => "atr",
                },
            }),
        }
    }

    fn compute_sltp(&self, side: Side, entry: f64, point: f64, features: &FeatureBundle) -> Sltp {
        match self.cfg.sltp_mode {
            SltpMode::Atr => {
                let atr14 = features.atr14.unwrap_or(0.0);
                sltp_atr(side, entry, atr14, self.cfg.atr.sl_mult, self.cfg.atr.tp_mult)
            }
            SltpMode::Rr => sltp_rr(
                side,
                entry,
                point,
                self.cfg.rr.stop_points,
                self.cfg.rr.take_points,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::{demo_account, forex_meta};
    use chrono::TimeZone;

    fn quote() -> Quote {
        Quote {
            symbol: "EURUSD".into(),
            bid: 1.0,
            ask: 1.0002,
            time_utc: Utc::now(),
            spread_points: 20.0,
        }
    }

    fn features() -> FeatureBundle {
        FeatureBundle {
            close: 1.0,
            atr14: Some(0.001),
            ..FeatureBundle::default()
        }
    }

    fn bot_position(symbol: &str, side: Side, magic: i64) -> Position {
        Position {
            position_id: 1,
            symbol: symbol.to_string(),
            side,
            volume: 0.01,
            price_open: 1.0,
            sl: None,
            tp: None,
            time_utc: Utc::now(),
            profit: None,
            swap: None,
            commission: None,
            magic: Some(magic),
            comment: None,
        }
    }

    fn out_deal(profit: f64, magic: i64) -> Deal {
        Deal {
            deal_ticket: 1,
            position_id: Some(1),
            order_ticket: None,
            time_utc: Utc::now(),
            symbol: "EURUSD".into(),
            side: Side::Short,
            entry: DealEntry::Out,
            volume: 0.01,
            price: 1.0,
            profit: Some(profit),
            commission: None,
            swap: None,
            magic: Some(magic),
            comment: None,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn pauses_on_daily_loss_breach() {
        let cfg = RiskConfig::default();
        let limit = cfg.max_daily_loss_pct;
        let mut rm = RiskManager::new(cfg, 42);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();

        let state = rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", now);
        assert!(!state.paused);

        let dropped = demo_account(1000.0 * (1.0 - limit - 0.01));
        let state = rm.update_equity_state(Some(&dropped), "2026-01-01", now);
        assert!(state.paused);
        assert!(state.pause_reason.unwrap().contains("daily loss"));
    }

    #[test]
    fn new_day_resets_baseline_and_unpauses() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();

        rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", now);
        // 3% intraday loss breaches the 2% daily cap but not the 6% drawdown cap
        let state = rm.update_equity_state(Some(&demo_account(970.0)), "2026-01-01", now);
        assert!(state.paused);

        // next local day: 970 becomes the new daily baseline
        let state = rm.update_equity_state(Some(&demo_account(970.0)), "2026-01-02", now);
        assert!(!state.paused);
        assert_eq!(state.daily_start_equity, Some(970.0));
    }

    #[test]
    fn peak_equity_is_monotone() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        let now = Utc::now();
        for (i, eq) in [1000.0, 1200.0, 1100.0, 1150.0].iter().enumerate() {
            let date = format!("2026-01-{:02}", i + 1);
            rm.update_equity_state(Some(&demo_account(*eq)), &date, now);
        }
        assert_eq!(rm.state.peak_equity, Some(1200.0));
    }

    #[test]
    fn loss_streak_engages_cooloff() {
        let mut cfg = RiskConfig::default();
        cfg.cooloff.losses = 2;
        cfg.cooloff.minutes = 60;
        let mut rm = RiskManager::new(cfg, 42);
        let now = Utc::now();
        rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", now);

        rm.on_new_deals(&[out_deal(-5.0, 42)], now);
        assert!(rm.state.cooloff_until_utc.is_none());
        rm.on_new_deals(&[out_deal(-3.0, 42)], now);
        assert!(rm.state.cooloff_until_utc.is_some());

        // same local day: the cooloff gate pauses entries
        let state = rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", now);
        assert!(state.paused);
        assert!(state.pause_reason.unwrap().contains("cooloff"));
    }

    #[test]
    fn foreign_magic_deals_are_ignored() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        rm.on_new_deals(&[out_deal(-5.0, 99), out_deal(-5.0, 99)], Utc::now());
        assert_eq!(rm.state.loss_streak, 0);
    }

    #[test]
    fn profitable_close_resets_streak() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        rm.on_new_deals(&[out_deal(-5.0, 42), out_deal(2.0, 42)], Utc::now());
        assert_eq!(rm.state.loss_streak, 0);
    }

    #[test]
    fn entry_blocked_at_max_positions() {
        let mut cfg = RiskConfig::default();
        cfg.max_open_positions_total = 1;
        let mut rm = RiskManager::new(cfg, 42);
        rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", Utc::now());

        let positions = vec![bot_position("EURUSD", Side::Long, 42)];
        let decision = rm.check_entry(
            "EURUSD",
            Side::Long,
            &quote(),
            &forex_meta("EURUSD"),
            &features(),
            &positions,
            Some(&demo_account(1000.0)),
        );
        assert!(!decision.allowed);
        assert!(decision.reason.contains("max open positions"));
    }

    #[test]
    fn allowed_entry_carries_volume_and_levels() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        rm.update_equity_state(Some(&demo_account(1000.0)), "2026-01-01", Utc::now());

        let decision = rm.check_entry(
            "EURUSD",
            Side::Long,
            &quote(),
            &forex_meta("EURUSD"),
            &features(),
            &[],
            Some(&demo_account(1000.0)),
        );
        assert!(decision.allowed, "{}", decision.reason);
        // rr mode: SL 100 points below ask, TP 200 above
        let sl = decision.sl.unwrap();
        let tp = decision.tp.unwrap();
        assert!((1.0002 - sl - 0.001).abs() < 1e-9);
        assert!((tp - 1.0002 - 0.002).abs() < 1e-9);
        assert!((decision.volume.unwrap() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn paused_state_rejects_entries() {
        let mut rm = RiskManager::new(RiskConfig::default(), 42);
        rm.state.paused = true;
        rm.state.pause_reason = Some("max drawdown breached".into());
        let decision = rm.check_entry(
            "EURUSD",
            Side::Long,
            &quote(),
            &forex_meta("EURUSD"),
            &features(),
            &[],
            Some(&demo_account(1000.0)),
        );
        assert!(!decision.allowed);
        assert!(decision.reason.contains("drawdown"));
    }
}
