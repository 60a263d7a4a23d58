use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::reconciler::DealReconciler;
use super::scheduler::CandleCloseScheduler;
use super::state::{
    new_shared_snapshot, EngineCommand, EngineSnapshot, PositionView, RankedSymbolView,
    SharedSnapshot,
};
use crate::broker::bridge::Mt5BridgeConnector;
use crate::broker::BrokerConnector;
use crate::config::AppConfig;
use crate::data::DataPipeline;
use crate::database::{Database, DecisionStatus, Heartbeat, NewDecision};
use crate::execution::{
    make_idempotency_key, CloseOrder, DecisionContext, OpenOrder, TradeExecutor,
};
use crate::monitoring::{ResourceGauges, ResourceMonitor};
use crate::notifications::{
    daily_summary_message, error_message, risk_pause_message, risk_unpause_message,
    trade_close_message, trade_open_message, TelegramNotifier,
};
use crate::ranking::{RankOutput, Ranker};
use crate::risk::{EquityState, RiskManager};
use crate::strategies::{StrategyContext, StrategyRegistry, StrategySelector};
use crate::types::{AccountInfo, DealEntry, Position, Side};
use crate::universe::UniverseManager;

const EVENT_RING: usize = 50;
const RECONNECT_SLEEP_SECS: f64 = 3.0;
const DEALS_BACKFILL_HOURS: i64 = 6;

/// Control surface for the engine: the command channel plus the published
/// snapshot. This is all the UI thread ever touches.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    snapshot: SharedSnapshot,
}

impl EngineHandle {
    pub fn send(&self, cmd: EngineCommand) {
        let _ = self.commands.send(cmd);
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }
}

/// Single-owner control loop: candle-close scheduling, ranking, strategy +
/// risk + execution per selected symbol, deal reconciliation, heartbeats.
pub struct BotEngine {
    config: AppConfig,
    db: Arc<Database>,

    commands: mpsc::UnboundedReceiver<EngineCommand>,
    snapshot: SharedSnapshot,

    connector: Option<Arc<dyn BrokerConnector>>,
    scheduler: CandleCloseScheduler,
    universe: UniverseManager,
    ranker: Option<Ranker>,
    executor: Option<Arc<TradeExecutor>>,
    risk: RiskManager,
    registry: StrategyRegistry,
    selector: StrategySelector,
    notifier: TelegramNotifier,
    reconciler: DealReconciler,

    resource_monitor: ResourceMonitor,
    last_resources: ResourceGauges,

    manual_paused: bool,
    risk_paused_prev: Option<bool>,
    last_daily_summary_date: Option<String>,
    events: VecDeque<String>,
    errors: VecDeque<String>,
    snap: EngineSnapshot,
    stop: bool,
}

impl BotEngine {
    pub fn new(config: AppConfig, db: Arc<Database>) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = new_shared_snapshot();
        let handle = EngineHandle {
            commands: tx,
            snapshot: Arc::clone(&snapshot),
        };

        let registry = StrategyRegistry::with_defaults();
        let selector = StrategySelector::new(config.strategy.clone(), registry.clone());
        let notifier = TelegramNotifier::from_env(
            config.notifications.telegram_enabled,
            config.notifications.throttle_seconds,
        );
        let risk = RiskManager::new(config.risk.clone(), config.execution.magic_number);
        let scheduler = CandleCloseScheduler::new(config.runtime.timeframe);
        let universe = UniverseManager::new(config.universe.clone());
        let mut snap = EngineSnapshot::default();
        snap.trading_enabled = config.execution.trading_enabled;

        let engine = Self {
            config,
            db,
            commands: rx,
            snapshot,
            connector: None,
            scheduler,
            universe,
            ranker: None,
            executor: None,
            risk,
            registry,
            selector,
            notifier,
            reconciler: DealReconciler::new(Utc::now() - Duration::hours(DEALS_BACKFILL_HOURS)),
            resource_monitor: ResourceMonitor::new(),
            last_resources: ResourceGauges::default(),
            manual_paused: false,
            risk_paused_prev: None,
            last_daily_summary_date: None,
            events: VecDeque::new(),
            errors: VecDeque::new(),
            snap,
            stop: false,
        };
        (engine, handle)
    }

    pub async fn run(mut self) {
        self.event("engine started").await;
        if let Ok(Some(hb)) = self.db.latest_heartbeat_equity().await {
            self.risk.restore_from_heartbeat(&hb);
        }

        while !self.stop {
            self.process_commands().await;
            self.update_resources();

            if self.stop {
                break;
            }

            if self.connector.is_none() {
                self.connect_or_wait().await;
                continue;
            }

            let Some(anchor) = self.universe.anchor_symbol().map(str::to_string) else {
                self.refresh_universe(true).await;
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                continue;
            };
            let Some(connector) = self.connector.clone() else {
                continue;
            };
            match self.scheduler.poll(&connector, &anchor).await {
                Some(close_time) => self.run_cycle(close_time).await,
                None => {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(
                        self.config.runtime.loop_sleep_seconds,
                    ))
                    .await;
                }
            }
        }

        self.event("engine stopping").await;
        if let Some(connector) = &self.connector {
            connector.shutdown().await;
        }
        self.event("engine stopped").await;
    }

    // ---- wiring ----

    async fn connect_or_wait(&mut self) {
        match Mt5BridgeConnector::from_env().await {
            Ok(connector) => {
                let connector: Arc<dyn BrokerConnector> = Arc::new(connector);
                self.attach_connector(connector).await;
                self.event("connected to broker").await;
            }
            Err(e) => {
                self.record_error(&format!("broker connect error: {}", e), None).await;
                tokio::time::sleep(std::time::Duration::from_secs_f64(RECONNECT_SLEEP_SECS)).await;
            }
        }
    }

    pub(crate) async fn attach_connector(&mut self, connector: Arc<dyn BrokerConnector>) {
        self.connector = Some(connector);
        self.rebuild_wiring();
        if let Some(executor) = &self.executor {
            executor.warm_idempotency_cache().await;
        }
        self.reconciler
            .reset(Utc::now() - Duration::hours(DEALS_BACKFILL_HOURS));
        self.refresh_universe(true).await;
        self.snap.connected = true;
        self.publish_snapshot().await;
    }

    fn rebuild_wiring(&mut self) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        let pipeline = DataPipeline::new(
            Arc::clone(&connector),
            self.config.runtime.timeframe,
            self.config.runtime.warmup_bars,
        );
        self.ranker = Some(Ranker::new(
            Arc::clone(&connector),
            pipeline,
            self.config.ranking.clone(),
            self.config.runtime.timeframe,
        ));
        self.executor = Some(Arc::new(TradeExecutor::new(
            connector,
            Arc::clone(&self.db),
            self.config.execution.clone(),
        )));
    }

    async fn refresh_universe(&mut self, force: bool) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        if !force && !self.universe.refresh_due(Utc::now()) {
            return;
        }
        match self.universe.refresh(&connector).await {
            Ok(()) => {
                let msg = format!("universe refreshed ({} symbols)", self.universe.symbols().len());
                self.event(&msg).await;
            }
            Err(e) => {
                self.record_error(&format!("universe refresh error: {}", e), None).await;
            }
        }
    }

    // ---- commands ----

    async fn process_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                EngineCommand::Pause => {
                    self.manual_paused = true;
                    self.event("manual pause enabled").await;
                }
                EngineCommand::Resume => {
                    self.manual_paused = false;
                    self.event("manual pause disabled").await;
                }
                EngineCommand::RefreshUniverse => {
                    self.refresh_universe(true).await;
                }
                EngineCommand::ApplyConfig(value) => {
                    self.apply_config(value, "ui").await;
                }
                EngineCommand::Quit => {
                    self.stop = true;
                    return;
                }
            }
            self.snap.paused = self.manual_paused || self.risk.state.paused;
            self.publish_snapshot().await;
        }
    }

    async fn apply_config(&mut self, value: Value, source: &str) {
        let cfg = match AppConfig::from_value(value.clone()) {
            Ok(cfg) => cfg,
            Err(e) => {
                self.record_error(&format!("invalid config from {}: {}", source, e), None).await;
                return;
            }
        };

        if let Err(e) = self.db.insert_settings_snapshot(source, &value).await {
            warn!(error = %e, "settings snapshot persist failed");
        }

        self.config = cfg;
        self.risk = RiskManager::new(
            self.config.risk.clone(),
            self.config.execution.magic_number,
        );
        if let Ok(Some(hb)) = self.db.latest_heartbeat_equity().await {
            self.risk.restore_from_heartbeat(&hb);
        }
        self.selector = StrategySelector::new(self.config.strategy.clone(), self.registry.clone());
        self.scheduler = CandleCloseScheduler::new(self.config.runtime.timeframe);
        self.universe.set_config(self.config.universe.clone());
        self.rebuild_wiring();

        self.snap.trading_enabled = self.config.execution.trading_enabled;
        self.event(&format!("config applied ({})", source)).await;
    }

    // ---- cycle ----

    async fn run_cycle(&mut self, candle_close_time_utc: DateTime<Utc>) {
        let cycle_id = Uuid::new_v4().simple().to_string()[..12].to_string();
        if let Err(e) = self.cycle_inner(&cycle_id, candle_close_time_utc).await {
            self.record_error(&format!("cycle error: {}", e), Some(&cycle_id)).await;
        }
    }

    async fn cycle_inner(
        &mut self,
        cycle_id: &str,
        candle_close_time_utc: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let Some(connector) = self.connector.clone() else {
            return Ok(());
        };
        let start = Instant::now();
        let mut stage: HashMap<String, f64> = HashMap::new();
        let close_iso = candle_close_time_utc.to_rfc3339();
        info!(cycle_id, candle_close = %close_iso, "cycle start");

        self.refresh_universe(false).await;
        if self.universe.symbols().is_empty() {
            self.snap.last_cycle_id = Some(cycle_id.to_string());
            self.snap.last_candle_close_time_utc = Some(close_iso);
            self.publish_snapshot().await;
            return Ok(());
        }

        let t0 = Instant::now();
        let account = connector.account_info().await?;
        let positions = connector.list_positions().await?;
        stage.insert("fetch_account_positions".into(), ms(t0));

        let now_local = candle_close_time_utc.with_timezone(&self.config.runtime.tz());
        let today = now_local.date_naive();
        let today_str = today.to_string();
        let eq_state = self
            .risk
            .update_equity_state(account.as_ref(), &today_str, Utc::now());
        self.handle_risk_pause_state(&eq_state).await;

        let t1 = Instant::now();
        let symbols: Vec<String> = self.universe.symbols().to_vec();
        let rank_out = match &self.ranker {
            Some(ranker) => ranker.rank(&symbols, self.universe.meta()).await,
            None => RankOutput::default(),
        };
        stage.insert("rank".into(), ms(t1));

        let magic = self.config.execution.magic_number;
        let top_views: Vec<RankedSymbolView> = rank_out
            .selected
            .iter()
            .map(|r| RankedSymbolView {
                symbol: r.symbol.clone(),
                score: r.score,
                components: r.components,
                reasons: r.reasons.clone(),
            })
            .collect();
        let pos_views: Vec<PositionView> = positions
            .iter()
            .filter(|p| p.matches_magic(magic))
            .map(|p| PositionView {
                symbol: p.symbol.clone(),
                side: p.side,
                volume: p.volume,
                price_open: p.price_open,
                sl: p.sl,
                tp: p.tp,
                profit: p.profit,
            })
            .collect();

        let t2 = Instant::now();
        self.process_top_symbols(cycle_id, &close_iso, &rank_out, &positions, account.as_ref())
            .await;
        stage.insert("strategy_risk_exec".into(), ms(t2));

        let t3 = Instant::now();
        self.sync_deals(cycle_id).await;
        stage.insert("sync_deals".into(), ms(t3));

        let t4 = Instant::now();
        let (day_start_utc, day_end_utc) = self.local_day_utc_bounds(today);
        let (today_pnl, wins, losses, equity) =
            self.compute_today_metrics(day_start_utc, day_end_utc).await;
        stage.insert("metrics".into(), ms(t4));

        self.maybe_send_daily_summary(&today_str, now_local.time(), today_pnl, wins, losses, equity)
            .await;

        let total_ms = ms(start);
        info!(
            cycle_id,
            latency_ms = total_ms,
            selected = top_views.len(),
            "cycle complete"
        );
        self.persist_heartbeat(cycle_id, &close_iso, total_ms, &stage, &eq_state, pos_views.len())
            .await;

        self.snap.last_cycle_id = Some(cycle_id.to_string());
        self.snap.last_candle_close_time_utc = Some(close_iso);
        self.snap.last_cycle_latency_ms = Some(total_ms);
        self.snap.stage_timings_ms = stage;
        self.snap.top_ranked = top_views;
        self.snap.open_positions = pos_views;
        self.snap.today_pnl = today_pnl;
        self.snap.wins = wins;
        self.snap.losses = losses;
        self.snap.trading_enabled = self.config.execution.trading_enabled;
        self.snap.paused = self.manual_paused || self.risk.state.paused;
        self.publish_snapshot().await;
        Ok(())
    }

    async fn handle_risk_pause_state(&mut self, eq_state: &EquityState) {
        let paused = eq_state.paused;
        match self.risk_paused_prev {
            None => self.risk_paused_prev = Some(paused),
            Some(prev) if prev != paused => {
                self.risk_paused_prev = Some(paused);
                if paused {
                    let reason = eq_state.pause_reason.as_deref().unwrap_or("risk pause");
                    self.notifier
                        .send(&risk_pause_message(reason), Some("risk_pause"))
                        .await;
                } else {
                    self.notifier
                        .send(&risk_unpause_message(), Some("risk_unpause"))
                        .await;
                }
            }
            _ => {}
        }
    }

    async fn process_top_symbols(
        &self,
        cycle_id: &str,
        close_iso: &str,
        rank_out: &RankOutput,
        positions: &[Position],
        account: Option<&AccountInfo>,
    ) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        let Some(executor) = self.executor.clone() else {
            return;
        };
        let timeframe = self.config.runtime.timeframe;
        let magic = self.config.execution.magic_number;

        let mut pos_by_symbol: HashMap<&str, &Position> = HashMap::new();
        for p in positions {
            if let Some(m) = p.magic {
                if m != magic {
                    continue;
                }
            }
            pos_by_symbol.insert(p.symbol.as_str(), p);
        }

        for ranked in &rank_out.selected {
            let sym = ranked.symbol.as_str();
            let Some(bundle) = rank_out.bundles.get(sym) else {
                continue;
            };
            if bundle.candles.is_empty() {
                continue;
            }
            let Some(features) = &bundle.features else {
                continue;
            };
            let quote = match connector.get_quote(sym).await {
                Ok(Some(q)) => q,
                _ => continue,
            };
            let Some(meta) = self.universe.meta().get(sym) else {
                continue;
            };

            let features_json = serde_json::to_value(features).ok();
            let components_json = serde_json::to_value(ranked.components).ok();

            let selection = self.selector.select(features);
            let Some(strategy) = selection.strategy else {
                // mid-zone / unknown strategy: record a no-signal decision
                // with a NULL strategy so the regime gap stays auditable
                let key = make_idempotency_key(
                    sym,
                    timeframe.as_str(),
                    close_iso,
                    "none",
                    Side::Flat.as_str(),
                );
                self.insert_decision(NewDecision {
                    cycle_id: cycle_id.to_string(),
                    symbol: sym.to_string(),
                    timeframe: timeframe.as_str().to_string(),
                    candle_close_time_utc: close_iso.to_string(),
                    rank_score: Some(ranked.score),
                    rank_components: components_json,
                    strategy: None,
                    features: features_json,
                    signal: Some(serde_json::json!({
                        "side": Side::Flat.as_str(),
                        "reason": selection.reason,
                    })),
                    risk: Some(serde_json::json!({
                        "paused": self.risk.state.paused,
                        "manual_paused": self.manual_paused,
                    })),
                    order: None,
                    result: None,
                    status: DecisionStatus::NoSignal,
                    idempotency_key: key,
                })
                .await;
                continue;
            };

            let ctx = StrategyContext {
                symbol: sym,
                timeframe,
                candle_close_time_utc: close_iso,
                quote: Some(&quote),
                symbol_meta: Some(meta),
                current_position: pos_by_symbol.get(sym).copied(),
            };
            let signal = strategy.generate_signal(&bundle.candles, features, &ctx);
            let signal_json = serde_json::to_value(&signal).ok();
            let strategy_name = strategy.name();

            // manual pause blocks dispatch but decisions are still recorded
            if self.manual_paused {
                let key = make_idempotency_key(
                    sym,
                    timeframe.as_str(),
                    close_iso,
                    strategy_name,
                    signal.side.as_str(),
                );
                self.insert_decision(NewDecision {
                    cycle_id: cycle_id.to_string(),
                    symbol: sym.to_string(),
                    timeframe: timeframe.as_str().to_string(),
                    candle_close_time_utc: close_iso.to_string(),
                    rank_score: Some(ranked.score),
                    rank_components: components_json,
                    strategy: Some(strategy_name.to_string()),
                    features: features_json,
                    signal: signal_json,
                    risk: Some(serde_json::json!({"allowed": false, "reason": "manual pause"})),
                    order: None,
                    result: None,
                    status: DecisionStatus::RiskBlocked,
                    idempotency_key: key,
                })
                .await;
                continue;
            }

            let decision_ctx = DecisionContext {
                cycle_id: cycle_id.to_string(),
                symbol: sym.to_string(),
                timeframe,
                candle_close_time_utc: close_iso.to_string(),
                strategy: strategy_name.to_string(),
                rank_score: Some(ranked.score),
                rank_components: components_json.clone(),
                features: features_json.clone(),
                signal: signal_json.clone(),
                risk: None,
            };

            // exit signal closes the held position when configured to
            if signal.is_exit() {
                if !self.config.execution.close_on_exit_signal {
                    continue;
                }
                let Some(pos) = pos_by_symbol.get(sym).copied() else {
                    continue;
                };
                let key = make_idempotency_key(
                    sym,
                    timeframe.as_str(),
                    close_iso,
                    strategy_name,
                    Side::Flat.as_str(),
                );
                let mut ctx = decision_ctx.clone();
                ctx.risk = Some(serde_json::json!({
                    "paused": self.risk.state.paused,
                    "pause_reason": self.risk.state.pause_reason,
                }));
                let report = executor
                    .close_trade(
                        &ctx,
                        &CloseOrder {
                            position_id: pos.position_id,
                            close_side: pos.side.opposite(),
                            volume: pos.volume,
                            reason: signal.reason.clone(),
                        },
                        &key,
                    )
                    .await;
                if report.success {
                    self.notifier
                        .send(
                            &trade_close_message(
                                sym,
                                pos.side.as_str(),
                                pos.volume,
                                None,
                                Some(&signal.reason),
                            ),
                            Some(&format!("close:{}:{}", sym, close_iso)),
                        )
                        .await;
                }
                continue;
            }

            if signal.side.is_entry() {
                if let Some(pos) = pos_by_symbol.get(sym).copied() {
                    if pos.side != signal.side {
                        // opposite signal: close first, then open fresh
                        let close_key = make_idempotency_key(
                            sym,
                            timeframe.as_str(),
                            close_iso,
                            strategy_name,
                            Side::Flat.as_str(),
                        );
                        let mut ctx = decision_ctx.clone();
                        ctx.risk = Some(serde_json::json!({
                            "paused": self.risk.state.paused,
                            "pause_reason": self.risk.state.pause_reason,
                        }));
                        let report = executor
                            .close_trade(
                                &ctx,
                                &CloseOrder {
                                    position_id: pos.position_id,
                                    close_side: pos.side.opposite(),
                                    volume: pos.volume,
                                    reason: "reversal".to_string(),
                                },
                                &close_key,
                            )
                            .await;
                        if report.success {
                            self.notifier
                                .send(
                                    &trade_close_message(
                                        sym,
                                        pos.side.as_str(),
                                        pos.volume,
                                        None,
                                        Some("reversal"),
                                    ),
                                    Some(&format!("close:{}:{}", sym, close_iso)),
                                )
                                .await;
                        }
                    } else {
                        // same side already open: record and stand pat
                        let key = make_idempotency_key(
                            sym,
                            timeframe.as_str(),
                            close_iso,
                            strategy_name,
                            Side::Flat.as_str(),
                        );
                        self.insert_decision(NewDecision {
                            cycle_id: cycle_id.to_string(),
                            symbol: sym.to_string(),
                            timeframe: timeframe.as_str().to_string(),
                            candle_close_time_utc: close_iso.to_string(),
                            rank_score: Some(ranked.score),
                            rank_components: components_json,
                            strategy: Some(strategy_name.to_string()),
                            features: features_json,
                            signal: signal_json,
                            risk: Some(serde_json::json!({"note": "already in position"})),
                            order: None,
                            result: None,
                            status: DecisionStatus::Skipped,
                            idempotency_key: key,
                        })
                        .await;
                        continue;
                    }
                }

                let risk_decision = self.risk.check_entry(
                    sym,
                    signal.side,
                    &quote,
                    meta,
                    features,
                    positions,
                    account,
                );
                let risk_json = serde_json::to_value(&risk_decision).ok();
                let key = make_idempotency_key(
                    sym,
                    timeframe.as_str(),
                    close_iso,
                    strategy_name,
                    signal.side.as_str(),
                );
                if !risk_decision.allowed {
                    self.insert_decision(NewDecision {
                        cycle_id: cycle_id.to_string(),
                        symbol: sym.to_string(),
                        timeframe: timeframe.as_str().to_string(),
                        candle_close_time_utc: close_iso.to_string(),
                        rank_score: Some(ranked.score),
                        rank_components: components_json,
                        strategy: Some(strategy_name.to_string()),
                        features: features_json,
                        signal: signal_json,
                        risk: risk_json,
                        order: None,
                        result: None,
                        status: DecisionStatus::RiskBlocked,
                        idempotency_key: key,
                    })
                    .await;
                    continue;
                }

                let mut ctx = decision_ctx.clone();
                ctx.risk = risk_json;
                let volume = risk_decision.volume.unwrap_or(0.0);
                let report = executor
                    .open_trade(
                        &ctx,
                        &OpenOrder {
                            side: signal.side,
                            volume,
                            sl: risk_decision.sl,
                            tp: risk_decision.tp,
                        },
                        &key,
                    )
                    .await;
                if report.success {
                    let price = if signal.side == Side::Long { quote.ask } else { quote.bid };
                    self.notifier
                        .send(
                            &trade_open_message(
                                sym,
                                signal.side.as_str(),
                                volume,
                                Some(price),
                                risk_decision.sl,
                                risk_decision.tp,
                                strategy_name,
                                Some(ranked.score),
                            ),
                            Some(&format!("open:{}:{}:{}", sym, close_iso, signal.side)),
                        )
                        .await;
                }
                continue;
            }

            // flat without exit tag: nothing to do this candle
            let key = make_idempotency_key(
                sym,
                timeframe.as_str(),
                close_iso,
                strategy_name,
                Side::Flat.as_str(),
            );
            self.insert_decision(NewDecision {
                cycle_id: cycle_id.to_string(),
                symbol: sym.to_string(),
                timeframe: timeframe.as_str().to_string(),
                candle_close_time_utc: close_iso.to_string(),
                rank_score: Some(ranked.score),
                rank_components: components_json,
                strategy: Some(strategy_name.to_string()),
                features: features_json,
                signal: signal_json,
                risk: None,
                order: None,
                result: None,
                status: DecisionStatus::NoSignal,
                idempotency_key: key,
            })
            .await;
        }
    }

    async fn insert_decision(&self, decision: NewDecision) {
        if let Err(e) = self.db.try_insert_decision(&decision).await {
            warn!(error = %e, symbol = %decision.symbol, "decision insert failed");
        }
    }

    async fn sync_deals(&mut self, cycle_id: &str) {
        let Some(connector) = self.connector.clone() else {
            return;
        };
        let new_deals = match self.reconciler.sync(&connector, &self.db).await {
            Ok(deals) => deals,
            Err(e) => {
                self.record_error(&format!("deal sync error: {}", e), Some(cycle_id)).await;
                return;
            }
        };
        if new_deals.is_empty() {
            return;
        }

        self.risk.on_new_deals(&new_deals, Utc::now());

        let magic = self.config.execution.magic_number;
        for deal in &new_deals {
            if let Some(m) = deal.magic {
                if m != magic {
                    continue;
                }
            }
            if deal.entry != DealEntry::Out {
                continue;
            }
            let comment = deal.comment.as_deref().unwrap_or("").trim();
            // bot-initiated closes were already announced at dispatch
            if comment.to_lowercase().starts_with("tb:") {
                continue;
            }
            self.notifier
                .send(
                    &trade_close_message(
                        &deal.symbol,
                        deal.side.as_str(),
                        deal.volume,
                        deal.profit,
                        if comment.is_empty() { None } else { Some(comment) },
                    ),
                    Some(&format!("deal_close:{}", deal.deal_ticket)),
                )
                .await;
        }
    }

    /// Today's realized PnL and win/loss counts over the configured-timezone
    /// calendar day, passed in as a UTC instant window.
    async fn compute_today_metrics(
        &self,
        day_start_utc: DateTime<Utc>,
        day_end_utc: DateTime<Utc>,
    ) -> (Option<f64>, u32, u32, Option<f64>) {
        let rows = match self.db.deals_between(day_start_utc, day_end_utc).await {
            Ok(rows) => rows,
            Err(_) => return (None, 0, 0, None),
        };
        let magic = self.config.execution.magic_number;
        let mut pnl = 0.0;
        let mut wins = 0;
        let mut losses = 0;
        for row in rows {
            if let Some(m) = row.magic {
                if m != magic {
                    continue;
                }
            }
            if row.entry != "OUT" {
                continue;
            }
            let Some(profit) = row.profit else {
                continue;
            };
            pnl += profit;
            if profit >= 0.0 {
                wins += 1;
            } else {
                losses += 1;
            }
        }
        let equity = self
            .db
            .latest_heartbeat_equity()
            .await
            .ok()
            .flatten()
            .and_then(|hb| hb.equity);
        (Some(pnl), wins, losses, equity)
    }

    async fn maybe_send_daily_summary(
        &mut self,
        today: &str,
        now_local_time: chrono::NaiveTime,
        today_pnl: Option<f64>,
        wins: u32,
        losses: u32,
        equity: Option<f64>,
    ) {
        let Some(target) = self.config.notifications.daily_summary_time_of_day() else {
            return;
        };
        if self.last_daily_summary_date.as_deref() == Some(today) {
            return;
        }
        if now_local_time < target {
            return;
        }
        self.last_daily_summary_date = Some(today.to_string());
        self.notifier
            .send(
                &daily_summary_message(today, today_pnl, wins, losses, equity),
                Some(&format!("daily:{}", today)),
            )
            .await;
    }

    async fn persist_heartbeat(
        &self,
        cycle_id: &str,
        close_iso: &str,
        latency_ms: f64,
        stage: &HashMap<String, f64>,
        eq_state: &EquityState,
        open_positions: usize,
    ) {
        let hb = Heartbeat {
            cycle_id: cycle_id.to_string(),
            status: "ok".to_string(),
            cycle_latency_ms: Some(latency_ms),
            broker_connected: self.connector.is_some(),
            equity: eq_state.equity,
            balance: eq_state.balance,
            daily_start_equity: eq_state.daily_start_equity,
            daily_pnl: eq_state.daily_pnl,
            peak_equity: eq_state.peak_equity,
            drawdown_pct: eq_state.drawdown_pct,
            open_positions: open_positions as i64,
            cpu_pct: self.last_resources.cpu_pct,
            ram_pct: self.last_resources.ram_pct,
            disk_pct: self.last_resources.disk_pct,
            net_rx_bps: self.last_resources.net_rx_bps,
            net_tx_bps: self.last_resources.net_tx_bps,
            temp_c: self.last_resources.temp_c,
            extra: Some(serde_json::json!({
                "stage_timings_ms": stage,
                "candle_close_time_utc": close_iso,
            })),
        };
        if let Err(e) = self.db.insert_heartbeat(&hb).await {
            warn!(error = %e, "heartbeat persist failed");
        }
    }

    /// UTC instants of the configured timezone's midnights bracketing `date`.
    fn local_day_utc_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let tz = self.config.runtime.tz();
        let next = date.succ_opt().unwrap_or(date);
        (local_midnight_utc(tz, date), local_midnight_utc(tz, next))
    }

    // ---- bookkeeping ----

    fn update_resources(&mut self) {
        self.last_resources = self.resource_monitor.snapshot();
        self.snap.resources = self.last_resources;
    }

    async fn event(&mut self, msg: &str) {
        info!("{}", msg);
        self.events.push_front(msg.to_string());
        self.events.truncate(EVENT_RING);
        self.publish_snapshot().await;
    }

    async fn record_error(&mut self, msg: &str, cycle_id: Option<&str>) {
        error!(cycle_id = ?cycle_id, "{}", msg);
        self.errors.push_front(msg.to_string());
        self.errors.truncate(EVENT_RING);

        if let Err(e) = self
            .db
            .insert_error("ERROR", msg, None, cycle_id, None)
            .await
        {
            warn!(error = %e, "error row persist failed");
        }

        let prefix: String = msg.chars().take(60).collect();
        self.notifier
            .send(&error_message(msg, cycle_id), Some(&format!("err:{}", prefix)))
            .await;
        self.publish_snapshot().await;
    }

    async fn publish_snapshot(&self) {
        let mut snap = self.snap.clone();
        snap.connected = self.connector.is_some();
        snap.paused = self.manual_paused || self.risk.state.paused;
        snap.last_events = self.events.iter().take(10).cloned().collect();
        snap.last_errors = self.errors.iter().take(10).cloned().collect();
        *self.snapshot.write().await = snap;
    }
}

fn ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Local midnight of `date` in `tz` as a UTC instant. A DST gap at midnight
/// resolves to the earliest valid local time.
fn local_midnight_utc(tz: chrono_tz::Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::{demo_account, forex_meta, MockConnector};
    use crate::types::{Candle, CandleSeries, Quote};
    use chrono::TimeZone;

    fn flat_series(n: usize) -> CandleSeries {
        let candles = (0..n)
            .map(|i| {
                let c = 100.0;
                Candle {
                    time_utc: Utc.timestamp_opt(i as i64 * 3600, 0).unwrap(),
                    open: c,
                    high: c + 0.1,
                    low: c - 0.1,
                    close: c,
                }
            })
            .collect();
        CandleSeries::new(candles)
    }

    fn quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: 100.0,
            ask: 100.002,
            time_utc: Utc::now(),
            spread_points: 20.0,
        }
    }

    #[tokio::test]
    async fn cycle_records_decision_and_heartbeat() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut config = AppConfig::default();
        config.universe.preferred_symbols = vec!["EURUSD".to_string()];
        config.universe.use_symbol_discovery = false;
        config.ranking.min_bars_required = 200;
        config.notifications.telegram_enabled = false;

        let (mut engine, handle) = BotEngine::new(config, Arc::clone(&db));
        let connector: Arc<dyn BrokerConnector> = Arc::new(
            MockConnector::new()
                .with_symbol(forex_meta("EURUSD"))
                .with_candles("EURUSD", flat_series(400))
                .with_quote(quote("EURUSD"))
                .with_account(demo_account(1000.0)),
        );
        engine.attach_connector(connector).await;

        let close = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        engine.run_cycle(close).await;

        // a flat market yields one no-signal decision for the symbol
        let keys = db.recent_idempotency_keys(10).await.unwrap();
        assert_eq!(keys.len(), 1);

        // and a heartbeat carrying the equity state
        let hb = db.latest_heartbeat_equity().await.unwrap().unwrap();
        assert_eq!(hb.equity, Some(1000.0));

        let snap = handle.snapshot();
        let snap = snap.read().await;
        assert!(snap.connected);
        assert!(snap.last_cycle_id.is_some());
        assert_eq!(snap.top_ranked.len(), 1);
    }

    #[tokio::test]
    async fn second_cycle_same_candle_is_idempotent() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut config = AppConfig::default();
        config.universe.preferred_symbols = vec!["EURUSD".to_string()];
        config.universe.use_symbol_discovery = false;
        config.ranking.min_bars_required = 200;
        config.notifications.telegram_enabled = false;

        let (mut engine, _handle) = BotEngine::new(config, Arc::clone(&db));
        let connector: Arc<dyn BrokerConnector> = Arc::new(
            MockConnector::new()
                .with_symbol(forex_meta("EURUSD"))
                .with_candles("EURUSD", flat_series(400))
                .with_quote(quote("EURUSD"))
                .with_account(demo_account(1000.0)),
        );
        engine.attach_connector(connector).await;

        let close = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        engine.run_cycle(close).await;
        engine.run_cycle(close).await;

        let keys = db.recent_idempotency_keys(10).await.unwrap();
        assert_eq!(keys.len(), 1, "same candle must not duplicate decisions");
    }

    #[tokio::test]
    async fn local_day_bounds_follow_configured_timezone() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let mut config = AppConfig::default();
        config.runtime.timezone = "Asia/Dubai".to_string(); // UTC+4, no DST
        let (engine, _handle) = BotEngine::new(config, db);

        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let (start, end) = engine.local_day_utc_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 31, 20, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 20, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn quit_command_stops_engine() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let (mut engine, handle) = BotEngine::new(AppConfig::default(), db);
        handle.send(EngineCommand::Quit);
        engine.process_commands().await;
        assert!(engine.stop);
    }

    #[tokio::test]
    async fn pause_command_is_reflected_in_snapshot() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let (mut engine, handle) = BotEngine::new(AppConfig::default(), db);
        handle.send(EngineCommand::Pause);
        engine.process_commands().await;
        assert!(engine.manual_paused);
        assert!(handle.snapshot().read().await.paused);

        handle.send(EngineCommand::Resume);
        engine.process_commands().await;
        assert!(!engine.manual_paused);
    }
}
