use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::idempotency::IdempotencyCache;
use super::retry::call_with_retries;
use crate::broker::BrokerConnector;
use crate::config::ExecutionConfig;
use crate::database::{Database, DecisionStatus, NewDecision};
use crate::types::{OrderRequest, Side, Timeframe};

const VERIFY_DELAY: Duration = Duration::from_millis(300);

/// Audit context shared by every decision row the executor writes.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub cycle_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candle_close_time_utc: String,
    pub strategy: String,
    pub rank_score: Option<f64>,
    pub rank_components: Option<Value>,
    pub features: Option<Value>,
    pub signal: Option<Value>,
    pub risk: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub side: Side,
    pub volume: f64,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CloseOrder {
    pub position_id: i64,
    pub close_side: Side,
    pub volume: f64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub action: &'static str,
    pub success: bool,
    pub reason: String,
    pub order: Option<Value>,
    pub result: Option<Value>,
}

impl ExecutionReport {
    fn failed(action: &'static str, reason: impl Into<String>) -> Self {
        Self {
            action,
            success: false,
            reason: reason.into(),
            order: None,
            result: None,
        }
    }
}

/// Idempotent order dispatch: every open/close first claims its idempotency
/// key by inserting a decision row, then talks to the broker with retries,
/// then records the terminal status and verifies broker state.
pub struct TradeExecutor {
    connector: Arc<dyn BrokerConnector>,
    db: Arc<Database>,
    cfg: ExecutionConfig,
    cache: Mutex<IdempotencyCache>,
    verify_delay: Duration,
}

impl TradeExecutor {
    pub fn new(connector: Arc<dyn BrokerConnector>, db: Arc<Database>, cfg: ExecutionConfig) -> Self {
        Self {
            connector,
            db,
            cfg,
            cache: Mutex::new(IdempotencyCache::new()),
            verify_delay: VERIFY_DELAY,
        }
    }

    #[cfg(test)]
    pub fn without_verify_delay(mut self) -> Self {
        self.verify_delay = Duration::ZERO;
        self
    }

    pub async fn warm_idempotency_cache(&self) {
        self.cache.lock().await.load_recent(&self.db, 5000).await;
    }

    pub async fn open_trade(
        &self,
        ctx: &DecisionContext,
        order: &OpenOrder,
        idempotency_key: &str,
    ) -> ExecutionReport {
        if let Err(report) = self.preflight("open", idempotency_key).await {
            return report;
        }

        let order_req = OrderRequest {
            symbol: ctx.symbol.clone(),
            side: order.side,
            volume: order.volume,
            sl: order.sl,
            tp: order.tp,
            deviation_points: self.cfg.slippage_points,
            magic: self.cfg.magic_number,
            comment: comment_for(idempotency_key),
            idempotency_key: idempotency_key.to_string(),
            position_id: None,
        };

        let order_json = serde_json::to_value(&order_req).ok();
        if !self
            .claim_decision(ctx, idempotency_key, order_json.clone())
            .await
        {
            return ExecutionReport::failed("open", "duplicate idempotency key");
        }

        match self.dispatch(&order_req).await {
            Ok(result) => {
                let raw = result.raw.clone();
                if result.success {
                    self.finish_decision(
                        idempotency_key,
                        DecisionStatus::Opened,
                        serde_json::json!({"success": true, "retcode": result.retcode, "raw": raw}),
                    )
                    .await;
                    self.verify_open(&ctx.symbol).await;
                    ExecutionReport {
                        action: "open",
                        success: true,
                        reason: "opened".to_string(),
                        order: order_json,
                        result: serde_json::to_value(&result).ok(),
                    }
                } else {
                    self.finish_decision(
                        idempotency_key,
                        DecisionStatus::Error,
                        serde_json::json!({"success": false, "retcode": result.retcode, "raw": raw}),
                    )
                    .await;
                    ExecutionReport {
                        action: "open",
                        success: false,
                        reason: format!("retcode={:?}", result.retcode),
                        order: order_json,
                        result: serde_json::to_value(&result).ok(),
                    }
                }
            }
            Err(e) => {
                self.finish_decision(
                    idempotency_key,
                    DecisionStatus::Error,
                    serde_json::json!({"error": e.to_string()}),
                )
                .await;
                ExecutionReport {
                    action: "open",
                    success: false,
                    reason: e.to_string(),
                    order: order_json,
                    result: None,
                }
            }
        }
    }

    pub async fn close_trade(
        &self,
        ctx: &DecisionContext,
        order: &CloseOrder,
        idempotency_key: &str,
    ) -> ExecutionReport {
        if let Err(report) = self.preflight("close", idempotency_key).await {
            return report;
        }

        let order_req = OrderRequest {
            symbol: ctx.symbol.clone(),
            side: order.close_side,
            volume: order.volume,
            sl: None,
            tp: None,
            deviation_points: self.cfg.slippage_points,
            magic: self.cfg.magic_number,
            comment: comment_for(idempotency_key),
            idempotency_key: idempotency_key.to_string(),
            position_id: Some(order.position_id),
        };
        let order_json = serde_json::to_value(&order_req).ok();

        if !self
            .claim_decision(ctx, idempotency_key, order_json.clone())
            .await
        {
            return ExecutionReport::failed("close", "duplicate idempotency key");
        }

        match self.dispatch(&order_req).await {
            Ok(result) => {
                let raw = result.raw.clone();
                if result.success {
                    self.finish_decision(
                        idempotency_key,
                        DecisionStatus::Closed,
                        serde_json::json!({
                            "success": true,
                            "reason": order.reason,
                            "retcode": result.retcode,
                            "raw": raw,
                        }),
                    )
                    .await;
                    self.verify_closed(order.position_id).await;
                    ExecutionReport {
                        action: "close",
                        success: true,
                        reason: "closed".to_string(),
                        order: order_json,
                        result: serde_json::to_value(&result).ok(),
                    }
                } else {
                    self.finish_decision(
                        idempotency_key,
                        DecisionStatus::Error,
                        serde_json::json!({
                            "success": false,
                            "reason": order.reason,
                            "retcode": result.retcode,
                            "raw": raw,
                        }),
                    )
                    .await;
                    ExecutionReport {
                        action: "close",
                        success: false,
                        reason: format!("retcode={:?}", result.retcode),
                        order: order_json,
                        result: serde_json::to_value(&result).ok(),
                    }
                }
            }
            Err(e) => {
                self.finish_decision(
                    idempotency_key,
                    DecisionStatus::Error,
                    serde_json::json!({"error": e.to_string(), "reason": order.reason}),
                )
                .await;
                ExecutionReport {
                    action: "close",
                    success: false,
                    reason: e.to_string(),
                    order: order_json,
                    result: None,
                }
            }
        }
    }

    /// Gate checks shared by open and close: kill switch, paper-only account
    /// mode, and the in-process idempotency cache.
    async fn preflight(
        &self,
        action: &'static str,
        idempotency_key: &str,
    ) -> Result<(), ExecutionReport> {
        if !self.cfg.trading_enabled {
            return Err(ExecutionReport::failed(action, "trading disabled"));
        }

        match self.connector.account_info().await {
            Ok(Some(account)) if !account.trade_mode.is_paper() => {
                return Err(ExecutionReport::failed(
                    action,
                    format!("paper-only gate: trade_mode={}", account.trade_mode),
                ));
            }
            Err(e) => {
                return Err(ExecutionReport::failed(
                    action,
                    format!("account info unavailable: {}", e),
                ));
            }
            _ => {}
        }

        if self.cache.lock().await.contains(idempotency_key) {
            return Err(ExecutionReport::failed(action, "duplicate idempotency key"));
        }
        Ok(())
    }

    async fn claim_decision(
        &self,
        ctx: &DecisionContext,
        idempotency_key: &str,
        order_json: Option<Value>,
    ) -> bool {
        let decision = NewDecision {
            cycle_id: ctx.cycle_id.clone(),
            symbol: ctx.symbol.clone(),
            timeframe: ctx.timeframe.as_str().to_string(),
            candle_close_time_utc: ctx.candle_close_time_utc.clone(),
            rank_score: ctx.rank_score,
            rank_components: ctx.rank_components.clone(),
            strategy: Some(ctx.strategy.clone()),
            features: ctx.features.clone(),
            signal: ctx.signal.clone(),
            risk: ctx.risk.clone(),
            order: order_json,
            result: None,
            status: DecisionStatus::Skipped,
            idempotency_key: idempotency_key.to_string(),
        };
        match self.db.try_insert_decision(&decision).await {
            Ok(true) => {
                self.cache.lock().await.add(idempotency_key);
                true
            }
            Ok(false) => {
                self.cache.lock().await.add(idempotency_key);
                false
            }
            Err(e) => {
                warn!(error = %e, "decision insert failed; refusing dispatch");
                false
            }
        }
    }

    async fn dispatch(
        &self,
        order_req: &OrderRequest,
    ) -> Result<crate::types::OrderResult, crate::broker::BrokerError> {
        let retries = &self.cfg.retries;
        let connector = Arc::clone(&self.connector);
        let request = order_req.clone();
        call_with_retries(
            move || {
                let connector = Arc::clone(&connector);
                let request = request.clone();
                async move { connector.place_order(&request).await }
            },
            retries.max_attempts,
            &retries.backoff_seconds,
        )
        .await
    }

    async fn finish_decision(&self, idempotency_key: &str, status: DecisionStatus, result: Value) {
        if let Err(e) = self
            .db
            .update_decision_result(idempotency_key, status, Some(result))
            .await
        {
            warn!(error = %e, idempotency_key, "failed updating decision");
        }
    }

    /// Post-trade verification is a detector, not an enforcer: it logs a
    /// warning and never changes the report.
    async fn verify_open(&self, symbol: &str) {
        tokio::time::sleep(self.verify_delay).await;
        match self.connector.list_positions().await {
            Ok(positions) => {
                let found = positions
                    .iter()
                    .any(|p| p.symbol == symbol && p.matches_magic(self.cfg.magic_number));
                if !found {
                    warn!(symbol, "post-trade verification: position not found");
                }
            }
            Err(e) => debug!(error = %e, "post-trade verification failed"),
        }
    }

    async fn verify_closed(&self, position_id: i64) {
        tokio::time::sleep(self.verify_delay).await;
        match self.connector.list_positions().await {
            Ok(positions) => {
                if positions.iter().any(|p| p.position_id == position_id) {
                    warn!(position_id, "post-trade verification: position still present");
                }
            }
            Err(e) => debug!(error = %e, "post-close verification failed"),
        }
    }
}

fn comment_for(idempotency_key: &str) -> String {
    format!("tb:{}", &idempotency_key[..idempotency_key.len().min(12)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::mock::{demo_account, MockConnector};
    use crate::execution::make_idempotency_key;
    use crate::types::AccountTradeMode;

    fn ctx() -> DecisionContext {
        DecisionContext {
            cycle_id: "cyc1".into(),
            symbol: "EURUSD".into(),
            timeframe: Timeframe::H1,
            candle_close_time_utc: "2026-01-01T00:00:00+00:00".into(),
            strategy: "two_pole_momentum".into(),
            rank_score: Some(0.7),
            rank_components: None,
            features: None,
            signal: None,
            risk: None,
        }
    }

    fn open_order() -> OpenOrder {
        OpenOrder {
            side: Side::Long,
            volume: 0.05,
            sl: Some(1.099),
            tp: Some(1.102),
        }
    }

    fn enabled_cfg() -> ExecutionConfig {
        ExecutionConfig {
            trading_enabled: true,
            retries: crate::config::RetryConfig {
                max_attempts: 2,
                backoff_seconds: vec![0.0],
            },
            ..ExecutionConfig::default()
        }
    }

    async fn executor_with(
        connector: Arc<MockConnector>,
        cfg: ExecutionConfig,
    ) -> (TradeExecutor, Arc<Database>) {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        let conn: Arc<dyn BrokerConnector> = connector;
        (
            TradeExecutor::new(conn, Arc::clone(&db), cfg).without_verify_delay(),
            db,
        )
    }

    #[tokio::test]
    async fn trading_disabled_never_contacts_broker() {
        let connector = Arc::new(MockConnector::new().with_account(demo_account(1000.0)));
        let (executor, _db) = executor_with(Arc::clone(&connector), ExecutionConfig::default()).await;

        let report = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(!report.success);
        assert_eq!(report.reason, "trading disabled");
        assert!(connector.placed_orders().is_empty());
    }

    #[tokio::test]
    async fn real_account_hits_paper_only_gate() {
        let mut account = demo_account(1000.0);
        account.trade_mode = AccountTradeMode::Real;
        let connector = Arc::new(MockConnector::new().with_account(account));
        let (executor, _db) = executor_with(Arc::clone(&connector), enabled_cfg()).await;

        let report = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(!report.success);
        assert!(report.reason.contains("paper-only gate"));
        assert!(connector.placed_orders().is_empty());
    }

    fn key(side: &str) -> String {
        make_idempotency_key(
            "EURUSD",
            "H1",
            "2026-01-01T00:00:00+00:00",
            "two_pole_momentum",
            side,
        )
    }

    #[tokio::test]
    async fn open_is_dispatched_once_per_key() {
        let connector =
            Arc::new(MockConnector::new().with_account(demo_account(1000.0)));
        let (executor, _db) = executor_with(Arc::clone(&connector), enabled_cfg()).await;

        let first = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(first.success, "{}", first.reason);

        let second = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(!second.success);
        assert_eq!(second.reason, "duplicate idempotency key");

        // exactly one broker call and one terminal decision for the tuple
        assert_eq!(connector.placed_orders().len(), 1);
        let placed = &connector.placed_orders()[0];
        assert_eq!(placed.magic, enabled_cfg().magic_number);
        assert!(placed.comment.starts_with("tb:"));
        assert_eq!(placed.comment.len(), 15);
    }

    #[tokio::test]
    async fn reversal_close_and_open_use_distinct_keys() {
        let connector = Arc::new(MockConnector::new().with_account(demo_account(1000.0)));
        let (executor, _db) = executor_with(Arc::clone(&connector), enabled_cfg()).await;

        let close = executor
            .close_trade(
                &ctx(),
                &CloseOrder {
                    position_id: 99,
                    close_side: Side::Long,
                    volume: 0.05,
                    reason: "reversal".into(),
                },
                &key("flat"),
            )
            .await;
        assert!(close.success, "{}", close.reason);

        let open = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(open.success, "{}", open.reason);

        let placed = connector.placed_orders();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].position_id, Some(99));
        assert_eq!(placed[1].position_id, None);
        assert_ne!(placed[0].idempotency_key, placed[1].idempotency_key);
    }

    #[tokio::test]
    async fn broker_rejection_marks_decision_error() {
        let connector = Arc::new(
            MockConnector::new()
                .with_account(demo_account(1000.0))
                .with_order_result(crate::types::OrderResult {
                    success: false,
                    retcode: Some(10013),
                    order_ticket: None,
                    position_id: None,
                    comment: Some("invalid request".into()),
                    raw: serde_json::Value::Null,
                }),
        );
        let (executor, _db) = executor_with(Arc::clone(&connector), enabled_cfg()).await;

        let report = executor.open_trade(&ctx(), &open_order(), &key("long")).await;
        assert!(!report.success);
        assert!(report.reason.contains("10013"));
    }
}
