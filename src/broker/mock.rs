//! In-memory broker used by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{BrokerConnector, BrokerResult};
use crate::types::{
    AccountInfo, AccountTradeMode, AssetClass, CandleSeries, Deal, OrderRequest, OrderResult,
    Position, Quote, SymbolMeta, Timeframe,
};

#[derive(Default)]
pub struct MockConnector {
    pub symbols: Vec<SymbolMeta>,
    pub candles: HashMap<String, CandleSeries>,
    pub quotes: HashMap<String, Quote>,
    pub positions: Vec<Position>,
    pub deals: Vec<Deal>,
    pub account: Option<AccountInfo>,
    pub order_result: Option<OrderResult>,
    pub placed: Mutex<Vec<OrderRequest>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, meta: SymbolMeta) -> Self {
        self.symbols.push(meta);
        self
    }

    pub fn with_candles(mut self, symbol: &str, series: CandleSeries) -> Self {
        self.candles.insert(symbol.to_string(), series);
        self
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quotes.insert(quote.symbol.clone(), quote);
        self
    }

    pub fn with_account(mut self, account: AccountInfo) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_order_result(mut self, result: OrderResult) -> Self {
        self.order_result = Some(result);
        self
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }
}

pub fn demo_account(equity: f64) -> AccountInfo {
    AccountInfo {
        login: Some(1),
        server: Some("demo".into()),
        currency: Some("USD".into()),
        leverage: Some(100),
        balance: Some(equity),
        equity: Some(equity),
        margin: Some(0.0),
        trade_mode: AccountTradeMode::Demo,
        name: None,
        company: None,
    }
}

pub fn forex_meta(name: &str) -> SymbolMeta {
    SymbolMeta {
        name: name.to_string(),
        description: None,
        path: None,
        asset_class: AssetClass::Forex,
        currency_base: None,
        currency_profit: None,
        digits: Some(5),
        point: Some(0.00001),
        trade_allowed: Some(true),
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

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn discover_symbols(&self) -> BrokerResult<Vec<SymbolMeta>> {
        Ok(self.symbols.clone())
    }

    async fn get_symbol_info(&self, symbol: &str) -> BrokerResult<Option<SymbolMeta>> {
        Ok(self.symbols.iter().find(|s| s.name == symbol).cloned())
    }

    async fn get_candles(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        n: usize,
    ) -> BrokerResult<CandleSeries> {
        let series = self.candles.get(symbol).cloned().unwrap_or_default();
        let bars = series.bars();
        let start = bars.len().saturating_sub(n);
        Ok(CandleSeries::new(bars[start..].to_vec()))
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Option<Quote>> {
        Ok(self.quotes.get(symbol).cloned())
    }

    async fn list_positions(&self) -> BrokerResult<Vec<Position>> {
        Ok(self.positions.clone())
    }

    async fn list_deals(
        &self,
        _from_utc: DateTime<Utc>,
        _to_utc: DateTime<Utc>,
    ) -> BrokerResult<Vec<Deal>> {
        Ok(self.deals.clone())
    }

    async fn account_info(&self) -> BrokerResult<Option<AccountInfo>> {
        Ok(self.account.clone())
    }

    async fn place_order(&self, req: &OrderRequest) -> BrokerResult<OrderResult> {
        self.placed.lock().unwrap().push(req.clone());
        Ok(self.order_result.clone().unwrap_or(OrderResult {
            success: true,
            retcode: Some(10009),
            order_ticket: Some(1),
            position_id: Some(1),
            comment: None,
            raw: serde_json::Value::Null,
        }))
    }

    async fn modify_position(
        &self,
        _position_id: i64,
        _sl: Option<f64>,
        _tp: Option<f64>,
    ) -> BrokerResult<bool> {
        Ok(true)
    }

    async fn shutdown(&self) {}
}
