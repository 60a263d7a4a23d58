pub mod bridge;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    AccountInfo, CandleSeries, Deal, OrderRequest, OrderResult, Position, Quote, SymbolMeta,
    Timeframe,
};

/// Broker failures, classified for the retry layer: `Disconnected` and
/// `Retryable` are retried with backoff, `Fatal` surfaces immediately.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker disconnected: {0}")]
    Disconnected(String),
    #[error("retryable broker error: {0}")]
    Retryable(String),
    #[error("broker error: {0}")]
    Fatal(String),
}

impl BrokerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Disconnected(_) | BrokerError::Retryable(_))
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Capability set required from a broker platform. Vendor return codes stay
/// behind the implementation; callers see `OrderResult` and `BrokerError`.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn discover_symbols(&self) -> BrokerResult<Vec<SymbolMeta>>;

    async fn get_symbol_info(&self, symbol: &str) -> BrokerResult<Option<SymbolMeta>>;

    /// Last `n` bars, ascending by open time, UTC timestamps. The final bar
    /// may still be forming.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> BrokerResult<CandleSeries>;

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Option<Quote>>;

    async fn list_positions(&self) -> BrokerResult<Vec<Position>>;

    async fn list_deals(
        &self,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> BrokerResult<Vec<Deal>>;

    async fn account_info(&self) -> BrokerResult<Option<AccountInfo>>;

    async fn place_order(&self, req: &OrderRequest) -> BrokerResult<OrderResult>;

    /// Adjust SL/TP on an open position. Carried for stop-management logic;
    /// the control loop does not call it yet.
    async fn modify_position(
        &self,
        position_id: i64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> BrokerResult<bool>;

    async fn shutdown(&self);
}
