use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BrokerConnector, BrokerError, BrokerResult};
use crate::types::{
    AccountInfo, AccountTradeMode, AssetClass, Candle, CandleSeries, Deal, DealEntry, OrderRequest,
    OrderResult, Position, Quote, Side, SymbolMeta, Timeframe,
};

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:18812";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// MetaTrader 5 trade server return codes accepted as success.
const RETCODE_PLACED: i64 = 10008;
const RETCODE_DONE: i64 = 10009;
const RETCODE_DONE_PARTIAL: i64 = 10010;

/// HTTP client for a local MetaTrader 5 bridge gateway. The gateway owns the
/// terminal session; this client holds no connection state beyond the login
/// handshake it performs at construction.
pub struct Mt5BridgeConnector {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ConnectPayload<'a> {
    login: i64,
    password: &'a str,
    server: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

impl Mt5BridgeConnector {
    /// Connect using `MT5_LOGIN`, `MT5_PASSWORD`, `MT5_SERVER` and the
    /// optional `MT5_PATH` / `MT5_BRIDGE_URL` environment variables.
    pub async fn from_env() -> BrokerResult<Self> {
        let login = std::env::var("MT5_LOGIN")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| BrokerError::Fatal("MT5_LOGIN missing or not numeric".into()))?;
        let password = std::env::var("MT5_PASSWORD")
            .map_err(|_| BrokerError::Fatal("MT5_PASSWORD missing".into()))?;
        let server = std::env::var("MT5_SERVER")
            .map_err(|_| BrokerError::Fatal("MT5_SERVER missing".into()))?;
        let path = std::env::var("MT5_PATH").ok();
        let base_url =
            std::env::var("MT5_BRIDGE_URL").unwrap_or_else(|_| DEFAULT_BRIDGE_URL.to_string());

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BrokerError::Fatal(format!("http client: {}", e)))?;

        let conn = Self { client, base_url };
        conn.connect(ConnectPayload {
            login,
            password: &password,
            server: &server,
            path: path.as_deref(),
        })
        .await?;
        Ok(conn)
    }

    async fn connect(&self, payload: ConnectPayload<'_>) -> BrokerResult<()> {
        let url = format!("{}/connect", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;
        if !resp.status().is_success() {
            return Err(BrokerError::Disconnected(format!(
                "bridge connect failed: {}",
                resp.status()
            )));
        }
        debug!(server = payload.server, login = payload.login, "mt5 bridge connected");
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> BrokerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)?;
        classify_status(&resp)?;
        resp.json::<T>()
            .await
            .map_err(|e| BrokerError::Fatal(format!("bridge response decode: {}", e)))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> BrokerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;
        classify_status(&resp)?;
        resp.json::<T>()
            .await
            .map_err(|e| BrokerError::Fatal(format!("bridge response decode: {}", e)))
    }
}

fn classify_transport(err: reqwest::Error) -> BrokerError {
    if err.is_connect() {
        BrokerError::Disconnected(err.to_string())
    } else if err.is_timeout() {
        BrokerError::Retryable(err.to_string())
    } else {
        BrokerError::Fatal(err.to_string())
    }
}

fn classify_status(resp: &reqwest::Response) -> BrokerResult<()> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() {
        Err(BrokerError::Retryable(format!("bridge status {}", status)))
    } else {
        Err(BrokerError::Fatal(format!("bridge status {}", status)))
    }
}

/// Classify a symbol into an asset class from its name, path and description.
pub fn classify_symbol(name: &str, path: &str, description: &str) -> AssetClass {
    let name_lower = name.to_lowercase();
    let haystack = format!("{} {} {}", name_lower, path.to_lowercase(), description.to_lowercase());
    if name_lower.contains("xau")
        || name_lower.contains("xag")
        || haystack.contains("gold")
        || haystack.contains("silver")
    {
        return AssetClass::Metals;
    }
    if haystack.contains("forex") || haystack.contains("fx ") {
        return AssetClass::Forex;
    }
    if (name.len() == 6 || name.len() == 7) && name.chars().take(6).all(|c| c.is_ascii_alphabetic())
    {
        return AssetClass::Forex;
    }
    if ["index", "indices", "cash", "us30", "spx", "nas", "dax", "ger", "uk100"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        return AssetClass::Indices;
    }
    if ["stocks", "shares", "equities", "equity"]
        .iter()
        .any(|k| haystack.contains(k))
    {
        return AssetClass::Stocks;
    }
    AssetClass::Unknown
}

/// Push an SL/TP level out to the broker's minimum stop distance when it sits
/// closer to price than `stops_level * point` allows.
pub fn clamp_to_stops_level(
    level: Option<f64>,
    price: f64,
    side: Side,
    stops_level: i64,
    point: f64,
    is_sl: bool,
) -> Option<f64> {
    let level = level?;
    if stops_level <= 0 || point <= 0.0 {
        return Some(level);
    }
    let min_dist = stops_level as f64 * point;
    let clamped = match (side, is_sl) {
        (Side::Long, true) => level.min(price - min_dist),
        (Side::Long, false) => level.max(price + min_dist),
        (Side::Short, true) => level.max(price + min_dist),
        (Side::Short, false) => level.min(price - min_dist),
        (Side::Flat, _) => level,
    };
    Some(clamped)
}

// ---- wire DTOs ----

#[derive(Debug, Deserialize)]
struct WireSymbol {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    currency_base: Option<String>,
    #[serde(default)]
    currency_profit: Option<String>,
    #[serde(default)]
    digits: Option<i64>,
    #[serde(default)]
    point: Option<f64>,
    #[serde(default)]
    trade_allowed: Option<bool>,
    #[serde(default)]
    spread: Option<f64>,
    #[serde(default)]
    trade_stops_level: Option<i64>,
    #[serde(default)]
    volume_min: Option<f64>,
    #[serde(default)]
    volume_max: Option<f64>,
    #[serde(default)]
    volume_step: Option<f64>,
    #[serde(default)]
    trade_tick_value: Option<f64>,
    #[serde(default)]
    trade_tick_size: Option<f64>,
    #[serde(default)]
    trade_contract_size: Option<f64>,
}

impl WireSymbol {
    fn into_meta(self) -> SymbolMeta {
        let asset_class = classify_symbol(
            &self.name,
            self.path.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or(""),
        );
        SymbolMeta {
            name: self.name,
            description: self.description,
            path: self.path,
            asset_class,
            currency_base: self.currency_base,
            currency_profit: self.currency_profit,
            digits: self.digits,
            point: self.point,
            trade_allowed: self.trade_allowed,
            spread_points: self.spread,
            trade_stops_level: self.trade_stops_level,
            volume_min: self.volume_min,
            volume_max: self.volume_max,
            volume_step: self.volume_step,
            trade_tick_value: self.trade_tick_value,
            trade_tick_size: self.trade_tick_size,
            trade_contract_size: self.trade_contract_size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCandle {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

#[derive(Debug, Deserialize)]
struct WireQuote {
    bid: f64,
    ask: f64,
    time: i64,
    #[serde(default)]
    spread_points: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WirePosition {
    ticket: i64,
    symbol: String,
    #[serde(rename = "type")]
    position_type: i64,
    volume: f64,
    price_open: f64,
    #[serde(default)]
    sl: Option<f64>,
    #[serde(default)]
    tp: Option<f64>,
    time: i64,
    #[serde(default)]
    profit: Option<f64>,
    #[serde(default)]
    swap: Option<f64>,
    #[serde(default)]
    commission: Option<f64>,
    #[serde(default)]
    magic: Option<i64>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDeal {
    ticket: i64,
    #[serde(default)]
    position_id: Option<i64>,
    #[serde(default)]
    order: Option<i64>,
    time: i64,
    symbol: String,
    #[serde(rename = "type")]
    deal_type: i64,
    #[serde(default)]
    entry: Option<i64>,
    volume: f64,
    price: f64,
    #[serde(default)]
    profit: Option<f64>,
    #[serde(default)]
    commission: Option<f64>,
    #[serde(default)]
    swap: Option<f64>,
    #[serde(default)]
    magic: Option<i64>,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    #[serde(default)]
    login: Option<i64>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    leverage: Option<i64>,
    #[serde(default)]
    balance: Option<f64>,
    #[serde(default)]
    equity: Option<f64>,
    #[serde(default)]
    margin: Option<f64>,
    #[serde(default)]
    trade_mode: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    company: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOrderResult {
    #[serde(default)]
    retcode: Option<i64>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    position_id: Option<i64>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    raw: serde_json::Value,
}

fn dt_from_epoch(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}

fn side_from_mt5_type(t: i64) -> Side {
    // 0 = buy, 1 = sell in the MT5 position/deal type enums.
    if t == 0 {
        Side::Long
    } else {
        Side::Short
    }
}

#[async_trait]
impl BrokerConnector for Mt5BridgeConnector {
    async fn discover_symbols(&self) -> BrokerResult<Vec<SymbolMeta>> {
        let wire: Vec<WireSymbol> = self.get_json("/symbols", &[]).await?;
        Ok(wire.into_iter().map(WireSymbol::into_meta).collect())
    }

    async fn get_symbol_info(&self, symbol: &str) -> BrokerResult<Option<SymbolMeta>> {
        let wire: Option<WireSymbol> = self
            .get_json("/symbol_info", &[("symbol", symbol.to_string())])
            .await?;
        Ok(wire.map(WireSymbol::into_meta))
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> BrokerResult<CandleSeries> {
        let wire: Vec<WireCandle> = self
            .get_json(
                "/candles",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("count", n.to_string()),
                ],
            )
            .await?;
        let candles: Vec<Candle> = wire
            .into_iter()
            .map(|c| Candle {
                time_utc: dt_from_epoch(c.time),
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
            })
            .collect();
        Ok(CandleSeries::new(candles))
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Option<Quote>> {
        let wire: Option<WireQuote> = self
            .get_json("/quote", &[("symbol", symbol.to_string())])
            .await?;
        Ok(wire.map(|q| {
            let spread_points = q.spread_points.unwrap_or(0.0);
            Quote {
                symbol: symbol.to_string(),
                bid: q.bid,
                ask: q.ask,
                time_utc: dt_from_epoch(q.time),
                spread_points,
            }
        }))
    }

    async fn list_positions(&self) -> BrokerResult<Vec<Position>> {
        let wire: Vec<WirePosition> = self.get_json("/positions", &[]).await?;
        Ok(wire
            .into_iter()
            .map(|p| Position {
                position_id: p.ticket,
                symbol: p.symbol,
                side: side_from_mt5_type(p.position_type),
                volume: p.volume,
                price_open: p.price_open,
                sl: p.sl.filter(|v| *v != 0.0),
                tp: p.tp.filter(|v| *v != 0.0),
                time_utc: dt_from_epoch(p.time),
                profit: p.profit,
                swap: p.swap,
                commission: p.commission,
                magic: p.magic,
                comment: p.comment,
            })
            .collect())
    }

    async fn list_deals(
        &self,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> BrokerResult<Vec<Deal>> {
        let wire: Vec<WireDeal> = self
            .get_json(
                "/deals",
                &[
                    ("from", from_utc.timestamp().to_string()),
                    ("to", to_utc.timestamp().to_string()),
                ],
            )
            .await?;
        Ok(wire
            .into_iter()
            .map(|d| {
                let raw = serde_json::json!({
                    "ticket": d.ticket,
                    "type": d.deal_type,
                    "entry": d.entry,
                });
                Deal {
                    deal_ticket: d.ticket,
                    position_id: d.position_id,
                    order_ticket: d.order,
                    time_utc: dt_from_epoch(d.time),
                    symbol: d.symbol,
                    side: side_from_mt5_type(d.deal_type),
                    // 0 = entry in, 1 = entry out in the MT5 deal entry enum.
                    entry: match d.entry {
                        Some(0) => DealEntry::In,
                        Some(1) => DealEntry::Out,
                        _ => DealEntry::Unknown,
                    },
                    volume: d.volume,
                    price: d.price,
                    profit: d.profit,
                    commission: d.commission,
                    swap: d.swap,
                    magic: d.magic,
                    comment: d.comment,
                    raw,
                }
            })
            .collect())
    }

    async fn account_info(&self) -> BrokerResult<Option<AccountInfo>> {
        let wire: Option<WireAccount> = self.get_json("/account", &[]).await?;
        Ok(wire.map(|a| AccountInfo {
            login: a.login,
            server: a.server,
            currency: a.currency,
            leverage: a.leverage,
            balance: a.balance,
            equity: a.equity,
            margin: a.margin,
            // 0 = demo, 1 = contest, 2 = real in ACCOUNT_TRADE_MODE.
            trade_mode: match a.trade_mode {
                Some(0) => AccountTradeMode::Demo,
                Some(1) => AccountTradeMode::Contest,
                Some(2) => AccountTradeMode::Real,
                _ => AccountTradeMode::Unknown,
            },
            name: a.name,
            company: a.company,
        }))
    }

    async fn place_order(&self, req: &OrderRequest) -> BrokerResult<OrderResult> {
        let (price, stops_level, point) = match self.get_symbol_info(&req.symbol).await? {
            Some(meta) => {
                let quote = self.get_quote(&req.symbol).await?;
                let price = quote
                    .map(|q| if req.side == Side::Long { q.ask } else { q.bid })
                    .unwrap_or(0.0);
                (
                    price,
                    meta.trade_stops_level.unwrap_or(0),
                    meta.point.unwrap_or(0.0),
                )
            }
            None => (0.0, 0, 0.0),
        };
        let sl = clamp_to_stops_level(req.sl, price, req.side, stops_level, point, true);
        let tp = clamp_to_stops_level(req.tp, price, req.side, stops_level, point, false);

        let body = serde_json::json!({
            "symbol": req.symbol,
            "side": req.side.as_str(),
            "volume": req.volume,
            "sl": sl,
            "tp": tp,
            "deviation": req.deviation_points,
            "magic": req.magic,
            "comment": req.comment,
            "position": req.position_id,
        });
        let wire: WireOrderResult = self.post_json("/order", &body).await?;

        let success = matches!(
            wire.retcode,
            Some(RETCODE_DONE) | Some(RETCODE_PLACED) | Some(RETCODE_DONE_PARTIAL)
        );
        if !success {
            warn!(symbol = %req.symbol, retcode = ?wire.retcode, "order rejected by broker");
        }
        Ok(OrderResult {
            success,
            retcode: wire.retcode,
            order_ticket: wire.order,
            position_id: wire.position_id,
            comment: wire.comment,
            raw: wire.raw,
        })
    }

    async fn modify_position(
        &self,
        position_id: i64,
        sl: Option<f64>,
        tp: Option<f64>,
    ) -> BrokerResult<bool> {
        let body = serde_json::json!({
            "position": position_id,
            "sl": sl,
            "tp": tp,
        });
        let wire: WireOrderResult = self.post_json("/modify", &body).await?;
        Ok(matches!(wire.retcode, Some(RETCODE_DONE)))
    }

    async fn shutdown(&self) {
        let url = format!("{}/shutdown", self.base_url);
        if let Err(e) = self.client.post(&url).send().await {
            debug!(error = %e, "bridge shutdown request failed");
        }
    }
}
