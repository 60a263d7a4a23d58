use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const CHAT_ID_ENV_PREFIX: &str = "TELEGRAM_CHAT_ID_";

/// Per-key rate limiter: repeated sends with the same key inside the window
/// are silently dropped.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    pub fn new(window_seconds: f64) -> Self {
        Self {
            window: Duration::from_secs_f64(window_seconds.max(0.0)),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = last_sent.get(key) {
            if now.duration_since(*last) < self.window {
                return false;
            }
        }
        last_sent.insert(key.to_string(), now);
        true
    }
}

/// Telegram delivery with throttling. Configuration failures degrade to
/// logging only; a notification must never take a cycle down.
pub struct TelegramNotifier {
    enabled: bool,
    token: Option<String>,
    chat_ids: Vec<String>,
    client: Client,
    throttle: Throttle,
}

impl TelegramNotifier {
    pub fn from_env(enabled: bool, throttle_seconds: f64) -> Self {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty());
        let mut chat_ids: Vec<(String, String)> = std::env::vars()
            .filter(|(k, v)| k.starts_with(CHAT_ID_ENV_PREFIX) && !v.trim().is_empty())
            .collect();
        chat_ids.sort();
        let chat_ids = chat_ids.into_iter().map(|(_, v)| v.trim().to_string()).collect();

        Self {
            enabled,
            token,
            chat_ids,
            client: Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            throttle: Throttle::new(throttle_seconds),
        }
    }

    pub fn available(&self) -> bool {
        self.enabled && self.token.is_some() && !self.chat_ids.is_empty()
    }

    /// Deliver to every configured chat. `key` participates in throttling;
    /// pass None to bypass it.
    pub async fn send(&self, message: &str, key: Option<&str>) {
        if !self.enabled {
            return;
        }
        let Some(token) = &self.token else {
            return;
        };
        if self.chat_ids.is_empty() {
            return;
        }
        if let Some(key) = key {
            if !self.throttle.allow(key) {
                debug!(key, "notification throttled");
                return;
            }
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        for chat_id in &self.chat_ids {
            let body = serde_json::json!({"chat_id": chat_id, "text": message});
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_client_error() || resp.status().is_server_error() => {
                    warn!(status = %resp.status(), "telegram send failed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "telegram send error"),
            }
        }
    }
}

// ---- message templates ----

pub fn trade_open_message(
    symbol: &str,
    side: &str,
    volume: f64,
    price: Option<f64>,
    sl: Option<f64>,
    tp: Option<f64>,
    strategy: &str,
    score: Option<f64>,
) -> String {
    let mut parts = vec![
        "\u{1F4C8} Trade OPEN".to_string(),
        format!("Symbol: {}", symbol),
        format!("Side: {}", side),
        format!("Volume: {}", volume),
        format!("Strategy: {}", strategy),
    ];
    if let Some(score) = score {
        parts.push(format!("Rank score: {:.3}", score));
    }
    if let Some(price) = price {
        parts.push(format!("Price: {}", price));
    }
    if let Some(sl) = sl {
        parts.push(format!("SL: {}", sl));
    }
    if let Some(tp) = tp {
        parts.push(format!("TP: {}", tp));
    }
    parts.join("\n")
}

pub fn trade_close_message(
    symbol: &str,
    side: &str,
    volume: f64,
    profit: Option<f64>,
    reason: Option<&str>,
) -> String {
    let mut parts = vec![
        "\u{1F4C9} Trade CLOSE".to_string(),
        format!("Symbol: {}", symbol),
        format!("Side: {}", side),
        format!("Volume: {}", volume),
    ];
    if let Some(profit) = profit {
        parts.push(format!("Profit: {}", profit));
    }
    if let Some(reason) = reason {
        if !reason.is_empty() {
            parts.push(format!("Reason: {}", reason));
        }
    }
    parts.join("\n")
}

pub fn risk_pause_message(reason: &str) -> String {
    format!("\u{26D4} Trading PAUSED\nReason: {}", reason)
}

pub fn risk_unpause_message() -> String {
    "\u{2705} Trading UNPAUSED".to_string()
}

pub fn error_message(message: &str, cycle_id: Option<&str>) -> String {
    match cycle_id {
        Some(id) => format!("\u{26A0}\u{FE0F} Error (cycle {})\n{}", id, message),
        None => format!("\u{26A0}\u{FE0F} Error\n{}", message),
    }
}

pub fn daily_summary_message(
    date: &str,
    pnl: Option<f64>,
    wins: u32,
    losses: u32,
    equity: Option<f64>,
) -> String {
    let mut parts = vec![format!("\u{1F9FE} Daily Summary ({})", date)];
    if let Some(pnl) = pnl {
        parts.push(format!("PnL: {:.2}", pnl));
    }
    parts.push(format!("Wins: {}  Losses: {}", wins, losses));
    if let Some(equity) = equity {
        parts.push(format!("Equity: {:.2}", equity));
    }
    parts.join("\n")
}
