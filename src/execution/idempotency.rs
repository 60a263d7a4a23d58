use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::database::Database;

/// Deterministic digest identifying one (symbol, timeframe, candle close,
/// strategy, side) decision: the at-most-once token for order dispatch.
pub fn make_idempotency_key(
    symbol: &str,
    timeframe: &str,
    candle_close_time_utc: &str,
    strategy: &str,
    side: &str,
) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}",
        symbol, timeframe, candle_close_time_utc, strategy, side
    );
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

/// In-process mirror of recently persisted idempotency keys. Short-circuits
/// duplicates cheaply; the decisions UNIQUE constraint stays the authority.
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    seen: HashSet<String>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_recent(&mut self, db: &Database, limit: i64) {
        match db.recent_idempotency_keys(limit).await {
            Ok(keys) => {
                let count = keys.len();
                self.seen.extend(keys);
                info!(keys = count, "idempotency cache loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "idempotency cache load failed");
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn add(&mut self, key: &str) {
        self.seen.insert(key.to_string());
    }
}
