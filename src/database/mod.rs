use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use thiserror::Error;
use tracing::info;

use crate::types::Deal;

const LATEST_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
#[error("persistence error: {0}")]
pub struct StoreError(#[from] sqlx::Error);

pub type StoreResult<T> = Result<T, StoreError>;

/// Terminal states of a decision row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionStatus {
    NoSignal,
    Skipped,
    RiskBlocked,
    Opened,
    Closed,
    Error,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::NoSignal => "no-signal",
            DecisionStatus::Skipped => "skipped",
            DecisionStatus::RiskBlocked => "risk-blocked",
            DecisionStatus::Opened => "opened",
            DecisionStatus::Closed => "closed",
            DecisionStatus::Error => "error",
        }
    }
}

/// One decision row to insert. The idempotency key carries the at-most-once
/// guarantee through the UNIQUE constraint.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub cycle_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub candle_close_time_utc: String,
    pub rank_score: Option<f64>,
    pub rank_components: Option<Value>,
    pub strategy: Option<String>,
    pub features: Option<Value>,
    pub signal: Option<Value>,
    pub risk: Option<Value>,
    pub order: Option<Value>,
    pub result: Option<Value>,
    pub status: DecisionStatus,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    pub cycle_id: String,
    pub status: String,
    pub cycle_latency_ms: Option<f64>,
    pub broker_connected: bool,
    pub equity: Option<f64>,
    pub balance: Option<f64>,
    pub daily_start_equity: Option<f64>,
    pub daily_pnl: Option<f64>,
    pub peak_equity: Option<f64>,
    pub drawdown_pct: Option<f64>,
    pub open_positions: i64,
    pub cpu_pct: Option<f64>,
    pub ram_pct: Option<f64>,
    pub disk_pct: Option<f64>,
    pub net_rx_bps: Option<f64>,
    pub net_tx_bps: Option<f64>,
    pub temp_c: Option<f64>,
    pub extra: Option<Value>,
}

/// Equity fields recovered from the most recent heartbeat at startup.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatEquity {
    pub equity: Option<f64>,
    pub daily_start_equity: Option<f64>,
    pub peak_equity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StoredOutDeal {
    pub profit: Option<f64>,
    pub magic: Option<i64>,
    pub entry: String,
}

pub struct Database {
    pool: SqlitePool,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn json_text(v: &Option<Value>) -> Option<String> {
    v.as_ref().map(|v| v.to_string())
}

impl Database {
    /// Open (creating if missing) and migrate the store. `db_path` is either
    /// a filesystem path or a full `sqlite:` URL (tests use
    /// `sqlite::memory:`).
    pub async fn connect(db_path: &str) -> StoreResult<Self> {
        let in_memory = db_path.contains(":memory:");
        let mut options = if db_path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(db_path)?
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            SqliteConnectOptions::new().filename(db_path)
        };
        options = options
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        info!(path = db_path, "store initialized");
        Ok(db)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations(
              version INTEGER PRIMARY KEY,
              applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let current: Option<i64> = sqlx::query("SELECT MAX(version) AS v FROM schema_migrations")
            .fetch_one(&self.pool)
            .await?
            .try_get("v")
            .unwrap_or(None);
        let current = current.unwrap_or(0);

        if current < 1 {
            self.migration_v1().await?;
            sqlx::query("INSERT INTO schema_migrations(version, applied_at) VALUES(?, ?)")
                .bind(1i64)
                .bind(now_iso())
                .execute(&self.pool)
                .await?;
        }
        debug_assert!(current <= LATEST_SCHEMA_VERSION);
        Ok(())
    }

    async fn migration_v1(&self) -> StoreResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS decisions(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              cycle_id TEXT NOT NULL,
              symbol TEXT NOT NULL,
              timeframe TEXT NOT NULL,
              candle_close_time_utc TEXT NOT NULL,
              rank_score REAL,
              rank_components_json TEXT,
              strategy TEXT,
              features_json TEXT,
              signal_json TEXT,
              risk_json TEXT,
              order_json TEXT,
              result_json TEXT,
              status TEXT NOT NULL,
              idempotency_key TEXT NOT NULL UNIQUE
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_decisions_created_at ON decisions(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_decisions_symbol ON decisions(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_decisions_cycle ON decisions(cycle_id)",
            r#"
            CREATE TABLE IF NOT EXISTS trades(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              deal_ticket INTEGER NOT NULL UNIQUE,
              position_id INTEGER,
              order_ticket INTEGER,
              time_utc TEXT NOT NULL,
              symbol TEXT NOT NULL,
              side TEXT NOT NULL,
              entry TEXT NOT NULL,
              volume REAL NOT NULL,
              price REAL NOT NULL,
              profit REAL,
              commission REAL,
              swap REAL,
              magic INTEGER,
              comment TEXT,
              raw_json TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_trades_time_utc ON trades(time_utc)",
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            r#"
            CREATE TABLE IF NOT EXISTS errors(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              cycle_id TEXT,
              severity TEXT NOT NULL,
              message TEXT NOT NULL,
              traceback TEXT,
              context_json TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_errors_created_at ON errors(created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS settings_snapshots(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              source TEXT NOT NULL,
              config_json TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_settings_created_at ON settings_snapshots(created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS heartbeats(
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at TEXT NOT NULL,
              cycle_id TEXT NOT NULL,
              status TEXT NOT NULL,
              cycle_latency_ms REAL,
              mt5_connected INTEGER,
              equity REAL,
              balance REAL,
              daily_start_equity REAL,
              daily_pnl REAL,
              peak_equity REAL,
              drawdown_pct REAL,
              open_positions INTEGER,
              cpu_pct REAL,
              ram_pct REAL,
              disk_pct REAL,
              net_rx_bps REAL,
              net_tx_bps REAL,
              temp_c REAL,
              extra_json TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_heartbeats_created_at ON heartbeats(created_at)",
        ];
        for stmt in statements {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- decisions ----

    /// Insert a decision row. Returns false when the idempotency key already
    /// exists; any other failure is an error.
    pub async fn try_insert_decision(&self, d: &NewDecision) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO decisions(
              created_at, cycle_id, symbol, timeframe, candle_close_time_utc,
              rank_score, rank_components_json, strategy, features_json, signal_json,
              risk_json, order_json, result_json, status, idempotency_key
            ) VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(now_iso())
        .bind(&d.cycle_id)
        .bind(&d.symbol)
        .bind(&d.timeframe)
        .bind(&d.candle_close_time_utc)
        .bind(d.rank_score)
        .bind(json_text(&d.rank_components))
        .bind(&d.strategy)
        .bind(json_text(&d.features))
        .bind(json_text(&d.signal))
        .bind(json_text(&d.risk))
        .bind(json_text(&d.order))
        .bind(json_text(&d.result))
        .bind(d.status.as_str())
        .bind(&d.idempotency_key)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update_decision_result(
        &self,
        idempotency_key: &str,
        status: DecisionStatus,
        result: Option<Value>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE decisions SET status = ?, result_json = ? WHERE idempotency_key = ?")
            .bind(status.as_str())
            .bind(json_text(&result))
            .bind(idempotency_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn recent_idempotency_keys(&self, limit: i64) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT idempotency_key FROM decisions ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.try_get::<String, _>("idempotency_key").ok())
            .collect())
    }

    // ---- trades ----

    /// Insert-or-ignore deals keyed by deal_ticket, inside one transaction.
    /// Returns the tickets that were actually inserted.
    pub async fn insert_deals(&self, deals: &[Deal]) -> StoreResult<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();
        for d in deals {
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO trades(
                  deal_ticket, position_id, order_ticket, time_utc, symbol, side, entry,
                  volume, price, profit, commission, swap, magic, comment, raw_json
                ) VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
                "#,
            )
            .bind(d.deal_ticket)
            .bind(d.position_id)
            .bind(d.order_ticket)
            .bind(d.time_utc.to_rfc3339())
            .bind(&d.symbol)
            .bind(d.side.as_str())
            .bind(d.entry.as_str())
            .bind(d.volume)
            .bind(d.price)
            .bind(d.profit)
            .bind(d.commission)
            .bind(d.swap)
            .bind(d.magic)
            .bind(&d.comment)
            .bind(if d.raw.is_null() { None } else { Some(d.raw.to_string()) })
            .execute(&mut *tx)
            .await?;
            if res.rows_affected() > 0 {
                inserted.push(d.deal_ticket);
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Deals stored inside the half-open UTC window `[from_utc, to_utc)`.
    /// Daily metrics pass the configured-timezone day bounds converted to
    /// UTC instants, so the aggregation follows the local calendar day.
    pub async fn deals_between(
        &self,
        from_utc: DateTime<Utc>,
        to_utc: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredOutDeal>> {
        let rows = sqlx::query(
            "SELECT profit, magic, entry FROM trades WHERE time_utc >= ? AND time_utc < ? ORDER BY id DESC",
        )
        .bind(from_utc.to_rfc3339())
        .bind(to_utc.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredOutDeal {
                profit: r.try_get("profit").ok(),
                magic: r.try_get("magic").ok(),
                entry: r.try_get::<String, _>("entry").unwrap_or_default(),
            })
            .collect())
    }

    // ---- errors ----

    pub async fn insert_error(
        &self,
        severity: &str,
        message: &str,
        traceback: Option<&str>,
        cycle_id: Option<&str>,
        context: Option<Value>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO errors(created_at, cycle_id, severity, message, traceback, context_json)
            VALUES(?,?,?,?,?,?)
            "#,
        )
        .bind(now_iso())
        .bind(cycle_id)
        .bind(severity)
        .bind(message)
        .bind(traceback)
        .bind(context.map(|c| c.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- settings snapshots ----

    pub async fn insert_settings_snapshot(&self, source: &str, config: &Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO settings_snapshots(created_at, source, config_json) VALUES(?,?,?)",
        )
        .bind(now_iso())
        .bind(source)
        .bind(config.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_settings_snapshot(&self) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT config_json FROM settings_snapshots ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get("config_json").ok()))
    }

    // ---- heartbeats ----

    pub async fn insert_heartbeat(&self, hb: &Heartbeat) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO heartbeats(
              created_at, cycle_id, status, cycle_latency_ms, mt5_connected, equity, balance,
              daily_start_equity, daily_pnl, peak_equity, drawdown_pct, open_positions,
              cpu_pct, ram_pct, disk_pct, net_rx_bps, net_tx_bps, temp_c, extra_json
            ) VALUES(?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(now_iso())
        .bind(&hb.cycle_id)
        .bind(&hb.status)
        .bind(hb.cycle_latency_ms)
        .bind(hb.broker_connected as i64)
        .bind(hb.equity)
        .bind(hb.balance)
        .bind(hb.daily_start_equity)
        .bind(hb.daily_pnl)
        .bind(hb.peak_equity)
        .bind(hb.drawdown_pct)
        .bind(hb.open_positions)
        .bind(hb.cpu_pct)
        .bind(hb.ram_pct)
        .bind(hb.disk_pct)
        .bind(hb.net_rx_bps)
        .bind(hb.net_tx_bps)
        .bind(hb.temp_c)
        .bind(json_text(&hb.extra))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_heartbeat_equity(&self) -> StoreResult<Option<HeartbeatEquity>> {
        let row = sqlx::query(
            "SELECT equity, daily_start_equity, peak_equity FROM heartbeats ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| HeartbeatEquity {
            equity: r.try_get("equity").ok(),
            daily_start_equity: r.try_get("daily_start_equity").ok(),
            peak_equity: r.try_get("peak_equity").ok(),
        }))
    }
}
