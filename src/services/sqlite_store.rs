//! SQLite persistence for signals, weight snapshots and the audit trail.
//!
//! The engine only depends on the [`SignalRepository`] and [`AuditSink`]
//! contracts; `SqliteStore` is the bundled implementation of both.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::types::{
    AuditEvent, AuditLog, ExecutionResult, IndicatorWeights, PerformanceStats, Signal,
    SignalStatus, WeightsSnapshot,
};

/// Durable signal storage.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Insert or replace a signal by id.
    async fn save_signal(&self, signal: &Signal) -> Result<()>;

    /// All stored signals, oldest first.
    async fn get_all_signals(&self) -> Result<Vec<Signal>>;

    async fn save_weights_snapshot(
        &self,
        weights: &IndicatorWeights,
        performance: &PerformanceStats,
    ) -> Result<()>;

    /// Most recent weights snapshot, if any.
    async fn latest_weights_snapshot(&self) -> Result<Option<WeightsSnapshot>>;

    /// Newest audit records first.
    async fn get_recent_audit_logs(&self, limit: usize) -> Result<Vec<AuditLog>>;
}

/// Audit/metrics sink for generated signals and their outcomes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_signal_generation(&self, signal: &Signal) -> Result<()>;

    async fn update_signal_outcome(
        &self,
        id: Uuid,
        outcome: SignalStatus,
        final_price: Option<f64>,
        pnl: f64,
        execution_details: Option<&ExecutionResult>,
    ) -> Result<()>;
}

/// SQLite store for signals, snapshots and audit logs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("SQLite connection lock poisoned".into()))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                status TEXT NOT NULL,
                score INTEGER NOT NULL,
                generated_at INTEGER NOT NULL,
                entry_time INTEGER NOT NULL,
                expiration_time INTEGER NOT NULL,
                pnl REAL NOT NULL DEFAULT 0,
                final_price REAL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_signals_generated ON signals(generated_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS weights_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                weights_json TEXT NOT NULL,
                performance_json TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signal_id TEXT NOT NULL,
                event TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_signal ON audit_logs(signal_id)",
            [],
        )?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    fn insert_audit(
        &self,
        signal_id: Uuid,
        event: AuditEvent,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_logs (signal_id, event, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                signal_id.to_string(),
                event.as_str(),
                payload.to_string(),
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Number of stored signals.
    pub fn signal_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SignalRepository for SqliteStore {
    async fn save_signal(&self, signal: &Signal) -> Result<()> {
        let payload = serde_json::to_string(signal)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO signals
                (id, symbol, direction, timeframe, status, score, generated_at,
                 entry_time, expiration_time, pnl, final_price, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                pnl = excluded.pnl,
                final_price = excluded.final_price,
                payload = excluded.payload",
            params![
                signal.id.to_string(),
                signal.symbol,
                signal.direction.as_option_side(),
                signal.timeframe.as_str(),
                signal.status.as_str(),
                signal.score,
                signal.generated_at,
                signal.entry_time,
                signal.expiration_time,
                signal.pnl,
                signal.final_price,
                payload,
            ],
        )?;
        Ok(())
    }

    async fn get_all_signals(&self) -> Result<Vec<Signal>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, payload FROM signals ORDER BY generated_at ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut signals = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            match serde_json::from_str::<Signal>(&payload) {
                Ok(signal) => signals.push(signal),
                Err(e) => warn!("Skipping unreadable signal {}: {}", id, e),
            }
        }
        Ok(signals)
    }

    async fn save_weights_snapshot(
        &self,
        weights: &IndicatorWeights,
        performance: &PerformanceStats,
    ) -> Result<()> {
        let weights_json = serde_json::to_string(weights)?;
        let performance_json = serde_json::to_string(performance)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO weights_snapshots (weights_json, performance_json, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                weights_json,
                performance_json,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn latest_weights_snapshot(&self) -> Result<Option<WeightsSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT weights_json, performance_json, created_at
                 FROM weights_snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((weights_json, performance_json, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(WeightsSnapshot {
            weights: serde_json::from_str(&weights_json)?,
            performance: serde_json::from_str(&performance_json)?,
            created_at,
        }))
    }

    async fn get_recent_audit_logs(&self, limit: usize) -> Result<Vec<AuditLog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, signal_id, event, payload, created_at
             FROM audit_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (id, signal_id, event, payload, created_at) = row?;
            let Ok(signal_id) = Uuid::parse_str(&signal_id) else {
                warn!("Skipping audit log {} with invalid signal id", id);
                continue;
            };
            logs.push(AuditLog {
                id,
                signal_id,
                event: AuditEvent::from_str(&event),
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                created_at,
            });
        }
        Ok(logs)
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn log_signal_generation(&self, signal: &Signal) -> Result<()> {
        let payload = serde_json::json!({
            "symbol": signal.symbol,
            "direction": signal.direction,
            "timeframe": signal.timeframe,
            "score": signal.score,
            "mlProbability": signal.ml_probability,
            "price": signal.price,
            "entryTime": signal.entry_time,
            "expirationTime": signal.expiration_time,
            "stopLoss": signal.stop_loss,
            "takeProfit": signal.take_profit,
            "contributors": signal.contributors,
        });
        self.insert_audit(signal.id, AuditEvent::Generated, &payload)
    }

    async fn update_signal_outcome(
        &self,
        id: Uuid,
        outcome: SignalStatus,
        final_price: Option<f64>,
        pnl: f64,
        execution_details: Option<&ExecutionResult>,
    ) -> Result<()> {
        let payload = serde_json::json!({
            "outcome": outcome,
            "finalPrice": final_price,
            "pnl": pnl,
            "executionDetails": execution_details,
        });
        self.insert_audit(id, AuditEvent::OutcomeUpdated, &payload)
    }
}
