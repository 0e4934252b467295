//! SQLite trade ledger
//!
//! Append-only record of every trade observed on a target wallet. Records are
//! never deleted; the executor only flips `processed` or bumps
//! `attempt_count`.

use crate::types::{NewTrade, TradeActivity, TradeSide};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Single-connection in-memory database (each connection would otherwise
    /// get its own empty store)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_activity (
                transaction_hash TEXT PRIMARY KEY,
                target_wallet TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                side TEXT NOT NULL,
                size TEXT NOT NULL,
                price TEXT NOT NULL,
                usdc_size TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                title TEXT,
                outcome TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                detected_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trade_activity_pending ON trade_activity(target_wallet, processed, attempt_count)",
        )
        .execute(&self.pool)
        .await?;

        info!("Database initialized");
        Ok(())
    }

    /// Append a trade unless one with the same transaction hash exists.
    /// Returns true when a new record was written.
    pub async fn insert_trade_if_absent(&self, trade: &NewTrade) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO trade_activity
                (transaction_hash, target_wallet, condition_id, asset, side, size, price, usdc_size,
                 timestamp, title, outcome, processed, attempt_count, detected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(&trade.transaction_hash)
        .bind(&trade.target_wallet)
        .bind(&trade.condition_id)
        .bind(&trade.asset)
        .bind(trade.side.to_string())
        .bind(trade.size.to_string())
        .bind(trade.price.to_string())
        .bind(trade.usdc_size.to_string())
        .bind(trade.timestamp)
        .bind(&trade.title)
        .bind(&trade.outcome)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a trade by transaction hash
    pub async fn get_trade(&self, transaction_hash: &str) -> Result<Option<TradeActivity>> {
        let row = sqlx::query("SELECT * FROM trade_activity WHERE transaction_hash = ?")
            .bind(transaction_hash)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_trade(&r)?)),
            None => Ok(None),
        }
    }

    /// Unprocessed trades that still have attempts left, oldest first
    pub async fn pending_trades(&self, target_wallet: &str, retry_limit: i64) -> Result<Vec<TradeActivity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trade_activity
            WHERE target_wallet = ? AND processed = 0 AND attempt_count < ?
            ORDER BY timestamp ASC, detected_at ASC
            "#,
        )
        .bind(target_wallet.to_lowercase())
        .bind(retry_limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_trade).collect()
    }

    /// Claim a trade by marking it processed. Only the first caller wins;
    /// returns false if the trade was already claimed (or does not exist).
    pub async fn mark_processed(&self, transaction_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trade_activity SET processed = 1 WHERE transaction_hash = ? AND processed = 0",
        )
        .bind(transaction_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed attempt and hand the trade back to the pending set.
    /// Returns the new attempt count.
    pub async fn increment_attempts(&self, transaction_hash: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            UPDATE trade_activity SET attempt_count = attempt_count + 1, processed = 0
            WHERE transaction_hash = ?
            RETURNING attempt_count
            "#,
        )
        .bind(transaction_hash)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Trade {} not found", transaction_hash))?;

        Ok(count.0)
    }

    /// Number of trades recorded for a target wallet
    pub async fn count_trades(&self, target_wallet: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_activity WHERE target_wallet = ?")
            .bind(target_wallet.to_lowercase())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    /// Close the pool; later queries fail
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Trades that used up their attempts without ever being processed
    pub async fn abandoned_trades(&self, target_wallet: &str, retry_limit: i64) -> Result<Vec<TradeActivity>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trade_activity
            WHERE target_wallet = ? AND processed = 0 AND attempt_count >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(target_wallet.to_lowercase())
        .bind(retry_limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_trade).collect()
    }
}

fn row_to_trade(row: &SqliteRow) -> Result<TradeActivity> {
    let side: String = row.get("side");
    let detected_at: String = row.get("detected_at");

    Ok(TradeActivity {
        transaction_hash: row.get("transaction_hash"),
        target_wallet: row.get("target_wallet"),
        condition_id: row.get("condition_id"),
        asset: row.get("asset"),
        side: TradeSide::from_str(&side)?,
        size: decimal_column(row, "size")?,
        price: decimal_column(row, "price")?,
        usdc_size: decimal_column(row, "usdc_size")?,
        timestamp: row.get("timestamp"),
        title: row.get("title"),
        outcome: row.get("outcome"),
        processed: row.get::<i64, _>("processed") != 0,
        attempt_count: row.get("attempt_count"),
        detected_at: DateTime::parse_from_rfc3339(&detected_at)?.with_timezone(&Utc),
    })
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).with_context(|| format!("Invalid decimal in {}: {}", column, raw))
}

#[cfg(test)]
pub(crate) fn sample_trade(hash: &str, usdc_size: Decimal) -> NewTrade {
    use rust_decimal_macros::dec;

    NewTrade {
        transaction_hash: hash.to_string(),
        target_wallet: "0x1111111111111111111111111111111111111111".to_string(),
        condition_id: "0xcondition".to_string(),
        asset: "4242".to_string(),
        side: TradeSide::Buy,
        size: usdc_size / dec!(0.5),
        price: dec!(0.5),
        usdc_size,
        timestamp: Utc::now().timestamp(),
        title: Some("Will it rain tomorrow?".to_string()),
        outcome: Some("Yes".to_string()),
    }
}
