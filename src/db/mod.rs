//! Database persistence for price history and portfolio snapshots.
//!
//! Stores everything needed to resume after restart:
//! - Daily bars per symbol (consulted before any upstream fetch)
//! - Versioned portfolio snapshots (latest row is the live state)

#[cfg(test)]
mod memory;

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::market_data::{DateRange, MarketDataStore};
use crate::models::{PortfolioState, PricePoint};
use crate::trading::PortfolioStateStore;

#[cfg(test)]
pub use memory::{MemoryStateStore, MemoryStore};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored portfolio snapshot row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPortfolio {
    version: i64,
    date: String,
    positions: String,
    cash_balance: String,
    total_value: String,
}

impl StoredPortfolio {
    fn into_state(self) -> ServiceResult<PortfolioState> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|e| ServiceError::internal(format!("bad stored date {}: {}", self.date, e)))?;
        let cash_balance = Decimal::from_str(&self.cash_balance)
            .map_err(|e| ServiceError::internal(format!("bad stored cash: {}", e)))?;
        let total_value = Decimal::from_str(&self.total_value)
            .map_err(|e| ServiceError::internal(format!("bad stored total: {}", e)))?;

        Ok(PortfolioState {
            date,
            positions: serde_json::from_str(&self.positions)?,
            cash_balance,
            total_value,
            version: self.version.max(0) as u64,
        })
    }
}

const SELECT_PORTFOLIO: &str =
    "SELECT version, date, positions, cash_balance, total_value FROM portfolio_state";

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the life of the pool.
        let in_memory = database_url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            options = options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Daily bars
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_data (
                symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                adjusted_close REAL NOT NULL,
                volume INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (symbol, timestamp)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create stock_data table")?;

        // Portfolio snapshots, one row per committed version
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_state (
                version INTEGER PRIMARY KEY,
                date TEXT NOT NULL,
                positions TEXT NOT NULL,
                cash_balance TEXT NOT NULL,
                total_value TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create portfolio_state table")?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_portfolio_state_date ON portfolio_state(date)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl MarketDataStore for Database {
    async fn load_series(&self, symbol: &str, range: &DateRange) -> ServiceResult<Vec<PricePoint>> {
        let points = sqlx::query_as::<_, PricePoint>(
            r#"
            SELECT symbol, timestamp, open, high, low, close, adjusted_close, volume
            FROM stock_data
            WHERE symbol = ? AND timestamp BETWEEN ? AND ?
            ORDER BY timestamp
            "#,
        )
        .bind(symbol)
        .bind(range.start_ts())
        .bind(range.end_ts())
        .fetch_all(&self.pool)
        .await?;

        Ok(points)
    }

    async fn store_series(&self, symbol: &str, points: &[PricePoint]) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;

        for p in points {
            sqlx::query(
                r#"
                INSERT INTO stock_data (symbol, timestamp, open, high, low, close, adjusted_close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, timestamp) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    adjusted_close = excluded.adjusted_close,
                    volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(p.timestamp)
            .bind(p.open)
            .bind(p.high)
            .bind(p.low)
            .bind(p.close)
            .bind(p.adjusted_close)
            .bind(p.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(symbol = %symbol, bars = points.len(), "Stored bars");
        Ok(())
    }
}

#[async_trait]
impl PortfolioStateStore for Database {
    async fn save(&self, state: &PortfolioState) -> ServiceResult<u64> {
        let positions = serde_json::to_string(&state.positions)?;
        let mut tx = self.pool.begin().await?;

        let latest: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM portfolio_state")
            .fetch_one(&mut *tx)
            .await?;
        if latest as u64 != state.version {
            return Err(ServiceError::Conflict(format!(
                "portfolio was modified concurrently: expected version {}, found {}",
                state.version, latest
            )));
        }

        let next = latest + 1;
        sqlx::query(
            r#"
            INSERT INTO portfolio_state (version, date, positions, cash_balance, total_value)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(next)
        .bind(state.date.format("%Y-%m-%d").to_string())
        .bind(positions)
        .bind(state.cash_balance.to_string())
        .bind(state.total_value.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServiceError::Conflict(format!("version {} already written", next))
            }
            other => ServiceError::from(other),
        })?;

        tx.commit().await?;
        Ok(next as u64)
    }

    async fn load(&self, date: NaiveDate) -> ServiceResult<Option<PortfolioState>> {
        let row = sqlx::query_as::<_, StoredPortfolio>(&format!(
            "{} WHERE date = ? ORDER BY version DESC LIMIT 1",
            SELECT_PORTFOLIO
        ))
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredPortfolio::into_state).transpose()
    }

    async fn load_latest(&self) -> ServiceResult<Option<PortfolioState>> {
        let row = sqlx::query_as::<_, StoredPortfolio>(&format!(
            "{} ORDER BY version DESC LIMIT 1",
            SELECT_PORTFOLIO
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredPortfolio::into_state).transpose()
    }

    async fn history(&self, start: NaiveDate, end: NaiveDate) -> ServiceResult<Vec<PortfolioState>> {
        let rows = sqlx::query_as::<_, StoredPortfolio>(&format!(
            "{} WHERE date BETWEEN ? AND ? ORDER BY version",
            SELECT_PORTFOLIO
        ))
        .bind(start.format("%Y-%m-%d").to_string())
        .bind(end.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredPortfolio::into_state).collect()
    }
}
