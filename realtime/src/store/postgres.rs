//! Postgres-backed data store.
//!
//! Uses runtime-checked `SQLx` queries against the `orders`, `trades`,
//! `balances` and `peers` tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{Balance, DataStore, Order, OrderStatus, Peer, Side, Trade, TradingPair};
use crate::error::StoreError;

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Data store reading from Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Self::with_max_connections(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Connects to the database with a custom pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be connected.
    pub async fn with_max_connections(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "PostgreSQL connection pool initialized");

        Ok(Self { pool })
    }

    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
        let side: String = get(row, "side")?;
        let status: String = get(row, "status")?;

        Ok(Order {
            id: get(row, "id")?,
            user_id: get(row, "user_id")?,
            base_asset: get(row, "base_asset")?,
            quote_asset: get(row, "quote_asset")?,
            side: Side::parse(&side)
                .ok_or_else(|| StoreError::MissingField(format!("side: unknown value {side}")))?,
            price: get::<Decimal>(row, "price")?,
            amount: get::<Decimal>(row, "amount")?,
            status: OrderStatus::parse(&status).ok_or_else(|| {
                StoreError::MissingField(format!("status: unknown value {status}"))
            })?,
            created_at: get::<DateTime<Utc>>(row, "created_at")?,
        })
    }

    fn row_to_trade(row: &PgRow) -> Result<Trade, StoreError> {
        Ok(Trade {
            id: get(row, "id")?,
            base_asset: get(row, "base_asset")?,
            quote_asset: get(row, "quote_asset")?,
            price: get::<Decimal>(row, "price")?,
            amount: get::<Decimal>(row, "amount")?,
            buyer_id: row.try_get::<Option<String>, _>("buyer_id").ok().flatten(),
            seller_id: row.try_get::<Option<String>, _>("seller_id").ok().flatten(),
            created_at: get::<DateTime<Utc>>(row, "created_at")?,
        })
    }
}

fn get<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(column)
        .map_err(|e| StoreError::MissingField(format!("{column}: {e}")))
}

#[async_trait]
impl DataStore for PgStore {
    async fn open_orders(&self, pair: &TradingPair, side: Side) -> Result<Vec<Order>, StoreError> {
        let order_by = match side {
            Side::Buy => "price DESC, created_at ASC",
            Side::Sell => "price ASC, created_at ASC",
        };
        let sql = format!(
            r"
            SELECT id, user_id, base_asset, quote_asset, side, price, amount, status, created_at
            FROM orders
            WHERE base_asset = $1 AND quote_asset = $2 AND side = $3
              AND status IN ('open', 'partial')
            ORDER BY {order_by}
            "
        );

        let rows = sqlx::query(&sql)
            .bind(&pair.base_asset)
            .bind(&pair.quote_asset)
            .bind(side.as_str())
            .fetch_all(&self.pool)
            .await?;

        debug!(pair = %pair, side = side.as_str(), count = rows.len(), "Loaded open orders");
        rows.iter().map(Self::row_to_order).collect()
    }

    async fn trades_since(
        &self,
        pair: &TradingPair,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, base_asset, quote_asset, price, amount, buyer_id, seller_id, created_at
            FROM trades
            WHERE base_asset = $1 AND quote_asset = $2 AND created_at >= $3
            ORDER BY created_at ASC
            ",
        )
        .bind(&pair.base_asset)
        .bind(&pair.quote_asset)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_trade).collect()
    }

    async fn trading_pairs(&self) -> Result<Vec<TradingPair>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT base_asset, quote_asset FROM orders
            UNION
            SELECT base_asset, quote_asset FROM trades
            ORDER BY base_asset, quote_asset
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TradingPair::new(
                    get::<String>(row, "base_asset")?,
                    get::<String>(row, "quote_asset")?,
                ))
            })
            .collect()
    }

    async fn balances(&self, user_id: &str) -> Result<Vec<Balance>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT asset, available, locked
            FROM balances
            WHERE user_id = $1
            ORDER BY asset
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Balance {
                    asset: get(row, "asset")?,
                    available: get::<Decimal>(row, "available")?,
                    locked: get::<Decimal>(row, "locked")?,
                })
            })
            .collect()
    }

    async fn online_peers(&self) -> Result<Vec<Peer>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, address, connected_at
            FROM peers
            WHERE online
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Peer {
                    id: get(row, "id")?,
                    address: row.try_get::<Option<String>, _>("address").ok().flatten(),
                    connected_at: get::<DateTime<Utc>>(row, "connected_at")?,
                })
            })
            .collect()
    }
}
