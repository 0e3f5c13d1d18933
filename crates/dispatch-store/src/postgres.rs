//! PostgreSQL order store.
//!
//! Orders join their product for weight and value. Pending rows are read
//! with `FOR UPDATE OF o`, so a second planning transaction blocks on them
//! (or, in skip-locked mode, passes over them) until the first one ends.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::{DeliveryError, Order, OrderId, OrderStatus, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::store::{OrderStore, UnitOfWork};

const SELECT_ORDERS: &str = r#"
    SELECT o.order_id, p.weight, p.value, o.status, o.created_at, o.arrived_at
    FROM orders o
    JOIN products p ON o.product_id = p.product_id
"#;

const UPDATE_STATUSES: &str = r#"
    UPDATE orders
    SET status = $1,
        arrived_at = CASE WHEN $1 = 'delivered' THEN NOW() ELSE arrived_at END
    WHERE order_id = ANY($2) AND status = ANY($3)
"#;

fn store_err(err: sqlx::Error) -> DeliveryError {
    DeliveryError::store(err.to_string())
}

/// Query that reads and locks every pending order.
pub(crate) fn pending_orders_query(skip_locked: bool) -> String {
    let mut query = format!(
        "{} WHERE o.status = 'pending' ORDER BY o.order_id FOR UPDATE OF o",
        SELECT_ORDERS.trim_end()
    );
    if skip_locked {
        query.push_str(" SKIP LOCKED");
    }
    query
}

/// Query that reads and locks one order.
pub(crate) fn order_by_id_query() -> String {
    format!(
        "{} WHERE o.order_id = $1 FOR UPDATE OF o",
        SELECT_ORDERS.trim_end()
    )
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: i64,
    weight: i64,
    value: i64,
    status: String,
    created_at: DateTime<Utc>,
    arrived_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DeliveryError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            id: OrderId(row.order_id),
            weight: row.weight,
            value: row.value,
            status: row.status.parse()?,
            created_at: row.created_at,
            arrived_at: row.arrived_at,
        })
    }
}

/// Connection settings for [`PgOrderStore::connect`].
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Skip rows locked by other planning transactions instead of waiting.
    pub skip_locked: bool,
}

/// PostgreSQL implementation of [`OrderStore`].
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
    skip_locked: bool,
}

impl PgOrderStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            skip_locked: false,
        }
    }

    /// Open a pool with `options`.
    pub async fn connect(options: &PgStoreOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .max_lifetime(options.max_lifetime)
            .connect(&options.url)
            .await
            .map_err(store_err)?;

        info!(
            max_connections = options.max_connections,
            skip_locked = options.skip_locked,
            "Connected to order database"
        );

        Ok(Self::new(pool).with_skip_locked(options.skip_locked))
    }

    pub fn with_skip_locked(mut self, skip_locked: bool) -> Self {
        self.skip_locked = skip_locked;
        self
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DeliveryError::store(e.to_string()))?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(store_err)?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            skip_locked: self.skip_locked,
        }))
    }
}

/// Unit of work over a PostgreSQL transaction. Dropping it rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    skip_locked: bool,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn fetch_pending_orders(&mut self) -> Result<Vec<Order>> {
        let query = pending_orders_query(self.skip_locked);
        let rows: Vec<OrderRow> = sqlx::query_as(&query)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_err)?;

        debug!(count = rows.len(), "Fetched pending orders");
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let query = order_by_id_query();
        let row: Option<OrderRow> = sqlx::query_as(&query)
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;

        row.map(Order::try_from).transpose()
    }

    async fn bulk_update_status(&mut self, ids: &[OrderId], status: OrderStatus) -> Result<u64> {
        let unique: Vec<i64> = ids
            .iter()
            .map(|id| id.0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }

        let predecessors: Vec<String> = status
            .predecessors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        // Savepoint, so a partial match leaves the outer transaction untouched.
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx)
            .await
            .map_err(store_err)?;

        let result = sqlx::query(UPDATE_STATUSES)
            .bind(status.as_str())
            .bind(&unique)
            .bind(&predecessors)
            .execute(&mut *savepoint)
            .await
            .map_err(store_err)?;

        let updated = result.rows_affected();
        if updated != unique.len() as u64 {
            savepoint.rollback().await.map_err(store_err)?;
            return Err(DeliveryError::Conflict {
                message: format!(
                    "{} of {} orders could move to {}",
                    updated,
                    unique.len(),
                    status
                ),
            });
        }

        savepoint.commit().await.map_err(store_err)?;
        debug!(count = updated, status = %status, "Updated order statuses");
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(store_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(store_err)
    }
}
