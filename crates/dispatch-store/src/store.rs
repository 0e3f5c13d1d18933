//! Order store traits and the in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dispatch_core::{DeliveryError, Order, OrderId, OrderStatus, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Durable order records behind a transaction boundary.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Open a unit of work.
    ///
    /// Rows read through the unit of work stay locked against other units of
    /// work until it commits or rolls back.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A scoped transaction over the order table.
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] rolls it
/// back, whatever the exit path: `?`, an early return, a panic, or a future
/// dropped on cancellation.
#[async_trait]
pub trait UnitOfWork: Send {
    /// All pending orders, ordered by id, locked until the unit of work ends.
    async fn fetch_pending_orders(&mut self) -> Result<Vec<Order>>;

    /// One order, locked until the unit of work ends.
    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Move every order in `ids` to `status`.
    ///
    /// All or nothing: if any id is unknown or its current status is not one
    /// of `status.predecessors()`, nothing changes and `Conflict` is
    /// returned. Returns the number of orders updated.
    async fn bulk_update_status(&mut self, ids: &[OrderId], status: OrderStatus) -> Result<u64>;

    /// Make every change visible to other units of work.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every change.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

type OrderTable = BTreeMap<OrderId, Order>;

/// In-memory implementation of [`OrderStore`].
///
/// A unit of work holds the whole table exclusively from `begin` to
/// commit/rollback, which makes every unit of work serializable.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<Mutex<OrderTable>>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `orders`.
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let table = orders.into_iter().map(|o| (o.id, o)).collect();
        Self {
            orders: Arc::new(Mutex::new(table)),
        }
    }

    /// Insert or replace an order. Waits for any open unit of work.
    pub async fn insert(&self, order: Order) {
        let mut orders = self.orders.lock().await;
        orders.insert(order.id, order);
    }

    /// Get the committed state of an order.
    pub async fn get(&self, id: OrderId) -> Option<Order> {
        let orders = self.orders.lock().await;
        orders.get(&id).cloned()
    }

    /// All committed orders, ordered by id.
    pub async fn all(&self) -> Vec<Order> {
        let orders = self.orders.lock().await;
        orders.values().cloned().collect()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.orders.clone().lock_owned().await;
        Ok(Box::new(InMemoryUnitOfWork {
            table: guard,
            staged: BTreeMap::new(),
            finished: false,
        }))
    }
}

/// Unit of work over [`InMemoryOrderStore`]. Writes are staged and applied on
/// commit.
pub struct InMemoryUnitOfWork {
    table: OwnedMutexGuard<OrderTable>,
    staged: OrderTable,
    finished: bool,
}

impl InMemoryUnitOfWork {
    /// Current view of an order: staged write first, then the table.
    fn current(&self, id: &OrderId) -> Option<&Order> {
        self.staged.get(id).or_else(|| self.table.get(id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn fetch_pending_orders(&mut self) -> Result<Vec<Order>> {
        let pending = self
            .table
            .keys()
            .filter_map(|id| self.current(id))
            .filter(|order| order.status == OrderStatus::Pending)
            .cloned()
            .collect();
        Ok(pending)
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.current(&id).cloned())
    }

    async fn bulk_update_status(&mut self, ids: &[OrderId], status: OrderStatus) -> Result<u64> {
        let unique: BTreeSet<OrderId> = ids.iter().copied().collect();
        let now = Utc::now();

        let mut updated = Vec::with_capacity(unique.len());
        for id in &unique {
            let mut order = self.current(id).cloned().ok_or_else(|| DeliveryError::Conflict {
                message: format!("order {} does not exist", id),
            })?;
            order.transition(status, now).map_err(|e| DeliveryError::Conflict {
                message: e.to_string(),
            })?;
            updated.push(order);
        }

        let count = updated.len() as u64;
        for order in updated {
            self.staged.insert(order.id, order);
        }
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let staged = std::mem::take(&mut this.staged);
        debug!(changes = staged.len(), "Committing in-memory unit of work");
        this.table.extend(staged);
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        debug!(discarded = this.staged.len(), "Rolling back in-memory unit of work");
        this.staged.clear();
        this.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                discarded = self.staged.len(),
                "Unit of work dropped without commit, rolling back"
            );
        }
    }
}
