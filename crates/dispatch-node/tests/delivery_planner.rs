//! End-to-end planning against the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dispatch_core::{
    CancelHandle, CancelReason, CancelToken, DeliveryError, Order, OrderId, OrderStatus, Result,
};
use dispatch_node::DeliveryPlanner;
use dispatch_planner::{ExactStrategy, GreedyStrategy};
use dispatch_store::{InMemoryOrderStore, OrderStore, UnitOfWork};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_orders(rng: &mut StdRng, count: i64) -> Vec<Order> {
    (1..=count)
        .map(|id| Order::pending(id, rng.gen_range(1..=8), rng.gen_range(0..=20)))
        .collect()
}

/// Store whose status updates can be made to fail once, or to fire a
/// cancellation right after they succeed.
struct FlakyStore {
    inner: InMemoryOrderStore,
    fail_update: Arc<AtomicBool>,
    cancel_on_update: Option<Arc<CancelHandle>>,
}

impl FlakyStore {
    fn new(inner: InMemoryOrderStore) -> Self {
        Self {
            inner,
            fail_update: Arc::new(AtomicBool::new(false)),
            cancel_on_update: None,
        }
    }
}

struct FlakyUnitOfWork {
    inner: Box<dyn UnitOfWork>,
    fail_update: Arc<AtomicBool>,
    cancel_on_update: Option<Arc<CancelHandle>>,
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(FlakyUnitOfWork {
            inner: self.inner.begin().await?,
            fail_update: self.fail_update.clone(),
            cancel_on_update: self.cancel_on_update.clone(),
        }))
    }
}

#[async_trait]
impl UnitOfWork for FlakyUnitOfWork {
    async fn fetch_pending_orders(&mut self) -> Result<Vec<Order>> {
        self.inner.fetch_pending_orders().await
    }

    async fn get_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn bulk_update_status(&mut self, ids: &[OrderId], status: OrderStatus) -> Result<u64> {
        if self.fail_update.swap(false, Ordering::SeqCst) {
            return Err(DeliveryError::store("connection reset"));
        }
        let updated = self.inner.bulk_update_status(ids, status).await?;
        if let Some(handle) = &self.cancel_on_update {
            handle.cancel();
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.rollback().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_plans_never_share_an_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let store = InMemoryOrderStore::with_orders(random_orders(&mut rng, 40));
    let planner = Arc::new(DeliveryPlanner::new(
        Arc::new(store.clone()),
        Arc::new(ExactStrategy::new()),
    ));

    let mut tasks = Vec::new();
    for robot in 0..8 {
        let planner = planner.clone();
        tasks.push(tokio::spawn(async move {
            planner
                .generate_delivery_plan(&format!("robot-{}", robot), 12, &CancelToken::never())
                .await
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        let plan = task.await.unwrap().unwrap();
        assert!(plan.total_weight <= 12);
        for id in plan.order_ids() {
            assert!(seen.insert(id), "order {} assigned twice", id);
        }
    }

    let assigned: HashSet<OrderId> = store
        .all()
        .await
        .into_iter()
        .filter(|o| o.status == OrderStatus::Assigned)
        .map(|o| o.id)
        .collect();
    assert_eq!(assigned, seen);
}

#[tokio::test]
async fn failed_update_leaves_orders_pending() {
    let inner = InMemoryOrderStore::with_orders(vec![
        Order::pending(1, 2, 3),
        Order::pending(2, 3, 4),
    ]);
    let store = FlakyStore::new(inner.clone());
    store.fail_update.store(true, Ordering::SeqCst);
    let planner = DeliveryPlanner::new(Arc::new(store), Arc::new(ExactStrategy::new()));

    let result = planner
        .generate_delivery_plan("robot-1", 5, &CancelToken::never())
        .await;
    assert!(matches!(result, Err(DeliveryError::Store { .. })));
    for order in inner.all().await {
        assert_eq!(order.status, OrderStatus::Pending);
    }

    // The next attempt goes through.
    let plan = planner
        .generate_delivery_plan("robot-1", 5, &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(plan.total_value, 7);
}

#[tokio::test]
async fn greedy_plans_never_beat_exact_plans() {
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..25 {
        let orders = random_orders(&mut rng, 12);
        let capacity = rng.gen_range(0..=30);

        let exact_store = InMemoryOrderStore::with_orders(orders.clone());
        let greedy_store = InMemoryOrderStore::with_orders(orders);

        let exact = DeliveryPlanner::new(Arc::new(exact_store), Arc::new(ExactStrategy::new()))
            .generate_delivery_plan("robot-1", capacity, &CancelToken::never())
            .await
            .unwrap();
        let greedy = DeliveryPlanner::new(Arc::new(greedy_store), Arc::new(GreedyStrategy::new()))
            .generate_delivery_plan("robot-1", capacity, &CancelToken::never())
            .await
            .unwrap();

        assert!(exact.total_weight <= capacity.max(0));
        assert!(greedy.total_weight <= capacity.max(0));
        assert!(greedy.total_value <= exact.total_value);
    }
}

#[tokio::test]
async fn delivered_orders_are_not_replanned() {
    let store = InMemoryOrderStore::with_orders(vec![
        Order::pending(1, 2, 3),
        Order::pending(2, 3, 4),
        Order::pending(3, 1, 1),
    ]);
    let planner = DeliveryPlanner::new(Arc::new(store.clone()), Arc::new(ExactStrategy::new()));
    let never = CancelToken::never();

    let first = planner.generate_delivery_plan("robot-1", 5, &never).await.unwrap();
    for id in first.order_ids() {
        planner.update_order_status(id, "delivered", &never).await.unwrap();
    }
    planner.update_order_status(OrderId(3), "cancelled", &never).await.unwrap();

    let second = planner.generate_delivery_plan("robot-2", 100, &never).await.unwrap();
    assert!(second.is_empty());

    let statuses: Vec<OrderStatus> = store.all().await.into_iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![OrderStatus::Delivered, OrderStatus::Delivered, OrderStatus::Cancelled]
    );
}

#[tokio::test]
async fn cancel_after_update_rolls_back_the_plan() {
    let inner = InMemoryOrderStore::with_orders(vec![
        Order::pending(1, 2, 3),
        Order::pending(2, 3, 4),
        Order::pending(3, 4, 5),
    ]);
    let handle = Arc::new(CancelHandle::new());
    let token = handle.token();
    let mut store = FlakyStore::new(inner.clone());
    store.cancel_on_update = Some(handle);
    let planner = DeliveryPlanner::new(Arc::new(store), Arc::new(ExactStrategy::new()));

    let result = planner.generate_delivery_plan("robot-1", 5, &token).await;

    assert!(matches!(
        result,
        Err(DeliveryError::Cancelled { reason: CancelReason::Requested })
    ));
    for order in inner.all().await {
        assert_eq!(order.status, OrderStatus::Pending);
    }
}

#[tokio::test]
async fn cancel_after_status_update_rolls_back() {
    let inner = InMemoryOrderStore::with_orders(vec![Order::pending(1, 2, 3)]);
    let handle = Arc::new(CancelHandle::new());
    let token = handle.token();
    let mut store = FlakyStore::new(inner.clone());
    store.cancel_on_update = Some(handle);
    let planner = DeliveryPlanner::new(Arc::new(store), Arc::new(GreedyStrategy::new()));

    let result = planner.update_order_status(OrderId(1), "cancelled", &token).await;

    assert!(matches!(result, Err(DeliveryError::Cancelled { .. })));
    assert_eq!(inner.get(OrderId(1)).await.unwrap().status, OrderStatus::Pending);
}
