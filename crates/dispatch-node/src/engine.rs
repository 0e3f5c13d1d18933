//! Delivery planning engine.
//!
//! [`DeliveryPlanner`] ties an [`OrderStore`] to a [`SelectionStrategy`]:
//! read pending orders, select what fits the robot, and mark the selection
//! assigned, all inside one unit of work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dispatch_core::{CancelToken, DeliveryError, DeliveryPlan, Order, OrderId, OrderStatus, Result};
use dispatch_planner::{Item, Selection, SelectionStrategy};
use dispatch_store::{OrderStore, UnitOfWork};
use tracing::{debug, error, info, warn};

use crate::config::PlannerConfig;

/// Assigns pending orders to robots.
pub struct DeliveryPlanner {
    store: Arc<dyn OrderStore>,
    strategy: Arc<dyn SelectionStrategy>,
    timeout: Duration,
}

impl DeliveryPlanner {
    /// Create a planner with the default operation timeout.
    pub fn new(store: Arc<dyn OrderStore>, strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            store,
            strategy,
            timeout: PlannerConfig::default().plan_timeout(),
        }
    }

    /// Create a planner from configuration.
    pub fn from_config(store: Arc<dyn OrderStore>, config: &PlannerConfig) -> Self {
        Self::new(store, config.strategy.build()).with_timeout(config.plan_timeout())
    }

    /// Bound every operation by `timeout`, on top of the caller's token.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Select pending orders for a robot and mark them assigned.
    ///
    /// Fetch, selection and the status update share one unit of work: either
    /// the plan's orders all become assigned, or nothing changes. An empty
    /// eligible set or a non-positive capacity yields an empty plan.
    #[tracing::instrument(
        skip(self, cancel),
        fields(robot.id = %robot_id, robot.capacity = capacity, strategy = self.strategy.name())
    )]
    pub async fn generate_delivery_plan(
        &self,
        robot_id: &str,
        capacity: i64,
        cancel: &CancelToken,
    ) -> Result<DeliveryPlan> {
        let cancel = self.bounded(cancel);
        cancel.check()?;

        if capacity <= 0 {
            debug!("Non-positive capacity, returning empty plan");
            return Ok(DeliveryPlan::empty(robot_id));
        }

        let mut uow = cancel.run(self.store.begin()).await?;

        let result = match self.plan_within(uow.as_mut(), robot_id, capacity, &cancel).await {
            // Cancellation after the update but before commit still rolls back.
            Ok(plan) => cancel.check().map(|_| plan),
            Err(err) => Err(err),
        };

        match result {
            Ok(plan) => {
                uow.commit().await?;
                info!(
                    plan.orders_count = plan.orders.len(),
                    plan.total_weight = plan.total_weight,
                    plan.total_value = plan.total_value,
                    "Delivery plan committed"
                );
                Ok(plan)
            }
            Err(err) => {
                abort(uow, &err).await;
                Err(err)
            }
        }
    }

    /// Move one order to `new_status` in its own unit of work.
    ///
    /// Used, for example, when a robot reports an assigned order delivered.
    #[tracing::instrument(skip(self, cancel), fields(order.id = %order_id, order.status = new_status))]
    pub async fn update_order_status(
        &self,
        order_id: OrderId,
        new_status: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let status: OrderStatus = new_status.parse()?;
        let cancel = self.bounded(cancel);

        let mut uow = cancel.run(self.store.begin()).await?;

        match transition_within(uow.as_mut(), order_id, status, &cancel).await {
            Ok(()) => {
                uow.commit().await?;
                info!(to = %status, "Order status updated");
                Ok(())
            }
            Err(err) => {
                abort(uow, &err).await;
                Err(err)
            }
        }
    }

    /// The caller's token, tightened by this planner's timeout.
    fn bounded(&self, cancel: &CancelToken) -> CancelToken {
        cancel.clone().tighten(Instant::now() + self.timeout)
    }

    /// Steps 2 to 4 of planning, against an open unit of work.
    async fn plan_within(
        &self,
        uow: &mut dyn UnitOfWork,
        robot_id: &str,
        capacity: i64,
        cancel: &CancelToken,
    ) -> Result<DeliveryPlan> {
        let pending = cancel.run(uow.fetch_pending_orders()).await?;
        debug!(orders.count = pending.len(), "Fetched pending orders");

        if pending.is_empty() {
            return Ok(DeliveryPlan::empty(robot_id));
        }

        let items: Vec<Item> = pending.iter().map(|o| Item::new(o.weight, o.value)).collect();
        let selection = self.select(items, capacity, cancel).await?;

        let selected: Vec<Order> = selection
            .indices
            .iter()
            .map(|&index| pending[index].clone())
            .collect();
        let plan = DeliveryPlan::from_orders(robot_id, selected);

        if !plan.is_empty() {
            let ids = plan.order_ids();
            let updated = cancel
                .run(uow.bulk_update_status(&ids, OrderStatus::Assigned))
                .await?;
            info!(updated.orders_count = updated, "Updated status to 'assigned'");
        }

        Ok(plan)
    }

    /// Run the strategy off the async executor and check its output.
    async fn select(&self, items: Vec<Item>, capacity: i64, cancel: &CancelToken) -> Result<Selection> {
        let strategy = self.strategy.clone();
        let token = cancel.clone();

        tokio::task::spawn_blocking(move || -> Result<Selection> {
            let selection = strategy.select(&items, capacity, &token)?;
            selection.verify(&items, capacity)?;
            Ok(selection)
        })
        .await
        .map_err(|e| DeliveryError::Internal(format!("selection task failed: {}", e)))?
    }
}

async fn transition_within(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    status: OrderStatus,
    cancel: &CancelToken,
) -> Result<()> {
    let order = cancel
        .run(uow.get_order(order_id))
        .await?
        .ok_or(DeliveryError::NotFound { order_id })?;

    if !order.status.can_transition_to(status) {
        return Err(DeliveryError::InvalidTransition {
            order_id,
            from: order.status,
            to: status,
        });
    }

    cancel.run(uow.bulk_update_status(&[order_id], status)).await?;
    cancel.check()
}

/// Roll back after `err`. A failed rollback is logged; the transaction is
/// released when the unit of work drops either way.
async fn abort(uow: Box<dyn UnitOfWork>, err: &DeliveryError) {
    match err {
        DeliveryError::InvariantViolation(_) | DeliveryError::Internal(_) => {
            error!(error = %err, "Rolling back after internal defect")
        }
        DeliveryError::Cancelled { .. } => info!(error = %err, "Rolling back cancelled operation"),
        _ => warn!(error = %err, "Rolling back"),
    }

    if let Err(rollback_err) = uow.rollback().await {
        warn!(error = %rollback_err, "Rollback failed");
    }
}
