//! Orders and the delivery plan built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};
use crate::types::{OrderId, OrderStatus};

/// A purchased item waiting for, or going through, robot delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique identifier for this order.
    pub id: OrderId,

    /// Mass/size units the order occupies in a robot.
    pub weight: i64,

    /// Worth of delivering this order.
    pub value: i64,

    /// Current lifecycle status.
    pub status: OrderStatus,

    /// When the order was placed.
    pub created_at: DateTime<Utc>,

    /// When the order was delivered, once it has been.
    pub arrived_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new pending order.
    pub fn pending(id: impl Into<OrderId>, weight: i64, value: i64) -> Self {
        Self {
            id: id.into(),
            weight,
            value,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            arrived_at: None,
        }
    }

    /// Move the order to `next`, enforcing the lifecycle.
    ///
    /// Reaching `delivered` stamps `arrived_at` with `now`.
    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DeliveryError::InvalidTransition {
                order_id: self.id,
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next == OrderStatus::Delivered {
            self.arrived_at = Some(now);
        }
        Ok(())
    }
}

/// One robot's assigned deliveries.
///
/// Request scoped and never persisted. The order list follows the order in
/// which the strategy selected the orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPlan {
    /// Robot the plan was generated for.
    pub robot_id: String,

    /// Sum of the selected orders' weights. Never exceeds the capacity.
    pub total_weight: i64,

    /// Sum of the selected orders' values.
    pub total_value: i64,

    /// Selected orders, as read before the assignment.
    pub orders: Vec<Order>,
}

impl DeliveryPlan {
    /// A plan that carries nothing.
    pub fn empty(robot_id: impl Into<String>) -> Self {
        Self {
            robot_id: robot_id.into(),
            total_weight: 0,
            total_value: 0,
            orders: Vec::new(),
        }
    }

    /// Build a plan from selected orders, deriving the totals. Totals
    /// saturate at the `i64` bounds.
    pub fn from_orders(robot_id: impl Into<String>, orders: Vec<Order>) -> Self {
        let (total_weight, total_value) = orders.iter().fold((0i64, 0i64), |(w, v), o| {
            (w.saturating_add(o.weight), v.saturating_add(o.value))
        });
        Self {
            robot_id: robot_id.into(),
            total_weight,
            total_value,
            orders,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Ids of the selected orders, in plan order.
    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.iter().map(|o| o.id).collect()
    }
}
