//! # Dispatch Core
//!
//! Core primitives and types for robot delivery dispatch.
//!
//! This crate provides the fundamental building blocks:
//! - [`Order`] - a delivery order and its lifecycle
//! - [`DeliveryPlan`] - the orders assigned to one robot
//! - [`CancelToken`] - deadline and explicit cancellation
//! - [`DeliveryError`] - dispatch error types

pub mod cancel;
pub mod error;
pub mod order;
pub mod types;

// Re-exports for convenience
pub use cancel::{CancelHandle, CancelToken};
pub use error::{CancelReason, DeliveryError, Result};
pub use order::{DeliveryPlan, Order};
pub use types::{OrderId, OrderStatus};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelToken};
    pub use crate::error::{CancelReason, DeliveryError, Result};
    pub use crate::order::{DeliveryPlan, Order};
    pub use crate::types::{OrderId, OrderStatus};
}
