//! Error types for delivery dispatch.

use thiserror::Error;

use crate::types::{OrderId, OrderStatus};

/// Why an operation stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled explicitly.
    Requested,
    /// The operation deadline passed.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Requested => f.write_str("cancellation requested"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Main error type for dispatch operations.
#[derive(Error, Debug, Clone)]
pub enum DeliveryError {
    /// The computation or the enclosing unit of work was cancelled.
    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    /// The order store failed. The message is for logs, not for clients.
    #[error("Order store error: {message}")]
    Store { message: String },

    /// No order with this id exists.
    #[error("Order {order_id} not found")]
    NotFound { order_id: OrderId },

    /// A status name that is not part of the order lifecycle.
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    /// The requested transition is not allowed from the current status.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// A bulk update found rows that were not in an expected state.
    #[error("Conflicting order state: {message}")]
    Conflict { message: String },

    /// A selection strategy produced an infeasible selection. Always a bug.
    #[error("Selection invariant violated: {0}")]
    InvariantViolation(String),

    /// Internal error (should not happen).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeliveryError {
    /// Shorthand for a store failure.
    pub fn store(message: impl Into<String>) -> Self {
        DeliveryError::Store {
            message: message.into(),
        }
    }

    /// Returns true if the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Cancelled { .. } | DeliveryError::Conflict { .. }
        )
    }

    /// Returns true for the cancellation condition.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled { .. })
    }
}

/// Convenience Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;
