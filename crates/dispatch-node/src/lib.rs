//! # Dispatch Node
//!
//! Delivery planning service: configuration, the [`DeliveryPlanner`]
//! orchestrator, and logging setup for the `dispatch-node` binary.

pub mod config;
pub mod engine;
pub mod telemetry;

pub use config::{Config, DatabaseConfig, PlannerConfig};
pub use engine::DeliveryPlanner;
