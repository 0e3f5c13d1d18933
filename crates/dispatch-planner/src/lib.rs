//! # Dispatch Planner
//!
//! Capacity-bounded selection strategies: which pending orders a robot
//! should carry. Everything here is pure computation.

pub mod exact;
pub mod greedy;
pub mod planner;

pub use exact::ExactStrategy;
pub use greedy::GreedyStrategy;
pub use planner::{Item, Selection, SelectionStrategy, StrategyKind};
