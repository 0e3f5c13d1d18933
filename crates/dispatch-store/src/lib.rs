//! # Dispatch Store
//!
//! Transactional order stores. Every store hands out units of work that lock
//! what they read and roll back unless committed.

pub mod postgres;
pub mod store;

pub use postgres::{PgOrderStore, PgStoreOptions, PgUnitOfWork};
pub use store::{InMemoryOrderStore, InMemoryUnitOfWork, OrderStore, UnitOfWork};
