//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - In-memory stores for tests and ephemeral instances

mod database;
mod memory;
mod models;

pub use database::Database;
pub use memory::{MemoryDeliveryStore, MemoryKeyStore};
pub use models::{ActorKeyRow, DeliveryTaskRow};
