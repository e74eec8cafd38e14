//! SQLite persistence adapters.

pub mod connection;
pub mod run_store;

pub use connection::{create_pool, create_test_pool, ConnectionError};
pub use run_store::SqliteRunStore;
