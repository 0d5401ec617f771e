//! Key-value storage backends for the custodian.
//!
//! Every record the custodian persists goes through the [`Storage`](storage::Storage) trait,
//! which only promises per-key atomicity. [`InMemoryStorage`](inmemory::InMemoryStorage) is used
//! by tests and ephemeral setups, [`SqliteStorage`](persistent::sqlite::SqliteStorage) by the
//! binary.

pub mod errors;
pub mod inmemory;
pub mod persistent;
pub mod storage;

pub use errors::{DbError, DbResult};
pub use inmemory::InMemoryStorage;
pub use persistent::{config::DbConfig, sqlite::SqliteStorage};
pub use storage::Storage;
