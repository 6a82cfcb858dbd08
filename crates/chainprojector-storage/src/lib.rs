//! chainprojector-storage — durable backends for the ChainProjector entity store.
//!
//! Backends:
//! - [`MemoryEntityStore`] — in-memory (dev/testing, no persistence), from core
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chainprojector_core::store::MemoryEntityStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
