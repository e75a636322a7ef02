//! Storage backends for EventWatch.
//!
//! - `memory` (default): `Mutex<HashMap>`-backed, for tests and embedding.
//! - `sqlite` (feature): sqlx-backed single-file persistence with the
//!   uniqueness constraints of the data model enforced by the schema.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
