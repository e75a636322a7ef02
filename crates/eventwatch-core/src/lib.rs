//! eventwatch-core — foundation for the event-listener synchronization engine.
//!
//! # Architecture
//!
//! ```text
//! Broker → SyncWorker (one per listener)
//!              ├── SyncPlanner      (confirmation depth, batch bound)
//!              ├── EventProcessor   (ABI decode, idempotent persist)
//!              ├── ChainReader      (head height, logs, canonical check)
//!              └── ListenerStore    (records, sync height, checkpoints)
//! ```

pub mod abi;
pub mod config;
pub mod error;
pub mod planner;
pub mod progress;
pub mod store;
pub mod types;

pub use abi::{ContractAbi, EventDef, EventInput};
pub use config::SyncConfig;
pub use error::SyncError;
pub use planner::SyncPlanner;
pub use store::{ContractRegistry, ListenerStore};
pub use types::{BlockRange, Contract, EventListener, EventRecord, HeightCheckpoint};
