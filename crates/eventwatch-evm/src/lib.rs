//! eventwatch-evm — chain reader contract, ABI event decoding, per-listener
//! sync workers, and the broker that owns them.

pub mod broker;
pub mod decoder;
pub mod processor;
pub mod reader;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use broker::Broker;
pub use processor::{EventProcessor, ProcessOutcome};
pub use reader::{ChainReader, RawLog};
pub use worker::{SyncWorker, WorkerState, WorkerStatus};
