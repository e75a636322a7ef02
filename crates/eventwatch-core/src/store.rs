//! Storage traits consumed by the workers and the broker.
//!
//! Implementations include the in-memory and SQLite backends in
//! `eventwatch-storage`. The backing schema must enforce `(address, network)`
//! uniqueness for contracts and `(listener_id, transaction_hash, log_index)`
//! uniqueness for event records.

use async_trait::async_trait;

use crate::abi::ContractAbi;
use crate::error::SyncError;
use crate::types::{Contract, EventListener, EventRecord, HeightCheckpoint};

/// CRUD over registered contracts.
#[async_trait]
pub trait ContractRegistry: Send + Sync {
    /// Register a contract. Fails with `DuplicateContract` if the
    /// `(address, network)` pair is already taken.
    async fn create_contract(&self, contract: Contract) -> Result<(), SyncError>;

    async fn get_contract(&self, id: &str) -> Result<Contract, SyncError>;

    async fn list_contracts(&self) -> Result<Vec<Contract>, SyncError>;

    /// Metadata refresh: only `name` and `abi` are mutable after creation.
    async fn update_contract(
        &self,
        id: &str,
        name: Option<String>,
        abi: Option<ContractAbi>,
    ) -> Result<(), SyncError>;

    /// Delete a contract and cascade to its listeners (and their records).
    async fn delete_contract(&self, id: &str) -> Result<(), SyncError>;
}

/// Listener records, their event records, sync progress, and checkpoints.
#[async_trait]
pub trait ListenerStore: Send + Sync {
    /// Create a listener. The named event must exist in the owning contract's
    /// ABI (`UnknownEvent` otherwise); the initial sync height is clamped up
    /// to the contract's start height.
    async fn create_listener(&self, listener: EventListener) -> Result<(), SyncError>;

    async fn get_listener(&self, id: &str) -> Result<EventListener, SyncError>;

    async fn list_listeners(&self) -> Result<Vec<EventListener>, SyncError>;

    /// User update: rename and/or explicit height reset.
    async fn update_listener(
        &self,
        id: &str,
        name: Option<String>,
        sync_height: Option<u64>,
    ) -> Result<(), SyncError>;

    /// Delete a listener and cascade to its records and checkpoints.
    async fn delete_listener(&self, id: &str) -> Result<(), SyncError>;

    /// Persisted sync progress for a listener.
    async fn sync_height(&self, id: &str) -> Result<u64, SyncError>;

    /// Atomically upsert a range's records, advance the sync height, and
    /// record the range-tip checkpoint — one transaction (or equivalent), so
    /// the height can never run ahead of stored data.
    ///
    /// Upserts on `(listener_id, transaction_hash, log_index)`: an exact
    /// duplicate is a no-op. The height only moves forward here; returns the
    /// number of newly inserted records.
    async fn commit_range(
        &self,
        listener_id: &str,
        records: Vec<EventRecord>,
        new_height: u64,
        checkpoint: HeightCheckpoint,
    ) -> Result<u64, SyncError>;

    /// Reorg rollback: delete records and checkpoints above `height` and
    /// reset the sync height to it.
    async fn rollback_to(&self, listener_id: &str, height: u64) -> Result<(), SyncError>;

    /// Stored records for a listener, ordered by `(block_height, log_index)`.
    async fn records(&self, listener_id: &str) -> Result<Vec<EventRecord>, SyncError>;

    /// Recorded checkpoints for a listener, ascending by height.
    async fn checkpoints(&self, listener_id: &str) -> Result<Vec<HeightCheckpoint>, SyncError>;

    /// Drop all but the newest `keep_last` checkpoints.
    async fn prune_checkpoints(&self, listener_id: &str, keep_last: usize)
        -> Result<(), SyncError>;
}
