//! Error types for the synchronization engine.

use thiserror::Error;

/// Errors that can occur while synchronizing listeners.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network/RPC failure — transient, retried with capped backoff.
    #[error("chain read error: {0}")]
    ChainRead(String),

    /// A matching log could not be decoded against the stored ABI.
    /// Non-retryable; halts only the affected listener.
    #[error("decode error for listener '{listener_id}': {reason}")]
    Decode { listener_id: String, reason: String },

    /// Persistence layer unavailable — transient, retried like `ChainRead`.
    #[error("storage error: {0}")]
    Store(String),

    /// A previously-safe height was invalidated; triggers rollback, not failure.
    #[error("reorg detected at height {height}")]
    ReorgDetected { height: u64 },

    #[error("listener not found: {0}")]
    ListenerNotFound(String),

    #[error("contract not found: {0}")]
    ContractNotFound(String),

    #[error("contract already registered: {address} on network {network}")]
    DuplicateContract { address: String, network: u64 },

    /// Listener creation names an event absent from the contract's ABI.
    #[error("event '{event}' not present in ABI of contract {contract_id}")]
    UnknownEvent { contract_id: String, event: String },
}

impl SyncError {
    /// Returns `true` for failures that are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ChainRead(_) | Self::Store(_))
    }

    /// Returns `true` if the error is a reorg (recoverable via rollback).
    pub fn is_reorg(&self) -> bool {
        matches!(self, Self::ReorgDetected { .. })
    }
}
