//! The chain reader capability the sync engine consumes.
//!
//! Implementations wrap a JSON-RPC provider per supported network. Beyond
//! head height and filtered log fetch, a reader must be able to say whether a
//! block hash it previously served at a height is still canonical — that is
//! what makes reorg detection of previously-safe heights possible.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eventwatch_core::error::SyncError;

/// A raw EVM log as served by the chain reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    /// Emitting contract address (`0x…`).
    pub address: String,
    /// topics[0] is the event signature hash; indexed params follow.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed parameters (`0x…` hex).
    pub data: String,
    pub block_height: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u32,
    /// Set by some providers when a log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

/// Read access to one or more chains, keyed by network id.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current head block height of the network.
    async fn current_height(&self, network: u64) -> Result<u64, SyncError>;

    /// Logs emitted by `address` with signature hash `topic0` within
    /// `[from, to]` (inclusive).
    async fn get_logs(
        &self,
        network: u64,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError>;

    /// Canonical block hash at `height`.
    async fn block_hash(&self, network: u64, height: u64) -> Result<String, SyncError>;

    /// Returns `true` if `observed_hash` is still the canonical hash at
    /// `height`. `false` means the block was reorged out.
    async fn is_still_canonical(
        &self,
        network: u64,
        height: u64,
        observed_hash: &str,
    ) -> Result<bool, SyncError>;
}

#[async_trait]
impl<R: ChainReader + ?Sized> ChainReader for std::sync::Arc<R> {
    async fn current_height(&self, network: u64) -> Result<u64, SyncError> {
        (**self).current_height(network).await
    }

    async fn get_logs(
        &self,
        network: u64,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        (**self).get_logs(network, address, topic0, from, to).await
    }

    async fn block_hash(&self, network: u64, height: u64) -> Result<String, SyncError> {
        (**self).block_hash(network, height).await
    }

    async fn is_still_canonical(
        &self,
        network: u64,
        height: u64,
        observed_hash: &str,
    ) -> Result<bool, SyncError> {
        (**self).is_still_canonical(network, height, observed_hash).await
    }
}
