//! Shared types for the synchronization engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::abi::ContractAbi;

// ─── Contract ─────────────────────────────────────────────────────────────────

/// A deployed contract under watch.
///
/// `(address, network)` is unique; the storage layer enforces it.
/// After creation only `name`, `abi`, and `updated_at` may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Opaque unique identifier.
    pub id: String,
    /// Contract address (`0x…`), compared case-insensitively.
    pub address: String,
    /// Chain id of the network the contract is deployed on.
    pub network: u64,
    /// Human-readable name.
    pub name: String,
    /// Parsed ABI (event entries only). `None` until the user uploads one.
    pub abi: Option<ContractAbi>,
    /// Block height before which the contract did not exist / is not watched.
    pub start_height: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        network: u64,
        name: impl Into<String>,
        abi: Option<ContractAbi>,
        start_height: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            address: address.into(),
            network,
            name: name.into(),
            abi,
            start_height,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if `other` refers to the same on-chain deployment.
    pub fn same_deployment(&self, address: &str, network: u64) -> bool {
        self.network == network && self.address.eq_ignore_ascii_case(address)
    }
}

// ─── EventListener ────────────────────────────────────────────────────────────

/// A registered watch for one named event type on one contract.
///
/// `sync_height` is the last block height fully processed (inclusive). It is
/// monotonically non-decreasing except on explicit reorg rollback, and never
/// drops below the owning contract's `start_height` through normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListener {
    /// Opaque unique identifier.
    pub id: String,
    /// Owning contract.
    pub contract_id: String,
    /// Event name; must match an `event` entry in the contract's ABI.
    pub name: String,
    /// Last block height fully processed (inclusive).
    pub sync_height: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventListener {
    pub fn new(
        id: impl Into<String>,
        contract_id: impl Into<String>,
        name: impl Into<String>,
        sync_height: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            contract_id: contract_id.into(),
            name: name.into(),
            sync_height,
            created_at: now,
            updated_at: now,
        }
    }
}

// ─── EventRecord ──────────────────────────────────────────────────────────────

/// A decoded log occurrence, persisted per listener.
///
/// Unique on `(listener_id, transaction_hash, log_index)` — re-processing the
/// same range upserts and never duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub listener_id: String,
    pub block_height: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    /// Parameter name → decoded value.
    pub decoded_args: BTreeMap<String, serde_json::Value>,
}

impl EventRecord {
    /// The storage uniqueness key within a listener.
    pub fn key(&self) -> (String, u32) {
        (self.transaction_hash.clone(), self.log_index)
    }
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// An inclusive block range `[from, to]` selected by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks covered (inclusive bounds).
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── HeightCheckpoint ─────────────────────────────────────────────────────────

/// A `(height, hash)` pair recorded at each committed range upper bound.
///
/// Checkpoints are what the worker verifies against the chain reader to
/// detect reorgs of previously-safe heights; the newest one that still
/// verifies is the rollback target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightCheckpoint {
    pub height: u64,
    pub block_hash: String,
}

impl HeightCheckpoint {
    pub fn new(height: u64, block_hash: impl Into<String>) -> Self {
        Self {
            height,
            block_hash: block_hash.into(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
