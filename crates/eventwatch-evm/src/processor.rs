//! Event processor — fetch, decode, and idempotently persist one range.
//!
//! A range is an atomic unit: the listener's sync height is committed in the
//! same store transaction as the range's records, so the height can never
//! point past data that was not written. Re-processing a range after a
//! partial failure is safe — the store upserts on
//! `(listener_id, transaction_hash, log_index)`.

use std::sync::Arc;

use eventwatch_core::error::SyncError;
use eventwatch_core::store::ListenerStore;
use eventwatch_core::types::{BlockRange, Contract, EventListener, EventRecord, HeightCheckpoint};

use crate::decoder;
use crate::reader::ChainReader;

/// Result of processing one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Number of matching logs decoded in the range.
    pub count: u64,
    /// The range's upper bound — the listener's new sync height.
    pub new_height: u64,
}

/// Decodes and persists matching logs for a listener.
pub struct EventProcessor {
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn ListenerStore>,
}

impl EventProcessor {
    pub fn new(reader: Arc<dyn ChainReader>, store: Arc<dyn ListenerStore>) -> Self {
        Self { reader, store }
    }

    /// Fetch the range's matching logs and decode them into records.
    ///
    /// Fails with `ChainRead` if the reader cannot serve the range and with
    /// `Decode` if a matching log cannot be decoded against the ABI.
    pub async fn fetch_and_decode(
        &self,
        listener: &EventListener,
        contract: &Contract,
        range: BlockRange,
    ) -> Result<Vec<EventRecord>, SyncError> {
        let abi = contract.abi.as_ref().ok_or_else(|| SyncError::Decode {
            listener_id: listener.id.clone(),
            reason: format!("contract {} has no ABI", contract.id),
        })?;
        // A listener whose event vanished from the ABI is a stale-ABI fault,
        // same class as an undecodable log
        let def = abi.event(&listener.name).ok_or_else(|| SyncError::Decode {
            listener_id: listener.id.clone(),
            reason: format!(
                "event '{}' not in ABI of contract {}",
                listener.name, contract.id
            ),
        })?;
        let topic0 = decoder::event_topic0(def);

        let logs = self
            .reader
            .get_logs(contract.network, &contract.address, &topic0, range.from, range.to)
            .await?;

        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            if log.removed {
                continue;
            }
            let args = decoder::decode_log(def, log).map_err(|e| SyncError::Decode {
                listener_id: listener.id.clone(),
                reason: e.to_string(),
            })?;
            records.push(EventRecord {
                listener_id: listener.id.clone(),
                block_height: log.block_height,
                transaction_hash: log.transaction_hash.clone(),
                log_index: log.log_index,
                decoded_args: args,
            });
        }
        Ok(records)
    }

    /// Atomically persist a range's records, height, and tip checkpoint.
    pub async fn persist(
        &self,
        listener_id: &str,
        records: Vec<EventRecord>,
        new_height: u64,
        tip_hash: &str,
    ) -> Result<u64, SyncError> {
        self.store
            .commit_range(
                listener_id,
                records,
                new_height,
                HeightCheckpoint::new(new_height, tip_hash),
            )
            .await
    }

    /// Process one full range: fetch, decode, persist.
    pub async fn process(
        &self,
        listener: &EventListener,
        contract: &Contract,
        range: BlockRange,
    ) -> Result<ProcessOutcome, SyncError> {
        let records = self.fetch_and_decode(listener, contract, range).await?;
        let count = records.len() as u64;
        let tip_hash = self.reader.block_hash(contract.network, range.to).await?;
        self.persist(&listener.id, records, range.to, &tip_hash).await?;
        Ok(ProcessOutcome {
            count,
            new_height: range.to,
        })
    }
}
