//! In-memory storage backend.
//!
//! Holds contracts, listeners, event records, and checkpoints in RAM behind a
//! single mutex. All data is lost when the process exits; useful for tests
//! and short-lived deployments.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use eventwatch_core::abi::ContractAbi;
use eventwatch_core::error::SyncError;
use eventwatch_core::store::{ContractRegistry, ListenerStore};
use eventwatch_core::types::{Contract, EventListener, EventRecord, HeightCheckpoint};

#[derive(Default)]
struct Inner {
    contracts: HashMap<String, Contract>,
    listeners: HashMap<String, EventListener>,
    /// listener id → records ordered by `(block_height, log_index)`.
    records: HashMap<String, Vec<EventRecord>>,
    /// listener id → checkpoints ascending by height.
    checkpoints: HashMap<String, Vec<HeightCheckpoint>>,
}

/// In-memory `ContractRegistry` + `ListenerStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored records across all listeners.
    pub fn record_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.records.values().map(|v| v.len()).sum()
    }
}

fn insert_sorted(records: &mut Vec<EventRecord>, record: EventRecord) -> bool {
    // Uniqueness on (transaction_hash, log_index) within the listener
    if records
        .iter()
        .any(|r| r.transaction_hash == record.transaction_hash && r.log_index == record.log_index)
    {
        return false;
    }
    let pos = records
        .binary_search_by_key(&(record.block_height, record.log_index), |r| {
            (r.block_height, r.log_index)
        })
        .unwrap_or_else(|p| p);
    records.insert(pos, record);
    true
}

#[async_trait]
impl ContractRegistry for MemoryStore {
    async fn create_contract(&self, contract: Contract) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .contracts
            .values()
            .any(|c| c.same_deployment(&contract.address, contract.network))
        {
            return Err(SyncError::DuplicateContract {
                address: contract.address,
                network: contract.network,
            });
        }
        inner.contracts.insert(contract.id.clone(), contract);
        Ok(())
    }

    async fn get_contract(&self, id: &str) -> Result<Contract, SyncError> {
        let inner = self.inner.lock().unwrap();
        inner
            .contracts
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ContractNotFound(id.to_string()))
    }

    async fn list_contracts(&self) -> Result<Vec<Contract>, SyncError> {
        let inner = self.inner.lock().unwrap();
        let mut contracts: Vec<_> = inner.contracts.values().cloned().collect();
        contracts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(contracts)
    }

    async fn update_contract(
        &self,
        id: &str,
        name: Option<String>,
        abi: Option<ContractAbi>,
    ) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let contract = inner
            .contracts
            .get_mut(id)
            .ok_or_else(|| SyncError::ContractNotFound(id.to_string()))?;
        if let Some(name) = name {
            contract.name = name;
        }
        if let Some(abi) = abi {
            contract.abi = Some(abi);
        }
        contract.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_contract(&self, id: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contracts.remove(id).is_none() {
            return Err(SyncError::ContractNotFound(id.to_string()));
        }
        // Cascade: listeners of this contract, then their records/checkpoints
        let owned: Vec<String> = inner
            .listeners
            .values()
            .filter(|l| l.contract_id == id)
            .map(|l| l.id.clone())
            .collect();
        for listener_id in owned {
            inner.listeners.remove(&listener_id);
            inner.records.remove(&listener_id);
            inner.checkpoints.remove(&listener_id);
        }
        Ok(())
    }
}

#[async_trait]
impl ListenerStore for MemoryStore {
    async fn create_listener(&self, mut listener: EventListener) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let contract = inner
            .contracts
            .get(&listener.contract_id)
            .ok_or_else(|| SyncError::ContractNotFound(listener.contract_id.clone()))?;

        let has_event = contract
            .abi
            .as_ref()
            .map(|abi| abi.has_event(&listener.name))
            .unwrap_or(false);
        if !has_event {
            return Err(SyncError::UnknownEvent {
                contract_id: listener.contract_id,
                event: listener.name,
            });
        }

        listener.sync_height = listener.sync_height.max(contract.start_height);
        inner.listeners.insert(listener.id.clone(), listener);
        Ok(())
    }

    async fn get_listener(&self, id: &str) -> Result<EventListener, SyncError> {
        let inner = self.inner.lock().unwrap();
        inner
            .listeners
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ListenerNotFound(id.to_string()))
    }

    async fn list_listeners(&self) -> Result<Vec<EventListener>, SyncError> {
        let inner = self.inner.lock().unwrap();
        let mut listeners: Vec<_> = inner.listeners.values().cloned().collect();
        listeners.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listeners)
    }

    async fn update_listener(
        &self,
        id: &str,
        name: Option<String>,
        sync_height: Option<u64>,
    ) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        let listener = inner
            .listeners
            .get_mut(id)
            .ok_or_else(|| SyncError::ListenerNotFound(id.to_string()))?;
        if let Some(name) = name {
            listener.name = name;
        }
        if let Some(height) = sync_height {
            listener.sync_height = height;
        }
        listener.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_listener(&self, id: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.listeners.remove(id).is_none() {
            return Err(SyncError::ListenerNotFound(id.to_string()));
        }
        inner.records.remove(id);
        inner.checkpoints.remove(id);
        Ok(())
    }

    async fn sync_height(&self, id: &str) -> Result<u64, SyncError> {
        let inner = self.inner.lock().unwrap();
        inner
            .listeners
            .get(id)
            .map(|l| l.sync_height)
            .ok_or_else(|| SyncError::ListenerNotFound(id.to_string()))
    }

    async fn commit_range(
        &self,
        listener_id: &str,
        records: Vec<EventRecord>,
        new_height: u64,
        checkpoint: HeightCheckpoint,
    ) -> Result<u64, SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.listeners.contains_key(listener_id) {
            return Err(SyncError::ListenerNotFound(listener_id.to_string()));
        }

        let stored = inner.records.entry(listener_id.to_string()).or_default();
        let mut inserted = 0u64;
        for record in records {
            if insert_sorted(stored, record) {
                inserted += 1;
            }
        }

        let cps = inner.checkpoints.entry(listener_id.to_string()).or_default();
        match cps.binary_search_by_key(&checkpoint.height, |c| c.height) {
            Ok(pos) => cps[pos] = checkpoint,
            Err(pos) => cps.insert(pos, checkpoint),
        }

        let listener = inner.listeners.get_mut(listener_id).unwrap();
        // Height only moves forward here; rollback_to is the one path down
        listener.sync_height = listener.sync_height.max(new_height);
        listener.updated_at = Utc::now();

        tracing::debug!(listener = listener_id, new_height, inserted, "range committed");
        Ok(inserted)
    }

    async fn rollback_to(&self, listener_id: &str, height: u64) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.listeners.contains_key(listener_id) {
            return Err(SyncError::ListenerNotFound(listener_id.to_string()));
        }
        if let Some(records) = inner.records.get_mut(listener_id) {
            records.retain(|r| r.block_height <= height);
        }
        if let Some(cps) = inner.checkpoints.get_mut(listener_id) {
            cps.retain(|c| c.height <= height);
        }
        let listener = inner.listeners.get_mut(listener_id).unwrap();
        listener.sync_height = height;
        listener.updated_at = Utc::now();
        tracing::debug!(listener = listener_id, height, "rolled back");
        Ok(())
    }

    async fn records(&self, listener_id: &str) -> Result<Vec<EventRecord>, SyncError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(listener_id).cloned().unwrap_or_default())
    }

    async fn checkpoints(&self, listener_id: &str) -> Result<Vec<HeightCheckpoint>, SyncError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.checkpoints.get(listener_id).cloned().unwrap_or_default())
    }

    async fn prune_checkpoints(
        &self,
        listener_id: &str,
        keep_last: usize,
    ) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cps) = inner.checkpoints.get_mut(listener_id) {
            if cps.len() > keep_last {
                let drop = cps.len() - keep_last;
                cps.drain(..drop);
            }
        }
        Ok(())
    }
}
