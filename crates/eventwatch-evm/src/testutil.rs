//! Shared test doubles: a scriptable chain reader and seeded fixtures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eventwatch_core::abi::{ContractAbi, EventDef, EventInput};
use eventwatch_core::error::SyncError;
use eventwatch_core::store::{ContractRegistry, ListenerStore};
use eventwatch_core::types::{Contract, EventListener};
use eventwatch_storage::MemoryStore;

use crate::reader::{ChainReader, RawLog};

pub(crate) const TRANSFER_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Scripted chain for tests: adjustable head, logs keyed by height, hashes
/// derived from the height, switchable reorgs and outages.
pub(crate) struct ScriptedChain {
    pub head: Mutex<u64>,
    pub logs: Mutex<HashMap<u64, Vec<RawLog>>>,
    /// Heights whose originally-served hash is no longer canonical.
    pub reorged: Mutex<Vec<u64>>,
    /// When set, `get_logs` and `current_height` fail.
    pub offline: Mutex<bool>,
}

impl ScriptedChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            logs: Mutex::new(HashMap::new()),
            reorged: Mutex::new(Vec::new()),
            offline: Mutex::new(false),
        }
    }

    pub fn push_log(&self, height: u64, log: RawLog) {
        self.logs.lock().unwrap().entry(height).or_default().push(log);
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    pub fn reorg_out(&self, height: u64) {
        self.reorged.lock().unwrap().push(height);
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if *self.offline.lock().unwrap() {
            Err(SyncError::ChainRead("provider offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn current_height(&self, _network: u64) -> Result<u64, SyncError> {
        self.check_online()?;
        Ok(*self.head.lock().unwrap())
    }

    async fn get_logs(
        &self,
        _network: u64,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        self.check_online()?;
        let logs = self.logs.lock().unwrap();
        let mut out = Vec::new();
        for height in from..=to {
            if let Some(entries) = logs.get(&height) {
                out.extend(
                    entries
                        .iter()
                        .filter(|l| {
                            l.address.eq_ignore_ascii_case(address)
                                && l.topics.first().map(String::as_str) == Some(topic0)
                        })
                        .cloned(),
                );
            }
        }
        Ok(out)
    }

    async fn block_hash(&self, _network: u64, height: u64) -> Result<String, SyncError> {
        self.check_online()?;
        if self.reorged.lock().unwrap().contains(&height) {
            Ok(format!("0xreorg{height}"))
        } else {
            Ok(format!("0xhash{height}"))
        }
    }

    async fn is_still_canonical(
        &self,
        network: u64,
        height: u64,
        observed_hash: &str,
    ) -> Result<bool, SyncError> {
        Ok(self.block_hash(network, height).await? == observed_hash)
    }
}

pub(crate) fn transfer_abi() -> ContractAbi {
    ContractAbi::from_events(vec![EventDef {
        name: "Transfer".into(),
        inputs: vec![
            EventInput { name: "from".into(), ty: "address".into(), indexed: true },
            EventInput { name: "to".into(), ty: "address".into(), indexed: true },
            EventInput { name: "value".into(), ty: "uint256".into(), indexed: false },
        ],
    }])
}

pub(crate) fn transfer_log(height: u64, log_index: u32) -> RawLog {
    RawLog {
        address: "0xAAA".into(),
        topics: vec![
            TRANSFER_TOPIC0.into(),
            "0x000000000000000000000000d8da6bf26964af9d7eed9e03e53415d37aa96045".into(),
            "0x000000000000000000000000ab5801a7d398351b8be11c439e05c5b3259aec9b".into(),
        ],
        data: format!("0x{height:064x}"),
        block_height: height,
        block_hash: format!("0xhash{height}"),
        transaction_hash: format!("0xtx{height}"),
        log_index,
        removed: false,
    }
}

/// A contract `c1` at start height 100 with listener `l1` on `Transfer`.
pub(crate) async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .create_contract(Contract::new("c1", "0xAAA", 1, "token", Some(transfer_abi()), 100))
        .await
        .unwrap();
    store
        .create_listener(EventListener::new("l1", "c1", "Transfer", 100))
        .await
        .unwrap();
    store
}

/// Poll `check` until it returns true or ~2 seconds elapse.
pub(crate) async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
