//! Broker — owns one sync worker per listener.
//!
//! Workers run as independent tokio tasks; one listener halting on a fault
//! never affects its siblings. The broker serializes its own bookkeeping
//! behind an async mutex, so concurrent add/remove calls cannot race a
//! worker's lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use eventwatch_core::config::SyncConfig;
use eventwatch_core::error::SyncError;
use eventwatch_core::progress;
use eventwatch_core::store::{ContractRegistry, ListenerStore};

use crate::reader::ChainReader;
use crate::worker::{SyncWorker, WorkerStatus};

struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    status: watch::Receiver<WorkerStatus>,
    join: JoinHandle<()>,
}

/// Spawns, tracks, and stops per-listener sync workers.
pub struct Broker {
    reader: Arc<dyn ChainReader>,
    registry: Arc<dyn ContractRegistry>,
    store: Arc<dyn ListenerStore>,
    config: SyncConfig,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl Broker {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        registry: Arc<dyn ContractRegistry>,
        store: Arc<dyn ListenerStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            reader,
            registry,
            store,
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a worker for every stored listener that does not have one.
    /// Idempotent; safe to call again after adding listeners out of band.
    pub async fn start(&self) -> Result<(), SyncError> {
        let listeners = self.store.list_listeners().await?;
        let mut workers = self.workers.lock().await;
        for listener in listeners {
            if workers.contains_key(&listener.id) {
                continue;
            }
            let handle = self.spawn(listener.id.clone()).await?;
            workers.insert(listener.id, handle);
        }
        tracing::info!(workers = workers.len(), "broker started");
        Ok(())
    }

    /// Spawn a worker for one listener. No-op if it is already running.
    pub async fn add_listener(&self, listener_id: &str) -> Result<(), SyncError> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(listener_id) {
            return Ok(());
        }
        let handle = self.spawn(listener_id.to_string()).await?;
        workers.insert(listener_id.to_string(), handle);
        Ok(())
    }

    /// Stop a listener's worker (waiting for any in-flight commit to finish)
    /// and delete the listener with everything it stored.
    pub async fn remove_listener(&self, listener_id: &str) -> Result<(), SyncError> {
        // The lock spans drain and delete: a concurrent add_listener must not
        // re-spawn a worker for a row that is about to disappear
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.remove(listener_id) {
            let _ = handle.shutdown.send(true);
            let _ = handle.join.await;
        }
        self.store.delete_listener(listener_id).await
    }

    /// Signal every worker to stop and wait for all of them to drain.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.values() {
            let _ = handle.shutdown.send(true);
        }
        for (id, handle) in workers.drain() {
            if handle.join.await.is_err() {
                tracing::error!(listener = %id, "worker task panicked");
            }
        }
        tracing::info!("broker stopped");
    }

    /// Ask a worker to skip its poll interval and plan a cycle now.
    pub async fn check_now(&self, listener_id: &str) -> Result<(), SyncError> {
        let workers = self.workers.lock().await;
        let handle = workers
            .get(listener_id)
            .ok_or_else(|| SyncError::ListenerNotFound(listener_id.to_string()))?;
        handle.wake.notify_one();
        Ok(())
    }

    /// Last committed sync height for a listener.
    pub async fn get_sync_height(&self, listener_id: &str) -> Result<u64, SyncError> {
        self.store.sync_height(listener_id).await
    }

    /// Current chain head as seen by the reader.
    pub async fn get_current_height(&self, network: u64) -> Result<u64, SyncError> {
        self.reader.current_height(network).await
    }

    /// Percentage of the listener's range synchronized, in `[0, 100]`.
    pub async fn progress(&self, listener_id: &str) -> Result<f64, SyncError> {
        let listener = self.store.get_listener(listener_id).await?;
        let contract = self.registry.get_contract(&listener.contract_id).await?;
        let current = self.reader.current_height(contract.network).await?;
        Ok(progress::percent(
            listener.sync_height,
            contract.start_height,
            current,
        ))
    }

    /// The worker's current state and fault, if one is running.
    pub async fn worker_status(&self, listener_id: &str) -> Result<WorkerStatus, SyncError> {
        let workers = self.workers.lock().await;
        let handle = workers
            .get(listener_id)
            .ok_or_else(|| SyncError::ListenerNotFound(listener_id.to_string()))?;
        let status = handle.status.borrow().clone();
        Ok(status)
    }

    async fn spawn(&self, listener_id: String) -> Result<WorkerHandle, SyncError> {
        let listener = self.store.get_listener(&listener_id).await?;
        let contract = self.registry.get_contract(&listener.contract_id).await?;

        let (status_tx, status_rx) = watch::channel(WorkerStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());

        let worker = SyncWorker::new(
            listener,
            contract,
            self.reader.clone(),
            self.store.clone(),
            self.config.clone(),
            status_tx,
            wake.clone(),
        );
        let join = tokio::spawn(worker.run(shutdown_rx));

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            wake,
            status: status_rx,
            join,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seeded_store, transfer_abi, transfer_log, wait_until, ScriptedChain};
    use crate::worker::WorkerState;
    use eventwatch_core::types::{Contract, EventListener};
    use std::time::Duration;

    fn test_config() -> SyncConfig {
        SyncConfig {
            confirmation_depth: 10,
            max_batch_size: 50,
            poll_interval_ms: 10,
            backoff_base_ms: 10,
            backoff_max_ms: 40,
            checkpoint_window: 8,
        }
    }

    async fn broker_over(
        chain: Arc<ScriptedChain>,
        store: Arc<eventwatch_storage::MemoryStore>,
    ) -> Broker {
        Broker::new(chain, store.clone(), store, test_config())
    }

    #[tokio::test]
    async fn start_spawns_a_worker_per_listener() {
        let chain = Arc::new(ScriptedChain::new(160));
        chain.push_log(120, transfer_log(120, 0));

        let store = seeded_store().await;
        store
            .create_contract(Contract::new("c2", "0xBBB", 1, "other", Some(transfer_abi()), 100))
            .await
            .unwrap();
        store
            .create_listener(EventListener::new("l2", "c2", "Transfer", 100))
            .await
            .unwrap();

        let broker = broker_over(chain, store.clone()).await;
        broker.start().await.unwrap();

        assert!(
            wait_until(|| {
                let store = store.clone();
                async move {
                    store.sync_height("l1").await.unwrap() == 150
                        && store.sync_height("l2").await.unwrap() == 150
                }
            })
            .await
        );
        // 0xBBB listener filters by address: the 0xAAA log is not its
        assert_eq!(store.records("l1").await.unwrap().len(), 1);
        assert!(store.records("l2").await.unwrap().is_empty());

        broker.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let chain = Arc::new(ScriptedChain::new(160));
        let store = seeded_store().await;
        let broker = broker_over(chain, store).await;

        broker.start().await.unwrap();
        broker.start().await.unwrap();
        assert_eq!(broker.workers.lock().await.len(), 1);

        broker.stop().await;
    }

    #[tokio::test]
    async fn faulted_listener_does_not_affect_siblings() {
        let chain = Arc::new(ScriptedChain::new(160));
        // Undecodable log on c1's address halts l1
        let mut bad = transfer_log(120, 0);
        bad.data = "0x00".into();
        chain.push_log(120, bad);
        // Healthy log on c2's address
        let mut good = transfer_log(130, 0);
        good.address = "0xBBB".into();
        chain.push_log(130, good);

        let store = seeded_store().await;
        store
            .create_contract(Contract::new("c2", "0xBBB", 1, "other", Some(transfer_abi()), 100))
            .await
            .unwrap();
        store
            .create_listener(EventListener::new("l2", "c2", "Transfer", 100))
            .await
            .unwrap();

        let broker = broker_over(chain, store.clone()).await;
        broker.start().await.unwrap();

        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l2").await.unwrap() == 150 }
            })
            .await
        );
        let status = broker.worker_status("l1").await.unwrap();
        assert_eq!(status.state, WorkerState::Stopped);
        assert!(status.fault.is_some());
        assert_eq!(store.sync_height("l1").await.unwrap(), 100);

        broker.stop().await;
    }

    #[tokio::test]
    async fn remove_listener_stops_worker_and_deletes_state() {
        let chain = Arc::new(ScriptedChain::new(160));
        chain.push_log(120, transfer_log(120, 0));

        let store = seeded_store().await;
        let broker = broker_over(chain, store.clone()).await;
        broker.start().await.unwrap();

        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l1").await.unwrap() == 150 }
            })
            .await
        );

        broker.remove_listener("l1").await.unwrap();
        assert!(broker.workers.lock().await.is_empty());
        assert!(matches!(
            store.get_listener("l1").await,
            Err(SyncError::ListenerNotFound(_))
        ));

        broker.stop().await;
    }

    #[tokio::test]
    async fn concurrent_remove_and_add_keep_registry_consistent() {
        let chain = Arc::new(ScriptedChain::new(160));
        let store = seeded_store().await;
        let broker = broker_over(chain, store.clone()).await;
        broker.start().await.unwrap();

        let (removed, added) = tokio::join!(
            broker.remove_listener("l1"),
            broker.add_listener("l1"),
        );
        removed.unwrap();

        // A registered worker must always have a stored listener behind it
        let registered = broker.workers.lock().await.contains_key("l1");
        let stored = store.get_listener("l1").await.is_ok();
        assert_eq!(registered, stored);
        if added.is_err() {
            assert!(!registered);
        }

        broker.stop().await;
    }

    #[tokio::test]
    async fn check_now_wakes_an_idle_worker() {
        let chain = Arc::new(ScriptedChain::new(160));
        let store = seeded_store().await;
        // Long poll interval: only an explicit wake can trigger a cycle
        let config = SyncConfig {
            poll_interval_ms: 60_000,
            ..test_config()
        };
        let broker = Broker::new(chain, store.clone(), store.clone(), config);
        broker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        broker.check_now("l1").await.unwrap();
        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l1").await.unwrap() == 150 }
            })
            .await
        );

        broker.stop().await;
    }

    #[tokio::test]
    async fn progress_reflects_sync_position() {
        let chain = Arc::new(ScriptedChain::new(200));
        let store = seeded_store().await;
        store.update_listener("l1", None, Some(150)).await.unwrap();

        let broker = broker_over(chain, store).await;
        let percent = broker.progress("l1").await.unwrap();
        assert_eq!(percent, 50.0);

        assert_eq!(broker.get_sync_height("l1").await.unwrap(), 150);
        assert_eq!(broker.get_current_height(1).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn status_for_unknown_listener_is_not_found() {
        let chain = Arc::new(ScriptedChain::new(160));
        let store = seeded_store().await;
        let broker = broker_over(chain, store).await;
        assert!(matches!(
            broker.worker_status("ghost").await,
            Err(SyncError::ListenerNotFound(_))
        ));
    }
}
