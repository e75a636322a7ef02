//! Sync worker — the per-listener control loop.
//!
//! Steady state: `Idle → Planning → Fetching → Persisting → Advancing → Idle`.
//! Any transient failure enters `Backoff` (capped exponential delay) and
//! retries the same range — a read failure never skips ahead. A decode
//! failure is non-retryable: the worker stops with the fault surfaced and the
//! listener stays at its last good height. Reorgs of previously-safe heights
//! are detected by verifying recorded `(height, hash)` checkpoints against
//! the chain reader, and recovered by rolling back to the newest checkpoint
//! that still verifies.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};

use eventwatch_core::config::SyncConfig;
use eventwatch_core::error::SyncError;
use eventwatch_core::planner::SyncPlanner;
use eventwatch_core::store::ListenerStore;
use eventwatch_core::types::{BlockRange, Contract, EventListener};

use crate::processor::EventProcessor;
use crate::reader::ChainReader;

/// The worker's position in its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    #[default]
    Idle,
    Planning,
    Fetching,
    Persisting,
    Advancing,
    Backoff,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Planning => write!(f, "planning"),
            Self::Fetching => write!(f, "fetching"),
            Self::Persisting => write!(f, "persisting"),
            Self::Advancing => write!(f, "advancing"),
            Self::Backoff => write!(f, "backoff"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Published over a watch channel for the broker's read path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStatus {
    pub state: WorkerState,
    /// Set when the worker halted on a non-retryable fault (stale/malformed
    /// ABI) — the operator-visible condition.
    pub fault: Option<String>,
}

/// The control loop advancing one listener.
pub struct SyncWorker {
    listener: EventListener,
    contract: Contract,
    reader: Arc<dyn ChainReader>,
    store: Arc<dyn ListenerStore>,
    processor: EventProcessor,
    planner: SyncPlanner,
    config: SyncConfig,
    status: watch::Sender<WorkerStatus>,
    wake: Arc<Notify>,
    backoff_attempt: u32,
}

impl SyncWorker {
    pub fn new(
        listener: EventListener,
        contract: Contract,
        reader: Arc<dyn ChainReader>,
        store: Arc<dyn ListenerStore>,
        config: SyncConfig,
        status: watch::Sender<WorkerStatus>,
        wake: Arc<Notify>,
    ) -> Self {
        let processor = EventProcessor::new(reader.clone(), store.clone());
        let planner = SyncPlanner::new(config.confirmation_depth, config.max_batch_size);
        Self {
            listener,
            contract,
            reader,
            store,
            processor,
            planner,
            config,
            status,
            wake,
            backoff_attempt: 0,
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.status.send_replace(WorkerStatus { state, fault: None });
    }

    fn halt(&self, fault: Option<String>) {
        self.status.send_replace(WorkerStatus {
            state: WorkerState::Stopped,
            fault,
        });
    }

    /// Run until stopped. Shutdown is observed at state-machine checkpoints —
    /// an in-flight fetch or commit always completes first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            listener = %self.listener.id,
            contract = %self.contract.id,
            sync_height = self.listener.sync_height,
            "worker started"
        );

        let mut retry_now = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            if !retry_now {
                self.set_state(WorkerState::Idle);
                let poll = Duration::from_millis(self.config.poll_interval_ms);
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = self.wake.notified() => {}
                    _ = shutdown.changed() => { continue; }
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            retry_now = false;

            match self.cycle().await {
                Ok(()) => {
                    self.backoff_attempt = 0;
                }
                Err(e) if e.is_transient() => {
                    self.set_state(WorkerState::Backoff);
                    let delay =
                        Duration::from_millis(self.config.backoff_delay_ms(self.backoff_attempt));
                    self.backoff_attempt += 1;
                    tracing::warn!(
                        listener = %self.listener.id,
                        error = %e,
                        attempt = self.backoff_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    // The delay already ran; retry the same range without
                    // another idle poll
                    retry_now = true;
                }
                Err(e) => {
                    tracing::error!(
                        listener = %self.listener.id,
                        error = %e,
                        sync_height = self.listener.sync_height,
                        "non-retryable fault, listener halted"
                    );
                    self.halt(Some(e.to_string()));
                    return;
                }
            }
        }

        tracing::info!(listener = %self.listener.id, "worker stopped");
        self.halt(None);
    }

    /// One pass through the state machine: reorg check, plan, fetch, persist,
    /// advance. Returning `Ok` with no range planned means caught up.
    async fn cycle(&mut self) -> Result<(), SyncError> {
        self.set_state(WorkerState::Planning);
        self.verify_checkpoints().await?;

        let head = self.reader.current_height(self.contract.network).await?;
        let Some(range) = self.planner.plan(&self.listener, &self.contract, head) else {
            tracing::debug!(listener = %self.listener.id, head, "caught up");
            return Ok(());
        };

        match self.advance_range(range).await {
            Ok(count) => {
                tracing::info!(
                    listener = %self.listener.id,
                    from = range.from,
                    to = range.to,
                    events = count,
                    "range committed"
                );
                Ok(())
            }
            Err(e) if e.is_reorg() => {
                // The reader invalidated something mid-range; recover and
                // let the next cycle replan from the rolled-back height.
                self.recover_from_reorg().await
            }
            Err(e) => Err(e),
        }
    }

    async fn advance_range(&mut self, range: BlockRange) -> Result<u64, SyncError> {
        self.set_state(WorkerState::Fetching);
        let records = self
            .processor
            .fetch_and_decode(&self.listener, &self.contract, range)
            .await?;
        let count = records.len() as u64;
        let tip_hash = self.reader.block_hash(self.contract.network, range.to).await?;

        self.set_state(WorkerState::Persisting);
        self.processor
            .persist(&self.listener.id, records, range.to, &tip_hash)
            .await?;

        self.set_state(WorkerState::Advancing);
        self.listener.sync_height = self.listener.sync_height.max(range.to);
        self.store
            .prune_checkpoints(&self.listener.id, self.config.checkpoint_window)
            .await?;
        Ok(count)
    }

    /// Verify recorded checkpoints against the chain, newest first; on a
    /// mismatch roll back to the newest one that still verifies.
    async fn verify_checkpoints(&mut self) -> Result<(), SyncError> {
        let checkpoints = self.store.checkpoints(&self.listener.id).await?;
        let Some(newest) = checkpoints.last() else {
            return Ok(());
        };
        let canonical = self
            .reader
            .is_still_canonical(self.contract.network, newest.height, &newest.block_hash)
            .await?;
        if canonical {
            return Ok(());
        }

        tracing::warn!(
            listener = %self.listener.id,
            height = newest.height,
            "previously-safe block invalidated, searching for fork point"
        );

        let mut target = self.contract.start_height;
        for checkpoint in checkpoints.iter().rev().skip(1) {
            let ok = self
                .reader
                .is_still_canonical(self.contract.network, checkpoint.height, &checkpoint.block_hash)
                .await?;
            if ok {
                target = checkpoint.height;
                break;
            }
        }
        self.rollback(target).await
    }

    async fn recover_from_reorg(&mut self) -> Result<(), SyncError> {
        let checkpoints = self.store.checkpoints(&self.listener.id).await?;
        let mut target = self.contract.start_height;
        for checkpoint in checkpoints.iter().rev() {
            let ok = self
                .reader
                .is_still_canonical(self.contract.network, checkpoint.height, &checkpoint.block_hash)
                .await?;
            if ok {
                target = checkpoint.height;
                break;
            }
        }
        self.rollback(target).await
    }

    async fn rollback(&mut self, height: u64) -> Result<(), SyncError> {
        tracing::warn!(
            listener = %self.listener.id,
            from = self.listener.sync_height,
            to = height,
            "reorg rollback"
        );
        self.store.rollback_to(&self.listener.id, height).await?;
        self.listener.sync_height = height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seeded_store, transfer_log, wait_until, ScriptedChain};
    use eventwatch_core::store::ContractRegistry;
    use eventwatch_core::types::HeightCheckpoint;

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

    struct Running {
        shutdown: watch::Sender<bool>,
        status: watch::Receiver<WorkerStatus>,
        wake: Arc<Notify>,
        join: tokio::task::JoinHandle<()>,
    }

    async fn spawn_worker(
        chain: Arc<ScriptedChain>,
        store: Arc<eventwatch_storage::MemoryStore>,
        config: SyncConfig,
    ) -> Running {
        let listener = store.get_listener("l1").await.unwrap();
        let contract = store.get_contract("c1").await.unwrap();
        let (status_tx, status_rx) = watch::channel(WorkerStatus::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let worker = SyncWorker::new(
            listener,
            contract,
            chain,
            store,
            config,
            status_tx,
            wake.clone(),
        );
        let join = tokio::spawn(worker.run(shutdown_rx));
        Running {
            shutdown: shutdown_tx,
            status: status_rx,
            wake,
            join,
        }
    }

    #[tokio::test]
    async fn advances_through_the_range() {
        let chain = Arc::new(ScriptedChain::new(250));
        chain.push_log(110, transfer_log(110, 0));
        chain.push_log(120, transfer_log(120, 0));
        chain.push_log(145, transfer_log(145, 1));

        let store = seeded_store().await;
        let running = spawn_worker(chain, store.clone(), test_config()).await;

        // depth 10, batch 50 → [101,150], then [151,200], then [201,240]
        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l1").await.unwrap() == 240 }
            })
            .await
        );
        assert_eq!(store.records("l1").await.unwrap().len(), 3);

        running.shutdown.send(true).unwrap();
        running.join.await.unwrap();
    }

    #[tokio::test]
    async fn decode_fault_halts_at_last_good_height() {
        let chain = Arc::new(ScriptedChain::new(170));
        let mut bad = transfer_log(155, 0);
        bad.data = "0x00".into();
        chain.push_log(155, bad);

        let store = seeded_store().await;
        store.update_listener("l1", None, Some(150)).await.unwrap();

        let mut running = spawn_worker(chain, store.clone(), test_config()).await;

        assert!(
            wait_until(|| {
                let mut status = running.status.clone();
                async move {
                    let s = status.borrow_and_update().clone();
                    s.state == WorkerState::Stopped && s.fault.is_some()
                }
            })
            .await
        );

        assert_eq!(store.sync_height("l1").await.unwrap(), 150);
        assert!(store.records("l1").await.unwrap().is_empty());

        let status = running.status.borrow_and_update().clone();
        assert!(status.fault.unwrap().contains("decode"));
        running.join.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_recovers() {
        let chain = Arc::new(ScriptedChain::new(160));
        chain.push_log(120, transfer_log(120, 0));
        chain.set_offline(true);

        let store = seeded_store().await;
        let running = spawn_worker(chain.clone(), store.clone(), test_config()).await;

        // Offline: no progress
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.sync_height("l1").await.unwrap(), 100);

        chain.set_offline(false);
        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l1").await.unwrap() == 150 }
            })
            .await
        );
        assert_eq!(store.records("l1").await.unwrap().len(), 1);

        running.shutdown.send(true).unwrap();
        running.join.await.unwrap();
    }

    #[tokio::test]
    async fn backoff_retries_without_waiting_for_the_next_poll() {
        let chain = Arc::new(ScriptedChain::new(160));
        chain.push_log(120, transfer_log(120, 0));
        chain.set_offline(true);

        let store = seeded_store().await;
        // Poll interval far beyond the test horizon: only backoff retries
        // can make progress after the single wake below
        let config = SyncConfig {
            poll_interval_ms: 60_000,
            ..test_config()
        };
        let running = spawn_worker(chain.clone(), store.clone(), config).await;
        running.wake.notify_one();

        tokio::time::sleep(Duration::from_millis(50)).await;
        chain.set_offline(false);

        assert!(
            wait_until(|| {
                let store = store.clone();
                async move { store.sync_height("l1").await.unwrap() == 150 }
            })
            .await
        );

        running.shutdown.send(true).unwrap();
        running.join.await.unwrap();
    }

    #[tokio::test]
    async fn reorg_rolls_back_to_last_good_checkpoint() {
        let chain = Arc::new(ScriptedChain::new(160));
        chain.push_log(142, transfer_log(142, 0));
        chain.push_log(148, transfer_log(148, 0));

        let store = seeded_store().await;
        store.update_listener("l1", None, Some(150)).await.unwrap();
        // Committed checkpoints from earlier ranges
        store
            .commit_range("l1", vec![], 140, HeightCheckpoint::new(140, "0xhash140"))
            .await
            .unwrap();
        store
            .commit_range(
                "l1",
                vec![transfer_rec(142), transfer_rec(148)],
                150,
                HeightCheckpoint::new(150, "0xhash150"),
            )
            .await
            .unwrap();

        // Height 150 (and 145) reorged out; 140 still canonical
        chain.reorg_out(145);
        chain.reorg_out(150);

        let running = spawn_worker(chain.clone(), store.clone(), test_config()).await;

        // Rollback to 140, then resync to the new safe head
        assert!(
            wait_until(|| {
                let store = store.clone();
                async move {
                    let records = store.records("l1").await.unwrap();
                    store.sync_height("l1").await.unwrap() == 150
                        && records.len() == 2
                        && records.iter().all(|r| r.block_height <= 150)
                }
            })
            .await
        );

        // The rolled-back range was rescanned: pre-reorg records above 140
        // were deleted and replaced by what the canonical chain now serves
        let checkpoints = store.checkpoints("l1").await.unwrap();
        assert!(checkpoints.iter().any(|c| c.height == 140));

        running.shutdown.send(true).unwrap();
        running.join.await.unwrap();
    }

    fn transfer_rec(height: u64) -> eventwatch_core::types::EventRecord {
        eventwatch_core::types::EventRecord {
            listener_id: "l1".into(),
            block_height: height,
            transaction_hash: format!("0xtx{height}"),
            log_index: 0,
            decoded_args: Default::default(),
        }
    }

    #[tokio::test]
    async fn stop_is_observed_at_checkpoints() {
        let chain = Arc::new(ScriptedChain::new(250));
        let store = seeded_store().await;
        let mut running = spawn_worker(chain, store.clone(), test_config()).await;

        running.shutdown.send(true).unwrap();
        running.join.await.unwrap();
        assert_eq!(
            running.status.borrow_and_update().state,
            WorkerState::Stopped
        );
    }
}
