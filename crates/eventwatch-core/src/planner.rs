//! Sync planner — selects the next block range for a listener.
//!
//! The planner never proposes a block above `chain_head - confirmation_depth`
//! (reorg protection for unconfirmed blocks) and never a range wider than
//! `max_batch_size` (bounds RPC cost and memory per iteration).

use crate::types::{BlockRange, Contract, EventListener};

/// Computes the next range to scan for a listener.
#[derive(Debug, Clone, Copy)]
pub struct SyncPlanner {
    /// Blocks behind head considered safe from reorg.
    pub confirmation_depth: u64,
    /// Maximum range width per iteration.
    pub max_batch_size: u64,
}

impl SyncPlanner {
    pub fn new(confirmation_depth: u64, max_batch_size: u64) -> Self {
        Self {
            confirmation_depth,
            max_batch_size,
        }
    }

    /// Plan the next range, or `None` if the listener is caught up (or the
    /// chain has not produced enough confirmations yet).
    ///
    /// If `sync_height` has fallen below the contract's `start_height`
    /// (corrupted or manually reset), the lower bound is clamped up to it.
    pub fn plan(
        &self,
        listener: &EventListener,
        contract: &Contract,
        chain_head: u64,
    ) -> Option<BlockRange> {
        let safe_head = chain_head.saturating_sub(self.confirmation_depth);
        if safe_head <= listener.sync_height {
            return None;
        }

        let from = (listener.sync_height + 1).max(contract.start_height);
        if from > safe_head {
            return None;
        }

        let width = self.max_batch_size.max(1);
        let to = safe_head.min(from.saturating_add(width - 1));
        Some(BlockRange::new(from, to))
    }
}
