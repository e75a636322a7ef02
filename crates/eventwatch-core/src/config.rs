//! Worker configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs shared by every sync worker the broker spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Blocks behind head before a height is considered safe from reorg.
    /// Typical values: 12 (Ethereum PoS), 64 (Ethereum safe), 1 (fast chains).
    pub confirmation_depth: u64,
    /// Maximum blocks scanned per iteration.
    pub max_batch_size: u64,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// First retry delay after a transient failure.
    pub backoff_base_ms: u64,
    /// Upper bound on the exponential retry delay.
    pub backoff_max_ms: u64,
    /// How many `(height, hash)` checkpoints to retain per listener.
    pub checkpoint_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            confirmation_depth: 12,
            max_batch_size: 1000,
            poll_interval_ms: 2000,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            checkpoint_window: 64,
        }
    }
}

impl SyncConfig {
    /// Retry delay for the given attempt number (0-based), capped.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.min(16);
        self.backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.confirmation_depth, 12);
        assert_eq!(cfg.max_batch_size, 1000);
        assert_eq!(cfg.poll_interval_ms, 2000);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.backoff_delay_ms(0), 500);
        assert_eq!(cfg.backoff_delay_ms(1), 1000);
        assert_eq!(cfg.backoff_delay_ms(2), 2000);
        assert_eq!(cfg.backoff_delay_ms(10), 30_000);
        assert_eq!(cfg.backoff_delay_ms(63), 30_000); // shift is clamped
    }
}
