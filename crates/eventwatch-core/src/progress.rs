//! Sync progress — the completion percentage reported to the UI/API.

/// Percentage of the chain a listener has processed, clamped to `[0, 100]`.
///
/// Defined as `0` when the chain head has not moved past the contract's
/// start height.
pub fn percent(sync_height: u64, start_height: u64, current_height: u64) -> f64 {
    if current_height <= start_height {
        return 0.0;
    }
    let done = sync_height.saturating_sub(start_height) as f64;
    let total = (current_height - start_height) as f64;
    (done / total * 100.0).clamp(0.0, 100.0)
}
