use std::sync::atomic::AtomicU64;

/// Total transient-classified failures that were retried, across all trials.
pub static TRANSIENT_RETRY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Total "created but still not visible" waits, across all trials.
pub static VISIBILITY_WAIT_COUNT: AtomicU64 = AtomicU64::new(0);
