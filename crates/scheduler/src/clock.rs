//! Monotonic clock and task identity source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use crate::types::TaskId;

static EPOCH: OnceLock<Instant> = OnceLock::new();
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// Monotonic nanoseconds since the process epoch (first call).
pub fn now_nanos() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Allocate the next task id. Process-wide, strictly increasing, never reused.
pub fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed) + 1
}
