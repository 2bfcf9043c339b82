use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::TaskId;

/// Immutable point-in-time copy of a task's state, taken for monitoring and
/// diagnostics. Never mutated after construction; has no lifecycle beyond
/// the caller holding it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    /// Display label of the owning session, when one is attached and alive.
    pub session_id: Option<String>,
    /// Display label of the request context, when one is attached and alive.
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub client_name: String,
    pub dataset: Option<String>,
    pub shard_name: Option<String>,
    pub num_docs: Option<u64>,
    pub last_wait_start_nanos: u64,
    /// 0 means the task was not running at capture time.
    pub last_exec_start_nanos: u64,
    pub total_exec_nanos: u64,
    pub thread_name: Option<String>,
    /// Captured stack of the task's thread; `None` when capture was skipped
    /// or failed.
    pub stack: Option<String>,
}

impl TaskSnapshot {
    pub fn is_running(&self) -> bool {
        self.last_exec_start_nanos != 0
    }
}
