use std::time::Duration;

use crate::types::ResourceClass;

/// Timing callbacks delivered by a task as it moves through a scheduler.
///
/// Implemented by the session and request-context collaborators that do
/// per-query resource accounting. Tasks hold these as weak references and
/// invoke them with no task or scheduler lock held, from whichever worker
/// thread drove the transition, so implementations must be safe to call
/// concurrently.
pub trait TimingSink: Send + Sync {
    /// Called once per admission cycle with the time spent queued.
    fn scheduler_wait_time(&self, class: ResourceClass, waited: Duration);

    /// Called once per run segment with the time spent executing.
    fn scheduler_exec_time(&self, class: ResourceClass, ran: Duration);

    /// Identifier shown in task snapshots (session id, request id).
    fn display_id(&self) -> Option<String> {
        None
    }
}
