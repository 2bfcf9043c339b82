//! Task admission scheduling for quarry query execution.
//!
//! Every unit of query work runs on one worker thread as a [`Task`]. Before
//! touching a shared resource (CPU, remote I/O) the worker asks the
//! per-resource-class [`Scheduler`] for admission; when the class is at its
//! concurrency ceiling the task queues and blocks, and is woken oldest-first
//! as capacity frees. Wait and execution times are reported to the owning
//! session and request context through [`TimingSink`] callbacks.

pub mod callbacks;
pub mod clock;
pub mod dispatch;
mod gate;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod task;
pub mod types;

pub use callbacks::TimingSink;
pub use dispatch::{acquire, bind_current, current_task, run_scheduled, SlotGuard, TaskBinding};
pub use registry::SchedulerRegistry;
pub use scheduler::Scheduler;
pub use snapshot::TaskSnapshot;
pub use task::{ScheduleError, Task, TaskMeta};
pub use types::{ResourceClass, TaskId};
