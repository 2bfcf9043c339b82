//! Worker-thread integration: scoped current-task binding and RAII slot
//! guards around one unit of work.
//!
//! Callers should thread the [`Task`] reference through their call chain;
//! the thread-local slot exists for deep library code that cannot take an
//! extra parameter, and is always set and cleared through the scoped
//! [`TaskBinding`] guard.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::scheduler::Scheduler;
use crate::task::{ScheduleError, Task};

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<Task>>> = const { RefCell::new(None) };
}

/// Bind `task` as this worker thread's current task for the duration of one
/// unit of work. The returned guard clears the binding on drop and warns
/// when the task's total execution time exceeded `long_task_warn`.
///
/// Panics if the thread already has a bound task.
pub fn bind_current(task: Arc<Task>, long_task_warn: Duration) -> TaskBinding {
    CURRENT_TASK.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            panic!("thread already bound to task {}", existing.id());
        }
        *slot = Some(Arc::clone(&task));
    });
    TaskBinding { task, long_task_warn }
}

/// The task bound to the calling thread, if any.
pub fn current_task() -> Option<Arc<Task>> {
    CURRENT_TASK.with(|slot| slot.borrow().clone())
}

/// Scoped thread-local binding of a task to its worker thread.
pub struct TaskBinding {
    task: Arc<Task>,
    long_task_warn: Duration,
}

impl TaskBinding {
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }
}

impl Drop for TaskBinding {
    fn drop(&mut self) {
        let total = self.task.total_execution_time();
        if total > self.long_task_warn {
            warn!(
                task = %self.task,
                total_ms = total.as_millis() as u64,
                "task exceeded long-running threshold"
            );
        }
        CURRENT_TASK.with(|slot| slot.borrow_mut().take());
    }
}

/// Admit `task` into `scheduler` and hold the slot until the guard drops.
/// Dropping calls [`Scheduler::finish`], so a panicking work closure still
/// frees its slot and wakes the next waiter.
pub fn acquire(scheduler: &Arc<Scheduler>, task: &Arc<Task>) -> Result<SlotGuard, ScheduleError> {
    scheduler.schedule(task)?;
    Ok(SlotGuard {
        scheduler: Arc::clone(scheduler),
        task: Arc::clone(task),
    })
}

/// An admitted slot in one scheduler, released on drop.
pub struct SlotGuard {
    scheduler: Arc<Scheduler>,
    task: Arc<Task>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.scheduler.finish(&self.task);
    }
}

/// Run `work` inside an admitted slot: schedule, execute, finish.
pub fn run_scheduled<F, R>(
    scheduler: &Arc<Scheduler>,
    task: &Arc<Task>,
    work: F,
) -> Result<R, ScheduleError>
where
    F: FnOnce() -> R,
{
    let _slot = acquire(scheduler, task)?;
    Ok(work())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskMeta;
    use crate::types::ResourceClass;

    fn task(user: &str) -> Arc<Task> {
        Task::create(user, "test", None, None, TaskMeta::default())
    }

    #[test]
    fn binding_sets_and_clears_current_task() {
        assert!(current_task().is_none());
        let t = task("bound");
        {
            let binding = bind_current(Arc::clone(&t), Duration::from_secs(60));
            assert_eq!(current_task().unwrap().id(), t.id());
            assert_eq!(binding.task().id(), t.id());
        }
        assert!(current_task().is_none());
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn double_binding_panics() {
        let _first = bind_current(task("first"), Duration::from_secs(60));
        let _second = bind_current(task("second"), Duration::from_secs(60));
    }

    #[test]
    fn run_scheduled_admits_runs_and_finishes() {
        let sched = Arc::new(Scheduler::new(ResourceClass::Cpu, 1));
        let t = task("work");
        let out = run_scheduled(&sched, &t, || 7).unwrap();
        assert_eq!(out, 7);
        assert_eq!(sched.running_len(), 0);
        assert!(!t.is_running());
        assert!(t.total_execution_time() > Duration::ZERO);
    }

    #[test]
    fn slot_guard_frees_slot_on_panic() {
        let sched = Arc::new(Scheduler::new(ResourceClass::Cpu, 1));
        let t = task("panicking");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            run_scheduled(&sched, &t, || panic!("work blew up")).unwrap()
        }));
        assert!(result.is_err());
        assert_eq!(sched.running_len(), 0);

        // The freed slot is usable by the next task.
        let next = task("next");
        run_scheduled(&sched, &next, || ()).unwrap();
    }
}
