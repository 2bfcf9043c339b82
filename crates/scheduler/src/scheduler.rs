//! Per-resource-class admission gate.
//!
//! One instance per [`ResourceClass`], shared by every worker thread on the
//! node. Enforces a concurrency ceiling and admits queued tasks strictly
//! oldest-first, which bounds any task's wait by roughly (ceiling × typical
//! task duration) even under a flood of newer arrivals.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::task::{ScheduleError, Task};
use crate::types::{ResourceClass, TaskId};

struct Inner {
    /// Concurrency ceiling: max tasks running at once in this class.
    slots: usize,
    running: HashMap<TaskId, Arc<Task>>,
    /// Keyed by fairness order (creation time, then id): oldest first.
    waiting: BTreeMap<(u64, TaskId), Arc<Task>>,
}

/// Admission gate for one resource class.
///
/// Both admission paths (direct admit on `schedule`, wakeup on `finish`)
/// serialize through the inner lock, so a task is never simultaneously
/// waiting and running, and no two tasks are admitted for one freed slot.
/// The lock is never held while a thread blocks on a task's gate, and
/// timing callbacks are always delivered after it is released.
pub struct Scheduler {
    class: ResourceClass,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(class: ResourceClass, slots: usize) -> Self {
        Self {
            class,
            inner: Mutex::new(Inner {
                slots,
                running: HashMap::new(),
                waiting: BTreeMap::new(),
            }),
        }
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn slots(&self) -> usize {
        self.inner.lock().unwrap().slots
    }

    pub fn running_len(&self) -> usize {
        self.inner.lock().unwrap().running.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.inner.lock().unwrap().waiting.len()
    }

    /// Submit `task` for admission. The calling worker thread must hold the
    /// task. Admits immediately when below the ceiling; otherwise queues in
    /// fairness order and blocks until admitted (or cancelled).
    ///
    /// Panics if the task is already owned by a scheduler.
    pub fn schedule(&self, task: &Arc<Task>) -> Result<(), ScheduleError> {
        task.begin_admission(self.class);
        let waited = {
            let mut inner = self.inner.lock().unwrap();
            if inner.running.len() < inner.slots {
                let waited = task.mark_admitted();
                inner.running.insert(task.id(), Arc::clone(task));
                Some(waited)
            } else {
                inner.waiting.insert(task.fairness_key(), Arc::clone(task));
                None
            }
        };
        match waited {
            Some(waited) => {
                task.deliver_wait(self.class, waited);
                Ok(())
            }
            // Queued: log and block off the scheduler lock (formatting the
            // task runs sink code). Whoever admits the task delivers its
            // wait-time callback.
            None => {
                debug!(task = %task, class = %self.class, "task queued for admission");
                task.await_admission()
            }
        }
    }

    /// Report the unit of work as done. Stops the task, frees its slot, and
    /// admits the oldest waiters while headroom remains. Returns the
    /// execution time of the finished segment.
    ///
    /// Panics if the task is not running in this class.
    pub fn finish(&self, task: &Arc<Task>) -> Duration {
        let ran = task.mark_stopped(self.class);
        let admitted = {
            let mut inner = self.inner.lock().unwrap();
            if inner.running.remove(&task.id()).is_none() {
                drop(inner);
                panic!(
                    "task {} finished but not in the {} running set",
                    task.id(),
                    self.class
                );
            }
            Self::admit_waiting(&mut inner)
        };
        debug!(task = %task, class = %self.class, ran_us = ran.as_micros() as u64, "task finished");
        task.deliver_exec(self.class, ran);
        for (woken, waited) in admitted {
            woken.deliver_wait(self.class, waited);
        }
        ran
    }

    /// Remove a still-queued task. Its blocked thread sees
    /// [`ScheduleError::Cancelled`]. Returns false when the task is not
    /// queued here (already admitted tasks are never preempted).
    pub fn cancel(&self, task: &Arc<Task>) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            inner.waiting.remove(&task.fairness_key()).is_some()
        };
        if !removed {
            return false;
        }
        // Removal from the waiting set is what serializes against finish():
        // an admit cascade can no longer see this task, so the gate can be
        // opened and the cancellation logged off-lock.
        task.cancel_waiting();
        debug!(task = %task, class = %self.class, "queued task cancelled");
        true
    }

    /// Change the concurrency ceiling at runtime. Raising it immediately
    /// admits waiters oldest-first up to the new headroom; lowering it only
    /// gates future admissions and never preempts running tasks.
    pub fn set_slots(&self, slots: usize) {
        let admitted = {
            let mut inner = self.inner.lock().unwrap();
            inner.slots = slots;
            Self::admit_waiting(&mut inner)
        };
        info!(class = %self.class, slots, woken = admitted.len(), "ceiling changed");
        for (woken, waited) in admitted {
            woken.deliver_wait(self.class, waited);
        }
    }

    /// Tasks currently admitted. Cloned under a short lock, for monitoring.
    pub fn running_tasks(&self) -> Vec<Arc<Task>> {
        self.inner.lock().unwrap().running.values().cloned().collect()
    }

    /// Tasks currently queued, in admission (fairness) order.
    pub fn waiting_tasks(&self) -> Vec<Arc<Task>> {
        self.inner.lock().unwrap().waiting.values().cloned().collect()
    }

    /// Move waiters into the running set, oldest first, while below the
    /// ceiling. Returns the admitted tasks with their wait times so the
    /// caller can deliver callbacks after unlocking.
    fn admit_waiting(inner: &mut Inner) -> Vec<(Arc<Task>, Duration)> {
        let mut admitted = Vec::new();
        while inner.running.len() < inner.slots {
            let Some((_, task)) = inner.waiting.pop_first() else {
                break;
            };
            let waited = task.mark_admitted();
            inner.running.insert(task.id(), Arc::clone(&task));
            admitted.push((task, waited));
        }
        admitted
    }
}
