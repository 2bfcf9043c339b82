//! The unit of work: one task, bound to one worker thread for its lifetime.
//!
//! A task's scheduling state (`owner`, wait gate, wait start) and its
//! execution counters (run start, accumulated time) live behind two separate
//! locks, mirroring the two races they guard: submit vs. admit, and
//! stop vs. snapshot. Lock order is scheduling lock first: admission takes
//! the exec lock inside it briefly; the reverse nesting never occurs.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::callbacks::TimingSink;
use crate::clock;
use crate::gate::{GateOutcome, WaitGate};
use crate::snapshot::TaskSnapshot;
use crate::types::{ResourceClass, TaskId};

/// Error type for admission scheduling.
///
/// Queueing because a resource class is full is not an error; the only
/// runtime failure a waiter can see is cancellation. Contract violations
/// (double admission, stopping a task that is not running) panic instead.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("task {task_id} cancelled while waiting for admission")]
    Cancelled { task_id: TaskId },
}

/// Descriptive fields attached at creation, immutable thereafter.
/// Used only for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct TaskMeta {
    pub dataset: Option<String>,
    pub shard_name: Option<String>,
    pub num_docs: Option<u64>,
}

/// Scheduling state: guards the submit/admit race.
#[derive(Default)]
struct SchedState {
    /// Which resource class currently owns this task, if any.
    owner: Option<ResourceClass>,
    /// One-shot gate for the current admission cycle. Replaced on every
    /// submission; at most one is outstanding at a time.
    gate: Option<Arc<WaitGate>>,
    last_wait_start_nanos: u64,
}

/// Execution counters: guards the stop/snapshot race.
#[derive(Default)]
struct ExecStats {
    /// 0 means "not currently running".
    last_exec_start_nanos: u64,
    /// Non-decreasing accumulator across all run segments.
    total_exec_nanos: u64,
}

/// A piece of work that happens on a single worker thread.
///
/// Created when the thread begins a unit of work, destroyed when it
/// completes. In between it goes through zero or more wait/run cycles,
/// possibly against different resource classes in sequence.
pub struct Task {
    id: TaskId,
    created_nanos: u64,
    created_at: DateTime<Utc>,
    user_name: String,
    client_name: String,
    meta: TaskMeta,
    /// Owning worker thread. Diagnostics only, never used for control.
    thread: thread::Thread,
    session: Option<Weak<dyn TimingSink>>,
    request: Option<Weak<dyn TimingSink>>,
    sched: Mutex<SchedState>,
    exec: Mutex<ExecStats>,
}

impl Task {
    /// Allocate a new task bound to the calling thread. The session and
    /// request-context sinks are held weakly; the task never owns them.
    pub fn create(
        user_name: impl Into<String>,
        client_name: impl Into<String>,
        session: Option<&Arc<dyn TimingSink>>,
        request: Option<&Arc<dyn TimingSink>>,
        meta: TaskMeta,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: clock::next_task_id(),
            created_nanos: clock::now_nanos(),
            created_at: Utc::now(),
            user_name: user_name.into(),
            client_name: client_name.into(),
            meta,
            thread: thread::current(),
            session: session.map(Arc::downgrade),
            request: request.map(Arc::downgrade),
            sched: Mutex::new(SchedState::default()),
            exec: Mutex::new(ExecStats::default()),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    /// Fairness key: oldest creation first, task id breaking ties.
    /// A total order across all tasks in the process.
    pub(crate) fn fairness_key(&self) -> (u64, TaskId) {
        (self.created_nanos, self.id)
    }

    /// Record ownership by `class` and open a fresh wait gate.
    ///
    /// Panics if the task is already owned by a scheduler; submitting an
    /// owned task is a bug in the dispatch loop, not a runtime condition.
    pub(crate) fn begin_admission(&self, class: ResourceClass) {
        let mut sched = self.sched.lock().unwrap();
        if let Some(owner) = sched.owner {
            drop(sched);
            panic!("task {} submitted to {class} scheduler while owned by {owner}", self.id);
        }
        sched.owner = Some(class);
        sched.last_wait_start_nanos = clock::now_nanos();
        sched.gate = Some(Arc::new(WaitGate::new()));
    }

    /// Transition waiting → running: stamp the execution start, then open
    /// the gate (releasing the blocked waiter, if any). Returns the time
    /// spent waiting; the caller delivers it to the timing sinks off-lock.
    ///
    /// Panics if no admission cycle is open.
    pub(crate) fn mark_admitted(&self) -> Duration {
        let sched = self.sched.lock().unwrap();
        let gate = sched.gate.clone();
        let waited = clock::now_nanos().saturating_sub(sched.last_wait_start_nanos);
        match gate {
            Some(gate) if !gate.is_open() => {
                // The run must be stamped as started before the waiter is
                // released: a woken thread may reach its own finish() call
                // before this thread runs again.
                self.exec.lock().unwrap().last_exec_start_nanos = clock::now_nanos();
                gate.open(GateOutcome::Admitted);
            }
            _ => {
                drop(sched);
                panic!("task {} admitted with no open wait gate", self.id);
            }
        }
        Duration::from_nanos(waited)
    }

    /// Block the calling thread on the current admission cycle's gate.
    /// Spurious wakeups re-enter the wait.
    pub(crate) fn await_admission(&self) -> Result<(), ScheduleError> {
        let gate = self.sched.lock().unwrap().gate.clone();
        let Some(gate) = gate else {
            panic!("task {} waited for admission with no open wait gate", self.id);
        };
        match gate.wait() {
            GateOutcome::Admitted => Ok(()),
            GateOutcome::Cancelled => Err(ScheduleError::Cancelled { task_id: self.id }),
        }
    }

    /// Transition running → stopped: fold the segment into the total, clear
    /// ownership, and return the segment duration. The caller delivers it to
    /// the timing sinks off-lock.
    ///
    /// Panics if the task is not running, or is owned by a different class.
    pub(crate) fn mark_stopped(&self, class: ResourceClass) -> Duration {
        {
            let sched = self.sched.lock().unwrap();
            if sched.owner != Some(class) {
                let owner = sched.owner;
                drop(sched);
                panic!(
                    "task {} stopped by {class} scheduler but owner is {owner:?}",
                    self.id
                );
            }
        }
        let elapsed = {
            let mut exec = self.exec.lock().unwrap();
            if exec.last_exec_start_nanos == 0 {
                drop(exec);
                panic!("task {} stopped but was never started", self.id);
            }
            let elapsed = clock::now_nanos().saturating_sub(exec.last_exec_start_nanos);
            exec.total_exec_nanos += elapsed;
            exec.last_exec_start_nanos = 0;
            elapsed
        };
        let mut sched = self.sched.lock().unwrap();
        sched.owner = None;
        sched.gate = None;
        Duration::from_nanos(elapsed)
    }

    /// Release a still-queued task with a cancelled outcome and clear its
    /// ownership. Called by the scheduler after removing it from the waiting
    /// set; the blocked waiter sees [`ScheduleError::Cancelled`].
    pub(crate) fn cancel_waiting(&self) {
        let mut sched = self.sched.lock().unwrap();
        if let Some(gate) = &sched.gate {
            gate.open(GateOutcome::Cancelled);
        }
        sched.owner = None;
    }

    /// Fan wait time out to whichever sinks are still alive.
    pub(crate) fn deliver_wait(&self, class: ResourceClass, waited: Duration) {
        for sink in [&self.session, &self.request] {
            if let Some(sink) = sink.as_ref().and_then(Weak::upgrade) {
                sink.scheduler_wait_time(class, waited);
            }
        }
    }

    /// Fan execution time out to whichever sinks are still alive.
    pub(crate) fn deliver_exec(&self, class: ResourceClass, ran: Duration) {
        for sink in [&self.session, &self.request] {
            if let Some(sink) = sink.as_ref().and_then(Weak::upgrade) {
                sink.scheduler_exec_time(class, ran);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.exec.lock().unwrap().last_exec_start_nanos != 0
    }

    /// Time since the current run segment started, or `None` when stopped.
    pub fn current_execution_duration(&self) -> Option<Duration> {
        let exec = self.exec.lock().unwrap();
        if exec.last_exec_start_nanos == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            clock::now_nanos().saturating_sub(exec.last_exec_start_nanos),
        ))
    }

    /// Total execution time accumulated across all run segments so far.
    pub fn total_execution_time(&self) -> Duration {
        Duration::from_nanos(self.exec.lock().unwrap().total_exec_nanos)
    }

    /// Point-in-time copy of this task's state for monitoring.
    ///
    /// Counters are copied under their locks; the stack capture happens with
    /// no lock held and degrades to `None` when unavailable (capture only
    /// works from the task's own thread in this runtime).
    pub fn snapshot(&self, capture_stack: bool) -> TaskSnapshot {
        let stack = if capture_stack { self.capture_stack() } else { None };
        let (last_exec_start_nanos, total_exec_nanos) = {
            let exec = self.exec.lock().unwrap();
            (exec.last_exec_start_nanos, exec.total_exec_nanos)
        };
        let last_wait_start_nanos = self.sched.lock().unwrap().last_wait_start_nanos;
        TaskSnapshot {
            id: self.id,
            session_id: self
                .session
                .as_ref()
                .and_then(Weak::upgrade)
                .and_then(|s| s.display_id()),
            request_id: self
                .request
                .as_ref()
                .and_then(Weak::upgrade)
                .and_then(|r| r.display_id()),
            created_at: self.created_at,
            user_name: self.user_name.clone(),
            client_name: self.client_name.clone(),
            dataset: self.meta.dataset.clone(),
            shard_name: self.meta.shard_name.clone(),
            num_docs: self.meta.num_docs,
            last_wait_start_nanos,
            last_exec_start_nanos,
            total_exec_nanos,
            thread_name: self.thread.name().map(str::to_string),
            stack,
        }
    }

    fn capture_stack(&self) -> Option<String> {
        if thread::current().id() != self.thread.id() {
            debug!(
                task = self.id,
                "stack capture skipped: task is bound to another thread"
            );
            return None;
        }
        let backtrace = Backtrace::force_capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => {
                debug!(task = self.id, "stack capture unavailable");
                None
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task{{id={}, user={}, client={}",
            self.id, self.user_name, self.client_name
        )?;
        if let Some(dataset) = &self.meta.dataset {
            write!(f, ", dataset={dataset}")?;
        }
        if let Some(shard) = &self.meta.shard_name {
            write!(f, ", shard={shard}")?;
        }
        if let Some(session) = self.session.as_ref().and_then(Weak::upgrade) {
            if let Some(id) = session.display_id() {
                write!(f, ", session={id}")?;
            }
        }
        write!(f, "}}")
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Oldest task first; used as the scheduler's fairness order.
impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fairness_key().cmp(&other.fairness_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

    fn plain_task(user: &str) -> Arc<Task> {
        Task::create(user, "test", None, None, TaskMeta::default())
    }

    #[test]
    fn tasks_order_by_creation_then_id() {
        let a = plain_task("a");
        let b = plain_task("b");
        assert!(a < b);
        assert!(a.fairness_key() < b.fairness_key());
    }

    #[test]
    fn full_cycle_accumulates_execution_time() {
        let task = plain_task("cycle");
        task.begin_admission(ResourceClass::Cpu);
        task.mark_admitted();
        assert!(task.is_running());
        assert!(task.current_execution_duration().is_some());

        std::thread::sleep(Duration::from_millis(5));
        let first = task.mark_stopped(ResourceClass::Cpu);
        assert!(!task.is_running());
        assert!(task.current_execution_duration().is_none());
        assert!(first >= Duration::from_millis(5));
        assert_eq!(task.total_execution_time(), first);

        // Second cycle against a different class adds to the total.
        task.begin_admission(ResourceClass::RemoteIo);
        task.mark_admitted();
        let second = task.mark_stopped(ResourceClass::RemoteIo);
        assert_eq!(task.total_execution_time(), first + second);
    }

    #[test]
    #[should_panic(expected = "while owned by")]
    fn double_submission_panics() {
        let task = plain_task("double");
        task.begin_admission(ResourceClass::Cpu);
        task.begin_admission(ResourceClass::RemoteIo);
    }

    #[test]
    #[should_panic(expected = "no open wait gate")]
    fn admitting_without_gate_panics() {
        let task = plain_task("no-gate");
        task.mark_admitted();
    }

    #[test]
    #[should_panic(expected = "was never started")]
    fn stopping_non_running_task_panics() {
        let task = plain_task("not-running");
        task.begin_admission(ResourceClass::Cpu);
        task.mark_stopped(ResourceClass::Cpu);
    }

    #[test]
    #[should_panic(expected = "owner is")]
    fn stopping_with_wrong_class_panics() {
        let task = plain_task("wrong-class");
        task.begin_admission(ResourceClass::Cpu);
        task.mark_admitted();
        task.mark_stopped(ResourceClass::RemoteIo);
    }

    #[test]
    fn await_admission_returns_after_admit() {
        let task = plain_task("await");
        task.begin_admission(ResourceClass::Cpu);
        let waiter = {
            let task = Arc::clone(&task);
            std::thread::spawn(move || task.await_admission())
        };
        std::thread::sleep(Duration::from_millis(10));
        task.mark_admitted();
        waiter.join().unwrap().unwrap();
        task.mark_stopped(ResourceClass::Cpu);
    }

    #[test]
    fn cancelled_waiter_sees_cancelled_error() {
        let task = plain_task("cancel");
        task.begin_admission(ResourceClass::Cpu);
        task.cancel_waiting();
        let err = task.await_admission().unwrap_err();
        assert!(matches!(err, ScheduleError::Cancelled { task_id } if task_id == task.id()));
        // Ownership was released; the task can be submitted again.
        task.begin_admission(ResourceClass::Cpu);
        task.mark_admitted();
        task.mark_stopped(ResourceClass::Cpu);
    }

    #[test]
    fn timing_deliveries_reach_live_sinks_only() {
        #[derive(Default)]
        struct RecordingSink {
            waits: AtomicU64,
            execs: AtomicU64,
        }
        impl TimingSink for RecordingSink {
            fn scheduler_wait_time(&self, _class: ResourceClass, _waited: Duration) {
                self.waits.fetch_add(1, AtomicOrdering::Relaxed);
            }
            fn scheduler_exec_time(&self, _class: ResourceClass, _ran: Duration) {
                self.execs.fetch_add(1, AtomicOrdering::Relaxed);
            }
        }

        let recording = Arc::new(RecordingSink::default());
        let as_sink: Arc<dyn TimingSink> = Arc::clone(&recording) as Arc<dyn TimingSink>;
        let task = Task::create("sink", "test", Some(&as_sink), None, TaskMeta::default());
        task.deliver_wait(ResourceClass::Cpu, Duration::from_millis(1));
        task.deliver_exec(ResourceClass::Cpu, Duration::from_millis(2));
        assert_eq!(recording.waits.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(recording.execs.load(AtomicOrdering::Relaxed), 1);

        // Once the sink is gone, deliveries are dropped silently.
        drop(as_sink);
        drop(recording);
        task.deliver_wait(ResourceClass::Cpu, Duration::from_millis(1));
    }

    #[test]
    fn snapshot_copies_state() {
        let task = Task::create(
            "snap",
            "test",
            None,
            None,
            TaskMeta {
                dataset: Some("events".into()),
                shard_name: Some("shard01".into()),
                num_docs: Some(1000),
            },
        );
        task.begin_admission(ResourceClass::Cpu);
        task.mark_admitted();
        let snap = task.snapshot(false);
        assert_eq!(snap.id, task.id());
        assert_eq!(snap.dataset.as_deref(), Some("events"));
        assert_eq!(snap.num_docs, Some(1000));
        assert!(snap.last_exec_start_nanos > 0);
        assert!(snap.stack.is_none());
        task.mark_stopped(ResourceClass::Cpu);
    }

    #[test]
    fn snapshot_captures_stack_on_own_thread() {
        let task = plain_task("stack");
        let snap = task.snapshot(true);
        // Capture runs on the creating thread here, so a stack is present
        // whenever the platform supports backtraces.
        if let Some(stack) = snap.stack {
            assert!(!stack.is_empty());
        }
    }

    #[test]
    fn snapshot_skips_stack_from_other_thread() {
        let task = plain_task("cross-thread");
        let snap = {
            let task = Arc::clone(&task);
            std::thread::spawn(move || task.snapshot(true)).join().unwrap()
        };
        assert!(snap.stack.is_none());
    }
}
