//! One-shot admission gate a queued task blocks on.

use std::sync::{Condvar, Mutex};

/// How the gate was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateOutcome {
    /// The scheduler admitted the task; it may start running.
    Admitted,
    /// The task was cancelled while queued; it never ran.
    Cancelled,
}

/// Single-use gate: opened at most once per admission cycle, waited on by at
/// most one thread. A fresh gate is created every time a task is submitted.
#[derive(Debug)]
pub(crate) struct WaitGate {
    state: Mutex<Option<GateOutcome>>,
    cond: Condvar,
}

impl WaitGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Release the waiter. Must be called at most once per gate.
    pub fn open(&self, outcome: GateOutcome) {
        let mut state = self.state.lock().unwrap();
        *state = Some(outcome);
        self.cond.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    /// Block until the gate opens. Spurious wakeups re-enter the wait; the
    /// outcome is observed exactly once per admission cycle.
    pub fn wait(&self) -> GateOutcome {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(outcome) = *state {
                return outcome;
            }
            state = self.cond.wait(state).unwrap();
        }
    }
}
