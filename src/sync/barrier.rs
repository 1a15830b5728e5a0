use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct BarrierState {
    ready_count: u32,
    expected: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierWait {
    Ready,
    Interrupted,
}

/// Rendezvous counter: every agency handler signals exactly once, whatever
/// its outcome, and the orchestrator blocks until the count is reached.
#[derive(Debug)]
pub struct ReadyBarrier {
    state: Mutex<BarrierState>,
    ready_cond: Condvar,
}

impl ReadyBarrier {
    pub fn new(expected: u32) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                ready_count: 0,
                expected,
            }),
            ready_cond: Condvar::new(),
        }
    }

    // The state is a plain counter, so a poisoned lock still holds a usable value.
    fn state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn signal_ready(&self) {
        let mut state = self.state();
        state.ready_count += 1;
        self.ready_cond.notify_all();
    }

    pub fn ready_count(&self) -> u32 {
        self.state().ready_count
    }

    pub fn wait_until(&self, target: u32) {
        let mut state = self.state();
        while state.ready_count < target {
            state = self
                .ready_cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits for every expected signal, re-checking `interrupted` every
    /// `poll` so a stop request can break the wait.
    pub fn wait_all_or(&self, poll: Duration, interrupted: impl Fn() -> bool) -> BarrierWait {
        let mut state = self.state();
        loop {
            if state.ready_count >= state.expected {
                return BarrierWait::Ready;
            }
            if interrupted() {
                return BarrierWait::Interrupted;
            }
            state = self
                .ready_cond
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
