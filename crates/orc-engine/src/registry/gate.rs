use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Live,
    Closed,
}

/// Holds a subscription's deliveries back until its request has been sent.
///
/// Settles once: `open` after a successful send, `close` when the send
/// failed or was abandoned. Waiters run on the blocking pool.
#[derive(Debug)]
pub struct SendGate {
    state: Mutex<State>,
    settled: Condvar,
}

impl SendGate {
    pub fn pending() -> Self {
        Self::with_state(State::Pending)
    }

    /// Already open; for subscriptions with no send in flight.
    pub fn live() -> Self {
        Self::with_state(State::Live)
    }

    fn with_state(state: State) -> Self {
        Self {
            state: Mutex::new(state),
            settled: Condvar::new(),
        }
    }

    pub fn open(&self) {
        self.settle(State::Live);
    }

    pub fn close(&self) {
        self.settle(State::Closed);
    }

    pub fn is_live(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) == State::Live
    }

    /// Block until settled. True when deliveries may proceed.
    pub fn wait(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .settled
            .wait_while(state, |s| *s == State::Pending)
            .unwrap_or_else(PoisonError::into_inner);
        *state == State::Live
    }

    fn settle(&self, to: State) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == State::Pending {
            *state = to;
        }
        self.settled.notify_all();
    }
}
