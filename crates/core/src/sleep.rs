use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::lock;

/// Sleep for `secs` seconds. Negative, NaN or unrepresentable input sleeps zero.
pub fn sleep_secs(secs: f64) {
    if let Ok(dur) = Duration::try_from_secs_f64(secs) {
        thread::sleep(dur);
    }
}

#[derive(Default)]
struct SignalState {
    cancelled: bool,
    step: bool,
}

/// Cancellation and single-step signal shared between one worker run and its controller.
///
/// Waits block on a condvar and re-check the cancel flag on every wake,
/// so a stop request interrupts any pending sleep immediately.
#[derive(Default)]
pub struct RunSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl RunSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        lock(&self.state).cancelled = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.state).cancelled
    }

    /// Block for `dur`. Returns false if the run was cancelled before or during the wait.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut state = lock(&self.state);
        loop {
            if state.cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            state = match self.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Release one pending `wait_step`.
    pub fn step(&self) {
        lock(&self.state).step = true;
        self.cond.notify_all();
    }

    /// Drop a step that arrived while nothing was waiting.
    pub fn clear_step(&self) {
        lock(&self.state).step = false;
    }

    /// Block until `step` is called (consuming it) or the run is cancelled.
    /// Returns true when a step arrived.
    pub fn wait_step(&self) -> bool {
        let mut state = lock(&self.state);
        loop {
            if state.cancelled {
                return false;
            }
            if state.step {
                state.step = false;
                return true;
            }
            state = match self.cond.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}
