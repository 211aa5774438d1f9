//! Pausable, resumable countdown.
//!
//! Bounds connection attempts across an authentication pause: the composite
//! pauses its connect timer while the user is asked for credentials, then
//! resumes it with whatever time was left. The timer knows nothing about
//! channels; its action is an arbitrary callback.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::core::TimerError;

type TimerAction = dyn Fn() + Send + Sync;

struct TimerState {
    /// Delay left before the action fires. `None` once cancelled.
    remaining: Option<Duration>,
    /// When the current schedule started.
    started_at: Option<Instant>,
    /// Pending schedule.
    task: Option<JoinHandle<()>>,
    /// Bumped on every schedule change so a stale wake-up cannot fire.
    generation: u64,
    /// Whether the action has run.
    executed: bool,
}

struct TimerShared {
    action: Box<TimerAction>,
    track_elapsed_on_pause: bool,
    runtime: Handle,
    state: Mutex<TimerState>,
}

impl TimerShared {
    fn resume(self: &Arc<Self>) -> Result<(), TimerError> {
        let mut state = self.state.lock();
        let Some(remaining) = state.remaining else {
            return Err(TimerError::Cancelled);
        };
        if state.task.is_some() || state.executed {
            return Ok(());
        }

        state.generation += 1;
        let generation = state.generation;
        state.started_at = Some(Instant::now());

        let shared = Arc::downgrade(self);
        state.task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(remaining).await;
            if let Some(shared) = shared.upgrade() {
                shared.fire(generation);
            }
        }));
        trace!(?remaining, "timer scheduled");
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        let Some(task) = state.task.take() else {
            return;
        };
        task.abort();
        state.generation += 1;

        let started_at = state.started_at.take();
        if self.track_elapsed_on_pause {
            if let (Some(remaining), Some(started_at)) = (state.remaining, started_at) {
                // Elapsed stays below the delay unless the pause lands after the
                // sleep ended but before `fire` took the lock. That race leaves
                // zero and the next resume fires at once.
                state.remaining = Some(remaining.saturating_sub(started_at.elapsed()));
            }
        }
        trace!(remaining = ?state.remaining, "timer paused");
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.generation += 1;
        state.started_at = None;
        state.remaining = None;
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.task.is_none() {
                return;
            }
            state.task = None;
            state.started_at = None;
            state.executed = true;
        }
        trace!("timer fired");
        (self.action)();
    }
}

/// A cancelable, pausable countdown running on a tokio runtime.
///
/// Dropping the timer cancels it.
pub struct ResumableTimer {
    shared: Arc<TimerShared>,
}

impl ResumableTimer {
    /// Create a stopped timer that runs `action` once `delay` has elapsed
    /// while running.
    ///
    /// With `track_elapsed_on_pause`, time spent running before a pause is
    /// deducted from the delay; otherwise every resume restarts the full
    /// delay.
    pub fn new<F>(runtime: Handle, delay: Duration, track_elapsed_on_pause: bool, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(TimerShared {
                action: Box::new(action),
                track_elapsed_on_pause,
                runtime,
                state: Mutex::new(TimerState {
                    remaining: Some(delay),
                    started_at: None,
                    task: None,
                    generation: 0,
                    executed: false,
                }),
            }),
        }
    }

    /// Start the countdown.
    pub fn start(&self) -> Result<(), TimerError> {
        self.resume()
    }

    /// Schedule the action after the remaining delay.
    ///
    /// No-op if already running or already fired; fails once cancelled.
    pub fn resume(&self) -> Result<(), TimerError> {
        self.shared.resume()
    }

    /// Stop the countdown, keeping the remaining delay.
    pub fn pause(&self) {
        self.shared.pause();
    }

    /// Stop permanently. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Check if the countdown is running.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().task.is_some()
    }

    /// Check if the action has run.
    pub fn is_executed(&self) -> bool {
        self.shared.state.lock().executed
    }

    /// Check if the timer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.state.lock().remaining.is_none()
    }

    /// Delay left as of the last pause (or the initial delay). `None` once
    /// cancelled.
    pub fn remaining(&self) -> Option<Duration> {
        self.shared.state.lock().remaining
    }

    /// Weak pause/resume handle for code that must not own the timer.
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for ResumableTimer {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

impl fmt::Debug for ResumableTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ResumableTimer")
            .field("remaining", &state.remaining)
            .field("running", &state.task.is_some())
            .field("executed", &state.executed)
            .finish()
    }
}

/// Pause/resume access to a timer owned elsewhere.
///
/// Calls are no-ops once the owning [`ResumableTimer`] is dropped.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Weak<TimerShared>,
}

impl TimerHandle {
    /// Pause the timer.
    pub fn pause(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.pause();
        }
    }

    /// Resume the timer. Cancelled or dropped timers stay stopped.
    pub fn resume(&self) {
        if let Some(shared) = self.shared.upgrade() {
            let _ = shared.resume();
        }
    }

    /// Check if the owning timer is still alive.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
