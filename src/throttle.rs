//! Sliding-window call throttle
//!
//! [`RateWindow`] admits at most `max_calls` vendor calls in any trailing
//! `period`. Callers over budget are made to wait, never refused.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

/// Calls admitted inside the current window
#[derive(Debug, Default)]
struct WindowState {
    calls: VecDeque<Instant>,
}

impl WindowState {
    /// Drops every call at least `period` old
    fn prune(&mut self, now: Instant, period: Duration) {
        while self
            .calls
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= period)
        {
            self.calls.pop_front();
        }
    }

    /// Admits a call at `now` if the window has room, else returns how long
    /// until the oldest call leaves the window
    fn admit(&mut self, now: Instant, max_calls: usize, period: Duration) -> Result<(), Duration> {
        self.prune(now, period);

        if self.calls.len() < max_calls {
            self.calls.push_back(now);
            return Ok(());
        }

        let wait = match self.calls.front() {
            Some(oldest) => period.saturating_sub(now.saturating_duration_since(*oldest)),
            None => Duration::ZERO,
        };
        Err(wait)
    }
}

/// Sliding-window limiter shared by every request in the process
///
/// Window state sits behind a synchronous lock that is never held across an
/// await. Blocked callers additionally queue on an async turnstile, so only
/// the caller at the head of the queue sleeps on the window; the rest wait
/// their turn in arrival order and re-check the window once they get it.
#[derive(Debug)]
pub struct RateWindow {
    state: Mutex<WindowState>,
    turnstile: tokio::sync::Mutex<()>,
    max_calls: usize,
    period: Duration,
}

impl RateWindow {
    /// Creates a window admitting `max_calls` calls per `period`
    ///
    /// A `max_calls` of zero is treated as one, since a window that admits
    /// nothing would block forever.
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            turnstile: tokio::sync::Mutex::new(()),
            max_calls: max_calls.max(1),
            period,
        }
    }

    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until one more call fits in the window, then records it
    ///
    /// Dropping the returned future while it waits leaves the window as it
    /// was: a call is recorded only at the moment it is admitted.
    pub async fn acquire(&self) {
        if self.try_acquire() {
            return;
        }

        let _turn = self.turnstile.lock().await;
        loop {
            let now = Instant::now();
            let admitted = self.state.lock().admit(now, self.max_calls, self.period);
            match admitted {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        max_calls = self.max_calls,
                        "rate window full, waiting for a slot"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    /// Admits a call if the window has room right now
    ///
    /// Defers to any caller already queued in [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> bool {
        let Ok(_turn) = self.turnstile.try_lock() else {
            return false;
        };
        self.state
            .lock()
            .admit(Instant::now(), self.max_calls, self.period)
            .is_ok()
    }

    /// How long until a call would be admitted (zero if one would be now)
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.prune(now, self.period);

        if state.calls.len() < self.max_calls {
            return Duration::ZERO;
        }
        state
            .calls
            .front()
            .map(|oldest| self.period.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Number of calls still inside the window
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        state.prune(Instant::now(), self.period);
        state.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
