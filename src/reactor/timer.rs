// The single retry/timeout timer shared by the reactor and the transfer driver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::MIN_TIMER_DELAY_MS;

/// One-shot timer. The driver side rearms or cancels it; the reactor side
/// reads the deadline and fires it.
#[derive(Debug, Clone, Default)]
pub struct SharedTimer {
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl SharedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a wake-up request from the transfer driver: `None` cancels, zero
    /// is raised to the minimum delay, anything else rearms.
    pub fn reconfigure(&self, delay: Option<Duration>) {
        match driver_delay(delay) {
            Some(delay) => self.arm(delay),
            None => self.cancel(),
        }
    }

    pub fn arm(&self, delay: Duration) {
        *self.deadline.lock() = Some(Instant::now() + delay);
        debug!("timer armed for {}ms", delay.as_millis());
    }

    pub fn cancel(&self) {
        if self.deadline.lock().take().is_some() {
            debug!("timer cancelled");
        }
    }

    fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.lock().is_some()
    }

    /// Time left before the deadline, zero if already due.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline().map(|at| at.saturating_duration_since(now))
    }

    /// Disarm and report `true` if the deadline has passed.
    pub fn fire_if_due(&self, now: Instant) -> bool {
        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(at) if at <= now => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Map the driver's requested delay onto the timer. A zero delay would make
/// the loop spin without ever polling sockets.
pub fn driver_delay(delay: Option<Duration>) -> Option<Duration> {
    delay.map(|d| d.max(Duration::from_millis(MIN_TIMER_DELAY_MS)))
}
