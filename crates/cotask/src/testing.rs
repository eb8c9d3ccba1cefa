//! A deterministic, manually-driven [`Host`] fake, for tests.
//!
//! Time never advances on its own: timers only fire when the test calls [`TestHost::advance`],
//! and callbacks scheduled via [`Host::schedule`] only run when the test calls
//! [`TestHost::run_scheduled`] directly, or indirectly through [`Host::blocking_wait`] (which a
//! real host's blocking wait would also pump its event loop through). This mirrors the rest of
//! the pack's fake-clock convention (a clock that advances exactly when the test tells it to,
//! rather than wall time).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use negative_impl::negative_impl;

use crate::host::{Host, TimerHandle};

struct TimerEntry {
    deadline: Duration,
    cancelled: Rc<Cell<bool>>,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

#[derive(Debug)]
struct TestTimerHandle {
    cancelled: Rc<Cell<bool>>,
}

impl TimerHandle for TestTimerHandle {
    fn cancel(&self) {
        self.cancelled.set(true);
    }
}

/// A manually-driven fake [`Host`].
///
/// Only available with the `test-util` feature (or in this crate's own test suite).
pub struct TestHost {
    base: Instant,
    elapsed: Cell<Duration>,
    timers: RefCell<Vec<TimerEntry>>,
    scheduled: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    fast_event: Cell<bool>,
}

impl std::fmt::Debug for TestHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHost")
            .field("elapsed", &self.elapsed.get())
            .field("pending_timers", &self.timers.borrow().len())
            .field("scheduled", &self.scheduled.borrow().len())
            .field("fast_event", &self.fast_event.get())
            .finish()
    }
}

#[negative_impl]
impl !Send for TestHost {}
#[negative_impl]
impl !Sync for TestHost {}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    /// Creates a fresh fake host, with the clock at its epoch and no pending work.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
            timers: RefCell::new(Vec::new()),
            scheduled: RefCell::new(VecDeque::new()),
            fast_event: Cell::new(false),
        }
    }

    /// Sets whether [`Host::in_fast_event`] reports `true`.
    pub fn set_fast_event(&self, value: bool) {
        self.fast_event.set(value);
    }

    /// Advances the fake clock by `duration`, firing (in deadline order) every non-cancelled
    /// timer whose deadline is now due, including ones newly scheduled by an earlier firing.
    pub fn advance(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        loop {
            let due_index = {
                let timers = self.timers.borrow();
                timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| {
                        !timer.cancelled.get() && timer.deadline <= self.elapsed.get()
                    })
                    .min_by_key(|(_, timer)| timer.deadline)
                    .map(|(index, _)| index)
            };
            let Some(index) = due_index else {
                break;
            };
            let entry = self.timers.borrow_mut().remove(index);
            if let Some(callback) = entry.callback.into_inner() {
                callback();
            }
        }
    }

    /// Runs every callback scheduled via [`Host::schedule`] since the last call, in FIFO order.
    /// Callbacks that schedule further work during this drain are also run before it returns.
    pub fn run_scheduled(&self) {
        loop {
            let next = self.scheduled.borrow_mut().pop_front();
            let Some(callback) = next else {
                break;
            };
            callback();
        }
    }

    /// The number of timers that are still pending (not fired, not cancelled).
    #[must_use]
    pub fn pending_timer_count(&self) -> usize {
        self.timers
            .borrow()
            .iter()
            .filter(|timer| !timer.cancelled.get())
            .count()
    }
}

impl Host for TestHost {
    fn schedule(&self, callback: Box<dyn FnOnce()>) {
        self.scheduled.borrow_mut().push_back(callback);
    }

    fn in_fast_event(&self) -> bool {
        self.fast_event.get()
    }

    fn blocking_wait(&self, duration: Duration) {
        self.advance(duration);
        self.run_scheduled();
    }

    fn start_timer(&self, duration: Duration, callback: Box<dyn FnOnce()>) -> Box<dyn TimerHandle> {
        let cancelled = Rc::new(Cell::new(false));
        self.timers.borrow_mut().push(TimerEntry {
            deadline: self.elapsed.get() + duration,
            cancelled: Rc::clone(&cancelled),
            callback: RefCell::new(Some(callback)),
        });
        Box::new(TestTimerHandle { cancelled })
    }

    fn now(&self) -> Instant {
        self.base + self.elapsed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_fire_in_deadline_order_when_advanced_past() {
        let host = TestHost::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let order_a = Rc::clone(&order);
        let order_b = Rc::clone(&order);
        let _first = host.start_timer(Duration::from_millis(20), Box::new(move || order_a.borrow_mut().push("a")));
        let _second = host.start_timer(Duration::from_millis(10), Box::new(move || order_b.borrow_mut().push("b")));
        host.advance(Duration::from_millis(25));
        assert_eq!(*order.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let host = TestHost::new();
        let fired = Rc::new(Cell::new(false));
        let fired_for_cb = Rc::clone(&fired);
        let timer = host.start_timer(Duration::from_millis(5), Box::new(move || fired_for_cb.set(true)));
        timer.cancel();
        host.advance(Duration::from_millis(10));
        assert!(!fired.get());
    }

    #[test]
    fn scheduled_callbacks_only_run_on_run_scheduled() {
        let host = TestHost::new();
        let ran = Rc::new(Cell::new(false));
        let ran_for_cb = Rc::clone(&ran);
        host.schedule(Box::new(move || ran_for_cb.set(true)));
        assert!(!ran.get());
        host.run_scheduled();
        assert!(ran.get());
    }
}
