//! The capability surface this crate needs from its embedding application.
//!
//! Everything the scheduler needs from the outside world -- "run this later", "are we inside a
//! latency-sensitive callback right now", "block for a bit without reentering your event loop",
//! "call me back after a delay" -- goes through this one trait, so the runtime itself never
//! assumes a particular event loop, timer wheel, or threading model. [`crate::testing::TestHost`]
//! (behind the `test-util` feature) is a deterministic fake for tests; a real embedding provides
//! its own implementation backed by its actual event loop.

use std::fmt;
use std::time::{Duration, Instant};

/// A scheduled callback, cancellable before it fires.
pub trait TimerHandle: fmt::Debug {
    /// Cancels the timer. A no-op if the timer already fired or was already cancelled.
    fn cancel(&self);
}

/// Host capabilities the scheduler needs from its embedding application.
pub trait Host: fmt::Debug {
    /// Schedules `callback` to run on a future turn of the host's own event loop, as soon as
    /// convenient. Used to defer work out of a "fast event" (see [`Host::in_fast_event`]).
    fn schedule(&self, callback: Box<dyn FnOnce()>);

    /// Returns `true` if the caller is currently running inside a latency-sensitive callback of
    /// the host (for example, a synchronous editor autocommand) where blocking or doing
    /// significant work would be disruptive.
    fn in_fast_event(&self) -> bool;

    /// Blocks the calling thread for approximately `duration`, allowing the host to make progress
    /// (e.g. pump its event loop) while doing so. Used only by non-suspending waits performed
    /// outside of any task; task code must never call this directly.
    fn blocking_wait(&self, duration: Duration);

    /// Schedules `callback` to run after `duration`, returning a handle that can cancel it.
    fn start_timer(&self, duration: Duration, callback: Box<dyn FnOnce()>) -> Box<dyn TimerHandle>;

    /// The host's current monotonic time.
    fn now(&self) -> Instant;
}
