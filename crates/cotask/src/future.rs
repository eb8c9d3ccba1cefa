//! A one-shot result cell shared by reference.
//!
//! This is the crate's `Future` type (distinct from [`std::future::Future`], though task bodies
//! are themselves ordinary `std::future::Future`s built with `async`/`.await`). It is the handle
//! other tasks wait on: a task's own completion, a pipe item's settlement, anything that is
//! "produced once and observed later, possibly after the fact".
//!
//! Two consumption styles are offered. `wait`/`await_in_task`/`pawait_in_task` require
//! `T: Clone`, since they may be called by several independent observers who each need their own
//! copy of the result. `await_once`/`pawait_once` need no such bound, but consume the result --
//! calling either of them (or the other's non-panicking sibling) a second time panics, mirroring
//! a single-consumer channel.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use negative_impl::negative_impl;

use crate::error::{Error, Result};
use crate::scheduler;

enum State<T> {
    Pending(Vec<Box<dyn FnOnce(&Result<T>)>>),
    Done(Result<T>),
    Consumed,
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(waiters) => f.debug_tuple("Pending").field(&waiters.len()).finish(),
            Self::Done(_) => write!(f, "Done"),
            Self::Consumed => write!(f, "Consumed"),
        }
    }
}

struct Inner<T> {
    state: RefCell<State<T>>,
}

impl<T> fmt::Debug for Inner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner").field("state", &self.state).finish()
    }
}

/// A shared, one-shot result cell.
///
/// `Future<T>` can be completed at most once (via [`Future::complete`] or [`Future::fail`]). See
/// the module docs for the two ways to read the result back out.
#[derive(Debug)]
pub struct Future<T> {
    inner: Rc<Inner<T>>,
}

// Cloning a handle only clones the `Rc`, never `T` itself, so this must not carry a `T: Clone`
// bound -- a derived `Clone` impl would add one and break every non-`Clone` use of `Future<T>`.
impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

#[negative_impl]
impl<T> !Send for Future<T> {}
#[negative_impl]
impl<T> !Sync for Future<T> {}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Future<T> {
    /// Creates a new, not-yet-settled result cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                state: RefCell::new(State::Pending(Vec::new())),
            }),
        }
    }

    /// Returns `true` once [`Future::complete`] or [`Future::fail`] has been called (and the
    /// result has not yet been consumed via [`Future::await_once`]/[`Future::pawait_once`]).
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(&*self.inner.state.borrow(), State::Done(_))
    }

    /// Registers a callback invoked exactly once with the result.
    ///
    /// If the result is already available, the callback runs synchronously, immediately.
    /// Otherwise, it runs the moment [`Future::complete`] or [`Future::fail`] is called. Safe to
    /// call even after the result has been consumed via the `_once` API -- the callback still
    /// observes the result, since consumption only affects the owning read.
    pub fn on_complete(&self, callback: impl FnOnce(&Result<T>) + 'static) {
        let mut state = self.inner.state.borrow_mut();
        if let State::Pending(waiters) = &mut *state {
            waiters.push(Box::new(callback));
            return;
        }
        drop(state);
        let state = self.inner.state.borrow();
        match &*state {
            State::Done(result) => callback(result),
            State::Consumed => panic!("Future::on_complete called after the result was consumed"),
            State::Pending(_) => unreachable!("just checked for Pending above"),
        }
    }

    /// Completes the future with a successful value.
    ///
    /// # Panics
    ///
    /// Panics if the future has already been settled.
    pub fn complete(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Completes the future with an error.
    ///
    /// # Panics
    ///
    /// Panics if the future has already been settled.
    pub fn fail(&self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<T>) {
        let waiters = {
            let mut state = self.inner.state.borrow_mut();
            if !matches!(&*state, State::Pending(_)) {
                panic!("future already settled");
            }
            let State::Pending(waiters) = std::mem::replace(&mut *state, State::Done(result))
            else {
                unreachable!("just matched Pending above")
            };
            waiters
        };
        let state = self.inner.state.borrow();
        let State::Done(result) = &*state else {
            unreachable!("state was just set to Done")
        };
        for waiter in waiters {
            waiter(result);
        }
    }

    fn is_settled(&self) -> bool {
        matches!(&*self.inner.state.borrow(), State::Done(_))
    }

    /// Consumes the settled result.
    ///
    /// # Panics
    ///
    /// Panics if the future is not yet settled, or if the result was already consumed.
    fn take(&self) -> Result<T> {
        let mut state = self.inner.state.borrow_mut();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Pending(waiters) => {
                *state = State::Pending(waiters);
                panic!("future not yet settled");
            }
            State::Done(result) => result,
            State::Consumed => panic!("future result already consumed"),
        }
    }

    /// Suspends the current task until this future settles, consuming the result. Re-raises
    /// cancellation as a panic rather than returning it; see [`Future::pawait_once`] for the
    /// protected form.
    ///
    /// Unlike [`Future::await_in_task`], this does not require `T: Clone` -- but it must not be
    /// called more than once (nor alongside [`Future::pawait_once`]) on the same future.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task, if the task is cancelled when this is called, or if
    /// the result was already consumed.
    pub async fn await_once(&self) -> Result<T> {
        match self.pawait_once().await {
            Ok(value) => Ok(value),
            Err(error) => panic!("{error}"),
        }
    }

    /// Protected, single-consumption suspend: waits for this future to settle and consumes the
    /// result, returning `Err(Error::Cancelled)` instead of panicking if the waiting task is
    /// cancelled while it waits.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task, or if the result was already consumed.
    pub async fn pawait_once(&self) -> Result<T> {
        if self.is_settled() {
            return self.take();
        }

        let task = scheduler::current_erased()
            .unwrap_or_else(|| panic!("Future::pawait_once called outside of a task"));
        let interested = Rc::new(std::cell::Cell::new(true));
        {
            let interested = Rc::clone(&interested);
            let task = Rc::clone(&task);
            self.on_complete(move |_| {
                if interested.get() {
                    scheduler::try_resume(&task, Vec::new());
                }
            });
        }

        if scheduler::suspend().await.is_err() {
            interested.set(false);
            return Err(Error::Cancelled);
        }

        self.take()
    }
}

impl<T: Clone> Future<T> {
    fn try_get(&self) -> Option<Result<T>> {
        match &*self.inner.state.borrow() {
            State::Pending(_) => None,
            State::Done(result) => Some(result.clone()),
            State::Consumed => panic!("Future observed with a Clone-based wait after being consumed via the _once API"),
        }
    }

    /// Non-suspending wait, for callers outside of any task.
    ///
    /// First escapes any fast-event context the host reports being in (see
    /// [`crate::host::Host::in_fast_event`]), the same way the suspending `sleep_until_nonfast`
    /// does for task code, then polls the host in a loop (sleeping `interval` between polls, via
    /// [`crate::host::Host::blocking_wait`]) until the future settles or `timeout` elapses, and
    /// returns `None` on timeout.
    pub fn wait(
        &self,
        host: &dyn crate::host::Host,
        timeout: std::time::Duration,
        interval: std::time::Duration,
    ) -> Option<Result<T>> {
        scheduler::blocking_sleep_until_nonfast(host, interval);
        let deadline = host.now() + timeout;
        loop {
            if let Some(result) = self.try_get() {
                return Some(result);
            }
            if host.now() >= deadline {
                return None;
            }
            host.blocking_wait(interval);
        }
    }

    /// Suspends the current task until the future settles, re-raising cancellation instead of
    /// returning it.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task, or if the task is cancelled when this is called (in
    /// that case, call `unset_cancelled` first).
    pub async fn await_in_task(&self) -> Result<T> {
        match self.pawait_in_task().await {
            Ok(value) => Ok(value),
            Err(error) => panic!("{error}"),
        }
    }

    /// Protected suspend: waits for the future to settle, returning `Err(Error::Cancelled)`
    /// instead of panicking if the waiting task is cancelled while it waits.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn pawait_in_task(&self) -> Result<T> {
        if let Some(result) = self.try_get() {
            return result;
        }

        let task = scheduler::current_erased()
            .unwrap_or_else(|| panic!("Future::pawait_in_task called outside of a task"));
        let interested = Rc::new(std::cell::Cell::new(true));
        {
            let interested = Rc::clone(&interested);
            let task = Rc::clone(&task);
            self.on_complete(move |_| {
                if interested.get() {
                    scheduler::try_resume(&task, Vec::new());
                }
            });
        }

        if scheduler::suspend().await.is_err() {
            interested.set(false);
            return Err(Error::Cancelled);
        }

        self.try_get()
            .expect("future waiter resumed but future is not settled")
    }
}
