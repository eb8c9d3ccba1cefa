//! Adapter from host callback-style APIs to suspendable task functions.
//!
//! Many host APIs are naturally callback-based ("start this operation, call me back with the
//! result"). [`cb_to_tf`] turns one call to such an API into something a task can simply
//! `.await`: it suspends the current task until the callback fires, and supports telling the host
//! to abort the underlying operation if the waiting task is cancelled first.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;
use crate::future::Future as Settlement;
use crate::scheduler;

/// A hook invoked if the waiting task is cancelled before the callback-style operation completes,
/// used to tell the host to abort it.
pub type OnCancel = Box<dyn FnOnce()>;

/// Options for [`cb_to_tf_with_options`], mirroring [`crate::pipe::MapOptions`]'s builder style.
#[derive(Debug, Clone, Copy, Default)]
pub struct CbOptions {
    schedule: bool,
}

impl CbOptions {
    /// Default options: no scheduling indirection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// If `true`, the completion callback is routed through the bound [`crate::host::Host`]'s
    /// [`crate::host::Host::schedule`] before it settles the waiting task, escaping whatever
    /// fast-event context the host callback fired in. Default `false` (settle immediately, on
    /// whatever call stack the host invokes the callback from).
    #[must_use]
    pub fn schedule(mut self, schedule: bool) -> Self {
        self.schedule = schedule;
        self
    }
}

/// Adapts a single call to a callback-style host API into a suspension point.
///
/// `start` is invoked exactly once, synchronously, with a `complete` callback that the host API
/// must call exactly once (whenever it finishes) to deliver its result. `start` may return an
/// [`OnCancel`] hook; if the calling task is cancelled while still waiting, that hook is invoked
/// so the host can abort the underlying operation, and this function returns
/// `Err(Error::Cancelled)`.
///
/// The result is wrapped in `Rc` rather than requiring `T: Clone`, since host callback results are
/// typically produced once and only need to be read back by the single waiter here.
///
/// # Panics
///
/// Panics if called outside of a task.
pub async fn cb_to_tf<T: 'static>(
    start: impl FnOnce(Box<dyn FnOnce(T)>) -> Option<OnCancel>,
) -> Result<Rc<T>> {
    cb_to_tf_with_options(start, |_value| {}, CbOptions::new()).await
}

/// Like [`cb_to_tf`], but if `start`'s completion callback fires *after* the waiting task was
/// already cancelled (the host operation could not be aborted in time, or simply raced the
/// cancellation), `cleanup` is invoked with the late result instead of it being discarded -- the
/// hook this crate's `cb_to_tf` family exists to give callers a place to release whatever resource
/// the callback handed back (a buffer, a file handle) once nothing is waiting to consume it.
///
/// # Panics
///
/// Panics if called outside of a task.
pub async fn cb_to_tf_with_cleanup<T: 'static>(
    start: impl FnOnce(Box<dyn FnOnce(T)>) -> Option<OnCancel>,
    cleanup: impl FnOnce(Rc<T>) + 'static,
) -> Result<Rc<T>> {
    cb_to_tf_with_options(start, cleanup, CbOptions::new()).await
}

/// Full form of the adapter: [`cb_to_tf`] and [`cb_to_tf_with_cleanup`] are both thin callers of
/// this with [`CbOptions::default`].
///
/// # Panics
///
/// Panics if called outside of a task, or if `options.schedule(true)` was set without a
/// [`crate::runtime::Runtime`] having bound a host first.
pub async fn cb_to_tf_with_options<T: 'static>(
    start: impl FnOnce(Box<dyn FnOnce(T)>) -> Option<OnCancel>,
    cleanup: impl FnOnce(Rc<T>) + 'static,
    options: CbOptions,
) -> Result<Rc<T>> {
    let settlement: Settlement<Rc<T>> = Settlement::new();
    let still_waiting = Rc::new(Cell::new(true));
    let host = options.schedule.then(scheduler::current_host);

    let settlement_for_complete = settlement.clone();
    let still_waiting_for_complete = Rc::clone(&still_waiting);
    let complete: Box<dyn FnOnce(T)> = Box::new(move |value| {
        let resolve: Box<dyn FnOnce()> = Box::new(move || {
            let value = Rc::new(value);
            if still_waiting_for_complete.get() {
                settlement_for_complete.complete(value);
            } else {
                cleanup(value);
            }
        });
        match host {
            Some(host) => host.schedule(resolve),
            None => resolve(),
        }
    });

    let on_cancel = start(complete);

    match settlement.pawait_in_task().await {
        Ok(value) => Ok(value),
        Err(error) => {
            still_waiting.set(false);
            if let Some(on_cancel) = on_cancel {
                on_cancel();
            }
            Err(error)
        }
    }
}
