//! The process-wide running-task slot and the primitives built directly on top of it: `yield_`,
//! `pyield`, `pcall`, and host-driven sleeping.
//!
//! There is, by design, at most one task running at any instant. `CURRENT_TASK` is that single
//! slot; every `resume` saves the previous occupant, installs itself, and restores the previous
//! occupant on the way out (via `scopeguard`), exactly mirroring a single mutable "currently
//! running coroutine" variable rather than a general-purpose executor queue.

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt as _;

use crate::error::{Error, Result};
use crate::host::Host;
use crate::task::{BodyPoll, Status, TaskControl, TaskId};
use crate::value::Values;

thread_local! {
    static CURRENT_TASK: RefCell<Option<Rc<dyn TaskControl>>> = const { RefCell::new(None) };
    static HOST: RefCell<Option<Rc<dyn Host>>> = const { RefCell::new(None) };
}

/// Binds the [`Host`] that free functions like [`sleep`] and [`sleep_until_nonfast`] use.
///
/// Called once by [`crate::runtime::Runtime::new`]; not part of the public API.
pub(crate) fn bind_host(host: Rc<dyn Host>) {
    HOST.with(|cell| *cell.borrow_mut() = Some(host));
}

pub(crate) fn current_host() -> Rc<dyn Host> {
    HOST.with(|cell| cell.borrow().clone())
        .unwrap_or_else(|| panic!("no Host is bound; construct a Runtime before using this API"))
}

pub(crate) fn current_erased() -> Option<Rc<dyn TaskControl>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

/// Returns the identifier of the currently running task, or `None` if called outside of one.
#[must_use]
pub fn running() -> Option<TaskId> {
    current_erased().map(|task| task.id())
}

/// Returns `true` if the currently running task has been flagged for cancellation.
///
/// # Panics
///
/// Panics if called outside of a task.
#[must_use]
pub fn is_cancelled() -> bool {
    current_erased()
        .unwrap_or_else(|| panic!("is_cancelled() called outside of a task"))
        .is_cancelled()
}

/// Clears the cancellation flag on the currently running task, letting it keep going instead of
/// unwinding at the next `pyield`.
///
/// # Panics
///
/// Panics if called outside of a task.
pub fn unset_cancelled() {
    current_erased()
        .unwrap_or_else(|| panic!("unset_cancelled() called outside of a task"))
        .set_cancelled(false);
}

/// Resumes a suspended task, driving it until its next suspension point or completion.
///
/// This is the only place that mutates [`CURRENT_TASK`]. If resume is called recursively (a
/// running task resumes another task directly, as cancellation does), the previous occupant is
/// marked [`Status::Normal`] for the duration and restored to [`Status::Running`] afterwards.
///
/// # Panics
///
/// Panics if `task` is not [`Status::Suspended`].
pub(crate) fn resume_erased(task: &Rc<dyn TaskControl>, args: Values) {
    let status = task.status();
    assert_eq!(
        status,
        Status::Suspended,
        "tried to resume task {} which is {status:?}, not Suspended",
        task.id()
    );

    task.set_pending_resume(args);

    let previous = CURRENT_TASK.with(|cell| cell.borrow_mut().replace(Rc::clone(task)));
    if let Some(previous) = &previous {
        previous.set_status(Status::Normal);
    }
    let restore = scopeguard::guard(previous, |previous| {
        CURRENT_TASK.with(|cell| *cell.borrow_mut() = previous.clone());
        if let Some(previous) = &previous {
            previous.set_status(Status::Running);
        }
    });

    task.set_status(Status::Running);
    let outcome = task.poll_body();
    drop(restore);

    match outcome {
        BodyPoll::Pending => task.set_status(Status::Suspended),
        BodyPoll::Done => {
            task.set_status(Status::Dead);
            tracing::trace!(task = %task.id(), "task finished");
        }
    }
}

/// Resumes `task` only if it is currently suspended; otherwise a no-op.
///
/// Used for wake-ups triggered from the outside (a future settling, a queue item arriving) where
/// the target may have already finished or been cancelled by the time the wake-up runs.
pub(crate) fn try_resume(task: &Rc<dyn TaskControl>, args: Values) -> bool {
    if task.status() != Status::Suspended {
        return false;
    }
    resume_erased(task, args);
    true
}

/// A future that is `Pending` exactly once, then `Ready`.
///
/// Awaiting it inside a task body is what makes that body's `poll` return `Pending`, i.e. what
/// makes the task suspend. Resumption is never driven by waking this future -- it is driven by
/// an explicit, later call to [`resume_erased`] -- so the waker it is polled with is irrelevant.
struct SuspendOnce {
    polled: bool,
}

impl StdFuture for SuspendOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            Poll::Pending
        }
    }
}

/// What a [`pyield`] suspension resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Yielded {
    /// The task was resumed normally, with the values passed to `resume`.
    Resumed(Values),
    /// The task was cancelled while suspended.
    Cancelled,
}

/// The protected low-level suspension point: yields `args` out to whoever eventually resumes this
/// task, and reports whether the resumption was a normal resume or a cancellation, without
/// panicking either way.
///
/// This is the primitive [`crate::future::Future::pawait_in_task`], [`crate::sync::Queue::pop`],
/// [`crate::sync::Semaphore::acquire`], [`sleep`], and [`yield_`] are all built on.
///
/// # Panics
///
/// Panics if called outside of a task, or if the current task is already cancelled (callers must
/// `unset_cancelled()` first if they intend to keep running past a cancellation request).
pub async fn pyield(args: Values) -> Yielded {
    let task = current_erased().unwrap_or_else(|| panic!("pyield() called outside of a task"));
    assert!(
        !task.is_cancelled(),
        "pyield() called inside a cancelled task {}; call unset_cancelled() first",
        task.id()
    );

    tracing::trace!(task = %task.id(), "pyield: suspending");
    SuspendOnce { polled: false }.await;

    match current_erased() {
        Some(current) if Rc::ptr_eq(&current, &task) => {}
        _ => panic!(
            "task {} was resumed outside of the scheduler's resume() path",
            task.id()
        ),
    }

    if task.is_cancelled() {
        Yielded::Cancelled
    } else {
        Yielded::Resumed(task.take_pending_resume())
    }
}

/// The unprotected counterpart to [`pyield`]: suspends, and re-raises cancellation as
/// `Err(Error::Cancelled)` through the ordinary `?` operator rather than requiring the caller to
/// match on [`Yielded`].
///
/// # Panics
///
/// Same as [`pyield`].
pub async fn yield_(args: Values) -> Result<Values> {
    match pyield(args).await {
        Yielded::Resumed(values) => Ok(values),
        Yielded::Cancelled => Err(Error::Cancelled),
    }
}

/// Suspends with no payload, for internal primitives that only care whether they were resumed
/// normally or cancelled (the actual value they are waiting for, if any, travels out of band).
pub(crate) async fn suspend() -> Result<()> {
    match pyield(Values::new()).await {
        Yielded::Resumed(_) => Ok(()),
        Yielded::Cancelled => Err(Error::Cancelled),
    }
}

/// Suspends the current task for at least `duration`, using the bound [`Host`]'s timer.
///
/// # Panics
///
/// Panics if called outside of a task.
pub async fn sleep(duration: Duration) -> Result<()> {
    let task = current_erased().unwrap_or_else(|| panic!("sleep() called outside of a task"));
    let host = current_host();
    let resumer = Rc::clone(&task);
    let timer = host.start_timer(
        duration,
        Box::new(move || {
            try_resume(&resumer, Values::new());
        }),
    );
    let result = suspend().await;
    timer.cancel();
    result
}

/// If the current task is running inside a "fast event" (per [`Host::in_fast_event`], e.g. an
/// editor autocommand or similarly latency-sensitive callback), suspends until the host schedules
/// it to run outside of one. Otherwise returns immediately.
///
/// # Panics
///
/// Panics if called outside of a task.
pub async fn sleep_until_nonfast() -> Result<()> {
    let host = current_host();
    if !host.in_fast_event() {
        return Ok(());
    }
    let task =
        current_erased().unwrap_or_else(|| panic!("sleep_until_nonfast() called outside of a task"));
    let resumer = Rc::clone(&task);
    host.schedule(Box::new(move || {
        try_resume(&resumer, Values::new());
    }));
    suspend().await
}

/// Blocking counterpart to [`sleep_until_nonfast`], for callers outside of any task (only
/// [`crate::future::Future::wait`] calls this).
///
/// If the host reports it is in a fast event, schedules a callback via [`Host::schedule`] and
/// busy-polls [`Host::blocking_wait`] until that callback runs, exactly mirroring the suspending
/// version's "schedule a resume, then wait for it" shape without needing a task to suspend.
pub(crate) fn blocking_sleep_until_nonfast(host: &dyn Host, interval: Duration) {
    if !host.in_fast_event() {
        return;
    }
    let escaped = Rc::new(std::cell::Cell::new(false));
    let escaped_for_callback = Rc::clone(&escaped);
    host.schedule(Box::new(move || escaped_for_callback.set(true)));
    while !escaped.get() {
        host.blocking_wait(interval);
    }
}

/// Extracts a human-readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked with a non-string payload".to_owned()
    }
}

/// Runs `body` to completion, converting a panic unwinding out of it into
/// `Err(Error::Failed(..))` instead of letting it propagate into the caller of `resume`.
///
/// In the source environment this exists to let a suspension inside a protected call bridge
/// across its call boundary, something the host's own protected-call primitive could not do on
/// its own. In this crate, `.await` already composes transparently across suspension points, so
/// here `pcall` mainly exists to give pipe stages and worker bodies a single place to convert a
/// panic (e.g. from careless user-supplied callback logic) into an ordinary `Result`.
pub async fn pcall<T>(body: impl StdFuture<Output = Result<T>>) -> Result<T> {
    match std::panic::AssertUnwindSafe(body).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::failed(panic_message(&*payload))),
    }
}
