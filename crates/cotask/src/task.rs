//! Tasks: a suspendable unit of work plus the handle used to observe and cancel it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use negative_impl::negative_impl;

use crate::cancel::CancelOutcome;
use crate::error::{Error, Result};
use crate::future::Future as Settlement;
use crate::scheduler;
use crate::value::Values;
use crate::{cancel, pcall};

/// A monotonically increasing task identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

thread_local! {
    static NEXT_TASK_ID: Cell<u64> = const { Cell::new(1) };
}

fn next_task_id() -> TaskId {
    NEXT_TASK_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        TaskId(id)
    })
}

/// The lifecycle state of a task, mirroring a coroutine's `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not currently running; waiting to be resumed.
    Suspended,
    /// Actively executing (it is the one in [`scheduler::running`]).
    Running,
    /// Running, but has itself resumed another task and is waiting for that nested resume to
    /// return control.
    Normal,
    /// Finished (successfully, with an error, or cancelled) and will never run again.
    Dead,
}

/// Type-erased, object-safe view of a task, used by the scheduler and cancellation machinery
/// which must operate over a collection of tasks producing different output types.
pub(crate) trait TaskControl: fmt::Debug {
    fn id(&self) -> TaskId;
    fn status(&self) -> Status;
    fn set_status(&self, status: Status);
    fn is_cancelled(&self) -> bool;
    fn set_cancelled(&self, value: bool);
    fn take_pending_resume(&self) -> Values;
    fn set_pending_resume(&self, values: Values);
    fn poll_body(&self) -> BodyPoll;
    fn register_child(&self, child: Weak<dyn TaskControl>);
    fn live_children(&self) -> Vec<Rc<dyn TaskControl>>;
}

/// Outcome of driving a task's body one step.
pub(crate) enum BodyPoll {
    /// The body yielded; it is not finished.
    Pending,
    /// The body ran to completion (the task's result [`Settlement`] has been settled).
    Done,
}

struct Inner<T> {
    id: TaskId,
    status: Cell<Status>,
    cancelled: Cell<bool>,
    pending_resume: RefCell<Values>,
    body: RefCell<Option<Pin<Box<dyn std::future::Future<Output = Result<T>>>>>>,
    settlement: Settlement<T>,
    children: RefCell<Vec<Weak<dyn TaskControl>>>,
}

impl<T> fmt::Debug for Inner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("id", &self.id)
            .field("status", &self.status.get())
            .field("cancelled", &self.cancelled.get())
            .finish_non_exhaustive()
    }
}

impl<T> TaskControl for Inner<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn status(&self) -> Status {
        self.status.get()
    }

    fn set_status(&self, status: Status) {
        self.status.set(status);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    fn set_cancelled(&self, value: bool) {
        self.cancelled.set(value);
    }

    fn take_pending_resume(&self) -> Values {
        std::mem::take(&mut *self.pending_resume.borrow_mut())
    }

    fn set_pending_resume(&self, values: Values) {
        *self.pending_resume.borrow_mut() = values;
    }

    fn poll_body(&self) -> BodyPoll {
        let mut body_slot = self.body.borrow_mut();
        let Some(body) = body_slot.as_mut() else {
            return BodyPoll::Done;
        };
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match body.as_mut().poll(&mut cx) {
            Poll::Pending => BodyPoll::Pending,
            Poll::Ready(result) => {
                *body_slot = None;
                drop(body_slot);
                match result {
                    Ok(value) => self.settlement.complete(value),
                    Err(error) => self.settlement.fail(error),
                }
                BodyPoll::Done
            }
        }
    }

    fn register_child(&self, child: Weak<dyn TaskControl>) {
        self.children.borrow_mut().push(child);
    }

    fn live_children(&self) -> Vec<Rc<dyn TaskControl>> {
        let mut children = self.children.borrow_mut();
        children.retain(|child| child.strong_count() > 0);
        children.iter().filter_map(Weak::upgrade).collect()
    }
}

/// A handle to a spawned task.
///
/// Cloning a `TaskHandle` is cheap (it is reference-counted) and all clones refer to the same
/// underlying task.
#[derive(Debug)]
pub struct TaskHandle<T: 'static> {
    inner: Rc<Inner<T>>,
}

// Manual impl: a derived `Clone` would add a spurious `T: Clone` bound, since cloning a handle
// only clones the `Rc`, never the task's eventual output.
impl<T: 'static> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

#[negative_impl]
impl<T> !Send for TaskHandle<T> {}
#[negative_impl]
impl<T> !Sync for TaskHandle<T> {}

impl<T: 'static> TaskHandle<T> {
    /// Creates a suspended task from an async body. The task does not run until it is resumed,
    /// directly via [`TaskHandle::resume`] or as a side effect of [`crate::spawn`].
    pub(crate) fn create(body: impl std::future::Future<Output = Result<T>> + 'static) -> Self {
        let parent = scheduler::current_erased();
        let inner = Rc::new(Inner {
            id: next_task_id(),
            status: Cell::new(Status::Suspended),
            cancelled: Cell::new(false),
            pending_resume: RefCell::new(Values::new()),
            body: RefCell::new(Some(Box::pin(body))),
            settlement: Settlement::new(),
            children: RefCell::new(Vec::new()),
        });
        let erased: Rc<dyn TaskControl> = Rc::clone(&inner) as Rc<dyn TaskControl>;
        if let Some(parent) = parent {
            parent.register_child(Rc::downgrade(&erased));
        }
        tracing::trace!(task = %inner.id, "task created");
        Self { inner }
    }

    pub(crate) fn erased(&self) -> Rc<dyn TaskControl> {
        Rc::clone(&self.inner) as Rc<dyn TaskControl>
    }

    /// This task's unique identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The task's current lifecycle state.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// Returns `true` once the task has finished, however it finished.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.inner.status.get() == Status::Dead
    }

    /// Resumes a suspended task, driving it until its next suspension point or completion.
    ///
    /// # Panics
    ///
    /// Panics if the task is not [`Status::Suspended`].
    pub fn resume(&self, args: Values) {
        scheduler::resume_erased(&self.erased(), args);
    }

    /// Requests cancellation of this task (and, unless `orphan` is set, its live children,
    /// recursively).
    ///
    /// # Panics
    ///
    /// Panics if the task is currently [`Status::Running`] or [`Status::Normal`] -- a task cannot
    /// cancel itself synchronously; call [`is_cancelled`](crate::is_cancelled) /
    /// [`unset_cancelled`](crate::unset_cancelled) from within the task instead.
    pub fn cancel(&self, orphan: bool) -> CancelOutcome {
        cancel::cancel_erased(&self.erased(), orphan)
    }

    /// Suspends the current task until this task finishes, consuming the result. Does not
    /// require `T: Clone`, but must not be called more than once on the same handle (nor mixed
    /// with [`TaskHandle::pwait_once`]).
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task, if the task is cancelled when this is called, or if
    /// the result was already consumed.
    pub async fn wait_once(&self) -> Result<T> {
        self.inner.settlement.await_once().await
    }

    /// Protected, single-consumption suspend: like [`TaskHandle::wait_once`], but returns
    /// `Err(Error::Cancelled)` instead of panicking if the *waiting* task is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task, or if the result was already consumed.
    pub async fn pwait_once(&self) -> Result<T> {
        self.inner.settlement.pawait_once().await
    }
}

impl<T: Clone + 'static> TaskHandle<T> {
    /// Suspends the current task until this task finishes, re-raising cancellation.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn wait(&self) -> Result<T> {
        self.inner.settlement.await_in_task().await
    }

    /// Protected suspend: waits for this task to finish, returning `Err(Error::Cancelled)`
    /// instead of panicking if the *waiting* task is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn pwait(&self) -> Result<T> {
        self.inner.settlement.pawait_in_task().await
    }

    /// Non-suspending wait, for callers outside of any task.
    pub fn wait_blocking(
        &self,
        host: &dyn crate::host::Host,
        timeout: std::time::Duration,
        interval: std::time::Duration,
    ) -> Option<Result<T>> {
        self.inner.settlement.wait(host, timeout, interval)
    }
}

/// Spawns a new task running `body` to completion and immediately resumes it once.
///
/// This is the ordinary way to start a task: `create` + first `resume`, mirroring how a coroutine
/// is created suspended but a task is expected to make initial progress right away.
///
/// # Panics
///
/// Propagates any panic from the body's first synchronous segment (up to its first suspension
/// point); wrap the body with [`pcall`] to convert panics into an `Err` instead.
pub fn spawn<T: 'static>(
    body: impl std::future::Future<Output = Result<T>> + 'static,
) -> TaskHandle<T> {
    let handle = TaskHandle::create(body);
    handle.resume(Values::new());
    handle
}

/// Spawns a task whose body is wrapped in [`pcall`], so a panic inside it becomes
/// `Err(Error::Failed(..))` rather than unwinding into the caller of `resume`.
pub fn spawn_guarded<T: 'static>(
    body: impl std::future::Future<Output = Result<T>> + 'static,
) -> TaskHandle<T> {
    spawn(async move { pcall(body).await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_runs_synchronously_to_first_yield() {
        let handle = spawn(async { Ok::<_, Error>(1 + 1) });
        assert!(handle.is_dead());
    }

    #[test]
    fn spawn_suspends_across_pyield() {
        let handle = spawn(async {
            crate::yield_(Values::new()).await?;
            Ok::<_, Error>(42)
        });
        assert_eq!(handle.status(), Status::Suspended);
        handle.resume(Values::new());
        assert!(handle.is_dead());
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = spawn(async { Ok::<_, Error>(()) });
        let b = spawn(async { Ok::<_, Error>(()) });
        assert!(b.id() > a.id());
    }
}
