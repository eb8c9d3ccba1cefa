//! FIFO queue and counting semaphore whose blocking operations suspend the current task instead
//! of blocking an OS thread.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use negative_impl::negative_impl;

use crate::error::{Error, Result};
use crate::scheduler::{current_erased, suspend, try_resume};
use crate::task::TaskControl;

struct QueueInner<T> {
    values: VecDeque<T>,
    waiters: VecDeque<(Rc<dyn TaskControl>, Rc<RefCell<Option<T>>>)>,
}

/// An unbounded FIFO queue. [`Queue::pop`] suspends the calling task while the queue is empty,
/// rather than blocking.
pub struct Queue<T> {
    inner: Rc<RefCell<QueueInner<T>>>,
}

// Manual impl: a derived `Clone` would add a spurious `T: Clone` bound, since cloning a handle
// only clones the `Rc`, never the buffered values.
impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

#[negative_impl]
impl<T> !Send for Queue<T> {}
#[negative_impl]
impl<T> !Sync for Queue<T> {}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Queue")
            .field("len", &inner.values.len())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueInner {
                values: VecDeque::new(),
                waiters: VecDeque::new(),
            })),
        }
    }

    /// The number of values currently buffered (not counting anything a waiting `pop` is owed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().values.len()
    }

    /// `true` if there are no buffered values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a value. If a task is already suspended in [`Queue::pop`], the value is handed to
    /// it directly and it is resumed; otherwise the value is buffered.
    pub fn push(&self, value: T) {
        let mut inner = self.inner.borrow_mut();
        if let Some((task, slot)) = inner.waiters.pop_front() {
            drop(inner);
            *slot.borrow_mut() = Some(value);
            try_resume(&task, Vec::new());
        } else {
            inner.values.push_back(value);
        }
    }

    /// Pops the next value, suspending the current task until one is pushed if the queue is
    /// empty.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn pop(&self) -> Result<T> {
        if let Some(value) = self.inner.borrow_mut().values.pop_front() {
            return Ok(value);
        }

        let task = current_erased().unwrap_or_else(|| panic!("Queue::pop called outside of a task"));
        let slot = Rc::new(RefCell::new(None));
        self.inner
            .borrow_mut()
            .waiters
            .push_back((Rc::clone(&task), Rc::clone(&slot)));

        if suspend().await.is_err() {
            self.inner
                .borrow_mut()
                .waiters
                .retain(|(waiting, _)| !Rc::ptr_eq(waiting, &task));
            return Err(Error::Cancelled);
        }

        Ok(slot
            .borrow_mut()
            .take()
            .expect("queue waiter resumed without its value being delivered"))
    }
}

struct SemaphoreInner {
    permits: usize,
    waiters: VecDeque<Rc<dyn TaskControl>>,
}

/// A counting semaphore. [`Semaphore::acquire`] suspends the calling task while no permits are
/// available, rather than blocking.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<SemaphoreInner>>,
}

#[negative_impl]
impl !Send for Semaphore {}
#[negative_impl]
impl !Sync for Semaphore {}

impl std::fmt::Debug for SemaphoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemaphoreInner")
            .field("permits", &self.permits)
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

impl Semaphore {
    /// Creates a semaphore with `permits` initially available.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SemaphoreInner {
                permits,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// The number of permits currently available (not counting any promised to a waiter that has
    /// not yet resumed).
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.borrow().permits
    }

    /// Acquires a permit, suspending the current task until one is available.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn acquire(&self) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.permits > 0 {
                inner.permits -= 1;
                return Ok(());
            }
        }

        let task =
            current_erased().unwrap_or_else(|| panic!("Semaphore::acquire called outside of a task"));
        self.inner.borrow_mut().waiters.push_back(Rc::clone(&task));

        if suspend().await.is_err() {
            self.inner
                .borrow_mut()
                .waiters
                .retain(|waiting| !Rc::ptr_eq(waiting, &task));
            return Err(Error::Cancelled);
        }

        Ok(())
    }

    /// Releases a permit. If a task is waiting in [`Semaphore::acquire`], the permit is handed
    /// directly to the longest-waiting one and it is resumed, without ever incrementing the
    /// available count.
    pub fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(task) = inner.waiters.pop_front() {
            drop(inner);
            try_resume(&task, Vec::new());
        } else {
            inner.permits += 1;
        }
    }

    /// Runs `body` while holding one permit, releasing it afterwards even if `body` returns an
    /// error (including cancellation).
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task.
    pub async fn with_permit<T, F>(&self, body: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.acquire().await?;
        let guard = scopeguard::guard((), |()| self.release());
        let result = body.await;
        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error as CrateError;
    use crate::task::spawn;

    #[test]
    fn push_then_pop_returns_value_without_suspending() {
        let queue = Queue::new();
        queue.push(1);
        let handle = spawn(async move {
            let value = queue.pop().await?;
            Ok::<_, CrateError>(value)
        });
        assert!(handle.is_dead());
    }

    #[test]
    fn pop_suspends_until_push() {
        let queue = Queue::new();
        let queue2 = queue.clone();
        let handle = spawn(async move {
            let value = queue2.pop().await?;
            Ok::<_, CrateError>(value)
        });
        assert_eq!(handle.status(), crate::task::Status::Suspended);
        queue.push(42);
        assert!(handle.is_dead());
    }

    #[test]
    fn cancelling_a_waiting_pop_removes_it_from_the_waiter_list() {
        let queue: Queue<i64> = Queue::new();
        let queue2 = queue.clone();
        let handle = spawn(async move {
            let result = queue2.pop().await;
            assert_eq!(result, Err(CrateError::Cancelled));
            Ok::<_, CrateError>(())
        });
        handle.cancel(false);
        assert!(handle.is_dead());
        assert_eq!(queue.inner.borrow().waiters.len(), 0);
        queue.push(1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn semaphore_hands_permit_directly_to_waiter() {
        let sem = Semaphore::new(0);
        let sem2 = sem.clone();
        let handle = spawn(async move {
            sem2.acquire().await?;
            Ok::<_, CrateError>(())
        });
        assert_eq!(handle.status(), crate::task::Status::Suspended);
        sem.release();
        assert!(handle.is_dead());
        assert_eq!(sem.available(), 0);
    }
}
