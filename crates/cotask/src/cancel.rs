//! Cooperative, structured cancellation.
//!
//! Cancelling a task does not stop it instantly -- there is no preemption in this runtime. It
//! flags the task as cancelled and resumes it once, so that whatever suspension point it is
//! parked at (a `pyield`, a future wait, a queue pop, a semaphore acquire) observes the
//! cancellation and unwinds on its own terms.

use std::rc::Rc;

use crate::scheduler;
use crate::task::{Status, TaskControl};
use crate::value::Values;

/// The result of cancelling a task, recording what happened to it and (unless cancelled with
/// `orphan: true`) to each of its live children, recursively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had already finished; cancellation was a no-op.
    AlreadyDead,
    /// The task was cancelled. `children` holds the outcome for each child that was cancelled
    /// along with it.
    Cancelled {
        /// Outcomes for children cancelled as part of this call.
        children: Vec<CancelOutcome>,
    },
}

impl CancelOutcome {
    /// `true` if the target task was actually live and got cancelled (as opposed to already
    /// being dead).
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub(crate) fn cancel_erased(task: &Rc<dyn TaskControl>, orphan: bool) -> CancelOutcome {
    let status = task.status();
    assert!(
        status != Status::Running && status != Status::Normal,
        "task {} cannot cancel itself synchronously; call unset_cancelled() from within it instead",
        task.id()
    );

    if status == Status::Dead {
        return CancelOutcome::AlreadyDead;
    }

    tracing::debug!(task = %task.id(), orphan, "cancelling task");
    task.set_cancelled(true);
    scheduler::resume_erased(task, Values::new());

    let children = if orphan {
        Vec::new()
    } else {
        task.live_children()
            .iter()
            .map(|child| cancel_erased(child, false))
            .collect()
    };

    CancelOutcome::Cancelled { children }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::task::spawn;
    use crate::value::Values;

    use super::*;

    #[test]
    fn cancel_resumes_a_suspended_task_once() {
        let handle = spawn(async {
            crate::yield_(Values::new()).await?;
            Ok::<_, Error>(())
        });
        assert_eq!(handle.status(), Status::Suspended);
        let outcome = handle.cancel(false);
        assert!(outcome.was_cancelled());
        assert!(handle.is_dead());
    }

    #[test]
    fn cancelling_an_already_dead_task_is_a_no_op() {
        let handle = spawn(async { Ok::<_, Error>(()) });
        assert!(handle.is_dead());
        assert_eq!(handle.cancel(false), CancelOutcome::AlreadyDead);
    }

    #[test]
    #[should_panic(expected = "cannot cancel itself")]
    fn self_cancel_panics() {
        let slot: Rc<std::cell::RefCell<Option<crate::task::TaskHandle<()>>>> =
            Rc::new(std::cell::RefCell::new(None));
        let slot_for_body = Rc::clone(&slot);
        let handle = crate::task::TaskHandle::create(async move {
            let me = slot_for_body
                .borrow()
                .clone()
                .expect("handle stored before resume");
            me.cancel(false);
            Ok::<_, Error>(())
        });
        slot.borrow_mut().replace(handle.clone());
        handle.resume(Values::new());
    }
}
