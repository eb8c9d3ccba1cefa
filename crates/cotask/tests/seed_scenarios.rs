#![cfg(feature = "test-util")]

//! End-to-end scenarios exercising tasks, futures, and pipes together, the way an embedding
//! application would actually use them rather than one primitive in isolation.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use cotask::testing::TestHost;
use cotask::{Error, Future, MapOptions, Pipe, Runtime};

#[test]
fn sleep_then_return_resolves_once_the_host_advances_past_the_deadline() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let mutated = Rc::new(Cell::new(false));
    let mutated_for_body = Rc::clone(&mutated);
    let handle = cotask::spawn(async move {
        cotask::sleep(Duration::from_millis(15)).await?;
        mutated_for_body.set(true);
        Ok::<_, Error>(42)
    });

    let result = handle.wait_blocking(host.as_ref(), Duration::from_millis(100), Duration::from_millis(2));
    assert_eq!(result, Some(Ok(42)));
    assert!(mutated.get());
}

#[test]
fn wait_blocking_escapes_a_fast_event_before_polling_and_still_observes_a_later_completion() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);
    host.set_fast_event(true);

    let handle = cotask::spawn(async {
        cotask::sleep(Duration::from_millis(10)).await?;
        Ok::<_, Error>(99)
    });

    let result = handle.wait_blocking(host.as_ref(), Duration::from_millis(100), Duration::from_millis(2));
    assert_eq!(result, Some(Ok(99)));
}

#[test]
fn cancelling_before_wait_is_observed_without_running_the_sleeping_body_further() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let mutated = Rc::new(Cell::new(false));
    let mutated_for_body = Rc::clone(&mutated);
    let handle = cotask::spawn(async move {
        cotask::sleep(Duration::from_millis(15)).await?;
        mutated_for_body.set(true);
        Ok::<_, Error>(42)
    });

    handle.cancel(false);
    let result = handle.wait_blocking(host.as_ref(), Duration::from_millis(100), Duration::from_millis(2));
    assert_eq!(result, Some(Err(Error::Cancelled)));
    assert!(!mutated.get());
}

#[test]
fn pawait_on_a_cancelled_task_reports_cancelled_and_a_late_complete_does_not_panic() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host as Rc<dyn cotask::Host>);

    let future: Future<i64> = Future::new();
    let future_for_body = future.clone();
    let handle = cotask::spawn(async move {
        let result = future_for_body.pawait_in_task().await;
        assert_eq!(result, Err(Error::Cancelled));
        Ok::<_, Error>(())
    });

    handle.cancel(false);
    assert!(handle.is_dead());

    // The task already gave up waiting; completing the future afterwards must be harmless.
    future.complete(7);
}

#[test]
fn cancelling_a_parent_recursively_cancels_its_live_child_unless_orphaned() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host as Rc<dyn cotask::Host>);

    let child_cancelled = Rc::new(Cell::new(false));
    let child_cancelled_for_child = Rc::clone(&child_cancelled);
    let parent_cancelled = Rc::new(Cell::new(false));
    let parent_cancelled_for_parent = Rc::clone(&parent_cancelled);

    let parent = cotask::spawn(async move {
        let child = cotask::task::spawn(async move {
            let result = cotask::sleep(Duration::from_millis(1000)).await;
            child_cancelled_for_child.set(result == Err(Error::Cancelled));
            result
        });
        let result = cotask::yield_(Vec::new()).await;
        parent_cancelled_for_parent.set(result.is_err());
        let _ = child;
        Ok::<_, Error>(())
    });

    parent.cancel(false);
    assert!(parent.is_dead());
    assert!(parent_cancelled.get());
    assert!(child_cancelled.get());
}

#[test]
fn orphaning_a_cancelled_parent_leaves_its_child_running() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let child_cancelled = Rc::new(Cell::new(false));
    let child_cancelled_for_child = Rc::clone(&child_cancelled);
    let child_handle_slot: Rc<Cell<Option<cotask::TaskHandle<()>>>> = Rc::new(Cell::new(None));
    let child_handle_for_parent = Rc::clone(&child_handle_slot);

    let parent = cotask::spawn(async move {
        let child = cotask::task::spawn(async move {
            let result = cotask::sleep(Duration::from_millis(1000)).await;
            child_cancelled_for_child.set(result == Err(Error::Cancelled));
            Ok::<_, Error>(())
        });
        child_handle_for_parent.set(Some(child));
        cotask::yield_(Vec::new()).await?;
        Ok::<_, Error>(())
    });

    parent.cancel(true);
    assert!(parent.is_dead());
    let child = child_handle_slot.take().expect("child was spawned");
    assert!(!child.is_dead());

    host.advance(Duration::from_millis(1000));
    assert!(child.is_dead());
    assert!(!child_cancelled.get());
}

#[test]
fn pipe_with_ordered_output_preserves_input_order_under_parallel_workers() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let pipe = Pipe::new(vec![3_i64, 2, 1]).map(
        |x| async move {
            cotask::sleep(Duration::from_millis(x as u64)).await?;
            Ok(Some(x * 2))
        },
        MapOptions::new().ordered(true).parallel(2),
    );

    let handle = cotask::task::spawn({
        let pipe = pipe.clone();
        async move { Ok::<_, Error>(pipe.totable().await) }
    });
    host.advance(Duration::from_millis(10));
    assert!(handle.is_dead());
}

#[test]
fn runtime_inherent_methods_forward_to_the_task_and_pipe_primitives() {
    let host = Rc::new(TestHost::new());
    let runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let handle = runtime.spawn(async { Ok::<_, Error>(5) });
    assert!(handle.is_dead());

    let pipe = runtime.pipe(vec![1_i64, 2, 3]);
    let drain = cotask::task::spawn({
        let pipe = pipe.clone();
        async move { Ok::<_, Error>(pipe.totable().await) }
    });
    assert!(drain.is_dead());
    assert_eq!(drain.wait_blocking(host.as_ref(), Duration::ZERO, Duration::from_millis(1)), Some(Ok(vec![1, 2, 3])));

    let runtime_with_default = cotask::RuntimeBuilder::new()
        .host(host as Rc<dyn cotask::Host>)
        .default_parallel(4)
        .build();
    let options: MapOptions<i64, i64> = runtime_with_default.map_options(MapOptions::new());
    assert!(options.has_explicit_parallel());
}

#[test]
fn pipe_timeout_records_one_report_entry_per_expired_item() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let pipe = Pipe::new(vec![1_i64, 3, 2, 1]).map(
        |x| async move {
            cotask::sleep(Duration::from_millis((x * 2) as u64)).await?;
            Ok(Some(x * 2))
        },
        MapOptions::new().timeout(Duration::from_millis(5)),
    );

    let handle = cotask::task::spawn({
        let pipe = pipe.clone();
        async move { Ok::<_, Error>(pipe.totable().await) }
    });
    host.advance(Duration::from_millis(20));
    assert!(handle.is_dead());

    let timeouts = pipe
        .report()
        .into_iter()
        .filter(|error| matches!(error.kind, cotask::PipeErrorKind::Timeout))
        .count();
    assert!(timeouts > 0, "expected at least one item to time out");
}

#[test]
fn pipe_catch_hook_replaces_the_error_and_totable_skips_the_failed_items() {
    let host = Rc::new(TestHost::new());
    let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);

    let pipe = Pipe::new(vec![1_i64, 3, 2, 1]).map(
        |x| async move {
            if x > 1 {
                return Err(Error::Failed(format!("{x}")));
            }
            Ok(Some(x * 2))
        },
        MapOptions::new().catch(|error, original| {
            cotask::CatchOutcome::Fail(Error::Failed(format!("{error} is too big by {}", *original - 1)))
        }),
    );

    let handle = cotask::task::spawn({
        let pipe = pipe.clone();
        async move { Ok::<_, Error>(pipe.totable().await) }
    });
    host.advance(Duration::ZERO);
    assert!(handle.is_dead());

    let mut values: Vec<i64> = handle.wait_blocking(host.as_ref(), Duration::ZERO, Duration::from_millis(1))
        .expect("task already finished")
        .expect("task body returned Ok");
    values.sort_unstable();
    assert_eq!(values, vec![2, 2]);

    let mut messages: Vec<String> = pipe.report().into_iter().map(|error| error.to_string()).collect();
    messages.sort();
    assert_eq!(messages.len(), 2);
}
