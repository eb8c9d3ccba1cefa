//! An asynchronous, pull-based processing pipeline: a source of items, zero or more `map` stages
//! (each with its own concurrency, throttling, per-item timeout, ordering, and error-recovery
//! policy), and a family of consumers that drain it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use futures::future::LocalBoxFuture;
use negative_impl::negative_impl;

use crate::cancel::CancelOutcome;
use crate::error::{Error, Result};
use crate::future::Future as Settlement;
use crate::host::Host;
use crate::scheduler::{self, sleep};
use crate::sync::{Queue, Semaphore};
use crate::task::{TaskHandle, spawn, spawn_guarded};

/// What a stage's `catch` hook decided to do about an item whose `map` function failed.
#[derive(Debug)]
pub enum CatchOutcome<U> {
    /// Drop the item silently; do not record an error.
    Suppress,
    /// Emit `Some(value)`, or filter the item out with `None`, as if `map` itself had returned
    /// that.
    Emit(Option<U>),
    /// Record a (possibly different) error for this item instead of the original one.
    Fail(Error),
}

type TfFn<T, U> = Rc<dyn Fn(T) -> LocalBoxFuture<'static, Result<Option<U>>>>;
type CatchFn<T, U> = Rc<dyn Fn(&Error, &T) -> CatchOutcome<U>>;

/// Options controlling a [`Pipe::map`] stage.
pub struct MapOptions<T, U> {
    parallel: usize,
    parallel_set: bool,
    throttle: Duration,
    timeout: Option<Duration>,
    ordered: bool,
    catch: Option<CatchFn<T, U>>,
}

impl<T, U> std::fmt::Debug for MapOptions<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapOptions")
            .field("parallel", &self.parallel)
            .field("throttle", &self.throttle)
            .field("timeout", &self.timeout)
            .field("ordered", &self.ordered)
            .field("catch", &self.catch.is_some())
            .finish()
    }
}

impl<T, U> Default for MapOptions<T, U> {
    fn default() -> Self {
        Self {
            parallel: usize::MAX,
            parallel_set: false,
            throttle: Duration::ZERO,
            timeout: None,
            ordered: false,
            catch: None,
        }
    }
}

impl<T, U> MapOptions<T, U> {
    /// Creates the default options: no concurrency limit, no throttle, no timeout, unordered
    /// output, no error recovery.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The maximum number of items processed concurrently by this stage. Values less than 1 are
    /// treated as 1.
    #[must_use]
    pub fn parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel.max(1);
        self.parallel_set = true;
        self
    }

    /// `true` if [`MapOptions::parallel`] was called explicitly, as opposed to leaving the
    /// unbounded default in place. Used by [`crate::runtime::Runtime::map_options`] to decide
    /// whether a runtime-wide default concurrency limit should apply.
    #[must_use]
    pub fn has_explicit_parallel(&self) -> bool {
        self.parallel_set
    }

    /// The minimum spacing between successive item starts.
    #[must_use]
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// The maximum time an individual item's `map` call is allowed to run before it is cancelled
    /// and recorded as [`PipeErrorKind::Timeout`].
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether output must preserve input order (at the cost of stalling faster items behind
    /// slower earlier ones).
    #[must_use]
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// A hook invoked when an item's `map` call fails, given the error and the original input, to
    /// decide how to recover.
    #[must_use]
    pub fn catch(mut self, catch: impl Fn(&Error, &T) -> CatchOutcome<U> + 'static) -> Self {
        self.catch = Some(Rc::new(catch));
        self
    }
}

/// What kind of failure befell a single pipe item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeErrorKind {
    /// The stage's `map` function (or its `catch` hook) returned an error.
    Failed(String),
    /// The item's per-item timeout elapsed before `map` finished.
    Timeout,
}

/// A single item's failure, tagged with its position in the input sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeError {
    /// The zero-based index of the input item that failed, within its stage.
    pub index: usize,
    /// What went wrong.
    pub kind: PipeErrorKind,
}

impl std::fmt::Display for PipeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            PipeErrorKind::Failed(message) => write!(f, "item {}: {message}", self.index),
            PipeErrorKind::Timeout => write!(f, "item {}: timed out", self.index),
        }
    }
}

#[derive(Debug)]
enum PipeItem<T> {
    Value(T),
    Done,
}

enum PipeSource<T> {
    Iter(Box<dyn Iterator<Item = T>>),
    Stage(Queue<PipeItem<T>>),
}

struct StageState<T, U> {
    tf: TfFn<T, U>,
    catch: Option<CatchFn<T, U>>,
    timeout: Option<Duration>,
    throttle: Duration,
    ordered: bool,
    semaphore: Semaphore,
    next_start: Cell<Instant>,
    output: Queue<PipeItem<U>>,
    errors: Rc<RefCell<Vec<PipeError>>>,
}

/// An asynchronous processing pipeline.
///
/// A `Pipe<T>` is either a source (built from an iterator via [`Pipe::new`]) or the output of a
/// `map` stage chained onto another pipe. Items are pulled lazily, one at a time, via
/// [`Pipe::anext`]; the consumer methods (`collect`, `each`, `fold`, ...) drive that pull loop for
/// common use cases.
pub struct Pipe<T: 'static> {
    source: Rc<RefCell<PipeSource<T>>>,
    /// The task driving this stage (`None` for a plain source pipe, which has no stage to run).
    runner: Option<TaskHandle<()>>,
    /// Errors recorded by *this* stage only. Earlier stages' errors are not retained once their
    /// output has been consumed; call [`Pipe::report`] on each stage if upstream errors matter.
    errors: Rc<RefCell<Vec<PipeError>>>,
}

// Manual impl: every field is already shared by reference (`Rc`, or a `TaskHandle` which is
// itself `Rc`-backed), so cloning a `Pipe` never needs `T: Clone` -- a derived `Clone` would add
// that bound regardless.
impl<T> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Self {
            source: Rc::clone(&self.source),
            runner: self.runner.clone(),
            errors: Rc::clone(&self.errors),
        }
    }
}

#[negative_impl]
impl<T> !Send for Pipe<T> {}
#[negative_impl]
impl<T> !Sync for Pipe<T> {}

impl<T: 'static> Pipe<T> {
    /// Creates a source pipe pulling from `source`, one item at a time, with no concurrency of
    /// its own.
    pub fn new<I>(source: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        Self {
            source: Rc::new(RefCell::new(PipeSource::Iter(Box::new(source.into_iter())))),
            runner: None,
            errors: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Pulls the next item, or `None` once the pipe is exhausted.
    ///
    /// For a stage pipe, suspends the current task while waiting for an item to become available
    /// or for the stage to finish. Cancelling the calling task while waiting ends the pull early,
    /// as if the pipe were exhausted.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a task when this pipe is backed by a stage (a plain source
    /// pipe, with no concurrency of its own, can be pulled from anywhere).
    pub async fn anext(&self) -> Option<T> {
        enum Pulled<T> {
            Direct(Option<T>),
            FromQueue(Queue<PipeItem<T>>),
        }

        let pulled = {
            let mut source = self.source.borrow_mut();
            match &mut *source {
                PipeSource::Iter(iter) => Pulled::Direct(iter.next()),
                PipeSource::Stage(queue) => Pulled::FromQueue(queue.clone()),
            }
        };

        match pulled {
            Pulled::Direct(value) => value,
            Pulled::FromQueue(queue) => match queue.pop().await {
                Ok(PipeItem::Value(value)) => Some(value),
                Ok(PipeItem::Done) => {
                    queue.push(PipeItem::Done);
                    None
                }
                Err(Error::Cancelled) => None,
                Err(error) => unreachable!("Queue::pop cannot fail with {error:?}"),
            },
        }
    }

    /// The errors recorded by this stage so far (an item's failure is recorded here once its
    /// `catch` hook, if any, has run). A plain source pipe never has errors of its own.
    ///
    /// This returns only the stage `report` is called on -- errors from earlier stages in a
    /// chain are not merged in. A caller that needs every stage's errors should call `report` on
    /// each intermediate `Pipe` handle before dropping it.
    #[must_use]
    pub fn report(&self) -> Vec<PipeError> {
        self.errors.borrow().clone()
    }

    /// Suspends the current task until this stage's runner task finishes. Does not close the
    /// pipe -- a consumer may keep pulling from it after `wait` returns. A no-op on a plain
    /// source pipe, which has no runner task.
    pub async fn wait(&self) -> Result<()> {
        match &self.runner {
            Some(runner) => runner.wait().await,
            None => Ok(()),
        }
    }

    /// Protected form of [`Pipe::wait`]: returns `Err(Error::Cancelled)` instead of panicking if
    /// the waiting task is itself cancelled while waiting.
    pub async fn pwait(&self) -> Result<()> {
        match &self.runner {
            Some(runner) => runner.pwait().await,
            None => Ok(()),
        }
    }

    /// Non-suspending wait on this stage's runner task, for callers outside of any task.
    pub fn wait_blocking(&self, host: &dyn Host, timeout: Duration, interval: Duration) -> Option<Result<()>> {
        match &self.runner {
            Some(runner) => runner.wait_blocking(host, timeout, interval),
            None => Some(Ok(())),
        }
    }

    /// Cancels this stage's runner task, which propagates to its worker tasks via structured
    /// cancellation. A no-op (returns `None`) on a plain source pipe, which has no runner task.
    pub fn cancel(&self, orphan: bool) -> Option<CancelOutcome> {
        self.runner.as_ref().map(|runner| runner.cancel(orphan))
    }

    /// Chains a `map` stage onto this pipe: for every item pulled from it, calls `tf` and emits
    /// what it returns (`Ok(Some(value))`), filters it out (`Ok(None)`), or records a
    /// [`PipeError`] (`Err`, unless `options` has a `catch` hook that recovers it).
    ///
    /// The stage starts driving immediately (as its own task, a child of the caller if called
    /// from within one) and runs concurrently with whatever consumes its output.
    pub fn map<U, F, Fut>(self, tf: F, options: MapOptions<T, U>) -> Pipe<U>
    where
        T: Clone,
        U: 'static,
        F: Fn(T) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<Option<U>>> + 'static,
    {
        let output: Queue<PipeItem<U>> = Queue::new();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let host = scheduler::current_host();
        let stage = Rc::new(StageState {
            tf: Rc::new(move |value: T| Box::pin(tf(value)) as LocalBoxFuture<'static, Result<Option<U>>>),
            catch: options.catch,
            timeout: options.timeout,
            throttle: options.throttle,
            ordered: options.ordered,
            semaphore: Semaphore::new(options.parallel.max(1)),
            next_start: Cell::new(host.now()),
            output: output.clone(),
            errors: Rc::clone(&errors),
        });

        let runner = spawn(run_stage(self, stage));

        Pipe {
            source: Rc::new(RefCell::new(PipeSource::Stage(output))),
            runner: Some(runner),
            errors,
        }
    }
}

impl<T: 'static> Pipe<T> {
    /// Pulls up to `n` items, stopping early (with fewer than `n`) if the pipe runs out first.
    /// Does not close the pipe -- further `anext`/`collect` calls continue where this left off.
    pub async fn collect(&self, n: usize) -> Vec<T> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            match self.anext().await {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Drains the pipe into a `Vec`, preserving the order items were pulled in.
    pub async fn totable(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.anext().await {
            items.push(item);
        }
        items
    }

    /// Pulls up to `n` items, then cancels this pipe's runner task.
    ///
    /// # Errors
    ///
    /// Returns `Err(Error::InvalidArgument)` if `n == 0`.
    pub async fn race(&self, n: usize) -> Result<Vec<T>> {
        if n == 0 {
            return Err(Error::InvalidArgument("race requires n >= 1".to_string()));
        }
        let items = self.collect(n).await;
        self.cancel(false);
        Ok(items)
    }

    /// Calls `body` for every item, draining the pipe.
    pub async fn each(&self, mut body: impl FnMut(T)) {
        while let Some(item) = self.anext().await {
            body(item);
        }
    }

    /// Folds every item into an accumulator, draining the pipe.
    pub async fn fold<A>(&self, init: A, mut body: impl FnMut(A, T) -> A) -> A {
        let mut acc = init;
        while let Some(item) = self.anext().await {
            acc = body(acc, item);
        }
        acc
    }

    /// `true` if `predicate` holds for every item (vacuously `true` for an empty pipe). Drains
    /// the whole pipe -- this does not short-circuit, since a `map` stage's side effects (errors,
    /// ordering) are expected to complete regardless of an early verdict.
    pub async fn all(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        let mut result = true;
        while let Some(item) = self.anext().await {
            if !predicate(&item) {
                result = false;
            }
        }
        result
    }

    /// `true` if `predicate` holds for at least one item. Unlike [`Pipe::all`], this stops
    /// pulling and cancels the pipe's runner task as soon as a match is found.
    pub async fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        while let Some(item) = self.anext().await {
            if predicate(&item) {
                self.cancel(false);
                return true;
            }
        }
        false
    }
}

impl<T: Clone + 'static> Pipe<T> {
    /// Blocking pull of one item, for callers outside of any task: spawns a task that calls
    /// [`Pipe::anext`] and blocks on it via the host's `blocking_wait`. Returns `None` on
    /// timeout as well as on ordinary exhaustion.
    pub fn next(&self, host: &dyn Host, timeout: Duration, interval: Duration) -> Option<T> {
        let pipe = self.clone();
        let task = spawn(async move { Ok::<_, Error>(pipe.anext().await) });
        match task.wait_blocking(host, timeout, interval) {
            Some(Ok(item)) => item,
            Some(Err(_)) | None => None,
        }
    }
}

async fn run_stage<T: Clone + 'static, U: 'static>(
    upstream: Pipe<T>,
    stage: Rc<StageState<T, U>>,
) -> Result<()> {
    let mut index = 0usize;
    let mut previous_signal: Option<Settlement<()>> = None;
    let mut workers = Vec::new();

    loop {
        let Some(value) = upstream.anext().await else {
            break;
        };

        let signal = Settlement::new();
        let wait_for = if stage.ordered { previous_signal.take() } else { None };
        if stage.ordered {
            previous_signal = Some(signal.clone());
        }

        workers.push(spawn_guarded(run_item(
            index,
            value,
            Rc::clone(&stage),
            signal,
            wait_for,
        )));
        index += 1;
    }

    if scheduler::is_cancelled() {
        for worker in &workers {
            worker.cancel(false);
        }
        stage.output.push(PipeItem::Done);
        return Err(Error::Cancelled);
    }

    for worker in &workers {
        let _ = worker.pwait().await;
        // A cancellation observed by this task during the await above must not be followed by
        // another suspension here -- `pyield` panics on a second wait once the task is flagged
        // cancelled. Stop draining immediately instead of looping to the next worker's `pwait`.
        if scheduler::is_cancelled() {
            for worker in &workers {
                worker.cancel(false);
            }
            stage.output.push(PipeItem::Done);
            return Err(Error::Cancelled);
        }
    }

    stage.output.push(PipeItem::Done);
    Ok(())
}

async fn run_item<T: Clone + 'static, U: 'static>(
    index: usize,
    value: T,
    stage: Rc<StageState<T, U>>,
    signal: Settlement<()>,
    wait_for_previous: Option<Settlement<()>>,
) -> Result<()> {
    if stage.semaphore.acquire().await.is_err() {
        signal.complete(());
        return Ok(());
    }

    if !stage.throttle.is_zero() {
        let host = scheduler::current_host();
        let now = host.now();
        let mut next_start = stage.next_start.get();
        if next_start < now {
            next_start = now;
        }
        let delay = next_start - now;
        stage.next_start.set(next_start + stage.throttle);
        if !delay.is_zero() && sleep(delay).await.is_err() {
            stage.semaphore.release();
            signal.complete(());
            return Ok(());
        }
    }

    let tf = Rc::clone(&stage.tf);
    let value_for_call = value.clone();
    let sub: TaskHandle<Result<Option<U>>> = spawn_guarded(async move { Ok(tf(value).await) });

    let timed_out = Rc::new(Cell::new(false));
    let watchdog = stage.timeout.map(|timeout| {
        let sub = sub.clone();
        let timed_out = Rc::clone(&timed_out);
        spawn(async move {
            if sleep(timeout).await.is_ok() {
                timed_out.set(true);
                sub.cancel(false);
            }
            Ok::<_, Error>(())
        })
    });

    let outcome = sub.pwait_once().await;

    if let Some(watchdog) = &watchdog {
        if !watchdog.is_dead() {
            watchdog.cancel(false);
        }
    }
    stage.semaphore.release();

    if scheduler::is_cancelled() {
        signal.complete(());
        return Err(Error::Cancelled);
    }

    let resolved = resolve_outcome(index, outcome, timed_out.get(), &stage.catch, &value_for_call);

    if let Some(wait_for_previous) = wait_for_previous {
        if wait_for_previous.pawait_once().await.is_err() {
            signal.complete(());
            return Ok(());
        }
    }

    match resolved {
        Resolved::Value(value) => stage.output.push(PipeItem::Value(value)),
        Resolved::Filtered => {}
        Resolved::Error(error) => {
            tracing::warn!(item = error.index, kind = ?error.kind, "pipe stage item failed");
            stage.errors.borrow_mut().push(error);
        }
    }

    signal.complete(());
    Ok(())
}

enum Resolved<U> {
    Value(U),
    Filtered,
    Error(PipeError),
}

fn resolve_outcome<T, U>(
    index: usize,
    outcome: Result<Result<Option<U>>>,
    timed_out: bool,
    catch: &Option<CatchFn<T, U>>,
    original: &T,
) -> Resolved<U> {
    if timed_out {
        return Resolved::Error(PipeError {
            index,
            kind: PipeErrorKind::Timeout,
        });
    }

    let inner = match outcome {
        Ok(inner) => inner,
        Err(Error::Cancelled) => return Resolved::Filtered,
        Err(error) => Err(error),
    };

    match inner {
        Ok(Some(value)) => Resolved::Value(value),
        Ok(None) => Resolved::Filtered,
        Err(error) => match catch {
            Some(catch) => match catch(&error, original) {
                CatchOutcome::Suppress => Resolved::Filtered,
                CatchOutcome::Emit(Some(value)) => Resolved::Value(value),
                CatchOutcome::Emit(None) => Resolved::Filtered,
                CatchOutcome::Fail(error) => Resolved::Error(PipeError {
                    index,
                    kind: PipeErrorKind::Failed(error.to_string()),
                }),
            },
            None => Resolved::Error(PipeError {
                index,
                kind: PipeErrorKind::Failed(error.to_string()),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::runtime::Runtime;
    use crate::task::spawn;
    use crate::testing::TestHost;
    use std::rc::Rc as StdRc;

    fn with_runtime<R>(body: impl FnOnce(&StdRc<TestHost>) -> R) -> R {
        let host = StdRc::new(TestHost::new());
        let _runtime = Runtime::new(StdRc::clone(&host) as StdRc<dyn Host>);
        body(&host)
    }

    #[test]
    fn totable_preserves_order_without_a_stage() {
        with_runtime(|_| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2, 3]);
                Ok::<_, Error>(pipe.totable().await)
            });
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn collect_n_stops_short_of_exhaustion_without_closing_the_pipe() {
        with_runtime(|_| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2, 3, 4]);
                let first_two = pipe.collect(2).await;
                let rest = pipe.totable().await;
                Ok::<_, Error>((first_two, rest))
            });
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn collect_n_returns_fewer_items_at_exhaustion() {
        with_runtime(|_| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2]);
                Ok::<_, Error>(pipe.collect(5).await)
            });
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn race_zero_is_rejected() {
        with_runtime(|_| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2, 3]);
                pipe.race(0).await
            });
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn race_collects_n_then_cancels_the_runner() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1u64, 2, 3]).map(
                    |v| async move {
                        crate::scheduler::sleep(std::time::Duration::from_millis(v)).await?;
                        Ok(Some(v * 10))
                    },
                    MapOptions::new().parallel(3),
                );
                pipe.race(2).await
            });
            for _ in 0..5 {
                host.advance(Duration::from_millis(5));
                host.run_scheduled();
            }
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn any_cancels_the_pipe_after_the_first_match() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1u64, 2, 3]).map(
                    |v| async move {
                        crate::scheduler::sleep(std::time::Duration::from_millis(v)).await?;
                        Ok(Some(v))
                    },
                    MapOptions::new().parallel(3),
                );
                Ok::<_, Error>(pipe.any(|v| *v == 1).await)
            });
            for _ in 0..5 {
                host.advance(Duration::from_millis(5));
                host.run_scheduled();
            }
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn map_doubles_every_item() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe =
                    Pipe::new(vec![1, 2, 3]).map(|v| async move { Ok(Some(v * 2)) }, MapOptions::new());
                Ok::<_, Error>(pipe.totable().await)
            });
            host.run_scheduled();
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn map_filters_out_none() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2, 3, 4]).map(
                    |v| async move { Ok(if v % 2 == 0 { Some(v) } else { None }) },
                    MapOptions::new(),
                );
                Ok::<_, Error>(pipe.totable().await)
            });
            host.run_scheduled();
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn map_records_errors_when_no_catch_hook_is_set() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1, 2]).map(
                    |v| async move {
                        if v == 1 {
                            Err(Error::failed("bad item"))
                        } else {
                            Ok(Some(v))
                        }
                    },
                    MapOptions::new(),
                );
                let items = pipe.totable().await;
                let errors = pipe.report();
                Ok::<_, Error>((items, errors))
            });
            host.run_scheduled();
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn ordered_stage_preserves_input_order_under_parallelism() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![3u64, 1, 2]).map(
                    |v| async move {
                        crate::scheduler::sleep(std::time::Duration::from_millis(v)).await?;
                        Ok(Some(v))
                    },
                    MapOptions::new().parallel(3).ordered(true),
                );
                Ok::<_, Error>(pipe.totable().await)
            });
            for _ in 0..5 {
                host.advance(Duration::from_millis(5));
                host.run_scheduled();
            }
            assert!(handle.is_dead());
        });
    }

    #[test]
    fn next_blocks_outside_a_task_until_the_source_yields_an_item() {
        with_runtime(|host| {
            let pipe = Pipe::new(vec![1, 2, 3]);
            let item = pipe.next(host.as_ref(), Duration::from_millis(50), Duration::from_millis(1));
            assert_eq!(item, Some(1));
        });
    }

    #[test]
    fn wait_and_cancel_forward_to_the_runner_task() {
        with_runtime(|host| {
            let handle = spawn(async {
                let pipe = Pipe::new(vec![1u64, 2, 3]).map(
                    |v| async move {
                        crate::scheduler::sleep(std::time::Duration::from_millis(v * 10)).await?;
                        Ok(Some(v))
                    },
                    MapOptions::new().parallel(3),
                );
                pipe.cancel(false);
                pipe.pwait().await
            });
            host.run_scheduled();
            assert!(handle.is_dead());
        });
    }
}
