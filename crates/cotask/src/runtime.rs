//! Binds a concrete [`Host`] implementation to the current thread, so the free functions in
//! [`crate::scheduler`] (`sleep`, `sleep_until_nonfast`) and the pipe engine have something to
//! drive their timers and scheduling through.

use std::rc::Rc;
use std::time::Duration;

use crate::error::Result;
use crate::host::Host;
use crate::pipe::{MapOptions, Pipe};
use crate::scheduler;
use crate::task::{self, TaskHandle, TaskId};

/// Owns the binding between this thread's scheduler and a [`Host`] implementation.
///
/// A process embedding this crate constructs exactly one `Runtime` (per thread -- this crate has
/// no cross-thread story) near its startup, before spawning any tasks. The task-core entry points
/// are also available as free functions in [`crate::task`]/[`crate::scheduler`]; the inherent
/// methods here exist so callers who hold a `Runtime` do not need a separate set of imports.
#[derive(Debug)]
pub struct Runtime {
    host: Rc<dyn Host>,
    default_parallel: Option<usize>,
}

impl Runtime {
    /// Binds `host` as this thread's scheduler backend, with no default `map` concurrency limit.
    #[must_use]
    pub fn new(host: Rc<dyn Host>) -> Self {
        RuntimeBuilder::new().host(host).build()
    }

    /// The bound host.
    #[must_use]
    pub fn host(&self) -> &Rc<dyn Host> {
        &self.host
    }

    /// Spawns a new task, immediately driving it to its first suspension point.
    pub fn spawn<T: 'static>(
        &self,
        body: impl std::future::Future<Output = Result<T>> + 'static,
    ) -> TaskHandle<T> {
        task::spawn(body)
    }

    /// The identifier of the currently running task, or `None` outside of one.
    #[must_use]
    pub fn running(&self) -> Option<TaskId> {
        scheduler::running()
    }

    /// Suspends the calling task for approximately `duration`.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        scheduler::sleep(duration).await
    }

    /// Suspends the calling task until the host reports it is no longer inside a fast event.
    pub async fn sleep_until_nonfast(&self) -> Result<()> {
        scheduler::sleep_until_nonfast().await
    }

    /// Builds a [`Pipe`] over `source`, using this runtime's default `map` concurrency limit
    /// (see [`RuntimeBuilder::default_parallel`]) for any stage that doesn't set its own.
    #[must_use]
    pub fn pipe<T: 'static, I>(&self, source: I) -> Pipe<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        Pipe::new(source)
    }

    /// The default `map` concurrency limit configured on this runtime, if any.
    #[must_use]
    pub fn default_parallel(&self) -> Option<usize> {
        self.default_parallel
    }

    /// Applies this runtime's default `map` concurrency limit to `options`, if the caller hasn't
    /// already set one.
    #[must_use]
    pub fn map_options<T, U>(&self, options: MapOptions<T, U>) -> MapOptions<T, U> {
        match self.default_parallel {
            Some(limit) if !options.has_explicit_parallel() => options.parallel(limit),
            _ => options,
        }
    }
}

/// Builder for [`Runtime`], mirroring the rest of the crate's preference for explicit
/// construction over implicit defaults.
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    host: Option<Rc<dyn Host>>,
    default_parallel: Option<usize>,
}

impl RuntimeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            default_parallel: None,
        }
    }

    /// Sets the [`Host`] implementation to bind.
    #[must_use]
    pub fn host(mut self, host: Rc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the concurrency limit [`Runtime::map_options`] applies to a `map` stage that doesn't
    /// request its own `parallel` value. Scoped down from the teacher crate's thread/processor
    /// quota to a single knob, since this crate has no thread pool to size.
    #[must_use]
    pub fn default_parallel(mut self, limit: usize) -> Self {
        self.default_parallel = Some(limit.max(1));
        self
    }

    /// Builds the [`Runtime`], binding the configured host.
    ///
    /// # Panics
    ///
    /// Panics if [`RuntimeBuilder::host`] was never called.
    #[must_use]
    pub fn build(self) -> Runtime {
        let host = self
            .host
            .unwrap_or_else(|| panic!("RuntimeBuilder::build called without a host()"));
        scheduler::bind_host(Rc::clone(&host));
        Runtime {
            host,
            default_parallel: self.default_parallel,
        }
    }
}
