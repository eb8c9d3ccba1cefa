//! A cooperative task runtime and asynchronous pipeline, for embedding inside a single-threaded
//! host process that already has its own event loop (an editor, a game's main loop, a GUI's
//! message pump).
//!
//! There is no preemption and no OS-thread parallelism: at most one task runs at a time, and it
//! runs until it explicitly suspends (via `.await` on a [`Future`], a [`sync::Queue`]/
//! [`sync::Semaphore`], [`scheduler::sleep`], or the low-level [`scheduler::pyield`]). Tasks are
//! plain `async` bodies; [`task::spawn`] creates one and immediately drives it to its first
//! suspension point, and [`task::TaskHandle::resume`] drives it further. The crate never polls a
//! task on its own initiative -- something in the embedding application (a host callback, a timer,
//! another task) always calls `resume` explicitly, directly or through one of the primitives here.
//!
//! ```
//! # #[cfg(feature = "test-util")]
//! # fn main() {
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use cotask::{Runtime, spawn};
//! use cotask::testing::TestHost;
//!
//! let host = Rc::new(TestHost::new());
//! let _runtime = Runtime::new(host.clone() as Rc<dyn cotask::Host>);
//!
//! let handle = spawn(async {
//!     cotask::scheduler::sleep(Duration::from_millis(10)).await?;
//!     Ok::<_, cotask::Error>(42)
//! });
//! host.advance(Duration::from_millis(10));
//! assert!(handle.is_dead());
//! # }
//! # #[cfg(not(feature = "test-util"))]
//! # fn main() {}
//! ```
//!
//! # Modules
//!
//! - [`task`] -- [`task::TaskHandle`], [`task::spawn`], [`task::spawn_guarded`].
//! - [`future`] -- [`Future`], the one-shot result cell other primitives (and task completion
//!   itself) are built on.
//! - [`cancel`] -- [`cancel::CancelOutcome`], cooperative cancellation.
//! - [`scheduler`] -- the low-level suspension primitives (`pyield`, `yield_`, `sleep`, `pcall`)
//!   and the running-task introspection functions (`running`, `is_cancelled`, `unset_cancelled`).
//! - [`sync`] -- [`sync::Queue`], [`sync::Semaphore`].
//! - [`callback`] -- [`callback::cb_to_tf`]/[`callback::cb_to_tf_with_options`], adapting
//!   callback-style host APIs.
//! - [`pipe`] -- [`pipe::Pipe`], the `map`/`collect`/`fold`/... processing pipeline.
//! - [`host`] -- the [`Host`] trait the runtime is generic over.
//! - [`runtime`] -- [`Runtime`], binding a [`Host`] to the current thread.
//! - [`value`] -- the small dynamically-typed [`value::Value`]/[`value::Values`] used at the
//!   genuinely dynamic seams (callbacks, `pyield`).
//! - [`error`] -- [`Error`], the crate's result type.
//! - [`testing`] (feature `test-util`) -- [`testing::TestHost`], a deterministic fake [`Host`].

pub mod callback;
pub mod cancel;
pub mod error;
pub mod future;
pub mod host;
pub mod pipe;
pub mod runtime;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod value;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use callback::{cb_to_tf, cb_to_tf_with_cleanup, cb_to_tf_with_options, CbOptions, OnCancel};
pub use cancel::CancelOutcome;
pub use error::{Error, Result};
pub use future::Future;
pub use host::{Host, TimerHandle};
pub use pipe::{CatchOutcome, MapOptions, Pipe, PipeError, PipeErrorKind};
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{is_cancelled, pcall, pyield, running, sleep, sleep_until_nonfast, unset_cancelled, yield_, Yielded};
pub use sync::{Queue, Semaphore};
pub use task::{spawn, spawn_guarded, Status, TaskHandle, TaskId};
pub use value::{Value, Values};
