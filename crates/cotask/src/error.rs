//! Crate-wide error type.

/// The result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while driving a task, a future, or a pipe.
///
/// Misuse of the API (resuming a task that is not suspended, calling a task-only primitive
/// outside of a task, awaiting an already-consumed stage) is reported via panics rather than
/// through this enum, matching the rest of the crate's contract: a `Result` here always means
/// "this can legitimately happen at runtime", never "you called this wrong".
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The task (or the future/queue/semaphore wait it was performing) was cancelled.
    #[error("task was cancelled")]
    Cancelled,

    /// A task body, or a pipe stage function, failed.
    #[error("{0}")]
    Failed(String),

    /// A wait exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Builds a [`Error::Failed`] from any `Display`-able payload, mirroring how task bodies and
    /// pipe stages surface arbitrary failures as a single message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Returns `true` for [`Error::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
