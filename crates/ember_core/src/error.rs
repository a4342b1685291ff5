//! # Core Thread Error Types
//!
//! All errors that can occur while starting, feeding, or tearing down the
//! core thread.
//!
//! Configuration and usage errors indicate a bug in the caller. They are
//! never retried. Failures inside a command body are not errors of the
//! queue: they are caught, logged, and counted by the worker.

use thiserror::Error;

/// Errors that can occur in the core thread system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A worker thread was requested but this target cannot spawn threads.
    #[error("attempting to start a core thread but threading is not supported on this target")]
    ThreadingUnsupported,

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operating system refused to spawn the worker.
    #[error("failed to spawn core thread: {0}")]
    SpawnFailed(String),

    /// A core-thread-only operation was called from another thread.
    #[error("this method can only be accessed from the core thread")]
    NotOnCoreThread,

    /// An operation that would deadlock on the core thread was called from it.
    #[error("this method cannot be accessed from the core thread")]
    OnCoreThread,

    /// A submission arrived after shutdown was requested.
    #[error("core thread is shutting down, submission rejected")]
    ShuttingDown,

    /// `run_pending` was called while a dedicated worker owns playback.
    #[error("pending commands can only be run manually in inline mode")]
    NotInline,

    /// The active frame arena has no room left.
    #[error("frame arena exhausted: requested {requested} bytes, {remaining} remaining")]
    FrameArenaExhausted {
        /// Bytes requested.
        requested: usize,
        /// Bytes still free in the arena.
        remaining: usize,
    },

    /// A frame handle outlived the frame that produced it.
    #[error("stale frame allocation in arena {arena}: handle generation {found}, arena generation {expected}")]
    StaleFrameAllocation {
        /// Arena index (0 or 1).
        arena: usize,
        /// Current generation of the arena.
        expected: u64,
        /// Generation recorded in the handle.
        found: u64,
    },

    /// A frame handle was read back with a type of a different size.
    #[error("frame allocation size mismatch: stored {stored} bytes, requested {requested}")]
    FrameAllocationMismatch {
        /// Size of the stored allocation.
        stored: usize,
        /// Size of the requested type.
        requested: usize,
    },

    /// The command producing a result panicked before writing it.
    #[error("command failed before producing a result")]
    CommandFailed,

    /// The result was already taken out of its slot.
    #[error("result already taken from its slot")]
    ResultTaken,
}

impl CoreError {
    /// Returns true for programmer errors (wrong thread, late submission).
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NotOnCoreThread | Self::OnCoreThread | Self::ShuttingDown | Self::NotInline
        )
    }
}

/// Result type for core thread operations.
pub type CoreResult<T> = Result<T, CoreError>;
