//! # Commands
//!
//! Deferred work items and the queue that orders them.
//!
//! ## Lifecycle
//!
//! ```text
//! created (queue) ──> owned by queue ──flush──> batch ──playback──> executed ──> notified
//! ```

mod async_op;
mod queue;
mod queued;

pub use async_op::{AsyncOp, AsyncResult};
pub use queue::{CommandBatch, CommandQueue, PlaybackReport};
pub use queued::{NotifyId, QueuedCommand};
