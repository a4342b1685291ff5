//! # Ember Core Thread
//!
//! A single dedicated thread that serializes every call into a subsystem
//! that must not be touched from several threads at once (a rendering
//! device, typically).
//!
//! ## Architecture Rules
//!
//! 1. **One consumer** - Only the core thread executes commands
//! 2. **Per-producer FIFO** - Commands from one accessor run in queue order
//! 3. **No lost wakeups** - Blocking producers always get their notification,
//!    even when the command panics
//! 4. **No allocation churn** - Per-frame arguments live in double-buffered arenas
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_core::{CoreThread, CoreThreadConfig};
//!
//! let core = CoreThread::new(CoreThreadConfig::default())?;
//!
//! let accessor = core.get_accessor();
//! accessor.queue_command(|| upload_textures(), false);
//! accessor.queue_command(|| draw_frame(), true);
//! accessor.submit_to_core_thread(true)?; // both have run
//!
//! core.shutdown()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod accessor;
pub mod command;
pub mod config;
pub mod error;
pub mod memory;
pub mod thread;

pub use accessor::{CoreAccessor, SyncedAccessor};
pub use command::{AsyncOp, AsyncResult, CommandBatch, CommandQueue, NotifyId, PlaybackReport};
pub use config::{CoreThreadConfig, ThreadingMode};
pub use error::{CoreError, CoreResult};
pub use memory::{FrameAlloc, FrameAllocPair, FrameHandle};
pub use thread::{CoreThread, CoreThreadStats, NoopWorkerPool, WorkerPool, WorkerSlots, THREADS_SUPPORTED};
