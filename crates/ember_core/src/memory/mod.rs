//! # Frame Memory
//!
//! Transient storage for command arguments.
//!
//! ## Design Philosophy
//!
//! Arguments are copied into a pre-allocated arena instead of the heap.
//! Two arenas alternate so a command queued late in one frame can still
//! read its arguments while the next frame is being built:
//! - No allocation churn per command
//! - Clearing is a pointer reset
//! - Stale handles are caught, not silently read

mod frame_alloc;
mod frame_pair;

pub use frame_alloc::{FrameAlloc, FrameHandle};
pub use frame_pair::FrameAllocPair;
