//! # Core Thread Runtime
//!
//! The worker loop, its submission API, and the hooks it uses to lend its
//! CPU slot to a task scheduler while idle.

mod core_thread;
mod shared;
mod stats;
mod worker_pool;

pub use core_thread::{CoreThread, THREADS_SUPPORTED};
pub use stats::CoreThreadStats;
pub use worker_pool::{NoopWorkerPool, WorkerPool, WorkerSlots};

pub(crate) use shared::CoreShared;
