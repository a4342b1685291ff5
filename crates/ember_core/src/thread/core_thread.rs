//! # The Core Thread
//!
//! One dedicated thread owns the device. Every other thread queues commands.
//!
//! ## Architecture
//!
//! ```text
//!   Producer ──┐
//!   Producer ──┼──> [shared CommandQueue] ──flush──> core thread ──playback──> device
//!   Engine   ──┘        (mutex + condvar)                 │
//!        ▲                                                 │
//!        └──────── completed-set (mutex + condvar) <───────┘
//! ```
//!
//! ## States
//!
//! `Running` → `ShuttingDown` → `Terminated`. Shutdown sets a flag under
//! the queue lock; the worker drains what is already queued and exits once
//! it finds the queue empty. Submissions after the request are rejected with
//! [`CoreError::ShuttingDown`]. Producers should stop submitting before
//! shutdown is requested; anything they race in is refused, never dropped
//! silently.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::bounded;
use parking_lot::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::accessor::{AccessorRegistry, CoreAccessor, SyncedAccessor};
use crate::command::{AsyncResult, PlaybackReport};
use crate::config::{CoreThreadConfig, ThreadingMode};
use crate::error::{CoreError, CoreResult};
use crate::memory::{FrameAlloc, FrameAllocPair};

use super::shared::CoreShared;
use super::stats::CoreThreadStats;
use super::worker_pool::{NoopWorkerPool, WorkerPool};

/// Whether this target can run a dedicated worker thread.
pub const THREADS_SUPPORTED: bool = !cfg!(all(target_arch = "wasm32", not(target_feature = "atomics")));

/// The core thread and everything needed to feed it.
///
/// Construct once at startup and share it by `Arc` with every component
/// that submits work.
///
/// ## Usage
///
/// ```rust,ignore
/// let core = CoreThread::new(CoreThreadConfig::default())?;
///
/// // Fire and forget
/// core.queue_command(move || device.clear(), false)?;
///
/// // Wait for a value
/// let size = core.queue_return_command(move || device.swapchain_size(), true)?.wait()?;
///
/// // Once per tick
/// core.submit_accessors(false)?;
/// core.update();
/// ```
pub struct CoreThread {
    shared: Arc<CoreShared>,
    config: CoreThreadConfig,
    core_thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
    accessors: AccessorRegistry,
    synced_accessor: SyncedAccessor,
    frame_allocs: FrameAllocPair,
}

impl CoreThread {
    /// Starts the core thread without a companion worker pool.
    ///
    /// # Errors
    ///
    /// See [`CoreThread::with_worker_pool`].
    pub fn new(config: CoreThreadConfig) -> CoreResult<Arc<Self>> {
        Self::with_worker_pool(config, Arc::new(NoopWorkerPool))
    }

    /// Starts the core thread, lending its CPU slot to `pool` while idle.
    ///
    /// In [`ThreadingMode::Inline`] no thread is spawned and the calling
    /// thread becomes the core thread.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidConfig`] if the config fails validation.
    /// - [`CoreError::ThreadingUnsupported`] if a worker is requested on a
    ///   target without threads.
    /// - [`CoreError::SpawnFailed`] if the OS refuses the thread.
    pub fn with_worker_pool(
        config: CoreThreadConfig,
        pool: Arc<dyn WorkerPool>,
    ) -> CoreResult<Arc<Self>> {
        config.validate()?;

        let shared = Arc::new(CoreShared::new(config.initial_queue_capacity));

        let (core_thread_id, worker) = match config.mode {
            ThreadingMode::Inline => {
                let id = thread::current().id();
                shared.set_core_thread_id(id);
                info!(?id, "core thread running inline");
                (id, None)
            }
            ThreadingMode::Threaded => {
                if !THREADS_SUPPORTED {
                    error!("threaded core requested on a target without thread support");
                    return Err(CoreError::ThreadingUnsupported);
                }

                let (started_tx, started_rx) = bounded(1);
                let worker_shared = Arc::clone(&shared);
                let handle = thread::Builder::new()
                    .name(config.thread_name.clone())
                    .spawn(move || worker_shared.run_worker(pool, started_tx))
                    .map_err(|e| CoreError::SpawnFailed(e.to_string()))?;

                // The id is only published once the worker is actually running.
                let id = started_rx
                    .recv()
                    .map_err(|e| CoreError::SpawnFailed(e.to_string()))?;
                (id, Some(handle))
            }
        };

        let synced_accessor = SyncedAccessor::new(Arc::clone(&shared));
        let frame_allocs = FrameAllocPair::new(config.frame_arena_capacity);

        Ok(Arc::new(Self {
            shared,
            config,
            core_thread_id,
            worker: Mutex::new(worker),
            accessors: AccessorRegistry::default(),
            synced_accessor,
            frame_allocs,
        }))
    }

    /// The configuration this core thread was started with.
    #[must_use]
    pub fn config(&self) -> &CoreThreadConfig {
        &self.config
    }

    /// Identifier of the thread that executes commands.
    #[inline]
    #[must_use]
    pub fn get_core_thread_id(&self) -> ThreadId {
        self.core_thread_id
    }

    /// Returns true when called from the core thread.
    #[inline]
    #[must_use]
    pub fn is_core_thread(&self) -> bool {
        thread::current().id() == self.core_thread_id
    }

    /// Fails unless called from the core thread.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotOnCoreThread`].
    #[track_caller]
    pub fn assert_on_core_thread(&self) -> CoreResult<()> {
        if self.is_core_thread() {
            return Ok(());
        }
        error!(location = %std::panic::Location::caller(), "core-thread-only call made off the core thread");
        Err(CoreError::NotOnCoreThread)
    }

    /// Fails if called from the core thread.
    ///
    /// # Errors
    ///
    /// [`CoreError::OnCoreThread`].
    #[track_caller]
    pub fn assert_off_core_thread(&self) -> CoreResult<()> {
        if !self.is_core_thread() {
            return Ok(());
        }
        error!(location = %std::panic::Location::caller(), "call not allowed on the core thread");
        Err(CoreError::OnCoreThread)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queues a command on the core thread.
    ///
    /// Called from the core thread, `f` runs immediately and nothing is
    /// queued. Otherwise, with `block_until_complete` the call returns only
    /// after `f` has executed.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`] once shutdown has been requested.
    pub fn queue_command<F>(&self, f: F, block_until_complete: bool) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue_command(f, block_until_complete)
    }

    /// Queues a command that produces a value and returns its handle.
    ///
    /// The handle is filled asynchronously, unless the caller is the core
    /// thread (filled before return) or `block_until_complete` is set
    /// (filled, or failed, before return).
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`] once shutdown has been requested.
    pub fn queue_return_command<T, F>(
        &self,
        f: F,
        block_until_complete: bool,
    ) -> CoreResult<AsyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.shared.queue_return_command(f, block_until_complete)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the calling thread's accessor, creating it on first use.
    #[must_use]
    pub fn get_accessor(&self) -> Arc<CoreAccessor> {
        self.accessors
            .get_or_create(&self.shared, self.config.initial_queue_capacity)
    }

    /// Submits and forgets the calling thread's accessor.
    ///
    /// # Errors
    ///
    /// Whatever the final submit returns.
    pub fn release_accessor(&self) -> CoreResult<()> {
        match self.accessors.remove_current() {
            Some(accessor) => accessor.submit_to_core_thread(false),
            None => Ok(()),
        }
    }

    /// The process-wide synchronized accessor.
    #[must_use]
    pub fn get_synced_accessor(&self) -> &SyncedAccessor {
        &self.synced_accessor
    }

    /// Number of registered per-thread accessors.
    #[must_use]
    pub fn accessor_count(&self) -> usize {
        self.accessors.len()
    }

    /// Flushes every registered accessor, then the synced one.
    ///
    /// Called once per tick by the frame driver. Every accessor is submitted
    /// even if one fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`] once shutdown has been requested.
    pub fn submit_accessors(&self, block_until_complete: bool) -> CoreResult<()> {
        let mut first_error = None;

        for accessor in self.accessors.snapshot() {
            if let Err(e) = accessor.submit_to_core_thread(block_until_complete) {
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self
            .synced_accessor
            .submit_to_core_thread(block_until_complete)
        {
            first_error.get_or_insert(e);
        }

        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Frame memory
    // =========================================================================

    /// Advances the frame arenas. Called once per tick.
    pub fn update(&self) {
        self.frame_allocs.update();
    }

    /// The arena commands should use for this frame's arguments.
    #[must_use]
    pub fn get_frame_alloc(&self) -> MutexGuard<'_, FrameAlloc> {
        self.frame_allocs.active()
    }

    /// Both frame arenas, for reading handles back.
    #[must_use]
    pub fn frame_allocs(&self) -> &FrameAllocPair {
        &self.frame_allocs
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Plays back everything queued so far on the calling thread.
    ///
    /// Only meaningful in [`ThreadingMode::Inline`], where no worker drains
    /// the queue.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotInline`] in threaded mode, [`CoreError::NotOnCoreThread`]
    /// off the owning thread.
    pub fn run_pending(&self) -> CoreResult<PlaybackReport> {
        if self.config.mode != ThreadingMode::Inline {
            return Err(CoreError::NotInline);
        }
        self.assert_on_core_thread()?;
        Ok(self.shared.run_pending())
    }

    /// Number of commands in the shared queue not yet flushed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_shutting_down()
    }

    /// Returns true once the queue has been drained after shutdown: the
    /// worker left its loop, or inline, the owner finished `shutdown()`.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CoreThreadStats {
        self.shared.stats.snapshot(self.frame_allocs.frame_count())
    }

    /// Stops accepting work, drains the queue, and joins the worker.
    ///
    /// Every command queued before this call executes first. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OnCoreThread`] when called from the worker itself.
    /// - [`CoreError::NotOnCoreThread`] inline, off the owning thread.
    pub fn shutdown(&self) -> CoreResult<()> {
        match self.config.mode {
            ThreadingMode::Threaded => {
                self.assert_off_core_thread()?;
                self.shared.request_shutdown();
                self.join_worker();
            }
            ThreadingMode::Inline => {
                self.assert_on_core_thread()?;
                self.shared.request_shutdown();
                self.shared.drain_and_terminate();
            }
        }
        Ok(())
    }

    fn join_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("core thread panicked outside command playback");
            }
        }
    }
}

impl Drop for CoreThread {
    fn drop(&mut self) {
        self.shared.request_shutdown();

        match self.config.mode {
            ThreadingMode::Threaded if !self.is_core_thread() => self.join_worker(),
            // Last reference dropped inside a command: the worker exits on its
            // own once the queue drains.
            ThreadingMode::Threaded => {}
            ThreadingMode::Inline if self.is_core_thread() => {
                self.shared.drain_and_terminate();
            }
            ThreadingMode::Inline => {}
        }
    }
}

impl std::fmt::Debug for CoreThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreThread")
            .field("core_thread_id", &self.core_thread_id)
            .field("mode", &self.config.mode)
            .field("pending", &self.pending_count())
            .field("accessors", &self.accessor_count())
            .finish_non_exhaustive()
    }
}
