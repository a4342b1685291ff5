//! # Core Thread Accessors
//!
//! Producers talk to the core thread through an accessor.
//!
//! ```text
//!   Thread 1 ──> CoreAccessor [private queue] ──┐
//!   Thread 2 ──> CoreAccessor [private queue] ──┼── submit (one lock) ──> shared queue ──> core thread
//!   Engine   ──> SyncedAccessor ────────────────┘   (every call locks)
//! ```
//!
//! A [`CoreAccessor`] batches commands privately and moves them into the
//! shared queue in one locked operation, so a producer issuing hundreds of
//! calls per frame takes the shared lock once. A [`SyncedAccessor`] has no
//! private storage and is safe to use from any thread.
//!
//! Commands from one accessor execute in the order they were queued.
//! Nothing is promised about interleaving between accessors.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::command::{AsyncOp, AsyncResult, CommandQueue, QueuedCommand};
use crate::error::CoreResult;
use crate::thread::CoreShared;

/// Per-thread command buffer, submitted to the core thread in batches.
///
/// Obtained from [`CoreThread::get_accessor`](crate::CoreThread::get_accessor).
/// Meant to be filled by its owning thread; the global
/// [`submit_accessors`](crate::CoreThread::submit_accessors) sweep may flush
/// it from the frame driver thread.
pub struct CoreAccessor {
    owner: ThreadId,
    shared: Arc<CoreShared>,
    /// Uncontended except during the per-tick sweep.
    pending: Mutex<CommandQueue>,
}

impl CoreAccessor {
    pub(crate) fn new(owner: ThreadId, shared: Arc<CoreShared>, capacity: usize) -> Self {
        Self {
            owner,
            shared,
            pending: Mutex::new(CommandQueue::with_capacity(capacity)),
        }
    }

    /// Thread that created this accessor.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Commands queued but not yet submitted.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queues a command locally.
    ///
    /// With `blocking`, a blocking [`submit_to_core_thread`](Self::submit_to_core_thread)
    /// waits for this command individually.
    pub fn queue_command<F>(&self, f: F, blocking: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending
            .lock()
            .push(QueuedCommand::plain(f).blocking(blocking));
    }

    /// Queues a command producing a value. The handle fills in after the
    /// accessor is submitted and the command has run.
    pub fn queue_return_command<T, F>(&self, f: F, blocking: bool) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let op = AsyncOp::new();
        self.pending
            .lock()
            .push(QueuedCommand::returning(f, op.clone()).blocking(blocking));
        AsyncResult::new(op)
    }

    /// Moves every pending command into the shared queue, in order, under a
    /// single lock.
    ///
    /// With `block_until_complete`, returns once every submitted command has
    /// executed. Called from the core thread itself, the batch runs in place.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`](crate::CoreError::ShuttingDown) if the core
    /// thread no longer accepts work. The batch is dropped and its result
    /// handles report failure.
    pub fn submit_to_core_thread(&self, block_until_complete: bool) -> CoreResult<()> {
        let mut pending = self.pending.lock();
        let batch = pending.flush();

        if self.shared.is_core_thread() {
            // Commands run right here and may queue on this accessor again.
            drop(pending);
            self.shared.play_in_place(batch);
            return Ok(());
        }

        // Hold `pending` until the batch is in the shared queue. A concurrent
        // sweep flushing this accessor must not overtake it. Lock order is
        // always pending -> queue.
        let appended = self.shared.append_batch(batch, block_until_complete);
        drop(pending);

        self.shared.wait_all(&appended?);
        Ok(())
    }
}

impl std::fmt::Debug for CoreAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreAccessor")
            .field("owner", &self.owner)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Accessor that writes straight into the shared queue.
///
/// Every call takes the shared lock. Use it from threads that do not want a
/// private buffer, such as engine maintenance code.
pub struct SyncedAccessor {
    shared: Arc<CoreShared>,
}

impl SyncedAccessor {
    pub(crate) fn new(shared: Arc<CoreShared>) -> Self {
        Self { shared }
    }

    /// Queues a command on the shared queue. With `blocking`, waits for it.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`](crate::CoreError::ShuttingDown) after shutdown.
    pub fn queue_command<F>(&self, f: F, blocking: bool) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue_command(f, blocking)
    }

    /// Queues a command producing a value on the shared queue.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`](crate::CoreError::ShuttingDown) after shutdown.
    pub fn queue_return_command<T, F>(&self, f: F, blocking: bool) -> CoreResult<AsyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.shared.queue_return_command(f, blocking)
    }

    /// Nothing is buffered here; with `block_until_complete` this waits for
    /// everything already in the shared queue to execute.
    ///
    /// # Errors
    ///
    /// [`CoreError::ShuttingDown`](crate::CoreError::ShuttingDown) after shutdown.
    pub fn submit_to_core_thread(&self, block_until_complete: bool) -> CoreResult<()> {
        self.shared
            .submit_batch(CommandQueue::new().flush(), block_until_complete)
    }
}

impl std::fmt::Debug for SyncedAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedAccessor").finish_non_exhaustive()
    }
}

/// Registry of live per-thread accessors, keyed by owning thread.
#[derive(Default)]
pub(crate) struct AccessorRegistry {
    accessors: Mutex<HashMap<ThreadId, Arc<CoreAccessor>>>,
}

impl AccessorRegistry {
    /// Returns the calling thread's accessor, creating it on first use.
    pub(crate) fn get_or_create(
        &self,
        shared: &Arc<CoreShared>,
        capacity: usize,
    ) -> Arc<CoreAccessor> {
        let owner = thread::current().id();
        let mut accessors = self.accessors.lock();
        Arc::clone(accessors.entry(owner).or_insert_with(|| {
            Arc::new(CoreAccessor::new(owner, Arc::clone(shared), capacity))
        }))
    }

    /// Removes the calling thread's accessor.
    pub(crate) fn remove_current(&self) -> Option<Arc<CoreAccessor>> {
        self.accessors.lock().remove(&thread::current().id())
    }

    /// Copies the live accessors out so submission happens without the
    /// registry lock held.
    pub(crate) fn snapshot(&self) -> Vec<Arc<CoreAccessor>> {
        self.accessors.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.accessors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_accessor_buffers_until_submit() {
        let shared = Arc::new(CoreShared::new(4));
        let accessor = CoreAccessor::new(thread::current().id(), Arc::clone(&shared), 4);

        accessor.queue_command(|| {}, false);
        accessor.queue_command(|| {}, false);
        assert_eq!(accessor.pending_count(), 2);
        assert_eq!(shared.pending_count(), 0);

        accessor.submit_to_core_thread(false).unwrap();
        assert_eq!(accessor.pending_count(), 0);
        assert_eq!(shared.pending_count(), 2);
    }

    #[test]
    fn test_registry_one_accessor_per_thread() {
        let shared = Arc::new(CoreShared::new(4));
        let registry = AccessorRegistry::default();

        let a = registry.get_or_create(&shared, 4);
        let b = registry.get_or_create(&shared, 4);
        assert!(Arc::ptr_eq(&a, &b));

        let other = thread::scope(|s| {
            s.spawn(|| registry.get_or_create(&shared, 4)).join().unwrap()
        });
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove_current().is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejected_batch_fails_results() {
        let shared = Arc::new(CoreShared::new(4));
        let accessor = CoreAccessor::new(thread::current().id(), Arc::clone(&shared), 4);
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        let result = accessor.queue_return_command(
            move || {
                r.fetch_add(1, Ordering::SeqCst);
                1u8
            },
            false,
        );

        shared.request_shutdown();
        assert!(accessor.submit_to_core_thread(false).is_err());
        assert!(result.has_failed());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
