//! # Shared Core State
//!
//! Everything both the worker and the producers touch.
//!
//! ## Locks
//!
//! ```text
//! queue      Mutex<QueueState>        pending commands + shutdown flag
//!            Condvar command_ready    worker parks here while empty
//! completed  Mutex<HashSet<NotifyId>> finished blocking commands not yet claimed
//!            Condvar command_done     blocking producers park here
//! next id    AtomicU64                notify id counter
//! terminated AtomicBool               set once the queue is drained for good
//! ```
//!
//! The queue lock is only held to enqueue or flush. Playback runs outside
//! it, so producers never wait on command execution time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::command::{AsyncOp, AsyncResult, CommandBatch, CommandQueue, NotifyId, PlaybackReport, QueuedCommand};
use crate::error::{CoreError, CoreResult};

use super::stats::StatsCounters;
use super::worker_pool::WorkerPool;

struct QueueState {
    queue: CommandQueue,
    shutting_down: bool,
}

pub(crate) struct CoreShared {
    queue: Mutex<QueueState>,
    command_ready: Condvar,
    completed: Mutex<HashSet<NotifyId>>,
    command_done: Condvar,
    next_notify_id: AtomicU64,
    terminated: AtomicBool,
    core_thread_id: OnceLock<ThreadId>,
    pub(crate) stats: StatsCounters,
}

impl CoreShared {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            queue: Mutex::new(QueueState {
                queue: CommandQueue::with_capacity(queue_capacity),
                shutting_down: false,
            }),
            command_ready: Condvar::new(),
            completed: Mutex::new(HashSet::new()),
            command_done: Condvar::new(),
            next_notify_id: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            core_thread_id: OnceLock::new(),
            stats: StatsCounters::default(),
        }
    }

    pub(crate) fn set_core_thread_id(&self, id: ThreadId) {
        let _ = self.core_thread_id.set(id);
    }

    #[inline]
    pub(crate) fn is_core_thread(&self) -> bool {
        self.core_thread_id.get() == Some(&thread::current().id())
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.queue.lock().shutting_down
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Drains the queue after shutdown and marks it terminated. Only the
    /// core thread calls this.
    pub(crate) fn drain_and_terminate(&self) {
        debug_assert!(self.is_shutting_down());
        let _ = self.run_pending();
        self.terminated.store(true, Ordering::Release);
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.queue.lock().queue.len()
    }

    // =========================================================================
    // Submission
    // =========================================================================

    pub(crate) fn queue_command<F>(&self, f: F, block_until_complete: bool) -> CoreResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_core_thread() {
            f(); // Execute immediately
            return Ok(());
        }

        let notify_id = self.enqueue(QueuedCommand::plain(f), block_until_complete)?;
        if let Some(id) = notify_id {
            self.block_until_command_completed(id);
        }
        Ok(())
    }

    pub(crate) fn queue_return_command<T, F>(
        &self,
        f: F,
        block_until_complete: bool,
    ) -> CoreResult<AsyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let op = AsyncOp::new();

        if self.is_core_thread() {
            op.complete(Box::new(f())); // Execute immediately
            return Ok(AsyncResult::new(op));
        }

        let notify_id =
            self.enqueue(QueuedCommand::returning(f, op.clone()), block_until_complete)?;
        if let Some(id) = notify_id {
            self.block_until_command_completed(id);
        }
        Ok(AsyncResult::new(op))
    }

    /// Appends one command to the shared queue and wakes the worker.
    fn enqueue(&self, command: QueuedCommand, blocking: bool) -> CoreResult<Option<NotifyId>> {
        let notify_id = {
            let mut state = self.queue.lock();
            if state.shutting_down {
                warn!("command submitted after shutdown was requested");
                return Err(CoreError::ShuttingDown);
            }

            let notify_id = blocking.then(|| self.allocate_notify_id());
            state.queue.push(command.with_notify(notify_id));
            notify_id
        };

        self.command_ready.notify_one();
        Ok(notify_id)
    }

    /// Moves a whole batch into the shared queue under one lock and waits on
    /// it if asked. Called on the core thread, the batch runs in place.
    pub(crate) fn submit_batch(
        &self,
        batch: CommandBatch,
        block_until_complete: bool,
    ) -> CoreResult<()> {
        if self.is_core_thread() {
            self.play_in_place(batch);
            return Ok(());
        }

        let waits = self.append_batch(batch, block_until_complete)?;
        self.wait_all(&waits);
        Ok(())
    }

    /// Plays a batch on the calling thread with no notifications.
    pub(crate) fn play_in_place(&self, batch: CommandBatch) {
        if batch.is_empty() {
            return;
        }
        let report = batch.playback(|_| {});
        self.stats.record(report);
    }

    /// Appends a batch to the shared queue and wakes the worker. Returns the
    /// notify ids the submitter has to wait on.
    ///
    /// When blocking, every command flagged blocking plus the last command of
    /// the batch get a notify id. The batch plays back in order, so the last
    /// id is a barrier for the rest. An empty blocking batch becomes a no-op
    /// barrier behind everything already queued.
    ///
    /// Only the append happens here. Callers that must order this batch
    /// against other flushes of the same source keep that source locked
    /// across this call and wait afterwards.
    pub(crate) fn append_batch(
        &self,
        mut batch: CommandBatch,
        block_until_complete: bool,
    ) -> CoreResult<Vec<NotifyId>> {
        if batch.is_empty() {
            if !block_until_complete {
                return Ok(Vec::new());
            }
            let barrier = self.enqueue(QueuedCommand::plain(|| {}), true)?;
            return Ok(barrier.into_iter().collect());
        }

        let mut waits = Vec::new();
        {
            let mut state = self.queue.lock();
            if state.shutting_down {
                warn!(commands = batch.len(), "batch submitted after shutdown was requested");
                drop(state);
                batch.abandon();
                return Err(CoreError::ShuttingDown);
            }

            if block_until_complete {
                let commands = batch.commands_mut();
                let last = commands.len() - 1;
                for (index, command) in commands.iter_mut().enumerate() {
                    if command.is_blocking() || index == last {
                        let id = self.allocate_notify_id();
                        command.notify_id = Some(id);
                        waits.push(id);
                    } else {
                        command.notify_id = None;
                    }
                }
            }

            state.queue.append(batch);
        }

        self.command_ready.notify_one();
        Ok(waits)
    }

    // Callers hold the queue lock, which also keeps ids in submission order.
    fn allocate_notify_id(&self) -> NotifyId {
        self.next_notify_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Completion notification
    // =========================================================================

    pub(crate) fn block_until_command_completed(&self, notify_id: NotifyId) {
        let mut completed = self.completed.lock();
        while !completed.remove(&notify_id) {
            self.command_done.wait(&mut completed);
        }
    }

    pub(crate) fn wait_all(&self, notify_ids: &[NotifyId]) {
        for &id in notify_ids {
            self.block_until_command_completed(id);
        }
    }

    fn command_completed_notify(&self, notify_id: NotifyId) {
        self.completed.lock().insert(notify_id);
        self.command_done.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn unclaimed_completions(&self) -> usize {
        self.completed.lock().len()
    }

    // =========================================================================
    // Playback
    // =========================================================================

    fn play(&self, batch: CommandBatch) -> PlaybackReport {
        let size = batch.len();
        let report = batch.playback(|id| self.command_completed_notify(id));
        self.stats.record(report);
        debug!(size, failed = report.failed, "played command batch");
        report
    }

    /// Flushes and plays whatever is pending, on the calling thread.
    pub(crate) fn run_pending(&self) -> PlaybackReport {
        let batch = self.queue.lock().queue.flush();
        if batch.is_empty() {
            return PlaybackReport::default();
        }
        self.play(batch)
    }

    /// Sets the shutdown flag and wakes the worker.
    pub(crate) fn request_shutdown(&self) {
        self.queue.lock().shutting_down = true;
        // Wake all threads. They quit once they see the flag on an empty queue.
        self.command_ready.notify_all();
    }

    /// Worker main loop.
    pub(crate) fn run_worker(
        self: Arc<Self>,
        pool: Arc<dyn WorkerPool>,
        started: Sender<ThreadId>,
    ) {
        pool.reserve_slot(); // This core is ours now

        let id = thread::current().id();
        self.set_core_thread_id(id);
        let _ = started.send(id);
        drop(started);
        info!(?id, "core thread started");

        loop {
            let batch = {
                let mut state = self.queue.lock();

                while state.queue.is_empty() {
                    if state.shutting_down {
                        drop(state);
                        self.terminated.store(true, Ordering::Release);
                        pool.release_slot();
                        info!("core thread terminated");
                        return;
                    }

                    // Let the pool use this core while we have nothing to do
                    pool.release_slot();
                    self.command_ready.wait(&mut state);
                    pool.reserve_slot();
                }

                state.queue.flush()
            };

            let _ = self.play(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_drain_notifies() {
        let shared = CoreShared::new(4);
        let notify_id = shared.enqueue(QueuedCommand::plain(|| {}), true).unwrap();
        assert_eq!(notify_id, Some(0));
        assert_eq!(shared.pending_count(), 1);

        let report = shared.run_pending();
        assert_eq!(report.executed, 1);
        assert_eq!(shared.unclaimed_completions(), 1);

        shared.block_until_command_completed(0);
        assert_eq!(shared.unclaimed_completions(), 0);
    }

    #[test]
    fn test_notify_ids_are_unique() {
        let shared = CoreShared::new(4);
        let a = shared.enqueue(QueuedCommand::plain(|| {}), true).unwrap();
        let b = shared.enqueue(QueuedCommand::plain(|| {}), false).unwrap();
        let c = shared.enqueue(QueuedCommand::plain(|| {}), true).unwrap();
        assert_eq!(a, Some(0));
        assert_eq!(b, None);
        assert_eq!(c, Some(1));
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let shared = CoreShared::new(4);
        shared.request_shutdown();
        assert!(shared.is_shutting_down());
        assert_eq!(
            shared.enqueue(QueuedCommand::plain(|| {}), false),
            Err(CoreError::ShuttingDown)
        );
    }

    #[test]
    fn test_terminated_only_after_drain() {
        let shared = CoreShared::new(4);
        shared.enqueue(QueuedCommand::plain(|| {}), false).unwrap();
        shared.request_shutdown();
        assert!(!shared.is_terminated());
        assert_eq!(shared.pending_count(), 1);

        shared.drain_and_terminate();
        assert_eq!(shared.pending_count(), 0);
        assert!(shared.is_terminated());
    }

    #[test]
    fn test_append_empty_blocking_batch_is_barrier() {
        let shared = CoreShared::new(4);
        shared.enqueue(QueuedCommand::plain(|| {}), false).unwrap();

        let waits = shared.append_batch(CommandQueue::new().flush(), true).unwrap();
        assert_eq!(waits, vec![0]);
        assert_eq!(shared.pending_count(), 2);
        assert!(shared.append_batch(CommandQueue::new().flush(), false).unwrap().is_empty());

        let _ = shared.run_pending();
        shared.wait_all(&waits);
        assert_eq!(shared.unclaimed_completions(), 0);
    }
}
