//! # Command Queue
//!
//! An ordered buffer of pending commands. Insertion order is execution order.
//!
//! The queue has no lock of its own. The shared instance lives behind the
//! core thread's queue mutex; accessor instances belong to a single producer.
//!
//! ```text
//!   queue() ──> [ c0 c1 c2 ... ] ──flush()──> CommandBatch ──playback()──> device
//!                      ▲                           │
//!                      └──── reset to empty ───────┘
//! ```

use tracing::error;

use super::async_op::{AsyncOp, AsyncResult};
use super::queued::{NotifyId, QueuedCommand};

/// Ordered sequence of pending commands.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<QueuedCommand>,
    /// Capacity restored on every flush so steady-state queuing never grows.
    capacity: usize,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue with room for `capacity` commands.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues a command. With a notify id, playback reports its completion.
    pub fn queue<F>(&mut self, f: F, notify_id: Option<NotifyId>)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(QueuedCommand::plain(f).with_notify(notify_id));
    }

    /// Queues a command that produces a value. The returned handle is filled
    /// in when the command is played back.
    pub fn queue_return<T, F>(&mut self, f: F, notify_id: Option<NotifyId>) -> AsyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let op = AsyncOp::new();
        self.push(QueuedCommand::returning(f, op.clone()).with_notify(notify_id));
        AsyncResult::new(op)
    }

    pub(crate) fn push(&mut self, command: QueuedCommand) {
        self.commands.push(command);
    }

    /// Returns true if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of pending commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Detaches every pending command as one batch and leaves the queue empty.
    ///
    /// For the shared queue this must happen under the same lock as
    /// [`CommandQueue::queue`], otherwise commands can be lost.
    #[must_use]
    pub fn flush(&mut self) -> CommandBatch {
        let commands = std::mem::replace(&mut self.commands, Vec::with_capacity(self.capacity));
        CommandBatch { commands }
    }

    /// Appends a whole batch, preserving its order.
    pub(crate) fn append(&mut self, batch: CommandBatch) {
        self.commands.extend(batch.commands);
    }
}

/// A flushed run of commands, detached from its queue.
#[derive(Debug, Default)]
pub struct CommandBatch {
    commands: Vec<QueuedCommand>,
}

/// Outcome of playing back one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Commands run, including failed ones.
    pub executed: usize,
    /// Commands whose body panicked.
    pub failed: usize,
}

impl CommandBatch {
    /// Number of commands in the batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the batch holds nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn commands_mut(&mut self) -> &mut [QueuedCommand] {
        &mut self.commands
    }

    /// Drops every command unexecuted, failing their result slots.
    pub(crate) fn abandon(self) {
        for command in self.commands {
            command.abandon();
        }
    }

    /// Executes every command in order.
    ///
    /// `on_completed` fires for each command carrying a notify id, after its
    /// body ran and any result was written. It fires even when the body
    /// panicked. A failing command never stops the rest of the batch.
    pub fn playback<F>(self, mut on_completed: F) -> PlaybackReport
    where
        F: FnMut(NotifyId),
    {
        let mut report = PlaybackReport::default();

        for command in self.commands {
            let (notify_id, outcome) = command.execute();
            report.executed += 1;

            if let Err(message) = outcome {
                report.failed += 1;
                error!(?notify_id, %message, "queued command panicked");
            }

            if let Some(id) = notify_id {
                on_completed(id);
            }
        }

        report
    }
}
