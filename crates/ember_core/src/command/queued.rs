//! # Queued Commands
//!
//! A command is a deferred call on the core thread. It either returns
//! nothing or produces a value that lands in an [`AsyncOp`] slot.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use super::async_op::AsyncOp;

/// Identifier given to a blocking command so its waiter can match completion.
///
/// Unique among outstanding blocking commands, assigned monotonically.
pub type NotifyId = u64;

/// The body of a queued command.
pub(crate) enum CommandBody {
    /// Runs for side effects only.
    Plain(Box<dyn FnOnce() + Send>),
    /// Produces a value written into `op` once the body returns.
    Returning {
        body: Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>,
        op: AsyncOp,
    },
}

/// A command waiting in a queue.
pub struct QueuedCommand {
    body: CommandBody,
    /// The submitter wants to wait for this command.
    pub(crate) blocking: bool,
    /// Set once the command is bound for the shared queue with a waiter.
    pub(crate) notify_id: Option<NotifyId>,
}

impl QueuedCommand {
    pub(crate) fn plain<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            body: CommandBody::Plain(Box::new(f)),
            blocking: false,
            notify_id: None,
        }
    }

    pub(crate) fn returning<T, F>(f: F, op: AsyncOp) -> Self
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            body: CommandBody::Returning {
                body: Box::new(move || Box::new(f()) as Box<dyn Any + Send>),
                op,
            },
            blocking: false,
            notify_id: None,
        }
    }

    pub(crate) fn with_notify(mut self, notify_id: Option<NotifyId>) -> Self {
        self.blocking = notify_id.is_some();
        self.notify_id = notify_id;
        self
    }

    pub(crate) fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Returns true if the submitter waits on this command.
    #[inline]
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Notify id, if the command has a waiter.
    #[inline]
    #[must_use]
    pub fn notify_id(&self) -> Option<NotifyId> {
        self.notify_id
    }

    /// Drops the command unexecuted. Result slots are marked failed so their
    /// readers do not wait forever.
    pub(crate) fn abandon(self) {
        if let CommandBody::Returning { op, .. } = self.body {
            op.fail();
        }
    }

    /// Runs the body. Returns the notify id and whether the body completed
    /// without panicking.
    ///
    /// A panic is contained here; for returning commands the slot is marked
    /// failed so readers never wait on a value that will not come.
    pub(crate) fn execute(self) -> (Option<NotifyId>, Result<(), String>) {
        let outcome = match self.body {
            CommandBody::Plain(f) => panic::catch_unwind(AssertUnwindSafe(f)),
            CommandBody::Returning { body, op } => {
                match panic::catch_unwind(AssertUnwindSafe(body)) {
                    Ok(value) => {
                        op.complete(value);
                        Ok(())
                    }
                    Err(payload) => {
                        op.fail();
                        Err(payload)
                    }
                }
            }
        };

        (self.notify_id, outcome.map_err(|payload| panic_message(&*payload)))
    }
}

impl fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            CommandBody::Plain(_) => "plain",
            CommandBody::Returning { .. } => "returning",
        };
        f.debug_struct("QueuedCommand")
            .field("kind", &kind)
            .field("blocking", &self.blocking)
            .field("notify_id", &self.notify_id)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
