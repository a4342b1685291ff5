//! # Result Slots
//!
//! A result-returning command writes its value into a shared slot exactly
//! once, on the core thread. Whoever holds the handle reads it back.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CoreError, CoreResult};

enum SlotState {
    Pending,
    Ready(Box<dyn Any + Send>),
    Taken,
    Failed,
}

struct SlotInner {
    state: Mutex<SlotState>,
    done: Condvar,
}

/// Type-erased, write-once result slot shared between the core thread and
/// the submitter.
#[derive(Clone)]
pub struct AsyncOp {
    inner: Arc<SlotInner>,
}

impl AsyncOp {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(SlotState::Pending),
                done: Condvar::new(),
            }),
        }
    }

    /// Stores the value and wakes waiters.
    ///
    /// # Panics
    ///
    /// Panics if the slot was already written.
    pub(crate) fn complete(&self, value: Box<dyn Any + Send>) {
        let mut state = self.inner.state.lock();
        assert!(
            matches!(*state, SlotState::Pending),
            "AsyncOp written twice! A result slot is write-once."
        );
        *state = SlotState::Ready(value);
        self.inner.done.notify_all();
    }

    /// Marks the slot failed. The command body panicked.
    pub(crate) fn fail(&self) {
        let mut state = self.inner.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Failed;
        }
        self.inner.done.notify_all();
    }

    /// Returns true once the command has run, successfully or not.
    #[must_use]
    pub fn has_completed(&self) -> bool {
        !matches!(*self.inner.state.lock(), SlotState::Pending)
    }

    /// Returns true if the command panicked instead of producing a value.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(*self.inner.state.lock(), SlotState::Failed)
    }

    /// Blocks until the command has run.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while matches!(*state, SlotState::Pending) {
            self.inner.done.wait(&mut state);
        }
    }

    fn take<T: Any>(&self) -> CoreResult<Option<T>> {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Pending => {
                *state = SlotState::Pending;
                Ok(None)
            }
            SlotState::Ready(value) => match value.downcast::<T>() {
                Ok(value) => Ok(Some(*value)),
                // Typed handles are only built alongside a matching command.
                Err(value) => {
                    *state = SlotState::Ready(value);
                    Err(CoreError::ResultTaken)
                }
            },
            SlotState::Taken => Err(CoreError::ResultTaken),
            SlotState::Failed => {
                *state = SlotState::Failed;
                Err(CoreError::CommandFailed)
            }
        }
    }
}

impl fmt::Debug for AsyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.inner.state.lock() {
            SlotState::Pending => "pending",
            SlotState::Ready(_) => "ready",
            SlotState::Taken => "taken",
            SlotState::Failed => "failed",
        };
        f.debug_struct("AsyncOp").field("state", &state).finish()
    }
}

/// Typed handle to the result of a queued return command.
///
/// ## Usage
///
/// ```rust,ignore
/// let result = core.queue_return_command(|| device.create_buffer(64), false)?;
/// // ... later, or on another thread
/// let buffer = result.wait()?;
/// ```
pub struct AsyncResult<T> {
    op: AsyncOp,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> AsyncResult<T> {
    pub(crate) fn new(op: AsyncOp) -> Self {
        Self {
            op,
            _marker: PhantomData,
        }
    }

    /// The untyped slot behind this handle.
    #[must_use]
    pub fn op(&self) -> &AsyncOp {
        &self.op
    }

    /// Returns true once the command has run.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.op.has_completed()
    }

    /// Returns true if the command panicked.
    #[inline]
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.op.has_failed()
    }

    /// Takes the value if it is ready. `Ok(None)` while still pending.
    ///
    /// # Errors
    ///
    /// [`CoreError::CommandFailed`] if the command panicked,
    /// [`CoreError::ResultTaken`] if the value was already taken.
    pub fn try_take(&self) -> CoreResult<Option<T>> {
        self.op.take::<T>()
    }

    /// Blocks until the command has run and returns its value.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncResult::try_take`].
    pub fn wait(self) -> CoreResult<T> {
        self.op.wait();
        self.op.take::<T>()?.ok_or(CoreError::ResultTaken)
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult").field("op", &self.op).finish()
    }
}
