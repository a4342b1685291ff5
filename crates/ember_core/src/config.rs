//! # Core Thread Configuration
//!
//! Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! thread_name = "core"
//! mode = "threaded"
//! frame_arena_capacity = 1048576
//! initial_queue_capacity = 256
//! ```

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// How commands reach the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// A dedicated worker thread plays back queued commands.
    #[default]
    Threaded,
    /// No worker. The constructing thread is the core thread and drains the
    /// queue itself with [`CoreThread::run_pending`](crate::CoreThread::run_pending).
    Inline,
}

/// Configuration for the core thread.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreThreadConfig {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Threaded or inline playback.
    pub mode: ThreadingMode,
    /// Size of each of the two frame arenas, in bytes.
    pub frame_arena_capacity: usize,
    /// Command slots reserved up front in every queue.
    pub initial_queue_capacity: usize,
}

impl Default for CoreThreadConfig {
    fn default() -> Self {
        Self {
            thread_name: "core".to_string(),
            mode: ThreadingMode::Threaded,
            frame_arena_capacity: 1024 * 1024, // 1MB per frame
            initial_queue_capacity: 256,
        }
    }
}

impl CoreThreadConfig {
    /// Production config: larger arenas and queues so a busy frame never
    /// reallocates.
    #[must_use]
    pub fn production() -> Self {
        Self {
            frame_arena_capacity: 16 * 1024 * 1024,
            initial_queue_capacity: 4096,
            ..Self::default()
        }
    }

    /// Config for running everything on the calling thread.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            mode: ThreadingMode::Inline,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] on malformed TOML or bad values.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first bad field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.thread_name.is_empty() {
            return Err(CoreError::InvalidConfig("thread_name must not be empty".to_string()));
        }
        if self.thread_name.contains('\0') {
            return Err(CoreError::InvalidConfig("thread_name must not contain NUL".to_string()));
        }
        if self.frame_arena_capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "frame_arena_capacity must be greater than zero".to_string(),
            ));
        }
        if u32::try_from(self.frame_arena_capacity).is_err() {
            return Err(CoreError::InvalidConfig(format!(
                "frame_arena_capacity {} exceeds 4GB",
                self.frame_arena_capacity
            )));
        }
        Ok(())
    }
}
