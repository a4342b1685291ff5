//! Playback statistics for the core thread.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::command::PlaybackReport;

/// Snapshot of core thread statistics.
#[derive(Clone, Debug, Default)]
pub struct CoreThreadStats {
    /// Commands executed by playback, including failed ones.
    pub commands_executed: u64,
    /// Batches flushed and played back.
    pub batches_played: u64,
    /// Commands whose body panicked.
    pub failed_commands: u64,
    /// Largest batch seen.
    pub largest_batch: usize,
    /// Average commands per batch.
    pub avg_batch_size: f64,
    /// Frame boundaries crossed with `update()`.
    pub frames_advanced: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    commands_executed: AtomicU64,
    batches_played: AtomicU64,
    failed_commands: AtomicU64,
    largest_batch: AtomicUsize,
}

impl StatsCounters {
    pub(crate) fn record(&self, report: PlaybackReport) {
        self.commands_executed
            .fetch_add(report.executed as u64, Ordering::Relaxed);
        self.failed_commands
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.batches_played.fetch_add(1, Ordering::Relaxed);
        self.largest_batch.fetch_max(report.executed, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(&self, frames_advanced: u64) -> CoreThreadStats {
        let commands_executed = self.commands_executed.load(Ordering::Relaxed);
        let batches_played = self.batches_played.load(Ordering::Relaxed);

        CoreThreadStats {
            commands_executed,
            batches_played,
            failed_commands: self.failed_commands.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
            avg_batch_size: if batches_played > 0 {
                commands_executed as f64 / batches_played as f64
            } else {
                0.0
            },
            frames_advanced,
        }
    }
}
