//! Sync cycle stages and weighted progress

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]

use std::fmt;

/// Stage of the currently-running sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Verifying,
    Pushing,
    Pulling,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verifying => "verifying",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        formatter.write_str(name)
    }
}

/// Snapshot handed to the progress callback.
///
/// `current`/`total` count the running stage's own units (tables, not rows);
/// `percent` is the weighted whole-cycle figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub stage: SyncStage,
    pub current: usize,
    pub total: usize,
    pub percent: u8,
}

/// A stage's slice of the 0–100 scale.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageWindow {
    pub start: u8,
    pub end: u8,
}

impl StageWindow {
    /// Map `current/total` linearly into this window.
    ///
    /// `total` is clamped to at least 1 so an empty stage still completes
    /// the percent sequence instead of dividing by zero.
    pub(crate) fn at(self, current: usize, total: usize) -> u8 {
        let total = total.max(1);
        let fraction = (current.min(total) as f64) / (total as f64);
        let span = f64::from(self.end - self.start);
        self.start + (span * fraction).round() as u8
    }
}

pub(crate) const VERIFYING: StageWindow = StageWindow { start: 0, end: 10 };
pub(crate) const PUSHING: StageWindow = StageWindow { start: 10, end: 50 };
pub(crate) const PULLING: StageWindow = StageWindow { start: 50, end: 90 };
pub(crate) const FINALIZING: StageWindow = StageWindow { start: 90, end: 100 };
