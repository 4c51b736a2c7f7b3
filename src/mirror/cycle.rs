use chrono::{DateTime, Utc};
use derive_more::Display;
use std::path::{Path, PathBuf};

/// Terminal classification of one copy cycle, handed to the finalize hook.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    CopyError,
    SourceChange,
    CannotDeleteBadBackup,
    CannotDeleteOldBackup,
}

/// Mutually exclusive scheduler states.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StatusCode {
    Inactive,
    WaitingForTimer,
    Copying,
    CopyComplete,
    DeletingOldBackups,
    WaitingForRetry,
    Error,
}

/// Why a scheduler stopped arming timers (or why the last cycle re-armed
/// on the retry interval).
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ExitCode {
    MissingSourceOrDestination,
    /// A recoverable failure was routed to the retry timer.
    Controlled,
    CopyFailure,
    DeleteBadBackupFailure,
    DeleteOldBackupFailure,
}

/// State of one copy attempt, created fresh at every timer fire and passed
/// through the cycle's phases. Never reused across cycles.
#[derive(Clone, Debug)]
pub struct CopyCycle {
    /// Source file or directory
    pub src: PathBuf,
    /// Destination snapshot candidate
    pub dest: PathBuf,

    /// Source mtime sampled at cycle start, before any operations occur
    pub init_mod_timestamp: f64,
    /// Source mtime sampled immediately before the copy (only if one takes place)
    pub pre_copy_mod_timestamp: Option<f64>,
    /// Source mtime observed at the start of the previous performed copy
    pub last_mod_timestamp: f64,

    /// Wall-clock start of the copy
    pub start_time: Option<DateTime<Utc>>,
    /// Wall-clock end of the copy
    pub end_time: Option<DateTime<Utc>>,

    /// Source mtime at the start of the copy
    pub start_timestamp: Option<f64>,
    /// Source mtime at the end of the copy
    pub end_timestamp: Option<f64>,

    /// Whether the copy was skipped
    pub skipped: bool,
    /// Result of the byte transfer itself
    pub copy_result: bool,
    /// Overall result of the cycle
    pub result: bool,
    /// Terminal classification (set just before the finalize hook)
    pub code: Option<ResultCode>,
}

impl CopyCycle {
    pub fn new<S: AsRef<Path>, D: AsRef<Path>>(
        src: S,
        dest: D,
        last_mod_timestamp: f64,
        init_mod_timestamp: f64,
    ) -> Self {
        Self {
            src: src.as_ref().to_path_buf(),
            dest: dest.as_ref().to_path_buf(),
            init_mod_timestamp,
            pre_copy_mod_timestamp: None,
            last_mod_timestamp,
            start_time: None,
            end_time: None,
            start_timestamp: None,
            end_timestamp: None,
            skipped: false,
            copy_result: false,
            result: false,
            code: None,
        }
    }

    /// Seconds the byte transfer took, when one happened.
    pub fn copy_duration(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                Some(end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// True when the source changed while it was being copied.
    pub fn source_changed(&self) -> bool {
        !self.skipped && self.start_timestamp != self.end_timestamp
    }
}
