use crate::mirror::cycle::{CopyCycle, ExitCode, ResultCode, StatusCode};
use crate::mirror::ops::Operations;
use crate::mirror::result_error::result::Result;
use crate::mirror::timer::OneShotTimer;
use crate::mirror::validate::{
    validate_glob_patterns, validate_non_empty_path, validate_scheduler_name,
};
use bon::Builder;
use chrono::Utc;
use getset::Getters;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{error, info, warn};
use validator::Validate;

fn default_max_num_backups() -> usize {
    5
}

fn default_backup_time() -> Duration {
    Duration::from_secs(300)
}

fn default_backup_retry_time() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

/// Immutable configuration of one source→destination relationship.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SchedulerConfig {
    #[validate(custom(function = validate_scheduler_name))]
    #[builder(into)]
    name: String,
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    src: PathBuf,
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    dest_dir: PathBuf,
    /// Retained snapshot count; the oldest is evicted past this.
    #[validate(range(min = 1))]
    #[serde(default = "default_max_num_backups")]
    #[builder(default = default_max_num_backups())]
    max_num_backups: usize,
    /// Interval between successful cycles.
    #[serde(with = "humantime_serde", default = "default_backup_time")]
    #[builder(default = default_backup_time())]
    backup_time: Duration,
    /// Interval after a recoverable failure.
    #[serde(with = "humantime_serde", default = "default_backup_retry_time")]
    #[builder(default = default_backup_retry_time())]
    backup_retry_time: Duration,
    /// Fire the first cycle right away instead of waiting a full interval.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    backup_immediately: bool,
    /// Skip the copy when the need-check reports no change since last time.
    #[serde(default)]
    #[builder(default)]
    allow_skip: bool,
    /// Glob patterns (relative to the source) whose mtimes never count as a
    /// source change.
    #[validate(custom(function = validate_glob_patterns))]
    #[serde(default)]
    #[builder(default)]
    skip_check_exclusions: Vec<String>,
    #[serde(default)]
    #[builder(default)]
    permit_copy_failure: bool,
    #[serde(default)]
    #[builder(default)]
    permit_bad_backup_delete_failure: bool,
    #[serde(default)]
    #[builder(default)]
    permit_old_backup_delete_failure: bool,
}

struct RuntimeState {
    active: bool,
    status: StatusCode,
    exit_code: Option<ExitCode>,
    /// Source mtime observed at the start of the most recent performed copy.
    last_timestamp: f64,
    /// At most one live timer per scheduler. While a cycle is executing this
    /// holds the handle of the thread running it; joining it therefore waits
    /// for the in-flight cycle.
    timer: Option<OneShotTimer>,
}

/// Timer-driven state machine that backs up one source. Cycles never
/// overlap: the next timer is armed only after the current cycle has fully
/// completed, and every re-arm re-checks `active` under the state lock so a
/// stop during an in-flight copy cannot race a fresh arm.
pub struct BackupScheduler<O: Operations + Send + Sync + 'static> {
    config: SchedulerConfig,
    ops: O,
    exclusions: Option<GlobSet>,
    state: Mutex<RuntimeState>,
    me: Weak<Self>,
}

impl<O: Operations + Send + Sync + 'static> BackupScheduler<O> {
    pub fn new(config: SchedulerConfig, ops: O) -> Result<Arc<Self>> {
        let exclusions = if config.skip_check_exclusions().is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in config.skip_check_exclusions() {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(Arc::new_cyclic(|me| Self {
            config,
            ops,
            exclusions,
            state: Mutex::new(RuntimeState {
                active: false,
                status: StatusCode::Inactive,
                exit_code: None,
                last_timestamp: f64::NEG_INFINITY,
                timer: None,
            }),
            me: me.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn status(&self) -> StatusCode {
        self.state().status
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        self.state().exit_code
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn src_mod_time(&self) -> f64 {
        self.ops
            .src_mod_time(self.config.src(), self.exclusions.as_ref())
    }

    /// Progress-status writes from the cycle body. A stop landing mid-cycle
    /// has already set `Inactive`; that must not be overwritten by a cycle
    /// that is about to abort at its checkpoint.
    fn set_status(&self, status: StatusCode) {
        let mut st = self.state();
        if st.active {
            st.status = status;
        }
    }

    fn arm(&self, delay: Duration) -> Option<OneShotTimer> {
        let me = self.me.clone();
        OneShotTimer::arm(self.config.name(), delay, move || {
            if let Some(scheduler) = me.upgrade() {
                scheduler.run_cycle();
            }
        })
    }

    /// Arm the next timer, unless a stop landed since the cycle started.
    fn rearm(&self, delay: Duration, status: StatusCode, exit_code: Option<ExitCode>) {
        let mut st = self.state();
        if !st.active {
            warn!(
                manager = %self.config.name(),
                "Prevented timer from restarting (backup was stopped during the cycle)"
            );
            return;
        }
        match self.arm(delay) {
            Some(timer) => {
                st.status = status;
                if exit_code.is_some() {
                    st.exit_code = exit_code;
                }
                st.timer = Some(timer);
            }
            None => {
                st.active = false;
                st.status = StatusCode::Error;
            }
        }
    }

    fn rearm_retry(&self) {
        info!(
            manager = %self.config.name(),
            "Trying again in {:?}", self.config.backup_retry_time()
        );
        self.rearm(
            *self.config.backup_retry_time(),
            StatusCode::WaitingForRetry,
            Some(ExitCode::Controlled),
        );
    }

    fn rearm_normal(&self) {
        info!(
            manager = %self.config.name(),
            "Restarting timer after copy ({:?})", self.config.backup_time()
        );
        self.rearm(*self.config.backup_time(), StatusCode::WaitingForTimer, None);
    }

    /// Stop arming timers for good; the supervisor surfaces the exit code.
    fn halt(&self, exit_code: ExitCode) {
        let mut st = self.state();
        st.active = false;
        st.status = StatusCode::Error;
        st.exit_code = Some(exit_code);
    }

    /// Begin backing up. Returns false when already active or when source or
    /// destination is missing (the scheduler then never arms a timer and
    /// reports `MissingSourceOrDestination`).
    pub fn start(&self) -> bool {
        let mut st = self.state();
        if st.active {
            warn!(manager = %self.config.name(), "Already active, ignoring start");
            return false;
        }
        info!(manager = %self.config.name(), "Initiating backups");

        if !self.ops.src_exists(self.config.src()) || !self.ops.dest_exists(self.config.dest_dir())
        {
            error!(
                "Source {:?} and/or destination {:?} does not exist",
                self.config.src(),
                self.config.dest_dir()
            );
            st.status = StatusCode::Error;
            st.exit_code = Some(ExitCode::MissingSourceOrDestination);
            return false;
        }

        let delay = if *self.config.backup_immediately() {
            Duration::ZERO
        } else {
            *self.config.backup_time()
        };
        match self.arm(delay) {
            Some(timer) => {
                st.active = true;
                st.status = StatusCode::WaitingForTimer;
                st.exit_code = None;
                st.timer = Some(timer);
                true
            }
            None => {
                st.status = StatusCode::Error;
                false
            }
        }
    }

    /// Flip inactive and cancel any pending timer without waiting for an
    /// in-flight cycle. Returns false when not active.
    pub fn request_stop(&self) -> bool {
        let mut st = self.state();
        if !st.active {
            info!(manager = %self.config.name(), "Not active, ignoring stop");
            return false;
        }
        info!(manager = %self.config.name(), "Stopping backups");
        st.active = false;
        st.status = StatusCode::Inactive;
        if let Some(timer) = st.timer.as_ref() {
            timer.cancel();
        }
        true
    }

    /// Wait for the current timer thread, and therefore any in-flight cycle,
    /// to fully finish.
    pub fn wait_idle(&self) {
        let timer = self.state().timer.take();
        if let Some(timer) = timer {
            timer.join();
        }
    }

    /// Stop and block until any in-flight cycle has fully finished. After
    /// this returns no further cycle work for this scheduler is observed.
    pub fn stop(&self) -> bool {
        if !self.request_stop() {
            return false;
        }
        info!(manager = %self.config.name(), "Waiting for outstanding operations to finish");
        self.wait_idle();
        info!(manager = %self.config.name(), "Backups terminated");
        true
    }

    /// One complete check-copy-evict cycle, run on the timer's thread.
    fn run_cycle(&self) {
        let name = self.config.name();
        let src = self.config.src();
        let dest_dir = self.config.dest_dir();
        info!(manager = %name, "Timer complete");

        if !self.ops.src_exists(src) || !self.ops.dest_exists(dest_dir) {
            error!(
                "Source {:?} and/or destination {:?} does not exist",
                src, dest_dir
            );
            self.rearm_retry();
            return;
        }

        let names = self.ops.backup_names(src, dest_dir);
        let Some(relevant) = self.ops.relevant_backup_names(src, &names, dest_dir) else {
            error!("Cannot resolve a backup name for {:?}", src);
            self.rearm_retry();
            return;
        };
        let destination = relevant.next;

        let last_timestamp = self.state().last_timestamp;
        let mut cycle = CopyCycle::new(src, &destination, last_timestamp, self.src_mod_time());
        self.ops.setup(&cycle);

        if !*self.config.allow_skip() || self.ops.needed(&cycle) {
            self.ops.conditional_setup(&cycle);
            info!(manager = %name, "Copying {:?} to {:?}", src, destination);
            self.set_status(StatusCode::Copying);

            let start_timestamp = self.src_mod_time();
            self.state().last_timestamp = start_timestamp;
            cycle.pre_copy_mod_timestamp = Some(start_timestamp);
            cycle.start_timestamp = Some(start_timestamp);
            cycle.last_mod_timestamp = start_timestamp;
            cycle.start_time = Some(Utc::now());
            cycle.copy_result = self.ops.copy(src, &destination);
            cycle.end_time = Some(Utc::now());
            cycle.end_timestamp = Some(self.src_mod_time());

            info!(manager = %name, "Copy complete");
            self.set_status(StatusCode::CopyComplete);
            self.ops.conditional_cleanup(&cycle);
        } else {
            info!(manager = %name, "No changes were detected");
            cycle.skipped = true;
        }

        self.ops.cleanup(&cycle);

        // Stop requested while the copy was in flight: abort without
        // finalizing or re-arming.
        if !self.is_active() {
            warn!(
                manager = %name,
                "Prevented timer from restarting (backup was stopped during the cycle)"
            );
            return;
        }

        if !cycle.copy_result && !cycle.skipped {
            error!(
                "The copy operation for {:?} to {:?} failed",
                src, dest_dir
            );
            cycle.result = false;
            cycle.code = Some(ResultCode::CopyError);
            self.ops.finalize(&cycle);
            if !*self.config.permit_copy_failure() {
                self.halt(ExitCode::CopyFailure);
                return;
            }
            self.rearm_retry();
            return;
        }

        if cycle.source_changed() {
            warn!("The source {:?} changed while being copied", src);
            info!(
                "Attempting to delete {:?} to avoid possible corruption",
                destination
            );
            if !self.ops.delete_dest(&destination) {
                error!("Could not delete {:?}", destination);
                if !*self.config.permit_bad_backup_delete_failure() {
                    error!("Cancelling backups since the bad backup could not be deleted");
                    cycle.result = false;
                    cycle.code = Some(ResultCode::CannotDeleteBadBackup);
                    self.ops.finalize(&cycle);
                    self.halt(ExitCode::DeleteBadBackupFailure);
                    return;
                }
            } else {
                info!("Successfully deleted {:?}", destination);
            }
            cycle.result = false;
            cycle.code = Some(ResultCode::SourceChange);
            self.ops.finalize(&cycle);
            self.rearm_retry();
            return;
        }

        if !cycle.skipped {
            info!(
                manager = %name,
                "The source {:?} has been copied to {:?} ({:?}s)",
                src, destination, cycle.copy_duration()
            );

            loop {
                self.set_status(StatusCode::DeletingOldBackups);
                let names = self.ops.backup_names(src, dest_dir);
                if names.len() <= *self.config.max_num_backups() {
                    break;
                }
                let oldest = self
                    .ops
                    .relevant_backup_names(src, &names, dest_dir)
                    .and_then(|relevant| relevant.oldest);
                let Some(oldest) = oldest else {
                    break;
                };
                info!("Deleting {:?} as it is the oldest backup", oldest);
                if !self.ops.delete_dest(&oldest) {
                    error!("Could not delete {:?}", oldest);
                    if !*self.config.permit_old_backup_delete_failure() {
                        error!("Cancelling backups since old backups could not be cleared");
                        cycle.result = false;
                        cycle.code = Some(ResultCode::CannotDeleteOldBackup);
                        self.ops.finalize(&cycle);
                        self.halt(ExitCode::DeleteOldBackupFailure);
                        return;
                    }
                    // Tolerated: abandon eviction for this cycle, re-evaluate
                    // on the next one.
                    break;
                }
                info!("Deleted {:?} successfully", oldest);
            }
        } else {
            info!(manager = %name, "Copy skipped");
        }

        cycle.result = true;
        cycle.code = Some(ResultCode::Success);
        self.ops.finalize(&cycle);
        self.rearm_normal();
    }
}
