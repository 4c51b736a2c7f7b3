use crate::mirror::function_path;
use crate::mirror::ops::OpsConfig;
use crate::mirror::overseer::Overseer;
use crate::mirror::result_error::error::Error;
use crate::mirror::result_error::result::{convert_error_vec, Result};
use crate::mirror::result_error::WithDebugObjectAndFnName;
use crate::mirror::scheduler::{BackupScheduler, SchedulerConfig};
use function_name::named;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::time::Duration;
use validator::Validate;

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// One scheduler paired with the operations backend it drives.
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct ManagerConfig {
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
    #[validate(nested)]
    pub ops: OpsConfig,
}

/// Top-level configuration file: run parameters plus the full manager set.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct OverseerConfig {
    /// How often each worker re-checks its scheduler for liveness.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Run for this long then stop everything; absent means run until
    /// interrupted.
    #[serde(default, with = "humantime_serde")]
    pub max_run_time: Option<Duration>,
    #[validate(nested)]
    pub managers: Vec<ManagerConfig>,
}

impl Overseer<OpsConfig> {
    /// Build the full manager registry from a validated configuration.
    /// Scheduler names must be unique across the file; every broken manager
    /// entry is reported, not just the first.
    #[named]
    pub fn from_config(config: &OverseerConfig) -> Result<Self> {
        let mut overseer = Overseer::new(config.poll_interval);
        let mut errors = Vec::new();
        for manager in &config.managers {
            let built = BackupScheduler::new(manager.scheduler.clone(), manager.ops.clone())
                .with_debug_object_and_fn_name(manager.scheduler.clone(), function_path!());
            match built {
                Ok(scheduler) => {
                    let name = scheduler.name().to_string();
                    if !overseer.add(scheduler) {
                        errors.push(Error::DuplicateSchedulerName(name));
                    }
                }
                Err(e) => errors.push(e),
            }
        }
        convert_error_vec(errors)?;
        Ok(overseer)
    }
}
