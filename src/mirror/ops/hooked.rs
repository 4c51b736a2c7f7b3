use crate::mirror::cycle::{CopyCycle, ResultCode};
use crate::mirror::ops::{local, Operations};
use bon::Builder;
use getset::Getters;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use validator::Validate;

/// Local filesystem operations wrapped with shell hooks, for sources that
/// must be quiesced around the copy (e.g. telling a game server to flush and
/// pause its saves). Each hook point runs its commands in order and then
/// waits out an optional settle delay.
#[skip_serializing_none]
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct HookedOps {
    /// Run at the start of every cycle, before anything is inspected.
    #[serde(default)]
    #[builder(default)]
    setup_commands: Vec<String>,
    #[serde(with = "humantime_serde", default)]
    setup_settle: Option<Duration>,
    /// Run after the copy-or-skip decision has played out, every cycle.
    #[serde(default)]
    #[builder(default)]
    cleanup_commands: Vec<String>,
    #[serde(with = "humantime_serde", default)]
    cleanup_settle: Option<Duration>,
    /// Run once per cycle with the outcome exposed through `K_MIRROR_*`
    /// environment variables.
    announce_command: Option<String>,
}

fn run_hook(command: &str, envs: &[(&str, String)]) -> bool {
    info!("Running hook: {}", command);
    let result = Command::new("sh")
        .arg("-c")
        .arg(command)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .status();

    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!("Hook {:?} exited with {}", command, status);
            false
        }
        Err(e) => {
            error!("Cannot run hook {:?}: {}", command, e);
            false
        }
    }
}

impl HookedOps {
    fn run_hooks(&self, commands: &[String], settle: Option<Duration>) {
        for command in commands {
            run_hook(command, &[]);
        }
        if let Some(settle) = settle {
            debug!("Settling for {:?}", settle);
            std::thread::sleep(settle);
        }
    }
}

impl Operations for HookedOps {
    fn src_exists(&self, path: &Path) -> bool {
        local::target_exists(path)
    }

    fn dest_exists(&self, path: &Path) -> bool {
        local::target_exists(path)
    }

    fn src_mod_time(&self, path: &Path, exclusions: Option<&GlobSet>) -> f64 {
        local::mod_time(path, exclusions)
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        local::copy_path(src, dest)
    }

    fn delete_dest(&self, path: &Path) -> bool {
        local::delete_path(path)
    }

    fn backup_names(&self, src: &Path, dest_dir: &Path) -> Vec<PathBuf> {
        local::list_backup_names(src, dest_dir)
    }

    fn setup(&self, _cycle: &CopyCycle) {
        self.run_hooks(&self.setup_commands, self.setup_settle);
    }

    fn cleanup(&self, _cycle: &CopyCycle) {
        self.run_hooks(&self.cleanup_commands, self.cleanup_settle);
    }

    fn finalize(&self, cycle: &CopyCycle) {
        if cycle.code != Some(ResultCode::Success) {
            debug!("Cycle finished without success: {:?}", cycle);
        }
        if let Some(command) = &self.announce_command {
            let envs = [
                (
                    "K_MIRROR_CODE",
                    cycle
                        .code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "Unknown".to_string()),
                ),
                ("K_MIRROR_RESULT", cycle.result.to_string()),
                ("K_MIRROR_SKIPPED", cycle.skipped.to_string()),
                ("K_MIRROR_SRC", cycle.src.to_string_lossy().into_owned()),
                ("K_MIRROR_DEST", cycle.dest.to_string_lossy().into_owned()),
            ];
            run_hook(command, &envs);
        }
    }
}
