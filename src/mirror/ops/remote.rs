use crate::mirror::naming;
use crate::mirror::ops::{local, Operations};
use crate::mirror::function_path;
use bon::Builder;
use function_name::named;
use getset::Getters;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;
use tracing::{debug, error};
use validator::Validate;

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Destination on a remote host, driven by `ssh`/`scp` subprocesses. The
/// source stays local; existence checks, deletion, and listing of backups all
/// run on the remote side.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct RemoteOps {
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    #[builder(default = default_connect_timeout())]
    connect_timeout: Duration,
}

/// Wrap a path for use inside a remote shell command line.
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

impl RemoteOps {
    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn connect_timeout_arg(&self) -> String {
        format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1))
    }

    #[named]
    fn run_remote(&self, remote_command: &str) -> Option<Output> {
        debug!("Running on {}: {}", self.target(), remote_command);
        Command::new("ssh")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(self.connect_timeout_arg())
            .arg(self.target())
            .arg(remote_command)
            .output()
            .map_err(|e| {
                error!(
                    "{}: cannot run ssh to {}: {}",
                    function_path!(),
                    self.target(),
                    e
                )
            })
            .ok()
    }
}

impl Operations for RemoteOps {
    fn src_exists(&self, path: &Path) -> bool {
        local::target_exists(path)
    }

    fn dest_exists(&self, path: &Path) -> bool {
        self.run_remote(&format!("test -e {}", sh_quote(path)))
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn src_mod_time(&self, path: &Path, exclusions: Option<&GlobSet>) -> f64 {
        local::mod_time(path, exclusions)
    }

    #[named]
    fn copy(&self, src: &Path, dest: &Path) -> bool {
        let remote_dest = format!("{}:{}", self.target(), sh_quote(dest));
        let result = Command::new("scp")
            .arg("-r")
            .arg("-q")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(self.connect_timeout_arg())
            .arg(src)
            .arg(&remote_dest)
            .status();

        match result {
            Ok(status) if status.success() => true,
            Ok(status) => {
                error!(
                    "{}: scp of {:?} to {} exited with {}",
                    function_path!(),
                    src,
                    remote_dest,
                    status
                );
                false
            }
            Err(e) => {
                error!(
                    "{}: cannot run scp of {:?} to {}: {}",
                    function_path!(),
                    src,
                    remote_dest,
                    e
                );
                false
            }
        }
    }

    fn delete_dest(&self, path: &Path) -> bool {
        self.run_remote(&format!("rm -rf -- {}", sh_quote(path)))
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn backup_names(&self, src: &Path, dest_dir: &Path) -> Vec<PathBuf> {
        let Some(output) = self.run_remote(&format!("ls -1 {}", sh_quote(dest_dir))) else {
            return Vec::new();
        };
        if !output.status.success() {
            error!("Cannot list {:?} on {}", dest_dir, self.target());
            return Vec::new();
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| dest_dir.join(line.trim()))
            .filter(|path| naming::backup_date_time(src, path).is_some())
            .collect()
    }

    fn setup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Remote setup");
    }

    fn cleanup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Remote cleanup");
    }
}
