use crate::mirror::cycle::CopyCycle;
use crate::mirror::naming::RelevantBackups;
use crate::mirror::ops::hooked::HookedOps;
use crate::mirror::ops::local::LocalOps;
use crate::mirror::ops::remote::RemoteOps;
use chrono::Utc;
use derive_more::From;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::result;
use validator::{Validate, ValidationErrors};

pub mod hooked;
pub mod local;
pub mod remote;

/// Copy/exists/delete/list primitives for a destination medium, plus the
/// lifecycle hooks invoked around each copy cycle. One implementation is
/// selected per scheduler at construction time.
pub trait Operations {
    fn src_exists(&self, path: &Path) -> bool;
    fn dest_exists(&self, path: &Path) -> bool;

    /// Modification timestamp of the source (epoch seconds). For directories
    /// this is the newest mtime in the tree, ignoring `exclusions`.
    fn src_mod_time(&self, path: &Path, exclusions: Option<&GlobSet>) -> f64;

    /// Whether a backup is required. Consulted only when skipping is allowed.
    fn needed(&self, cycle: &CopyCycle) -> bool {
        cycle.init_mod_timestamp > cycle.last_mod_timestamp
    }

    /// Byte transfer of `src` to `dest`. Reports success/failure only.
    fn copy(&self, src: &Path, dest: &Path) -> bool;

    fn delete_dest(&self, path: &Path) -> bool;

    /// All existing backups of `src` inside `dest_dir`.
    fn backup_names(&self, src: &Path, dest_dir: &Path) -> Vec<PathBuf>;

    /// Oldest existing backup and the next candidate name.
    fn relevant_backup_names(
        &self,
        src: &Path,
        names: &[PathBuf],
        dest_dir: &Path,
    ) -> Option<RelevantBackups> {
        crate::mirror::naming::relevant_backup_names(src, names, dest_dir, Utc::now())
    }

    /// Unconditional hook at the start of every cycle.
    fn setup(&self, _cycle: &CopyCycle) {}
    /// Hook before the copy, only when one will be performed.
    fn conditional_setup(&self, _cycle: &CopyCycle) {}
    /// Hook after the copy, only when one was performed.
    fn conditional_cleanup(&self, _cycle: &CopyCycle) {}
    /// Unconditional hook after the copy-or-skip decision has played out.
    fn cleanup(&self, _cycle: &CopyCycle) {}
    /// Invoked with the completed cycle record, carrying the final outcome.
    fn finalize(&self, _cycle: &CopyCycle) {}
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum OpsConfig {
    Local(LocalOps),
    Remote(RemoteOps),
    Hooked(HookedOps),
}

impl Validate for OpsConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Local(inner) => inner.validate(),
            Self::Remote(inner) => inner.validate(),
            Self::Hooked(inner) => inner.validate(),
        }
    }
}

impl Operations for OpsConfig {
    fn src_exists(&self, path: &Path) -> bool {
        match self {
            Self::Local(inner) => inner.src_exists(path),
            Self::Remote(inner) => inner.src_exists(path),
            Self::Hooked(inner) => inner.src_exists(path),
        }
    }

    fn dest_exists(&self, path: &Path) -> bool {
        match self {
            Self::Local(inner) => inner.dest_exists(path),
            Self::Remote(inner) => inner.dest_exists(path),
            Self::Hooked(inner) => inner.dest_exists(path),
        }
    }

    fn src_mod_time(&self, path: &Path, exclusions: Option<&GlobSet>) -> f64 {
        match self {
            Self::Local(inner) => inner.src_mod_time(path, exclusions),
            Self::Remote(inner) => inner.src_mod_time(path, exclusions),
            Self::Hooked(inner) => inner.src_mod_time(path, exclusions),
        }
    }

    fn needed(&self, cycle: &CopyCycle) -> bool {
        match self {
            Self::Local(inner) => inner.needed(cycle),
            Self::Remote(inner) => inner.needed(cycle),
            Self::Hooked(inner) => inner.needed(cycle),
        }
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        match self {
            Self::Local(inner) => inner.copy(src, dest),
            Self::Remote(inner) => inner.copy(src, dest),
            Self::Hooked(inner) => inner.copy(src, dest),
        }
    }

    fn delete_dest(&self, path: &Path) -> bool {
        match self {
            Self::Local(inner) => inner.delete_dest(path),
            Self::Remote(inner) => inner.delete_dest(path),
            Self::Hooked(inner) => inner.delete_dest(path),
        }
    }

    fn backup_names(&self, src: &Path, dest_dir: &Path) -> Vec<PathBuf> {
        match self {
            Self::Local(inner) => inner.backup_names(src, dest_dir),
            Self::Remote(inner) => inner.backup_names(src, dest_dir),
            Self::Hooked(inner) => inner.backup_names(src, dest_dir),
        }
    }

    fn setup(&self, cycle: &CopyCycle) {
        match self {
            Self::Local(inner) => inner.setup(cycle),
            Self::Remote(inner) => inner.setup(cycle),
            Self::Hooked(inner) => inner.setup(cycle),
        }
    }

    fn conditional_setup(&self, cycle: &CopyCycle) {
        match self {
            Self::Local(inner) => inner.conditional_setup(cycle),
            Self::Remote(inner) => inner.conditional_setup(cycle),
            Self::Hooked(inner) => inner.conditional_setup(cycle),
        }
    }

    fn conditional_cleanup(&self, cycle: &CopyCycle) {
        match self {
            Self::Local(inner) => inner.conditional_cleanup(cycle),
            Self::Remote(inner) => inner.conditional_cleanup(cycle),
            Self::Hooked(inner) => inner.conditional_cleanup(cycle),
        }
    }

    fn cleanup(&self, cycle: &CopyCycle) {
        match self {
            Self::Local(inner) => inner.cleanup(cycle),
            Self::Remote(inner) => inner.cleanup(cycle),
            Self::Hooked(inner) => inner.cleanup(cycle),
        }
    }

    fn finalize(&self, cycle: &CopyCycle) {
        match self {
            Self::Local(inner) => inner.finalize(cycle),
            Self::Remote(inner) => inner.finalize(cycle),
            Self::Hooked(inner) => inner.finalize(cycle),
        }
    }
}
