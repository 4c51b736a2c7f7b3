//! Backup naming and selection policy.
//!
//! Snapshots of a source are named `<source name>.<timestamp>.bak` inside the
//! destination directory. The timestamp format keeps `+` out of file names by
//! substituting `_`, and parsing it back is how "oldest" is decided; anything
//! in the destination directory that does not round-trip is not a backup of
//! that source and is ignored.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::path::{Path, PathBuf};

static TIME_FORMAT: &str = "%Y-%m-%dT%Hh%Mm%Ss%z";
static BACKUP_FILE_EXT: &str = "bak";

/// Oldest existing backup (if any) and the candidate name for the next one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelevantBackups {
    pub oldest: Option<PathBuf>,
    pub next: PathBuf,
}

/// File-name component all backups of `src` share.
pub fn backup_base_name<S: AsRef<Path>>(src: S) -> Option<String> {
    src.as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
}

/// Candidate name for a snapshot of `src` taken at `dt`.
pub fn next_backup_name<S: AsRef<Path>, D: AsRef<Path>>(
    src: S,
    dest_dir: D,
    dt: DateTime<Utc>,
) -> Option<PathBuf> {
    let base = backup_base_name(src)?;
    let time = dt.format(TIME_FORMAT).to_string().replace('+', "_");
    Some(
        dest_dir
            .as_ref()
            .join(format!("{base}.{time}.{BACKUP_FILE_EXT}")),
    )
}

/// Timestamp a backup of `src` was taken at, or `None` when `candidate` is
/// not a backup of `src`.
pub fn backup_date_time<S: AsRef<Path>, C: AsRef<Path>>(
    src: S,
    candidate: C,
) -> Option<DateTime<Utc>> {
    let base = backup_base_name(src)?;
    let file_name = candidate.as_ref().file_name()?.to_str()?;

    let start = format!("{base}.");
    let end = format!(".{BACKUP_FILE_EXT}");
    if !file_name.starts_with(start.as_str()) || !file_name.ends_with(end.as_str()) {
        return None;
    }

    let start_idx = start.len();
    let end_idx = file_name.len() - end.len();
    if end_idx < start_idx {
        return None;
    }

    let time_string = file_name[start_idx..end_idx].replace('_', "+");

    DateTime::parse_from_str(time_string.as_str(), TIME_FORMAT)
        .ok()
        .map(|dt| dt.to_utc())
}

/// Select the oldest existing backup of `src` from `names` and the next
/// candidate name, stamped with `now`.
pub fn relevant_backup_names<S: AsRef<Path>, D: AsRef<Path>>(
    src: S,
    names: &[PathBuf],
    dest_dir: D,
    now: DateTime<Utc>,
) -> Option<RelevantBackups> {
    let src = src.as_ref();
    let oldest = names
        .iter()
        .filter_map(|name| backup_date_time(src, name).map(|dt| (dt, name)))
        .sorted_unstable_by_key(|(dt, _)| *dt)
        .map(|(_, name)| name.clone())
        .next();

    next_backup_name(src, dest_dir, now).map(|next| RelevantBackups { oldest, next })
}
