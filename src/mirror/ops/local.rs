use crate::mirror::naming;
use crate::mirror::ops::Operations;
use globset::GlobSet;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error};
use validator::Validate;
use walkdir::WalkDir;

/// Local filesystem operations. Source and destination are both paths on
/// this machine.
#[derive(Clone, Default, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LocalOps {}

impl Operations for LocalOps {
    fn src_exists(&self, path: &Path) -> bool {
        target_exists(path)
    }

    fn dest_exists(&self, path: &Path) -> bool {
        target_exists(path)
    }

    fn src_mod_time(&self, path: &Path, exclusions: Option<&GlobSet>) -> f64 {
        mod_time(path, exclusions)
    }

    fn copy(&self, src: &Path, dest: &Path) -> bool {
        copy_path(src, dest)
    }

    fn delete_dest(&self, path: &Path) -> bool {
        delete_path(path)
    }

    fn backup_names(&self, src: &Path, dest_dir: &Path) -> Vec<PathBuf> {
        list_backup_names(src, dest_dir)
    }

    fn setup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Local setup");
    }

    fn conditional_setup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Local conditional_setup");
    }

    fn conditional_cleanup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Local conditional_cleanup");
    }

    fn cleanup(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Local cleanup");
    }

    fn finalize(&self, _cycle: &crate::mirror::cycle::CopyCycle) {
        debug!("Local final");
    }
}

pub(crate) fn target_exists(path: &Path) -> bool {
    path.exists()
}

fn file_mod_time(path: &Path) -> Option<f64> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

fn is_excluded(root: &Path, path: &Path, exclusions: Option<&GlobSet>) -> bool {
    match exclusions {
        Some(globset) => path
            .strip_prefix(root)
            .map(|rel| globset.is_match(rel))
            .unwrap_or(false),
        None => false,
    }
}

/// Newest file mtime found under `path` (epoch seconds). Excluded entries
/// and their subtrees are not considered, so touching an excluded file does
/// not register as a source change. Directory mtimes are ignored: creating
/// an excluded file bumps its parent's mtime, and that must not count
/// either.
pub(crate) fn mod_time(path: &Path, exclusions: Option<&GlobSet>) -> f64 {
    if !path.is_dir() {
        return file_mod_time(path).unwrap_or(f64::NEG_INFINITY);
    }

    let mut newest = f64::NEG_INFINITY;
    let walker = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_excluded(path, entry.path(), exclusions));
    for entry in walker {
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(ts) = file_mod_time(entry.path()) {
                    if ts > newest {
                        newest = ts;
                    }
                }
            }
            Err(e) => debug!("Skipping unreadable entry under {:?}: {}", path, e),
        }
    }
    newest
}

fn copy_dir(src: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copy a file or a whole directory tree. Reports success/failure only; the
/// scheduler owns the decision of what a failure means.
pub(crate) fn copy_path(src: &Path, dest: &Path) -> bool {
    let result = if src.is_dir() {
        copy_dir(src, dest)
    } else {
        fs::copy(src, dest).map(|_| ())
    };

    match result {
        Ok(_) => true,
        Err(e) => {
            error!("Copy of {:?} to {:?} failed: {}", src, dest, e);
            false
        }
    }
}

pub(crate) fn delete_path(path: &Path) -> bool {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(_) => true,
        Err(e) => {
            error!("Delete of {:?} failed: {}", path, e);
            false
        }
    }
}

pub(crate) fn list_backup_names(src: &Path, dest_dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dest_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| naming::backup_date_time(src, path).is_some())
            .sorted_unstable()
            .collect(),
        Err(e) => {
            error!("Cannot list {:?}: {}", dest_dir, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::naming::next_backup_name;
    use chrono::{TimeZone, Utc};
    use globset::{Glob, GlobSetBuilder};
    use std::fs::File;
    use std::io::Write;

    fn write_file(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn test_copy_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.txt");
        let dest = dir.path().join("data.bak");
        write_file(&src, "payload");

        assert!(copy_path(&src, &dest));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "payload");
    }

    #[test]
    fn test_copy_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("world");
        fs::create_dir_all(src.join("region")).unwrap();
        write_file(&src.join("level.dat"), "level");
        write_file(&src.join("region/r.0.0.mca"), "chunk");

        let dest = dir.path().join("snapshot");
        assert!(copy_path(&src, &dest));
        assert_eq!(fs::read_to_string(dest.join("level.dat")).unwrap(), "level");
        assert_eq!(
            fs::read_to_string(dest.join("region/r.0.0.mca")).unwrap(),
            "chunk"
        );
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!copy_path(
            &dir.path().join("nope"),
            &dir.path().join("dest")
        ));
    }

    #[test]
    fn test_mod_time_ignores_excluded_entries() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("world");
        fs::create_dir_all(&src).unwrap();
        write_file(&src.join("level.dat"), "level");
        let before = mod_time(&src, None);

        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(&src.join("session.lock"), "lock");

        let globset = GlobSetBuilder::new()
            .add(Glob::new("session.lock").unwrap())
            .build()
            .unwrap();
        assert!(mod_time(&src, Some(&globset)) <= before);
        assert!(mod_time(&src, None) >= before);
    }

    #[test]
    fn test_mod_time_of_missing_path() {
        assert_eq!(
            mod_time(Path::new("/no/such/path"), None),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn test_list_backup_names_filters_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = Path::new("/data/world");
        let backup =
            next_backup_name(src, dir.path(), Utc.timestamp_opt(1_700_000_000, 0).unwrap())
                .unwrap();
        write_file(&backup, "snap");
        write_file(&dir.path().join("unrelated.txt"), "other");

        let names = list_backup_names(src, dir.path());
        assert_eq!(names, vec![backup]);
    }

    #[test]
    fn test_delete_file_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        write_file(&file, "x");
        let sub = dir.path().join("tree");
        fs::create_dir_all(sub.join("inner")).unwrap();

        assert!(delete_path(&file));
        assert!(delete_path(&sub));
        assert!(!delete_path(&dir.path().join("missing")));
    }
}
