//! Dated snapshot directories produced by the fetcher.
//!
//! A snapshot is one directory named after its creation time
//! (`%Y%m%d_%H%M%S`) holding one JSON file per record kind.

use crate::config::ImportConfig;
use crate::{ImportError, Result};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Record kinds written into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    Programs,
    Categories,
    Classes,
    Sessions,
}

impl SnapshotKind {
    pub const ALL: [SnapshotKind; 4] = [
        SnapshotKind::Programs,
        SnapshotKind::Categories,
        SnapshotKind::Classes,
        SnapshotKind::Sessions,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            SnapshotKind::Programs => "programs.json",
            SnapshotKind::Categories => "program_categories.json",
            SnapshotKind::Classes => "classes.json",
            SnapshotKind::Sessions => "sessions.json",
        }
    }
}

/// One fetch batch on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDirectory {
    pub path: PathBuf,
    pub created_at: NaiveDateTime,
}

impl SnapshotDirectory {
    /// Interpret `path` as a snapshot if its name follows the naming convention.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let created_at =
            NaiveDateTime::parse_from_str(name, ImportConfig::SNAPSHOT_DIR_FORMAT).ok()?;
        Some(Self {
            path: path.to_path_buf(),
            created_at,
        })
    }

    pub fn name(&self) -> String {
        self.created_at
            .format(ImportConfig::SNAPSHOT_DIR_FORMAT)
            .to_string()
    }

    pub fn file(&self, kind: SnapshotKind) -> PathBuf {
        self.path.join(kind.file_name())
    }

    /// Record kinds actually present in the directory.
    pub fn kinds(&self) -> Vec<SnapshotKind> {
        SnapshotKind::ALL
            .into_iter()
            .filter(|kind| self.file(*kind).is_file())
            .collect()
    }
}

/// Name for a snapshot created now.
pub fn new_snapshot_name() -> String {
    Utc::now()
        .naive_utc()
        .format(ImportConfig::SNAPSHOT_DIR_FORMAT)
        .to_string()
}

/// Snapshot directories directly under `root`, oldest first.
///
/// A missing root is an empty list.
pub fn list_snapshot_directories(root: &Path) -> Result<Vec<SnapshotDirectory>> {
    if !root.exists() {
        debug!("Snapshot root {} does not exist", root.display());
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        return Err(ImportError::NotADirectory(root.to_path_buf()));
    }

    let entries = fs::read_dir(root).map_err(|e| ImportError::io_with_path(e, root))?;
    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ImportError::io_with_path(e, root))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match SnapshotDirectory::from_path(&path) {
            Some(snapshot) => snapshots.push(snapshot),
            None => debug!("Skipping non-snapshot directory {}", path.display()),
        }
    }

    snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.path.cmp(&b.path)));
    Ok(snapshots)
}

/// Move an imported snapshot into the backup directory.
///
/// Returns the new location.
pub fn archive_snapshot(snapshot: &SnapshotDirectory, backup_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir).map_err(|e| ImportError::io_with_path(e, backup_dir))?;

    let mut target = backup_dir.join(snapshot.name());
    let mut suffix = 1;
    while target.exists() {
        target = backup_dir.join(format!("{}-{}", snapshot.name(), suffix));
        suffix += 1;
    }

    move_directory(&snapshot.path, &target)?;

    info!("Archived snapshot {} to {}", snapshot.name(), target.display());
    Ok(target)
}

/// Rename `src` to `dest`, falling back to copy and delete when the rename
/// fails (for example across filesystems).
fn move_directory(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "Rename of {} failed ({}), copying instead",
                src.display(),
                e
            );
            if let Err(copy_err) = copy_dir_recursive(src, dest) {
                // Leave no half-copied snapshot behind in the backup directory.
                let _ = fs::remove_dir_all(dest);
                return Err(copy_err);
            }
            fs::remove_dir_all(src).map_err(|e| ImportError::Io {
                message: format!("Failed to clean up source after copy: {}", src.display()),
                path: Some(src.to_path_buf()),
                source: Some(e),
            })
        }
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| ImportError::io_with_path(e, dest))?;

    for entry in fs::read_dir(src).map_err(|e| ImportError::io_with_path(e, src))? {
        let entry = entry.map_err(|e| ImportError::io_with_path(e, src))?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else {
            fs::copy(&src_path, &dest_path)
                .map_err(|e| ImportError::io_with_path(e, &src_path))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_orders_oldest_first_and_skips_foreign_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        for name in ["20240302_101500", "20240101_000000", "not-a-snapshot"] {
            fs::create_dir(root.join(name)).unwrap();
        }
        fs::write(root.join("20240505_000000"), "a file, not a directory").unwrap();

        let snapshots = list_snapshot_directories(root).unwrap();
        let names: Vec<String> = snapshots.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["20240101_000000", "20240302_101500"]);
    }

    #[test]
    fn test_list_missing_root_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let snapshots = list_snapshot_directories(&temp_dir.path().join("missing")).unwrap();
        assert!(snapshots.is_empty());
    }

    #[test]
    fn test_list_file_root_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("json");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            list_snapshot_directories(&file),
            Err(ImportError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_kinds_reports_present_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("20240101_000000");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("sessions.json"), "[]").unwrap();
        fs::write(dir.join("programs.json"), "[]").unwrap();

        let snapshot = SnapshotDirectory::from_path(&dir).unwrap();
        assert_eq!(
            snapshot.kinds(),
            vec![SnapshotKind::Programs, SnapshotKind::Sessions]
        );
    }

    #[test]
    fn test_archive_moves_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("json").join("20240101_000000");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("classes.json"), "[]").unwrap();
        let backup = temp_dir.path().join("backup");

        let snapshot = SnapshotDirectory::from_path(&dir).unwrap();
        let target = archive_snapshot(&snapshot, &backup).unwrap();

        assert!(!dir.exists());
        assert_eq!(target, backup.join("20240101_000000"));
        assert!(target.join("classes.json").exists());
    }

    #[test]
    fn test_archive_does_not_overwrite_existing_backup() {
        let temp_dir = TempDir::new().unwrap();
        let backup = temp_dir.path().join("backup");
        fs::create_dir_all(backup.join("20240101_000000")).unwrap();
        let dir = temp_dir.path().join("json").join("20240101_000000");
        fs::create_dir_all(&dir).unwrap();

        let snapshot = SnapshotDirectory::from_path(&dir).unwrap();
        let target = archive_snapshot(&snapshot, &backup).unwrap();
        assert_eq!(target, backup.join("20240101_000000-1"));
    }

    #[test]
    fn test_copy_dir_recursive_copies_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("20240101_000000");
        fs::create_dir_all(src.join("extra")).unwrap();
        fs::write(src.join("programs.json"), "[1]").unwrap();
        fs::write(src.join("extra").join("notes.txt"), "n").unwrap();
        let dest = temp_dir.path().join("copy");

        copy_dir_recursive(&src, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("programs.json")).unwrap(), "[1]");
        assert_eq!(
            fs::read_to_string(dest.join("extra").join("notes.txt")).unwrap(),
            "n"
        );
        assert!(src.exists());
    }

    #[test]
    fn test_archive_into_unusable_backup_keeps_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("json").join("20240101_000000");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("classes.json"), "[]").unwrap();
        let backup = temp_dir.path().join("backup");
        fs::write(&backup, "not a directory").unwrap();

        let snapshot = SnapshotDirectory::from_path(&dir).unwrap();
        assert!(archive_snapshot(&snapshot, &backup).is_err());
        assert!(dir.join("classes.json").is_file());
    }

    #[test]
    fn test_new_name_round_trips() {
        let name = new_snapshot_name();
        assert!(SnapshotDirectory::from_path(Path::new(&name)).is_some());
    }
}
