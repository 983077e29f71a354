//! Marker directories
//!
//! A lock named `/shared/jobs/jobA` is represented by two sibling
//! directories, `/shared/jobs/jobA_lock` (primary) and
//! `/shared/jobs/jobA_lock2` (secondary). Directory creation is the only
//! operation relied upon to be atomic across hosts.

use crate::error::{DirLeaseError, Result};
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Suffix of the primary marker directory
pub const PRIMARY_SUFFIX: &str = "_lock";

/// Suffix of the secondary marker directory
pub const SECONDARY_SUFFIX: &str = "_lock2";

/// The pair of marker directories backing one lock name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerPaths {
    /// Created first, removed last
    pub primary: PathBuf,
    /// Its identity is the lease epoch
    pub secondary: PathBuf,
}

impl MarkerPaths {
    /// Derive the marker paths for a lock name
    pub fn for_name(name: &str) -> Result<Self> {
        let trimmed = name.trim_end_matches(|c| c == '/' || c == std::path::MAIN_SEPARATOR);
        if trimmed.is_empty() {
            return Err(DirLeaseError::InvalidName(name.to_string()));
        }

        Ok(Self {
            primary: PathBuf::from(format!("{}{}", trimmed, PRIMARY_SUFFIX)),
            secondary: PathBuf::from(format!("{}{}", trimmed, SECONDARY_SUFFIX)),
        })
    }

    /// Read both modification times, best effort
    pub fn times(&self) -> MarkerTimes {
        MarkerTimes {
            primary: modified_time(&self.primary),
            secondary: modified_time(&self.secondary),
        }
    }
}

/// Modification times of the two markers; `None` when unreadable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerTimes {
    /// Primary marker mtime
    pub primary: Option<SystemTime>,
    /// Secondary marker mtime
    pub secondary: Option<SystemTime>,
}

impl MarkerTimes {
    /// Most recent of the readable times
    pub fn newest(&self) -> Option<SystemTime> {
        self.primary.into_iter().chain(self.secondary).max()
    }

    /// Whether neither marker could be read
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.secondary.is_none()
    }
}

/// Staleness test for an existing lock.
///
/// Unreadable times count as the Unix epoch, so a marker that cannot be
/// stat'ed never makes a lock look fresh.
pub fn is_stale(now: SystemTime, times: &MarkerTimes, window: Duration) -> bool {
    let newest = times.newest().unwrap_or(UNIX_EPOCH);
    match newest.checked_add(window) {
        Some(deadline) => now > deadline,
        None => false,
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::symlink_metadata(path).and_then(|m| m.modified()).ok()
}

/// Identity of a secondary marker at a point in time.
///
/// On Unix this is the inode change time, the inode number and the
/// modification time. Kernel ctimes are coarse and inodes get reused, so
/// the acquirer also stamps the mtime with its own nanosecond clock; any
/// recreation or touch of the directory yields a different epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epoch {
    changed: FileTime,
    modified: FileTime,
    inode: u64,
}

impl Epoch {
    /// Read the epoch of a marker directory
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    #[cfg(unix)]
    fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            changed: FileTime::from_unix_time(metadata.ctime(), metadata.ctime_nsec() as u32),
            modified: FileTime::from_last_modification_time(metadata),
            inode: metadata.ino(),
        }
    }

    #[cfg(not(unix))]
    fn from_metadata(metadata: &Metadata) -> Self {
        let modified = FileTime::from_last_modification_time(metadata);
        let changed = FileTime::from_creation_time(metadata).unwrap_or(modified);
        Self {
            changed,
            modified,
            inode: 0,
        }
    }

    /// Modification time recorded in the epoch
    pub fn modified(&self) -> FileTime {
        self.modified
    }
}

/// Set both markers' mtimes to `time`
pub(crate) fn stamp_markers(markers: &MarkerPaths, time: SystemTime) -> io::Result<()> {
    let stamp = FileTime::from_system_time(time);
    filetime::set_file_mtime(&markers.primary, stamp)?;
    filetime::set_file_mtime(&markers.secondary, stamp)
}

/// Remove a marker directory, treating "already gone" as success
pub(crate) fn remove_marker(path: &Path) -> io::Result<()> {
    match fs::remove_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_marker_paths() {
        let markers = MarkerPaths::for_name("/shared/jobs/jobA").unwrap();
        assert_eq!(markers.primary, PathBuf::from("/shared/jobs/jobA_lock"));
        assert_eq!(markers.secondary, PathBuf::from("/shared/jobs/jobA_lock2"));

        let trailing = MarkerPaths::for_name("/shared/jobs/jobA/").unwrap();
        assert_eq!(trailing, markers);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            MarkerPaths::for_name(""),
            Err(DirLeaseError::InvalidName(_))
        ));
        assert!(matches!(
            MarkerPaths::for_name("/"),
            Err(DirLeaseError::InvalidName(_))
        ));
    }

    #[test]
    fn test_unreadable_times_are_old() {
        let times = MarkerTimes {
            primary: None,
            secondary: None,
        };
        assert!(is_stale(SystemTime::now(), &times, Duration::from_secs(300)));
    }

    #[test]
    fn test_newest_marker_wins() {
        let now = SystemTime::now();
        let times = MarkerTimes {
            primary: Some(now - Duration::from_secs(600)),
            secondary: Some(now - Duration::from_secs(10)),
        };
        assert!(!is_stale(now, &times, Duration::from_secs(60)));
        assert!(is_stale(now + Duration::from_secs(51), &times, Duration::from_secs(60)));
    }

    #[test]
    fn test_epoch_changes_on_recreate() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("job_lock2");

        fs::create_dir(&marker).unwrap();
        let first = Epoch::read(&marker).unwrap();
        assert_eq!(first, Epoch::read(&marker).unwrap());

        fs::remove_dir(&marker).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir(&marker).unwrap();
        assert_ne!(first, Epoch::read(&marker).unwrap());
    }

    #[test]
    fn test_remove_marker_missing_ok() {
        let dir = tempdir().unwrap();
        assert!(remove_marker(&dir.path().join("absent_lock")).is_ok());
    }

    proptest! {
        #[test]
        fn prop_markers_are_siblings(name in "[a-zA-Z0-9_.-]{1,24}") {
            let full = format!("/shared/{}", name);
            let markers = MarkerPaths::for_name(&full).unwrap();
            prop_assert_eq!(markers.primary.parent(), Some(Path::new("/shared")));
            prop_assert_eq!(markers.secondary.parent(), Some(Path::new("/shared")));
            prop_assert_ne!(&markers.primary, &markers.secondary);
        }

        #[test]
        fn prop_never_stale_inside_window(age in 0u64..3600, window in 1u64..3600) {
            let now = SystemTime::now();
            let times = MarkerTimes {
                primary: Some(now - Duration::from_secs(age)),
                secondary: None,
            };
            let stale = is_stale(now, &times, Duration::from_secs(window));
            prop_assert_eq!(stale, age > window);
        }
    }
}
