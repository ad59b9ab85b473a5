//! Filesystem access seam
//!
//! Every sysfs call the engine makes goes through [`SysfsIo`], so discovery,
//! sensors and cooling devices can be exercised against fake trees and
//! failure-injecting doubles.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Result, ThermalError};

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    /// Symlinks are followed, as `/sys/class/hwmon/hwmonN` entries are links
    pub is_dir: bool,
}

/// Blocking filesystem operations used by the engine
///
/// Implementations are called from `spawn_blocking` threads and must not
/// assume an async context.
pub trait SysfsIo: Send + Sync + 'static {
    fn read_to_string(&self, path: &Path) -> Result<String>;

    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>>;

    /// Whether the file can be opened for writing
    fn probe_writable(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;
}

/// The real `/sys` filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSysfs;

fn map_read_error(path: &Path, e: io::Error) -> ThermalError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ThermalError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ThermalError::read(path, e.to_string()),
    }
}

fn map_write_error(path: &Path, e: io::Error) -> ThermalError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ThermalError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ThermalError::write(path, e.to_string()),
    }
}

impl SysfsIo for RealSysfs {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| map_read_error(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        // Never create missing attribute files
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| map_write_error(path, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| map_write_error(path, e))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let entries = fs::read_dir(path).map_err(|e| map_read_error(path, e))?;
        let mut listing = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            listing.push(DirEntryInfo {
                name,
                is_dir: entry.path().is_dir(),
            });
        }
        Ok(listing)
    }

    fn probe_writable(&self, path: &Path) -> bool {
        OpenOptions::new().write(true).open(path).is_ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_sysfs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pwm1");
        fs::write(&file, "0\n").unwrap();
        fs::create_dir(dir.path().join("device")).unwrap();

        let fs_io = RealSysfs;
        fs_io.write(&file, "128").unwrap();
        assert_eq!(fs_io.read_to_string(&file).unwrap().trim(), "128");
        assert!(fs_io.probe_writable(&file));

        let mut listing = fs_io.list_dir(dir.path()).unwrap();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            listing,
            vec![
                DirEntryInfo { name: "device".to_string(), is_dir: true },
                DirEntryInfo { name: "pwm1".to_string(), is_dir: false },
            ]
        );
    }

    #[test]
    fn test_missing_files_map_to_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("temp1_input");
        let fs_io = RealSysfs;

        assert!(matches!(fs_io.read_to_string(&missing), Err(ThermalError::Read { .. })));
        // Writes never create attribute files
        assert!(matches!(fs_io.write(&missing, "1"), Err(ThermalError::Write { .. })));
        assert!(!missing.exists());
        assert!(!fs_io.probe_writable(&missing));
        assert!(!fs_io.exists(&missing));
    }
}
