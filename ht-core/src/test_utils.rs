/*
 * Test utilities and fakes for Hwtherm
 *
 * Fake hwmon trees on a temporary directory, and a SysfsIo double that
 * counts calls and injects failures, hangs and read-only attributes.
 */

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use crate::error::{Result, ThermalError};
use crate::hw::{DirEntryInfo, RealSysfs, SysfsIo};

/// A `/sys/class/hwmon` lookalike rooted in a temp dir
pub struct FakeHwmon {
    dir: TempDir,
}

impl FakeHwmon {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create `hwmon<n>` with its `name` file
    pub fn device(&self, n: u32, name: &str) -> FakeDevice {
        let device = self.device_without_name(n);
        fs::write(device.path.join("name"), format!("{}\n", name)).expect("write name");
        device
    }

    pub fn device_without_name(&self, n: u32) -> FakeDevice {
        let path = self.dir.path().join(format!("hwmon{}", n));
        fs::create_dir_all(&path).expect("create device dir");
        FakeDevice { path }
    }
}

pub struct FakeDevice {
    pub path: PathBuf,
}

impl FakeDevice {
    /// Write an attribute file and return its path
    pub fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path.join(name);
        fs::write(&path, format!("{}\n", contents)).expect("write attribute");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path.join(name))
            .expect("read attribute")
            .trim()
            .to_string()
    }
}

/// RealSysfs with counters and injected faults
#[derive(Default)]
pub struct CountingSysfs {
    reads: AtomicU32,
    writes: AtomicU32,
    lists: AtomicU32,
    failing_reads: Mutex<HashMap<PathBuf, u32>>,
    failing_writes: Mutex<HashMap<PathBuf, u32>>,
    hangs: Mutex<HashMap<PathBuf, Duration>>,
    read_only: Mutex<HashSet<PathBuf>>,
    written: Mutex<Vec<(PathBuf, String)>>,
}

impl CountingSysfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` reads of `path`
    pub fn fail_reads(&self, path: &Path, times: u32) {
        self.failing_reads.lock().insert(path.to_path_buf(), times);
    }

    pub fn fail_writes(&self, path: &Path, times: u32) {
        self.failing_writes.lock().insert(path.to_path_buf(), times);
    }

    /// Block every access to `path` for `duration`
    pub fn hang(&self, path: &Path, duration: Duration) {
        self.hangs.lock().insert(path.to_path_buf(), duration);
    }

    pub fn set_read_only(&self, path: &Path) {
        self.read_only.lock().insert(path.to_path_buf());
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Write attempts, including failed ones
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> u32 {
        self.lists.load(Ordering::SeqCst)
    }

    /// Successful writes in order
    pub fn written(&self) -> Vec<(PathBuf, String)> {
        self.written.lock().clone()
    }

    fn maybe_hang(&self, path: &Path) {
        let hang = self.hangs.lock().get(path).copied();
        if let Some(duration) = hang {
            std::thread::sleep(duration);
        }
    }

    fn take_failure(table: &Mutex<HashMap<PathBuf, u32>>, path: &Path) -> bool {
        let mut table = table.lock();
        match table.get_mut(path) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl SysfsIo for CountingSysfs {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang(path);
        if Self::take_failure(&self.failing_reads, path) {
            return Err(ThermalError::read(path, "injected failure"));
        }
        RealSysfs.read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.maybe_hang(path);
        if self.read_only.lock().contains(path) {
            return Err(ThermalError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        if Self::take_failure(&self.failing_writes, path) {
            return Err(ThermalError::write(path, "injected failure"));
        }
        RealSysfs.write(path, contents)?;
        self.written
            .lock()
            .push((path.to_path_buf(), contents.to_string()));
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        RealSysfs.list_dir(path)
    }

    fn probe_writable(&self, path: &Path) -> bool {
        !self.read_only.lock().contains(path) && RealSysfs.probe_writable(path)
    }

    fn exists(&self, path: &Path) -> bool {
        RealSysfs.exists(path)
    }
}
