//! Hwmon device discovery
//!
//! Walks `/sys/class/hwmon`, groups attribute files into sensors and keeps
//! the result in a TTL cache owned by the [`Discoverer`].
//!
//! # Caching
//!
//! Callers inside the TTL get the cached `Arc<Vec<Device>>` without any
//! filesystem access. Refreshes are serialised by an async mutex; the scan
//! builds a new device list on a blocking thread and the cache lock is only
//! taken to swap it in.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::constants::paths;
use crate::data::{
    parse_attribute_filename, AttributeKind, Device, DiscoveryConfig, SensorInfo, SensorKey,
    SensorKind, SensorSelector,
};
use crate::error::{Result, ThermalError};
use crate::hw::cooling::{cooling_outputs, CoolingDeviceInfo};
use crate::hw::sysfs::SysfsIo;

struct DeviceCache {
    devices: Arc<Vec<Device>>,
    scanned_at: Instant,
}

/// A configured sensor matched against the discovered tree
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSensor {
    /// Driver name of the owning device
    pub device: String,
    pub info: SensorInfo,
    pub attribute: AttributeKind,
    pub path: PathBuf,
}

/// Owner of the hwmon device cache
pub struct Discoverer {
    base_path: PathBuf,
    ttl: Duration,
    timeout: Duration,
    fs: Arc<dyn SysfsIo>,
    cache: RwLock<Option<DeviceCache>>,
    refresh: tokio::sync::Mutex<()>,
    scans: AtomicU64,
}

impl Discoverer {
    pub fn new(config: &DiscoveryConfig, fs: Arc<dyn SysfsIo>) -> Self {
        Self {
            base_path: config.base_path.clone(),
            ttl: config.cache_ttl(),
            timeout: config.timeout(),
            fs,
            cache: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            scans: AtomicU64::new(0),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Number of filesystem scans started so far
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    fn cached(&self) -> Option<Arc<Vec<Device>>> {
        let cache = self.cache.read();
        cache
            .as_ref()
            .filter(|c| c.scanned_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.devices))
    }

    /// Devices sorted by hwmon number, from cache when fresh
    pub async fn discover(&self) -> Result<Arc<Vec<Device>>> {
        if let Some(devices) = self.cached() {
            return Ok(devices);
        }
        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(devices) = self.cached() {
            return Ok(devices);
        }
        self.rescan().await
    }

    /// Rescan regardless of cache age
    pub async fn refresh(&self) -> Result<Arc<Vec<Device>>> {
        let _guard = self.refresh.lock().await;
        self.rescan().await
    }

    /// Drop the cached tree; the next `discover` rescans
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    async fn rescan(&self) -> Result<Arc<Vec<Device>>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let fs = Arc::clone(&self.fs);
        let base = self.base_path.clone();
        let timeout = self.timeout;
        debug!(path = ?self.base_path, "Scanning hwmon tree");

        let scan = tokio::task::spawn_blocking(move || scan_hwmon_tree(fs.as_ref(), &base, timeout));
        let devices = match tokio::time::timeout(timeout, scan).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(ThermalError::Discovery {
                    path: self.base_path.clone(),
                    reason: format!("scan task failed: {}", e),
                })
            }
            Err(_) => {
                return Err(ThermalError::DiscoveryTimeout {
                    path: self.base_path.clone(),
                    timeout,
                })
            }
        };

        let devices = Arc::new(devices);
        *self.cache.write() = Some(DeviceCache {
            devices: Arc::clone(&devices),
            scanned_at: Instant::now(),
        });
        info!(
            devices = devices.len(),
            sensors = devices.iter().map(|d| d.sensors.len()).sum::<usize>(),
            "Discovered hwmon devices"
        );
        Ok(devices)
    }

    /// Look up a device by driver name (first match) or by `hwmonN` id
    pub async fn find_device(&self, device: &str) -> Result<Device> {
        let devices = self.discover().await?;
        devices
            .iter()
            .find(|d| d.name == device)
            .or_else(|| devices.iter().find(|d| d.id == device))
            .cloned()
            .ok_or_else(|| ThermalError::DeviceNotFound(device.to_string()))
    }

    /// Find a sensor and the path of one of its attributes
    pub async fn resolve(
        &self,
        device: &str,
        selector: &SensorSelector,
        attribute: AttributeKind,
    ) -> Result<ResolvedSensor> {
        let found = self.find_device(device).await?;
        let info = match selector {
            SensorSelector::Label(label) => found.find_by_label(label),
            SensorSelector::Index { kind, index } => found.sensor(*kind, *index),
        }
        .cloned()
        .ok_or_else(|| ThermalError::SensorNotFound {
            device: device.to_string(),
            sensor: match selector {
                SensorSelector::Label(label) => format!("label '{}'", label),
                SensorSelector::Index { kind, index } => SensorKey::new(*kind, *index).to_string(),
            },
        })?;

        let path = info
            .attribute_path(attribute)
            .map(Path::to_path_buf)
            .ok_or_else(|| ThermalError::AttributeNotSupported {
                sensor: format!("{}/{}", device, info.name),
                attribute: attribute.to_string(),
            })?;

        Ok(ResolvedSensor {
            device: found.name,
            info,
            attribute,
            path,
        })
    }

    /// One fan-type cooling device per discovered PWM output
    pub async fn cooling_devices(&self) -> Result<Vec<CoolingDeviceInfo>> {
        let devices = self.discover().await?;
        Ok(cooling_outputs(&devices))
    }
}

/// Numeric suffix of an `hwmon<N>` directory name
fn device_number(name: &str) -> Option<&str> {
    name.strip_prefix(paths::DEVICE_DIR_PREFIX)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Scan every `hwmonN` directory under `base`
///
/// Devices that cannot be read are skipped with a warning. An empty tree is
/// not an error, but a tree where every device failed is.
pub fn scan_hwmon_tree(fs: &dyn SysfsIo, base: &Path, timeout: Duration) -> Result<Vec<Device>> {
    let deadline = std::time::Instant::now() + timeout;
    let mut entries = fs.list_dir(base).map_err(|e| ThermalError::Discovery {
        path: base.to_path_buf(),
        reason: e.to_string(),
    })?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut devices = Vec::new();
    let mut candidates = 0usize;
    for entry in entries {
        if !entry.is_dir {
            continue;
        }
        let Some(digits) = device_number(&entry.name) else {
            trace!(entry = %entry.name, "Not an hwmon device directory");
            continue;
        };
        candidates += 1;
        if std::time::Instant::now() >= deadline {
            return Err(ThermalError::DiscoveryTimeout {
                path: base.to_path_buf(),
                timeout,
            });
        }

        // Ids too large for u32 sort last, then lexically
        let numeric_id = digits.parse::<u32>().unwrap_or(u32::MAX);
        let path = base.join(&entry.name);
        match scan_device(fs, &path, &entry.name, numeric_id) {
            Ok(device) => {
                debug!(
                    device = %device.name,
                    id = %device.id,
                    sensors = device.sensors.len(),
                    "Scanned hwmon device"
                );
                devices.push(device);
            }
            Err(e) => warn!(path = ?path, error = %e, "Skipping hwmon device"),
        }
    }

    if candidates > 0 && devices.is_empty() {
        return Err(ThermalError::Discovery {
            path: base.to_path_buf(),
            reason: format!("all {} hwmon devices failed to scan", candidates),
        });
    }

    devices.sort_by(|a, b| a.numeric_id.cmp(&b.numeric_id).then_with(|| a.id.cmp(&b.id)));
    Ok(devices)
}

/// Read one device's name and group its attribute files into sensors
pub fn scan_device(fs: &dyn SysfsIo, path: &Path, id: &str, numeric_id: u32) -> Result<Device> {
    let name = fs
        .read_to_string(&path.join(paths::DEVICE_NAME_FILE))?
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(ThermalError::Discovery {
            path: path.to_path_buf(),
            reason: "empty name file".to_string(),
        });
    }

    let mut grouped: BTreeMap<SensorKey, BTreeMap<AttributeKind, PathBuf>> = BTreeMap::new();
    for entry in fs.list_dir(path)? {
        if entry.is_dir {
            continue;
        }
        match parse_attribute_filename(&entry.name) {
            Some(parsed) => {
                grouped
                    .entry(SensorKey::new(parsed.kind, parsed.index))
                    .or_default()
                    .insert(parsed.attribute, path.join(&entry.name));
            }
            None => trace!(file = %entry.name, "Ignoring non-sensor file"),
        }
    }

    let sensors = grouped
        .into_iter()
        .map(|(key, attributes)| {
            let label = attributes
                .get(&AttributeKind::Label)
                .and_then(|p| match fs.read_to_string(p) {
                    Ok(label) => Some(label.trim().to_string()),
                    Err(e) => {
                        debug!(path = ?p, error = %e, "Unreadable sensor label");
                        None
                    }
                })
                .filter(|label| !label.is_empty());
            let writable = attributes.iter().any(|(attribute, p)| {
                let candidate = attribute.is_writable()
                    || (key.kind == SensorKind::Pwm && *attribute == AttributeKind::Input);
                candidate && fs.probe_writable(p)
            });
            let info = SensorInfo {
                name: key.to_string(),
                label,
                index: key.index,
                kind: key.kind,
                attributes,
                writable,
                device_path: path.to_path_buf(),
            };
            (key, info)
        })
        .collect();

    Ok(Device {
        name,
        path: path.to_path_buf(),
        id: id.to_string(),
        numeric_id,
        sensors,
        last_scan: SystemTime::now(),
    })
}
