//! Thermal manager
//!
//! Builds the discoverer, sensor handles, cooling devices and zones from one
//! validated [`ThermalConfig`], runs one task per zone and serves the
//! monitoring snapshot.
//!
//! Every zone gets its own sensor and cooling-device handles, so value
//! caches and last-error state never leak between zones. A cooling output
//! belongs to exactly one zone. The manager keeps a separate set of sensor
//! handles for polling and snapshots.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::constants::control;
use crate::data::{Device, SensorKind, SensorReading, ThermalConfig};
use crate::engine::zone::{CriticalAlert, ThermalZone, ZoneSnapshot};
use crate::error::{Result, ThermalError};
use crate::hw::{
    Cancellation, CoolingDevice, CoolingDeviceInfo, CoolingSnapshot, Discoverer, IoContext,
    RealSysfs, RetryPolicy, Sensor, SysfsIo,
};

/// Read-only view for monitoring collaborators
#[derive(Debug, Clone, Serialize)]
pub struct ThermalSnapshot {
    pub taken_at: SystemTime,
    pub devices: Vec<Device>,
    pub sensors: Vec<SensorReading>,
    pub cooling_devices: Vec<CoolingSnapshot>,
    pub zones: Vec<ZoneSnapshot>,
}

pub struct ThermalManager {
    discoverer: Arc<Discoverer>,
    /// Monitoring handles, never read by a zone
    sensors: BTreeMap<String, Arc<Sensor>>,
    cooling: BTreeMap<String, Arc<CoolingDevice>>,
    zones: Vec<Arc<ThermalZone>>,
    alerts: Option<mpsc::Receiver<CriticalAlert>>,
    cancel: Cancellation,
    tasks: JoinSet<()>,
}

impl ThermalManager {
    /// Validate `config`, discover hardware and bind every zone
    ///
    /// Nothing touches the filesystem until the configuration has passed
    /// validation.
    pub async fn build(config: ThermalConfig, fs: Arc<dyn SysfsIo>) -> Result<Self> {
        config.validate()?;

        let discoverer = Arc::new(Discoverer::new(&config.discovery, Arc::clone(&fs)));
        let io = IoContext::new(fs, config.io.max_concurrent_reads);
        let defaults = RetryPolicy::from_config(&config.io);

        let mut resolved = BTreeMap::new();
        let mut sensors = BTreeMap::new();
        for sensor_config in &config.sensors {
            let selector = sensor_config.selector()?;
            let found = discoverer
                .resolve(&sensor_config.device, &selector, sensor_config.attribute)
                .await?;
            let sensor = Sensor::new(sensor_config, found.clone(), defaults, io.clone())?;
            sensors.insert(sensor_config.name.clone(), Arc::new(sensor));
            resolved.insert(sensor_config.name.as_str(), (sensor_config, found));
        }

        let discovered = discoverer.cooling_devices().await?;
        let mut cooling: BTreeMap<String, Arc<CoolingDevice>> = BTreeMap::new();
        let (alert_tx, alert_rx) = mpsc::channel(control::ALERT_CHANNEL_CAPACITY);
        let mut zones = Vec::with_capacity(config.zones.len());

        for zone_config in &config.zones {
            let field = format!("zones.{}", zone_config.name);

            let mut zone_sensors = Vec::with_capacity(zone_config.sensor_paths.len());
            for entry in &zone_config.sensor_paths {
                let sensor = match resolved.get(entry.as_str()) {
                    Some((sensor_config, found)) => {
                        Sensor::new(sensor_config, found.clone(), defaults, io.clone())?
                    }
                    None if Path::new(entry).is_absolute() => {
                        let raw = |io: IoContext| {
                            Sensor::for_path(entry, SensorKind::Temperature, entry, defaults, io)
                        };
                        sensors
                            .entry(entry.clone())
                            .or_insert_with(|| Arc::new(raw(io.clone())));
                        raw(io.clone())
                    }
                    None => {
                        return Err(ThermalError::invalid_config(
                            format!("{}.sensor_paths", field),
                            format!("unknown sensor '{}'", entry),
                        ))
                    }
                };
                zone_sensors.push(Arc::new(sensor));
            }

            let mut zone_cooling = Vec::with_capacity(zone_config.cooling_devices.len());
            for name in &zone_config.cooling_devices {
                if cooling.contains_key(name) {
                    return Err(ThermalError::invalid_config(
                        format!("{}.cooling_devices", field),
                        format!("'{}' is already driven by another zone", name),
                    ));
                }
                let info = match config.cooling_device(name) {
                    Some(explicit) => CoolingDeviceInfo::from_config(explicit),
                    None => discovered
                        .iter()
                        .find(|d| &d.name == name)
                        .cloned()
                        .ok_or_else(|| {
                            ThermalError::invalid_config(
                                format!("{}.cooling_devices", field),
                                format!("unknown cooling device '{}'", name),
                            )
                        })?,
                };
                let device = Arc::new(CoolingDevice::new(info, defaults, io.clone()));
                device.refresh_status().await;
                cooling.insert(name.clone(), Arc::clone(&device));
                zone_cooling.push(device);
            }

            let zone = ThermalZone::new(zone_config.clone(), zone_sensors, zone_cooling)?
                .with_alerts(alert_tx.clone());
            debug!(zone = %zone_config.name, "Zone bound");
            zones.push(Arc::new(zone));
        }

        info!(
            sensors = sensors.len(),
            cooling_devices = cooling.len(),
            zones = zones.len(),
            "Thermal manager ready"
        );

        Ok(Self {
            discoverer,
            sensors,
            cooling,
            zones,
            alerts: Some(alert_rx),
            cancel: Cancellation::new(),
            tasks: JoinSet::new(),
        })
    }

    /// Build against the real `/sys` tree
    pub async fn from_config(config: ThermalConfig) -> Result<Self> {
        Self::build(config, Arc::new(RealSysfs)).await
    }

    pub fn discoverer(&self) -> &Arc<Discoverer> {
        &self.discoverer
    }

    pub fn zones(&self) -> &[Arc<ThermalZone>] {
        &self.zones
    }

    pub fn zone(&self, name: &str) -> Option<&Arc<ThermalZone>> {
        self.zones.iter().find(|z| z.name() == name)
    }

    /// Configured sensors and zone-level raw paths, by name
    pub fn sensor(&self, name: &str) -> Option<&Arc<Sensor>> {
        self.sensors.get(name)
    }

    pub fn cooling_device(&self, name: &str) -> Option<&Arc<CoolingDevice>> {
        self.cooling.get(name)
    }

    /// The escalation receiver; `None` once taken
    pub fn take_alerts(&mut self) -> Option<mpsc::Receiver<CriticalAlert>> {
        self.alerts.take()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Spawn one control task per zone
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Thermal manager already running");
            return;
        }
        for zone in &self.zones {
            let zone = Arc::clone(zone);
            let cancel = self.cancel.clone();
            self.tasks.spawn(async move { zone.run(cancel).await });
        }
        info!(zones = self.zones.len(), "Zone control tasks started");
    }

    /// Cancel every zone task and wait for them to finish
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Zone task ended abnormally");
            }
        }
        // Fresh signal so the manager can be started again
        self.cancel = Cancellation::new();
        info!("Thermal manager stopped");
    }

    /// Read every sensor once, returning how many reads succeeded
    pub async fn poll_sensors(&self, cancel: &Cancellation) -> usize {
        let mut ok = 0;
        for (name, sensor) in &self.sensors {
            match sensor.read(cancel).await {
                Ok(_) => ok += 1,
                Err(e) => debug!(sensor = %name, error = %e, "Sensor poll failed"),
            }
        }
        ok
    }

    /// Devices, last sensor readings, cooling state and zone state
    pub async fn snapshot(&self) -> Result<ThermalSnapshot> {
        let devices = self.discoverer.discover().await?;
        Ok(ThermalSnapshot {
            taken_at: SystemTime::now(),
            devices: (*devices).clone(),
            sensors: self.sensors.values().map(|s| s.reading()).collect(),
            cooling_devices: self.cooling.values().map(|c| c.snapshot()).collect(),
            zones: self.zones.iter().map(|z| z.snapshot()).collect(),
        })
    }
}

impl Drop for ThermalManager {
    fn drop(&mut self) {
        // JoinSet aborts its tasks on drop; cancel first so in-flight I/O stops
        self.cancel.cancel();
    }
}
