//! Thermal zone control loop
//!
//! A zone reads its sensors, takes the hottest reading as the zone
//! temperature, runs one PID step and spreads the output over its cooling
//! devices. Threshold checks run on every tick regardless of the PID result.
//!
//! # Phases
//!
//! `Initialized` → `Running` on the first PID step; `reset()` moves to
//! `Reset`, and the next step returns to `Running`. The loop runs until its
//! [`Cancellation`] fires.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::constants::control;
use crate::data::{ErrorRecord, SensorKind, ZoneConfig};
use crate::engine::pid::{PidController, PidState};
use crate::error::{Result, ThermalError};
use crate::hw::{Cancellation, CoolingDevice, Sensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePhase {
    Initialized,
    Running,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Normal,
    Warning,
    Critical,
}

/// Escalation published when a zone reaches its critical temperature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalAlert {
    pub zone: String,
    pub temperature: f64,
    pub threshold: f64,
    pub at: SystemTime,
}

/// Outcome of one successful tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    pub temperature: f64,
    pub output: f64,
    /// The PID step was skipped and the previous output reused
    pub debounced: bool,
    pub devices_written: usize,
    pub threshold: ThresholdStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneSnapshot {
    pub name: String,
    pub phase: ZonePhase,
    pub target_temp: f64,
    pub warning_temp: f64,
    pub critical_temp: f64,
    pub last_temperature: Option<f64>,
    pub current_output: f64,
    pub threshold: ThresholdStatus,
    pub pid: PidState,
    pub last_update: Option<SystemTime>,
    pub last_error: Option<ErrorRecord>,
    pub sensors: Vec<String>,
    pub cooling_devices: Vec<String>,
}

struct ZoneState {
    pid: PidController,
    phase: ZonePhase,
    last_temperature: Option<f64>,
    last_update: Option<Instant>,
    last_update_wall: Option<SystemTime>,
    current_output: f64,
    threshold: ThresholdStatus,
    last_error: Option<ErrorRecord>,
}

/// One closed control loop
pub struct ThermalZone {
    config: ZoneConfig,
    sensors: Vec<Arc<Sensor>>,
    cooling: Vec<Arc<CoolingDevice>>,
    alerts: Option<mpsc::Sender<CriticalAlert>>,
    state: Mutex<ZoneState>,
}

impl ThermalZone {
    pub fn new(
        config: ZoneConfig,
        sensors: Vec<Arc<Sensor>>,
        cooling: Vec<Arc<CoolingDevice>>,
    ) -> Result<Self> {
        config.validate()?;
        let field = format!("zones.{}", config.name);
        if sensors.is_empty() {
            return Err(ThermalError::invalid_config(
                format!("{}.sensor_paths", field),
                "no sensor could be bound",
            ));
        }
        if let Some(sensor) = sensors.iter().find(|s| s.kind() != SensorKind::Temperature) {
            return Err(ThermalError::invalid_config(
                format!("{}.sensor_paths", field),
                format!("'{}' is a {} sensor, not temperature", sensor.name(), sensor.kind()),
            ));
        }
        if cooling.is_empty() {
            return Err(ThermalError::invalid_config(
                format!("{}.cooling_devices", field),
                "no cooling device could be bound",
            ));
        }

        let pid = PidController::new(config.pid.clone());
        Ok(Self {
            config,
            sensors,
            cooling,
            alerts: None,
            state: Mutex::new(ZoneState {
                pid,
                phase: ZonePhase::Initialized,
                last_temperature: None,
                last_update: None,
                last_update_wall: None,
                current_output: 0.0,
                threshold: ThresholdStatus::Normal,
                last_error: None,
            }),
        })
    }

    /// Publish critical alerts on `alerts`
    pub fn with_alerts(mut self, alerts: mpsc::Sender<CriticalAlert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn phase(&self) -> ZonePhase {
        self.state.lock().phase
    }

    pub fn current_output(&self) -> f64 {
        self.state.lock().current_output
    }

    /// Hottest successful reading across the zone's sensors
    pub async fn aggregate_temperature(&self, cancel: &Cancellation) -> Result<f64> {
        let mut hottest: Option<f64> = None;
        let mut failed = 0usize;
        for sensor in &self.sensors {
            match sensor.read(cancel).await {
                Ok(value) => match value.as_temperature() {
                    Some(temperature) => {
                        hottest = Some(hottest.map_or(temperature, |t| t.max(temperature)));
                    }
                    None => {
                        failed += 1;
                        warn!(zone = %self.config.name, sensor = %sensor.name(), kind = %value.kind(), "Skipping non-temperature reading");
                    }
                },
                Err(ThermalError::OperationCanceled) => return Err(ThermalError::OperationCanceled),
                Err(e) => {
                    failed += 1;
                    warn!(zone = %self.config.name, sensor = %sensor.name(), error = %e, "Skipping failed sensor");
                }
            }
        }
        hottest.ok_or_else(|| ThermalError::AllSensorsFailed {
            zone: self.config.name.clone(),
            failed,
        })
    }

    /// Run one PID step, or reuse the last output inside the debounce window
    ///
    /// Returns the output and whether the step was debounced.
    pub fn update(&self, temperature: f64) -> (f64, bool) {
        let mut state = self.state.lock();
        state.last_temperature = Some(temperature);

        let now = Instant::now();
        let sample_time = state.pid.config().sample_time();
        let dt = match state.last_update {
            Some(last) if now.duration_since(last) < sample_time / 2 => {
                return (state.current_output, true);
            }
            Some(last) => now.duration_since(last),
            None => sample_time,
        };

        let output = state.pid.update(self.config.target_temp, temperature, dt);
        state.current_output = output;
        state.last_update = Some(now);
        state.last_update_wall = Some(SystemTime::now());
        state.phase = ZonePhase::Running;
        debug!(zone = %self.config.name, temperature, output, dt_ms = dt.as_millis() as u64, "PID step");
        (output, false)
    }

    /// Write `percent` to every cooling device
    ///
    /// Returns how many devices accepted the write; zero is an error.
    pub async fn apply_output(&self, percent: f64, cancel: &Cancellation) -> Result<usize> {
        let mut written = 0usize;
        let mut last_error = None;
        for device in &self.cooling {
            match device.set_power(percent, cancel).await {
                Ok(_) => written += 1,
                Err(ThermalError::OperationCanceled) => return Err(ThermalError::OperationCanceled),
                Err(e) => {
                    warn!(zone = %self.config.name, device = %device.name(), error = %e, "Cooling write failed");
                    last_error = Some(e);
                }
            }
        }
        if written == 0 {
            let reason = match last_error {
                Some(e) => format!("no cooling device accepted {:.1}%: {}", percent, e),
                None => "no cooling devices".to_string(),
            };
            return Err(ThermalError::CoolingControl {
                zone: self.config.name.clone(),
                reason,
            });
        }
        Ok(written)
    }

    pub fn classify(&self, temperature: f64) -> ThresholdStatus {
        if temperature >= self.config.critical_temp {
            ThresholdStatus::Critical
        } else if temperature >= self.config.warning_temp {
            ThresholdStatus::Warning
        } else {
            ThresholdStatus::Normal
        }
    }

    /// Force full cooling and publish an alert
    ///
    /// Always yields the `CriticalTemperature` signal, even when every forced
    /// write succeeded.
    async fn escalate(&self, temperature: f64, cancel: &Cancellation) -> ThermalError {
        let threshold = self.config.critical_temp;
        error!(
            zone = %self.config.name,
            temperature,
            threshold,
            "Critical temperature, forcing full cooling"
        );

        for device in &self.cooling {
            if let Err(e) = device.set_power(control::FULL_COOLING_PERCENT, cancel).await {
                error!(zone = %self.config.name, device = %device.name(), error = %e, "Failed to force full cooling");
            }
        }
        self.state.lock().current_output = control::FULL_COOLING_PERCENT;

        if let Some(alerts) = &self.alerts {
            let alert = CriticalAlert {
                zone: self.config.name.clone(),
                temperature,
                threshold,
                at: SystemTime::now(),
            };
            if let Err(e) = alerts.try_send(alert) {
                warn!(zone = %self.config.name, error = %e, "Escalation channel unavailable, alert dropped");
            }
        }

        ThermalError::CriticalTemperature {
            zone: self.config.name.clone(),
            temperature,
            threshold,
        }
    }

    /// Read, aggregate, update, check thresholds, then apply
    ///
    /// A critical reading skips the PID output and forces full cooling.
    pub async fn tick(&self, cancel: &Cancellation) -> Result<TickReport> {
        let result = self.tick_inner(cancel).await;
        if let Err(e) = &result {
            if !matches!(e, ThermalError::OperationCanceled) {
                self.state.lock().last_error = Some(ErrorRecord::now(e));
            }
        }
        result
    }

    async fn tick_inner(&self, cancel: &Cancellation) -> Result<TickReport> {
        let temperature = self.aggregate_temperature(cancel).await?;
        let (output, debounced) = self.update(temperature);

        let threshold = self.classify(temperature);
        self.state.lock().threshold = threshold;
        match threshold {
            ThresholdStatus::Critical => return Err(self.escalate(temperature, cancel).await),
            ThresholdStatus::Warning => warn!(
                zone = %self.config.name,
                temperature,
                threshold = self.config.warning_temp,
                "Zone above warning temperature"
            ),
            ThresholdStatus::Normal => {}
        }

        let devices_written = self.apply_output(output, cancel).await?;
        Ok(TickReport {
            temperature,
            output,
            debounced,
            devices_written,
            threshold,
        })
    }

    /// Clear PID state and zero the output
    ///
    /// Nothing is written to hardware until the next tick.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.pid.reset();
        state.last_update = None;
        state.current_output = 0.0;
        state.phase = ZonePhase::Reset;
        info!(zone = %self.config.name, "Zone reset");
    }

    /// Switch every cooling output with a mode file to manual control
    pub async fn enable_manual_control(&self, cancel: &Cancellation) {
        for device in &self.cooling {
            match device.enable_manual(cancel).await {
                Ok(true) => {}
                Ok(false) => debug!(device = %device.name(), "No PWM mode file"),
                Err(e) => warn!(
                    zone = %self.config.name,
                    device = %device.name(),
                    error = %e,
                    "Failed to enable manual PWM mode"
                ),
            }
        }
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        let state = self.state.lock();
        ZoneSnapshot {
            name: self.config.name.clone(),
            phase: state.phase,
            target_temp: self.config.target_temp,
            warning_temp: self.config.warning_temp,
            critical_temp: self.config.critical_temp,
            last_temperature: state.last_temperature,
            current_output: state.current_output,
            threshold: state.threshold,
            pid: state.pid.state(),
            last_update: state.last_update_wall,
            last_error: state.last_error.clone(),
            sensors: self.sensors.iter().map(|s| s.name().to_string()).collect(),
            cooling_devices: self.cooling.iter().map(|c| c.name().to_string()).collect(),
        }
    }

    /// Tick every sample interval until cancelled
    pub async fn run(&self, cancel: Cancellation) {
        info!(zone = %self.config.name, "Zone control loop starting");
        self.enable_manual_control(&cancel).await;

        let mut interval = tokio::time::interval(self.config.pid.sample_time());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }

            match self.tick(&cancel).await {
                Ok(report) => {
                    if consecutive_errors > 0 {
                        debug!(zone = %self.config.name, consecutive_errors, "Zone recovered");
                        consecutive_errors = 0;
                    }
                    debug!(
                        zone = %self.config.name,
                        temperature = report.temperature,
                        output = report.output,
                        debounced = report.debounced,
                        "Tick complete"
                    );
                }
                Err(ThermalError::OperationCanceled) => break,
                // Already logged at error level by the escalation
                Err(e) if e.is_critical_signal() => {}
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors == 1 || consecutive_errors % control::MAX_CONSECUTIVE_ERRORS == 0 {
                        error!(zone = %self.config.name, error = %e, consecutive_errors, "Zone tick failed");
                    }
                }
            }
        }
        info!(zone = %self.config.name, "Zone control loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CoolingDeviceConfig, SensorKind};
    use crate::engine::PidConfig;
    use crate::hw::{CoolingDeviceInfo, IoContext, RetryPolicy};
    use crate::test_utils::{CountingSysfs, FakeDevice, FakeHwmon};
    use std::path::PathBuf;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_count: 0,
            retry_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(500),
        }
    }

    fn zone_config(pid: PidConfig) -> ZoneConfig {
        ZoneConfig {
            name: "cpu".to_string(),
            sensor_paths: vec!["/unused".to_string()],
            cooling_devices: vec!["fan".to_string()],
            target_temp: 60.0,
            warning_temp: 80.0,
            critical_temp: 95.0,
            pid,
        }
    }

    struct Rig {
        _hwmon: FakeHwmon,
        dev: FakeDevice,
        fs: Arc<CountingSysfs>,
        sensors: Vec<Arc<Sensor>>,
        cooling: Vec<Arc<CoolingDevice>>,
    }

    /// Temperatures in millidegrees; `None` is a missing file
    fn rig(temps: &[Option<i64>], fans: usize) -> Rig {
        let hwmon = FakeHwmon::new();
        let dev = hwmon.device(0, "nct6775");
        let fs = Arc::new(CountingSysfs::new());
        let io = IoContext::new(fs.clone(), 4);

        let sensors = temps
            .iter()
            .enumerate()
            .map(|(i, temp)| {
                let file = format!("temp{}_input", i + 1);
                let path = match temp {
                    Some(t) => dev.file(&file, &t.to_string()),
                    None => dev.path.join(&file),
                };
                Arc::new(Sensor::for_path(&file, SensorKind::Temperature, path, policy(), io.clone()))
            })
            .collect();

        let cooling = (1..=fans)
            .map(|n| {
                let path = dev.file(&format!("pwm{}", n), "0");
                let config = CoolingDeviceConfig::new(&format!("fan{}", n), path);
                Arc::new(CoolingDevice::new(
                    CoolingDeviceInfo::from_config(&config),
                    policy(),
                    io.clone(),
                ))
            })
            .collect();

        Rig {
            _hwmon: hwmon,
            dev,
            fs,
            sensors,
            cooling,
        }
    }

    fn zone(rig: &Rig, pid: PidConfig) -> ThermalZone {
        ThermalZone::new(zone_config(pid), rig.sensors.clone(), rig.cooling.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_zone_temperature_is_hottest_reading() {
        let rig = rig(&[Some(30_000), Some(45_000), None], 1);
        let zone = zone(&rig, PidConfig::new(1.0, 0.0, 0.0));
        let temp = zone.aggregate_temperature(&Cancellation::new()).await.unwrap();
        assert_eq!(temp, 45.0);
    }

    #[tokio::test]
    async fn test_all_sensors_failed() {
        let rig = rig(&[None, None], 1);
        let zone = zone(&rig, PidConfig::new(1.0, 0.0, 0.0));
        match zone.aggregate_temperature(&Cancellation::new()).await {
            Err(ThermalError::AllSensorsFailed { zone, failed }) => {
                assert_eq!(zone, "cpu");
                assert_eq!(failed, 2);
            }
            other => panic!("expected AllSensorsFailed, got {:?}", other),
        }

        // A failed aggregation leaves the output alone
        assert!(zone.tick(&Cancellation::new()).await.is_err());
        assert_eq!(zone.current_output(), 0.0);
        assert!(zone.snapshot().last_error.is_some());
        assert!(rig.fs.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_inside_half_interval_are_debounced() {
        let rig = rig(&[Some(40_000)], 1);
        let pid = PidConfig::new(2.0, 0.0, 0.0).with_sample_time(Duration::from_secs(1));
        let zone = zone(&rig, pid);

        assert_eq!(zone.update(70.0), (20.0, false));
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(zone.update(90.0), (20.0, true));
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(zone.update(90.0), (60.0, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_step_after_reset_uses_nominal_interval() {
        let rig = rig(&[Some(40_000)], 1);
        let pid = PidConfig::new(0.0, 1.0, 0.0)
            .with_sample_time(Duration::from_secs(1))
            .with_anti_windup(crate::engine::AntiWindup::None);
        let zone = zone(&rig, pid);
        assert_eq!(zone.phase(), ZonePhase::Initialized);

        assert_eq!(zone.update(70.0), (10.0, false));
        assert_eq!(zone.phase(), ZonePhase::Running);

        zone.reset();
        assert_eq!(zone.phase(), ZonePhase::Reset);
        assert_eq!(zone.current_output(), 0.0);
        assert_eq!(zone.snapshot().pid.integral, 0.0);

        // No time has passed, yet the step is not debounced
        assert_eq!(zone.update(65.0), (5.0, false));
        assert_eq!(zone.phase(), ZonePhase::Running);
    }

    #[tokio::test]
    async fn test_tick_writes_output() {
        let rig = rig(&[Some(70_000)], 2);
        let zone = zone(&rig, PidConfig::new(2.0, 0.0, 0.0));
        let report = zone.tick(&Cancellation::new()).await.unwrap();

        assert_eq!(report.temperature, 70.0);
        assert_eq!(report.output, 20.0);
        assert!(!report.debounced);
        assert_eq!(report.devices_written, 2);
        assert_eq!(report.threshold, ThresholdStatus::Normal);
        assert_eq!(rig.dev.read("pwm1"), "51");
        assert_eq!(rig.dev.read("pwm2"), "51");
    }

    #[tokio::test]
    async fn test_warning_is_reported_not_raised() {
        let rig = rig(&[Some(85_000)], 1);
        let zone = zone(&rig, PidConfig::new(1.0, 0.0, 0.0));
        let report = zone.tick(&Cancellation::new()).await.unwrap();
        assert_eq!(report.threshold, ThresholdStatus::Warning);
        assert_eq!(zone.snapshot().threshold, ThresholdStatus::Warning);
    }

    #[tokio::test]
    async fn test_critical_forces_full_cooling_and_alerts() {
        let rig = rig(&[Some(50_000), Some(96_000)], 2);
        let (tx, mut rx) = mpsc::channel(4);
        let zone = zone(&rig, PidConfig::new(0.1, 0.0, 0.0)).with_alerts(tx);

        match zone.tick(&Cancellation::new()).await {
            Err(ThermalError::CriticalTemperature { zone, temperature, threshold }) => {
                assert_eq!(zone, "cpu");
                assert_eq!(temperature, 96.0);
                assert_eq!(threshold, 95.0);
            }
            other => panic!("expected CriticalTemperature, got {:?}", other),
        }
        assert_eq!(rig.dev.read("pwm1"), "255");
        assert_eq!(rig.dev.read("pwm2"), "255");
        assert_eq!(zone.current_output(), 100.0);
        // The PID output never reaches hardware on a critical tick
        let written = rig.fs.written();
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|(_, value)| value == "255"));

        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.zone, "cpu");
        assert_eq!(alert.temperature, 96.0);
        assert_eq!(zone.snapshot().threshold, ThresholdStatus::Critical);
    }

    #[tokio::test]
    async fn test_partial_cooling_failure_is_tolerated() {
        let rig = rig(&[Some(70_000)], 2);
        rig.fs.set_read_only(&rig.dev.path.join("pwm1"));
        let zone = zone(&rig, PidConfig::new(2.0, 0.0, 0.0));

        let report = zone.tick(&Cancellation::new()).await.unwrap();
        assert_eq!(report.devices_written, 1);
        assert_eq!(rig.dev.read("pwm2"), "51");

        rig.fs.set_read_only(&rig.dev.path.join("pwm2"));
        let err = zone.tick(&Cancellation::new()).await.unwrap_err();
        assert!(matches!(err, ThermalError::CoolingControl { .. }));
        assert!(zone.snapshot().last_error.is_some());
    }

    #[tokio::test]
    async fn test_construction_requires_sensors_and_cooling() {
        let rig = rig(&[Some(40_000)], 1);
        let pid = PidConfig::new(1.0, 0.0, 0.0);
        assert!(matches!(
            ThermalZone::new(zone_config(pid.clone()), vec![], rig.cooling.clone()),
            Err(ThermalError::InvalidConfig { .. })
        ));
        assert!(matches!(
            ThermalZone::new(zone_config(pid.clone()), rig.sensors.clone(), vec![]),
            Err(ThermalError::InvalidConfig { .. })
        ));
        let mut bad = zone_config(pid);
        bad.pid.sample_time_ms = 0;
        assert!(matches!(
            ThermalZone::new(bad, rig.sensors.clone(), rig.cooling.clone()),
            Err(ThermalError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_zone_rejects_non_temperature_sensors() {
        let rig = rig(&[Some(40_000)], 1);
        let path = rig.dev.file("fan1_input", "1200");
        let io = IoContext::new(rig.fs.clone(), 4);
        let fan = Arc::new(Sensor::for_path("fan1_input", SensorKind::Fan, path, policy(), io));

        let mut sensors = rig.sensors.clone();
        sensors.push(fan);
        match ThermalZone::new(zone_config(PidConfig::new(1.0, 0.0, 0.0)), sensors, rig.cooling.clone()) {
            Err(ThermalError::InvalidConfig { field, .. }) => assert_eq!(field, "zones.cpu.sensor_paths"),
            Err(e) => panic!("expected InvalidConfig, got {}", e),
            Ok(_) => panic!("fan sensor accepted as zone input"),
        }
        assert!(rig.fs.written().is_empty());
    }

    #[tokio::test]
    async fn test_run_enables_manual_mode_and_stops_on_cancel() {
        let rig = rig(&[Some(70_000)], 1);
        rig.dev.file("pwm1_enable", "2");
        let pid = PidConfig::new(2.0, 0.0, 0.0).with_sample_time(Duration::from_millis(20));
        let zone = Arc::new(zone(&rig, pid));

        let cancel = Cancellation::new();
        let task = {
            let zone = Arc::clone(&zone);
            let cancel = cancel.clone();
            tokio::spawn(async move { zone.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rig.dev.read("pwm1_enable"), "1");
        assert_eq!(rig.dev.read("pwm1"), "51");
        assert_eq!(zone.phase(), ZonePhase::Running);
        let enable: PathBuf = rig.dev.path.join("pwm1_enable");
        assert_eq!(rig.fs.written().first(), Some(&(enable, "1".to_string())));
    }
}
