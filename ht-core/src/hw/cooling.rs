//! Cooling actuators
//!
//! A cooling device is a writable raw attribute (normally `pwmN`) driven by
//! percentage. The percentage is mapped linearly onto the device's own
//! `[min_power, max_power]` raw range and rounded.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{control, pwm};
use crate::data::{
    AttributeKind, CoolingDeviceConfig, CoolingKind, CoolingStatus, Device, ErrorRecord,
};
use crate::error::{Result, ThermalError};
use crate::hw::io::{Cancellation, IoContext, RetryPolicy};

/// Static description of a cooling actuator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoolingDeviceInfo {
    /// `<device>/pwmN` for discovered outputs
    pub name: String,
    /// Label when the driver provides one
    pub display_name: String,
    pub kind: CoolingKind,
    pub path: PathBuf,
    pub enable_path: Option<PathBuf>,
    pub min_power: i64,
    pub max_power: i64,
}

impl CoolingDeviceInfo {
    /// Describe an explicitly configured device
    ///
    /// The mode file is assumed to sit next to the value file as
    /// `<file>_enable`; it is only used if it exists.
    pub fn from_config(config: &CoolingDeviceConfig) -> Self {
        let mut enable = config.path.clone().into_os_string();
        enable.push(pwm::ENABLE_SUFFIX);
        Self {
            name: config.name.clone(),
            display_name: config.name.clone(),
            kind: config.kind,
            path: config.path.clone(),
            enable_path: Some(PathBuf::from(enable)),
            min_power: config.min_power,
            max_power: config.max_power,
        }
    }
}

/// One fan-type cooling device per PWM output, raw range `[0, 255]`
pub fn cooling_outputs(devices: &[Device]) -> Vec<CoolingDeviceInfo> {
    let mut outputs = Vec::new();
    for device in devices {
        for output in device.pwm_outputs() {
            let Some(path) = output.attribute_path(AttributeKind::Input) else {
                continue;
            };
            let name = format!("{}/{}", device.name, output.name);
            outputs.push(CoolingDeviceInfo {
                display_name: output.label.clone().unwrap_or_else(|| name.clone()),
                name,
                kind: CoolingKind::Fan,
                path: path.to_path_buf(),
                enable_path: output
                    .attribute_path(AttributeKind::Enable)
                    .map(Path::to_path_buf),
                min_power: pwm::MIN_VALUE as i64,
                max_power: pwm::MAX_VALUE as i64,
            });
        }
    }
    outputs
}

/// Monitoring view of one cooling device
#[derive(Debug, Clone, Serialize)]
pub struct CoolingSnapshot {
    pub name: String,
    pub display_name: String,
    pub kind: CoolingKind,
    pub path: PathBuf,
    /// Last percentage successfully written
    pub current_power: Option<f64>,
    pub status: CoolingStatus,
    pub last_error: Option<ErrorRecord>,
}

struct CoolingState {
    current_power: Option<f64>,
    status: CoolingStatus,
    last_error: Option<ErrorRecord>,
}

fn normalize_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        control::PERCENT_MAX
    } else {
        percent.clamp(0.0, control::PERCENT_MAX)
    }
}

/// A percentage-driven actuator
pub struct CoolingDevice {
    info: CoolingDeviceInfo,
    policy: RetryPolicy,
    io: IoContext,
    state: Mutex<CoolingState>,
}

impl CoolingDevice {
    pub fn new(info: CoolingDeviceInfo, policy: RetryPolicy, io: IoContext) -> Self {
        Self {
            info,
            policy,
            io,
            state: Mutex::new(CoolingState {
                current_power: None,
                status: CoolingStatus::Enabled,
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &CoolingDeviceInfo {
        &self.info
    }

    pub fn current_power(&self) -> Option<f64> {
        self.state.lock().current_power
    }

    pub fn status(&self) -> CoolingStatus {
        self.state.lock().status
    }

    /// Map a percentage onto the raw range
    ///
    /// Out-of-range input is clamped; NaN maps to full power.
    pub fn percent_to_raw(&self, percent: f64) -> i64 {
        let percent = normalize_percent(percent);
        let span = (self.info.max_power - self.info.min_power) as f64;
        self.info.min_power + (span * percent / control::PERCENT_MAX).round() as i64
    }

    /// Write `percent` and return the raw value written
    pub async fn set_power(&self, percent: f64, cancel: &Cancellation) -> Result<i64> {
        let raw = self.percent_to_raw(percent);
        let result = self
            .io
            .write_retried(&self.info.path, &raw.to_string(), &self.policy, cancel)
            .await;

        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                state.current_power = Some(normalize_percent(percent));
                state.status = CoolingStatus::Enabled;
                debug!(device = %self.info.name, percent, raw, "Cooling output written");
            }
            Err(ThermalError::OperationCanceled) => {}
            Err(e) => {
                state.status = CoolingStatus::Error;
                state.last_error = Some(ErrorRecord::now(e));
            }
        }
        result.map(|()| raw)
    }

    /// Switch the output to manual mode when it has a mode file
    ///
    /// Returns `false` when there is nothing to switch.
    pub async fn enable_manual(&self, cancel: &Cancellation) -> Result<bool> {
        let Some(enable_path) = self.info.enable_path.clone() else {
            return Ok(false);
        };
        let fs = Arc::clone(self.io.fs());
        let probe = enable_path.clone();
        let present = tokio::task::spawn_blocking(move || fs.exists(&probe))
            .await
            .unwrap_or(false);
        if !present {
            return Ok(false);
        }
        self.io
            .write_retried(
                &enable_path,
                &pwm::enable::MANUAL.to_string(),
                &self.policy,
                cancel,
            )
            .await?;
        debug!(device = %self.info.name, path = ?enable_path, "Manual PWM mode enabled");
        Ok(true)
    }

    /// Re-probe the value file and update the status
    pub async fn refresh_status(&self) -> CoolingStatus {
        let fs = Arc::clone(self.io.fs());
        let path = self.info.path.clone();
        let status = tokio::task::spawn_blocking(move || {
            if !fs.exists(&path) {
                CoolingStatus::NotPresent
            } else if fs.probe_writable(&path) {
                CoolingStatus::Enabled
            } else {
                CoolingStatus::Error
            }
        })
        .await
        .unwrap_or(CoolingStatus::Error);

        if status != CoolingStatus::Enabled {
            warn!(device = %self.info.name, path = ?self.info.path, ?status, "Cooling device not usable");
        }
        self.state.lock().status = status;
        status
    }

    pub fn snapshot(&self) -> CoolingSnapshot {
        let state = self.state.lock();
        CoolingSnapshot {
            name: self.info.name.clone(),
            display_name: self.info.display_name.clone(),
            kind: self.info.kind,
            path: self.info.path.clone(),
            current_power: state.current_power,
            status: state.status,
            last_error: state.last_error.clone(),
        }
    }
}
