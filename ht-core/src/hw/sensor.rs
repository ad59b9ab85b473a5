//! Sensor handles
//!
//! A [`Sensor`] is one configured, resolved attribute file. Reads and writes
//! go through the shared [`IoContext`] with the sensor's retry policy;
//! values are validated before they are returned and before anything is
//! written.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::data::{AttributeKind, ErrorRecord, SensorConfig, SensorKind, SensorReading, Value};
use crate::error::{Result, ThermalError};
use crate::hw::discovery::ResolvedSensor;
use crate::hw::io::{with_retry, Cancellation, IoContext, RetryPolicy};

#[derive(Default)]
struct SensorState {
    cached: Option<(Value, Instant)>,
    last_value: Option<Value>,
    last_read: Option<SystemTime>,
    last_error: Option<ErrorRecord>,
}

/// A readable (and possibly writable) hwmon attribute
pub struct Sensor {
    name: String,
    device: String,
    /// Kind of the values stored in the attribute file
    kind: SensorKind,
    path: PathBuf,
    writable: bool,
    validate: bool,
    min: Option<f64>,
    max: Option<f64>,
    cache_ttl: Option<Duration>,
    policy: RetryPolicy,
    io: IoContext,
    state: Mutex<SensorState>,
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish()
    }
}

impl Sensor {
    /// Build a handle from its configuration and discovery result
    pub fn new(
        config: &SensorConfig,
        resolved: ResolvedSensor,
        defaults: RetryPolicy,
        io: IoContext,
    ) -> Result<Self> {
        let field = format!("sensors.{}", config.name);
        let attribute = resolved.attribute;
        if attribute == AttributeKind::Label {
            return Err(ThermalError::invalid_config(
                format!("{}.attribute", field),
                format!("{} does not hold a numeric value", attribute),
            ));
        }

        if config.writable {
            let attribute_writable = attribute.is_writable()
                || (resolved.info.kind == SensorKind::Pwm && attribute == AttributeKind::Input);
            if !attribute_writable || !resolved.info.writable {
                return Err(ThermalError::invalid_config(
                    format!("{}.writable", field),
                    format!("{} is not writable on this hardware", resolved.path.display()),
                ));
            }
        }

        let kind = if attribute.is_measurement() {
            resolved.info.kind
        } else {
            SensorKind::Generic
        };

        let policy = RetryPolicy {
            retry_count: config.retry_count.unwrap_or(defaults.retry_count),
            retry_delay: config
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            timeout: config
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        };

        debug!(
            sensor = %config.name,
            device = %resolved.device,
            path = ?resolved.path,
            kind = %kind,
            writable = config.writable,
            "Sensor configured"
        );

        Ok(Self {
            name: config.name.clone(),
            device: resolved.device,
            kind,
            path: resolved.path,
            writable: config.writable,
            validate: config.validate,
            min: config.min,
            max: config.max,
            cache_ttl: config.cache_ttl(),
            policy,
            io,
            state: Mutex::new(SensorState::default()),
        })
    }

    /// Read-only, validated handle for a raw attribute path
    pub fn for_path(
        name: &str,
        kind: SensorKind,
        path: impl Into<PathBuf>,
        policy: RetryPolicy,
        io: IoContext,
    ) -> Self {
        let path = path.into();
        let device = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name: name.to_string(),
            device,
            kind,
            path,
            writable: false,
            validate: true,
            min: None,
            max: None,
            cache_ttl: None,
            policy,
            io,
            state: Mutex::new(SensorState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn cached_value(&self) -> Option<Value> {
        let ttl = self.cache_ttl?;
        let state = self.state.lock();
        state
            .cached
            .filter(|(_, at)| at.elapsed() < ttl)
            .map(|(value, _)| value)
    }

    /// Read, parse and validate the current value
    ///
    /// Served from the value cache when one is configured and fresh.
    pub async fn read(&self, cancel: &Cancellation) -> Result<Value> {
        if let Some(value) = self.cached_value() {
            trace!(sensor = %self.name, "Serving cached value");
            return Ok(value);
        }

        let result = self.read_uncached(cancel).await;
        let mut state = self.state.lock();
        match &result {
            Ok(value) => {
                state.last_value = Some(*value);
                state.last_read = Some(SystemTime::now());
                if self.cache_ttl.is_some() {
                    state.cached = Some((*value, Instant::now()));
                }
            }
            Err(ThermalError::OperationCanceled) => {}
            Err(e) => state.last_error = Some(ErrorRecord::now(e)),
        }
        result
    }

    async fn read_uncached(&self, cancel: &Cancellation) -> Result<Value> {
        let value = with_retry(&self.policy, cancel, |attempt| async move {
            let raw = self
                .io
                .read_once(&self.path, self.policy.timeout, cancel)
                .await?;
            Value::parse(self.kind, &raw).map_err(|e| {
                debug!(sensor = %self.name, attempt, raw = %raw.trim(), "Unparseable reading");
                ThermalError::ValueParse {
                    path: self.path.clone(),
                    raw: raw.trim().to_string(),
                    reason: e.to_string(),
                }
            })
        })
        .await?;
        self.check(&value)?;
        Ok(value)
    }

    /// Kind, physical bounds and configured range checks
    pub fn check(&self, value: &Value) -> Result<()> {
        if value.kind() != self.kind {
            return Err(ThermalError::ValueKindMismatch {
                expected: self.kind.as_str(),
                found: value.kind().as_str(),
            });
        }
        if !self.validate {
            return Ok(());
        }
        let (lower, upper) = self.kind.bounds();
        let canonical = value.canonical();
        if !value.is_valid() {
            return Err(ThermalError::ValueOutOfRange {
                value: canonical,
                min: lower,
                max: upper,
            });
        }
        let min = self.min.unwrap_or(lower);
        let max = self.max.unwrap_or(upper);
        if canonical < min || canonical > max {
            return Err(ThermalError::ValueOutOfRange {
                value: canonical,
                min,
                max,
            });
        }
        Ok(())
    }

    /// Validate, then write the raw integer form of `value`
    pub async fn write(&self, value: Value, cancel: &Cancellation) -> Result<()> {
        if !self.writable {
            return Err(ThermalError::NotWritable(self.name.clone()));
        }
        self.check(&value)?;

        let raw = value.format_raw();
        let result = self
            .io
            .write_retried(&self.path, &raw, &self.policy, cancel)
            .await;
        let mut state = self.state.lock();
        match &result {
            Ok(()) => {
                state.cached = None;
                debug!(sensor = %self.name, value = %raw, "Sensor written");
            }
            Err(ThermalError::OperationCanceled) => {}
            Err(e) => state.last_error = Some(ErrorRecord::now(e)),
        }
        result
    }

    /// Write a quantity given in the canonical unit
    pub async fn write_canonical(&self, canonical: f64, cancel: &Cancellation) -> Result<()> {
        self.write(Value::from_canonical(self.kind, canonical), cancel)
            .await
    }

    pub fn invalidate_cache(&self) {
        self.state.lock().cached = None;
    }

    /// Last value, read time and error for monitoring
    pub fn reading(&self) -> SensorReading {
        let state = self.state.lock();
        SensorReading {
            name: self.name.clone(),
            kind: self.kind,
            path: self.path.clone(),
            value: state.last_value,
            last_read: state.last_read,
            last_error: state.last_error.clone(),
        }
    }
}
