//! Constants and configuration defaults for Hwtherm
//!
//! Centralizes magic numbers, paths, and default timings. Add new values
//! here first rather than inlining them at the call site.

use std::time::Duration;

/// Sysfs paths
pub mod paths {
    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// Per-device file holding the driver name
    pub const DEVICE_NAME_FILE: &str = "name";

    /// Prefix of hwmon device directories (`hwmon0`, `hwmon1`, ...)
    pub const DEVICE_DIR_PREFIX: &str = "hwmon";
}

/// Discovery cache defaults
pub mod discovery {
    use super::*;

    /// How long a discovered device tree stays valid
    pub const CACHE_TTL: Duration = Duration::from_secs(30);

    /// Deadline for one full discovery pass
    pub const TIMEOUT: Duration = Duration::from_secs(5);
}

/// Sensor and actuator I/O defaults
pub mod io {
    use super::*;

    /// Extra attempts after the first failed one
    pub const RETRY_COUNT: u32 = 2;

    /// Wait between attempts
    pub const RETRY_DELAY: Duration = Duration::from_millis(100);

    /// Per-attempt deadline
    pub const TIMEOUT: Duration = Duration::from_secs(1);

    /// Upper bound on sysfs operations in flight at once
    pub const MAX_CONCURRENT_READS: usize = 8;
}

/// PWM control constants
pub mod pwm {
    /// Minimum PWM value (fan off or minimum speed)
    pub const MIN_VALUE: u32 = 0;

    /// Maximum PWM value (full speed)
    pub const MAX_VALUE: u32 = 255;

    /// Suffix of the PWM mode file next to `pwmN`
    pub const ENABLE_SUFFIX: &str = "_enable";

    /// PWM enable values
    pub mod enable {
        /// PWM control disabled
        pub const DISABLED: u8 = 0;
        /// Manual PWM control
        pub const MANUAL: u8 = 1;
        /// Automatic/thermal control
        pub const AUTOMATIC: u8 = 2;
    }

    /// Convert PWM value (0-255) to percentage (0-100)
    #[inline]
    pub fn to_percent(value: i64) -> f64 {
        (value as f64 / MAX_VALUE as f64) * 100.0
    }
}

/// Raw sysfs scale divisors
pub mod scale {
    /// milli-units (millidegree, millivolt, milliamp, milli-percent)
    pub const MILLI: f64 = 1_000.0;

    /// micro-units (microwatt)
    pub const MICRO: f64 = 1_000_000.0;

    /// Unscaled (RPM, pascal)
    pub const UNIT: f64 = 1.0;
}

/// Physical validity bounds in canonical units
pub mod limits {
    /// Absolute zero
    pub const TEMPERATURE_MIN: f64 = -273.15;
    /// Hottest plausible hwmon reading
    pub const TEMPERATURE_MAX: f64 = 200.0;

    pub const VOLTAGE_MAX: f64 = 50.0;

    pub const FAN_RPM_MAX: f64 = 50_000.0;

    pub const POWER_WATTS_MAX: f64 = 10_000.0;

    pub const CURRENT_AMPS_MAX: f64 = 1_000.0;

    pub const HUMIDITY_PERCENT_MAX: f64 = 100.0;

    pub const PRESSURE_PASCALS_MAX: f64 = 200_000.0;
}

/// Thermal control constants
pub mod control {
    use super::*;

    /// Output percentage ceiling
    pub const PERCENT_MAX: f64 = 100.0;

    /// Output forced on every cooling device on a critical breach
    pub const FULL_COOLING_PERCENT: f64 = 100.0;

    /// Nominal PID sample interval
    pub const DEFAULT_SAMPLE_TIME: Duration = Duration::from_secs(1);

    /// Consecutive tick failures between repeated error logs
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

    /// Queued escalation alerts before new ones are dropped
    pub const ALERT_CHANNEL_CAPACITY: usize = 32;
}
