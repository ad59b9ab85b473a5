//! PID control law
//!
//! A self-contained controller: previous error, integral accumulator and last
//! output live in [`PidState`], owned by exactly one zone.
//!
//! # Action
//!
//! Cooling is reverse-acting: the error is `measured - setpoint`, so a zone
//! running hotter than its target produces more output. [`PidAction::Direct`]
//! flips the sign for heating-style loops.
//!
//! # Anti-windup
//!
//! The integral policy is an explicit configuration choice:
//! - [`AntiWindup::None`] integrates unconditionally
//! - [`AntiWindup::Conditional`] skips integration while the unclamped output
//!   is saturated and the error pushes further into saturation
//! - [`AntiWindup::Clamp`] bounds the accumulator to a fixed range

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::control;
use crate::error::{Result, ThermalError};

/// Sign convention of the control error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidAction {
    /// error = setpoint - measured
    Direct,
    /// error = measured - setpoint
    #[default]
    Reverse,
}

/// Integral anti-windup policy
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AntiWindup {
    None,
    #[default]
    Conditional,
    Clamp { min: f64, max: f64 },
}

fn default_sample_time_ms() -> u64 {
    control::DEFAULT_SAMPLE_TIME.as_millis() as u64
}

fn default_output_max() -> f64 {
    control::PERCENT_MAX
}

/// Gains, timing and output bounds of one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    #[serde(default = "default_sample_time_ms")]
    pub sample_time_ms: u64,
    #[serde(default)]
    pub output_min: f64,
    #[serde(default = "default_output_max")]
    pub output_max: f64,
    #[serde(default)]
    pub action: PidAction,
    #[serde(default)]
    pub anti_windup: AntiWindup,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            sample_time_ms: default_sample_time_ms(),
            output_min: 0.0,
            output_max: default_output_max(),
            action: PidAction::default(),
            anti_windup: AntiWindup::default(),
        }
    }
}

impl PidConfig {
    /// Create a config with the given gains and default timing
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            ..Self::default()
        }
    }

    pub fn with_sample_time(mut self, sample_time: Duration) -> Self {
        self.sample_time_ms = sample_time.as_millis() as u64;
        self
    }

    pub fn with_output_range(mut self, min: f64, max: f64) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn with_action(mut self, action: PidAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_anti_windup(mut self, anti_windup: AntiWindup) -> Self {
        self.anti_windup = anti_windup;
        self
    }

    pub fn sample_time(&self) -> Duration {
        Duration::from_millis(self.sample_time_ms)
    }

    /// Check gains, timing and bounds; `field` prefixes error messages
    pub fn validate(&self, field: &str) -> Result<()> {
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !gain.is_finite() {
                return Err(ThermalError::invalid_config(
                    format!("{}.{}", field, name),
                    format!("gain must be finite, got {}", gain),
                ));
            }
        }
        if self.sample_time_ms == 0 {
            return Err(ThermalError::invalid_config(
                format!("{}.sample_time_ms", field),
                "sample time must be greater than zero",
            ));
        }
        if !self.output_min.is_finite() || !self.output_max.is_finite() {
            return Err(ThermalError::invalid_config(
                format!("{}.output_min", field),
                "output bounds must be finite",
            ));
        }
        if self.output_min >= self.output_max {
            return Err(ThermalError::invalid_config(
                format!("{}.output_min", field),
                format!(
                    "output_min ({}) must be below output_max ({})",
                    self.output_min, self.output_max
                ),
            ));
        }
        if self.output_min < 0.0 || self.output_max > control::PERCENT_MAX {
            return Err(ThermalError::invalid_config(
                format!("{}.output_max", field),
                format!("output bounds must lie within [0, {}]", control::PERCENT_MAX),
            ));
        }
        if let AntiWindup::Clamp { min, max } = self.anti_windup {
            if !min.is_finite() || !max.is_finite() || min > max {
                return Err(ThermalError::invalid_config(
                    format!("{}.anti_windup", field),
                    format!("clamp range [{}, {}] is not a valid interval", min, max),
                ));
            }
        }
        Ok(())
    }
}

/// Internal controller memory
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PidState {
    pub integral: f64,
    /// None until the first step after construction or reset
    pub previous_error: Option<f64>,
    pub last_output: f64,
}

/// PID controller with a configurable anti-windup policy
#[derive(Debug, Clone)]
pub struct PidController {
    config: PidConfig,
    state: PidState,
}

impl PidController {
    /// Create a controller; the config must already be validated
    pub fn new(config: PidConfig) -> Self {
        Self {
            config,
            state: PidState::default(),
        }
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    pub fn state(&self) -> PidState {
        self.state
    }

    /// Run one step and return the output clamped to the configured range
    ///
    /// The derivative term is zero on the first step. A zero `dt` leaves the
    /// integral untouched.
    pub fn update(&mut self, setpoint: f64, measured: f64, dt: Duration) -> f64 {
        let cfg = &self.config;
        let dt = dt.as_secs_f64();
        let error = match cfg.action {
            PidAction::Reverse => measured - setpoint,
            PidAction::Direct => setpoint - measured,
        };
        if !error.is_finite() {
            // Fail towards full cooling without poisoning the accumulator
            self.state.last_output = cfg.output_max;
            return cfg.output_max;
        }

        let derivative = match self.state.previous_error {
            Some(previous) if dt > 0.0 => (error - previous) / dt,
            _ => 0.0,
        };

        let candidate = if dt > 0.0 {
            self.state.integral + error * dt
        } else {
            self.state.integral
        };

        self.state.integral = match cfg.anti_windup {
            AntiWindup::None => candidate,
            AntiWindup::Clamp { min, max } => candidate.clamp(min, max),
            AntiWindup::Conditional => {
                let unclamped =
                    cfg.kp * error + cfg.ki * self.state.integral + cfg.kd * derivative;
                let push = cfg.ki * error;
                let winding_up = (unclamped > cfg.output_max && push > 0.0)
                    || (unclamped < cfg.output_min && push < 0.0);
                if winding_up {
                    self.state.integral
                } else {
                    candidate
                }
            }
        };

        let raw = cfg.kp * error + cfg.ki * self.state.integral + cfg.kd * derivative;
        let output = if raw.is_finite() {
            raw.clamp(cfg.output_min, cfg.output_max)
        } else {
            // Fail towards full cooling
            cfg.output_max
        };

        self.state.previous_error = Some(error);
        self.state.last_output = output;
        output
    }

    /// Clear integral, derivative history and output
    pub fn reset(&mut self) {
        self.state = PidState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_reverse_action_cools_when_hot() {
        let mut pid = PidController::new(PidConfig::new(2.0, 0.0, 0.0));
        assert_eq!(pid.update(60.0, 70.0, ONE_SEC), 20.0);
        // Below target the output clamps at the floor
        assert_eq!(pid.update(60.0, 50.0, ONE_SEC), 0.0);
    }

    #[test]
    fn test_direct_action_flips_sign() {
        let mut pid =
            PidController::new(PidConfig::new(2.0, 0.0, 0.0).with_action(PidAction::Direct));
        assert_eq!(pid.update(60.0, 50.0, ONE_SEC), 20.0);
    }

    #[test]
    fn test_output_clamped_to_range() {
        let mut pid =
            PidController::new(PidConfig::new(10.0, 0.0, 0.0).with_output_range(20.0, 80.0));
        assert_eq!(pid.update(40.0, 100.0, ONE_SEC), 80.0);
        assert_eq!(pid.update(40.0, 40.0, ONE_SEC), 20.0);
    }

    #[test]
    fn test_integral_uses_dt() {
        let mut pid = PidController::new(
            PidConfig::new(0.0, 1.0, 0.0).with_anti_windup(AntiWindup::None),
        );
        pid.update(50.0, 55.0, Duration::from_millis(500));
        assert!((pid.state().integral - 2.5).abs() < 1e-9);
        let out = pid.update(50.0, 55.0, Duration::from_secs(2));
        assert!((out - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_derivative_zero_on_first_step() {
        let mut pid = PidController::new(PidConfig::new(0.0, 0.0, 1.0));
        assert_eq!(pid.update(50.0, 60.0, ONE_SEC), 0.0);
        // Error rose from 10 to 14 over 2s
        assert_eq!(pid.update(50.0, 64.0, Duration::from_secs(2)), 2.0);
    }

    #[test]
    fn test_conditional_anti_windup_freezes_integral() {
        let mut pid = PidController::new(PidConfig::new(0.0, 1.0, 0.0));
        for _ in 0..20 {
            assert!(pid.update(40.0, 90.0, ONE_SEC) <= 100.0);
        }
        // Integration stops once the output is already past the ceiling
        assert_eq!(pid.state().integral, 150.0);

        // Unwinds as soon as the error changes sign
        assert_eq!(pid.update(40.0, 0.0, ONE_SEC), 100.0);
        assert_eq!(pid.update(40.0, 0.0, ONE_SEC), 70.0);
    }

    #[test]
    fn test_no_anti_windup_keeps_integrating() {
        let mut pid = PidController::new(
            PidConfig::new(0.0, 1.0, 0.0).with_anti_windup(AntiWindup::None),
        );
        for _ in 0..10 {
            pid.update(40.0, 90.0, ONE_SEC);
        }
        assert_eq!(pid.state().integral, 500.0);
        // Still saturated after a step below target
        assert_eq!(pid.update(40.0, 39.0, ONE_SEC), 100.0);
    }

    #[test]
    fn test_clamp_anti_windup_bounds_integral() {
        let mut pid = PidController::new(
            PidConfig::new(0.0, 1.0, 0.0)
                .with_anti_windup(AntiWindup::Clamp { min: -5.0, max: 30.0 }),
        );
        for _ in 0..10 {
            pid.update(40.0, 90.0, ONE_SEC);
        }
        assert_eq!(pid.state().integral, 30.0);
    }

    #[test]
    fn test_non_finite_output_fails_to_max() {
        let mut pid = PidController::new(PidConfig::new(1.0, 0.0, 0.0));
        assert_eq!(pid.update(40.0, f64::NAN, ONE_SEC), 100.0);
        assert_eq!(pid.state().integral, 0.0);
        assert_eq!(pid.update(40.0, 45.0, ONE_SEC), 5.0);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut pid = PidController::new(PidConfig::new(1.0, 1.0, 1.0));
        pid.update(40.0, 50.0, ONE_SEC);
        pid.reset();
        assert_eq!(pid.state(), PidState::default());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(PidConfig::new(f64::NAN, 0.0, 0.0).validate("pid").is_err());
        assert!(PidConfig::new(1.0, 0.0, 0.0)
            .with_sample_time(Duration::ZERO)
            .validate("pid")
            .is_err());
        assert!(PidConfig::new(1.0, 0.0, 0.0)
            .with_output_range(50.0, 50.0)
            .validate("pid")
            .is_err());
        assert!(PidConfig::new(1.0, 0.0, 0.0)
            .with_output_range(0.0, 120.0)
            .validate("pid")
            .is_err());
        let err = PidConfig::new(1.0, 0.0, 0.0)
            .with_anti_windup(AntiWindup::Clamp { min: 5.0, max: 1.0 })
            .validate("zones[0].pid")
            .unwrap_err();
        assert!(err.to_string().contains("zones[0].pid.anti_windup"));
        assert!(PidConfig::new(1.0, 0.1, 0.05).validate("pid").is_ok());
    }

    #[test]
    fn test_config_json_defaults() {
        let cfg: PidConfig = serde_json::from_str(r#"{"kp": 4.0, "ki": 0.2, "kd": 0.0}"#).unwrap();
        assert_eq!(cfg.sample_time(), Duration::from_secs(1));
        assert_eq!(cfg.output_max, 100.0);
        assert_eq!(cfg.action, PidAction::Reverse);
        assert_eq!(cfg.anti_windup, AntiWindup::Conditional);

        let cfg: PidConfig = serde_json::from_str(
            r#"{"kp": 1, "ki": 0, "kd": 0, "anti_windup": {"policy": "clamp", "min": 0, "max": 40}}"#,
        )
        .unwrap();
        assert_eq!(cfg.anti_windup, AntiWindup::Clamp { min: 0.0, max: 40.0 });
    }
}
