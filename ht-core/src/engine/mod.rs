//! Thermal control engine modules
//!
//! Contains the PID controller, the thermal zone loop and the manager that
//! wires zones to discovered hardware.

mod manager;
mod pid;
mod zone;

pub use manager::{ThermalManager, ThermalSnapshot};
pub use pid::{AntiWindup, PidAction, PidConfig, PidController, PidState};
pub use zone::{CriticalAlert, ThermalZone, ThresholdStatus, TickReport, ZonePhase, ZoneSnapshot};
