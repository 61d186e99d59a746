//! Collaborator ports
//!
//! ```text
//!   SensorSource ──▶ Controller ──▶ ActuatorSink
//!                        │
//!                        └────────▶ NotificationSink
//! ```
//!
//! The controller decides *when* to act; adapters behind these traits do the
//! I/O. Default adapters log through `tracing` so the binary runs without
//! hardware.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ActuationFailure;
use crate::models::{Alert, DosingKind, Severity};

/// A side-effecting command for valves, pumps and dosing pumps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ActuatorCommand {
    SetPumpSpeed { percent: u8 },
    OpenValve { valve: String },
    CloseValve { valve: String },
    AdjustFlow { target_lpm: f64 },
    IncreaseAeration { rate_lpm: f64 },
    Refill { target_level_pct: f64 },
    StartMisting { duration_secs: u32 },
    StopMisting,
    AdjustPressure { target_psi: f64 },
    Dose { kind: DosingKind, volume_ml: f64 },
}

/// Write-side port: valve / pump / dosing pump driver.
pub trait ActuatorSink: Send + Sync {
    fn dispatch(&self, command: &ActuatorCommand) -> Result<(), ActuationFailure>;
}

/// Something collaborators should hear about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Alert { system_id: Uuid, alert: Alert },
    MaintenanceDue { system_id: Uuid, task_id: Uuid, description: String },
    DosingDegraded { system_id: Uuid, event_id: Uuid, description: String },
}

/// Alert / reminder delivery. Deduplication is the sink's business.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Wall-clock source for the tick loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock advanced by hand; drives replays and accelerated simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Actuator adapter that only logs. Used when no hardware driver is wired.
#[derive(Debug, Default)]
pub struct LoggingActuator;

impl ActuatorSink for LoggingActuator {
    fn dispatch(&self, command: &ActuatorCommand) -> Result<(), ActuationFailure> {
        info!(command = ?command, "Actuator command dispatched");
        Ok(())
    }
}

/// Notification adapter that writes alerts to the log.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl NotificationSink for LoggingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Alert { system_id, alert } => match alert.severity {
                Severity::Critical => {
                    warn!(system_id = %system_id, kind = ?alert.kind, "CRITICAL: {}", alert.message)
                }
                _ => info!(system_id = %system_id, kind = ?alert.kind, "{}", alert.message),
            },
            Notification::MaintenanceDue {
                system_id,
                task_id,
                description,
            } => info!(system_id = %system_id, task_id = %task_id, "Maintenance due: {description}"),
            Notification::DosingDegraded {
                system_id,
                event_id,
                description,
            } => warn!(system_id = %system_id, event_id = %event_id, "Dosing degraded: {description}"),
        }
    }
}
