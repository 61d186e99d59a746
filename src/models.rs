//! Data models for measurements, dosing events and alerts
//!
//! Defines the core value types shared by every controller stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Raw output of a sensor data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SensorReading {
    #[validate(range(min = 0.0, max = 14.0, message = "pH must be between 0 and 14"))]
    pub ph: f64,

    /// Electrical conductivity (mS/cm)
    #[validate(range(min = 0.0, max = 20.0, message = "EC must be between 0 and 20 mS/cm"))]
    pub ec: f64,

    /// Total dissolved solids (ppm)
    #[validate(range(min = 0.0, max = 10000.0))]
    pub tds: f64,

    /// Dissolved oxygen (mg/L)
    #[validate(range(min = 0.0, max = 25.0))]
    pub dissolved_oxygen: f64,

    /// Solution temperature (Celsius)
    #[validate(range(min = -5.0, max = 60.0))]
    pub temperature: f64,

    /// Reservoir level (percent)
    #[validate(range(min = 0.0, max = 100.0))]
    pub water_level: f64,

    /// Circulation flow (L/min)
    #[validate(range(min = 0.0, max = 1000.0))]
    pub flow_rate: f64,

    /// Nozzle line pressure (psi), aeroponic systems only
    pub pressure: Option<f64>,

    #[validate(range(min = -5.0, max = 60.0))]
    pub root_zone_temperature: f64,

    #[validate(range(min = 0.0, max = 25.0))]
    pub root_zone_oxygen: f64,
}

impl SensorReading {
    /// A reading sitting on the default setpoints.
    pub fn nominal() -> Self {
        Self {
            ph: 6.0,
            ec: 1.8,
            tds: 900.0,
            dissolved_oxygen: 7.5,
            temperature: 21.0,
            water_level: 85.0,
            flow_rate: 2.0,
            pressure: None,
            root_zone_temperature: 21.0,
            root_zone_oxygen: 7.5,
        }
    }
}

/// Current phase of the actuation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Flooding,
    Draining,
    Misting,
    Flowing,
    Idle,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flooding => "flooding",
            Self::Draining => "draining",
            Self::Misting => "misting",
            Self::Flowing => "flowing",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// Qualitative root health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootHealth {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl RootHealth {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Self::Excellent,
            75..=89 => Self::Good,
            50..=74 => Self::Fair,
            25..=49 => Self::Poor,
            _ => Self::Critical,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Poor | Self::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValvePosition {
    Open,
    Closed,
}

/// N/P/K estimates (ppm) derived from EC
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutrientEstimate {
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PhLow,
    PhHigh,
    EcLow,
    EcHigh,
    TemperatureLow,
    TemperatureHigh,
    OxygenLow,
    WaterLevelLow,
    PressureLow,
    FlowBlockage,
    PersistentBlockage,
    RefillRequired,
    SensorFailure,
    ActuationFailure,
    DosingDegraded,
    DosingFailureRepeated,
    DosingLimitReached,
    MaintenanceOverdue,
}

/// A classified alert. The message is the human-readable alert string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
        }
    }

    pub fn warning(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, message)
    }

    pub fn critical(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Critical, message)
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One immutable, timestamped controller snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ph: f64,
    pub ec: f64,
    pub tds: f64,
    pub dissolved_oxygen: f64,
    pub temperature: f64,
    pub water_level: f64,
    pub flow_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    pub phase: CyclePhase,
    pub root_zone_temperature: f64,
    pub root_zone_oxygen: f64,
    pub root_health: RootHealth,
    pub nutrients: NutrientEstimate,
    pub pump_running: bool,
    pub valves: BTreeMap<String, ValvePosition>,
    pub alerts: Vec<Alert>,
}

impl Measurement {
    pub fn has_alert(&self, message: &str) -> bool {
        self.alerts.iter().any(|a| a.message == message)
    }

    pub fn has_alert_kind(&self, kind: AlertKind) -> bool {
        self.alerts.iter().any(|a| a.kind == kind)
    }

    /// The raw sensor values this snapshot was built from.
    pub fn reading(&self) -> SensorReading {
        SensorReading {
            ph: self.ph,
            ec: self.ec,
            tds: self.tds,
            dissolved_oxygen: self.dissolved_oxygen,
            temperature: self.temperature,
            water_level: self.water_level,
            flow_rate: self.flow_rate,
            pressure: self.pressure,
            root_zone_temperature: self.root_zone_temperature,
            root_zone_oxygen: self.root_zone_oxygen,
        }
    }
}

/// Corrective dosing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DosingKind {
    PhUp,
    PhDown,
    NutrientA,
    NutrientB,
    CalMag,
    DilutionWater,
}

/// Which chemistry variable a dosing kind acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlledVariable {
    Ph,
    Ec,
}

impl DosingKind {
    pub fn controlled_variable(&self) -> ControlledVariable {
        match self {
            Self::PhUp | Self::PhDown => ControlledVariable::Ph,
            _ => ControlledVariable::Ec,
        }
    }
}

impl fmt::Display for DosingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PhUp => "ph-up",
            Self::PhDown => "ph-down",
            Self::NutrientA => "nutrient-a",
            Self::NutrientB => "nutrient-b",
            Self::CalMag => "cal-mag",
            Self::DilutionWater => "dilution-water",
        };
        f.write_str(name)
    }
}

impl ControlledVariable {
    pub fn read(&self, reading: &SensorReading) -> f64 {
        match self {
            Self::Ph => reading.ph,
            Self::Ec => reading.ec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DosingStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Record of one corrective dose. Created pending and resolved in place once
/// the post-dose value is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosingEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: DosingKind,
    pub volume_ml: f64,
    pub target: f64,
    pub tolerance: f64,
    pub pre_value: f64,
    /// Value the linear dosing model expects after the dose
    pub predicted_value: f64,
    pub post_value: Option<f64>,
    pub status: DosingStatus,
    pub success: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DosingEvent {
    pub fn pending(
        kind: DosingKind,
        volume_ml: f64,
        target: f64,
        tolerance: f64,
        pre_value: f64,
        predicted_value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind,
            volume_ml: volume_ml.max(0.0),
            target,
            tolerance,
            pre_value,
            predicted_value,
            post_value: None,
            status: DosingStatus::Pending,
            success: false,
            resolved_at: None,
            note: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DosingStatus::Pending
    }

    /// Record the post-dose value; success iff it landed within tolerance.
    pub fn resolve(&mut self, post_value: f64, at: DateTime<Utc>) -> bool {
        self.post_value = Some(post_value);
        self.success = (post_value - self.target).abs() <= self.tolerance + 1e-9;
        self.status = if self.success {
            DosingStatus::Succeeded
        } else {
            DosingStatus::Failed
        };
        if !self.success {
            self.note = Some(format!(
                "post-dose value {:.2} outside {:.2} ± {:.2}",
                post_value, self.target, self.tolerance
            ));
        }
        self.resolved_at = Some(at);
        self.success
    }

    pub fn fail(&mut self, note: impl Into<String>, at: DateTime<Utc>) {
        self.success = false;
        self.status = DosingStatus::Failed;
        self.note = Some(note.into());
        self.resolved_at = Some(at);
    }
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// New measurement recorded
    MeasurementUpdate(Measurement),
    /// Connection acknowledgment
    Connected { client_id: String },
    /// Error message
    Error { message: String },
    /// Heartbeat/ping
    Ping,
    /// Heartbeat/pong response
    Pong,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub controller_running: bool,
    pub last_measurement: Option<DateTime<Utc>>,
}
