//! Threshold alert engine
//!
//! Stateless: every tick is evaluated on its own and repeated breaches raise
//! repeated alerts. Deduplication belongs to the notification sink.

use crate::models::{Alert, AlertKind, SensorReading, Severity};
use crate::system::{MonitoringConfig, SystemType};

/// pH excursion beyond which a breach is critical
const PH_CRITICAL_MARGIN: f64 = 1.0;

/// Check one reading against the monitoring thresholds.
pub fn evaluate(
    reading: &SensorReading,
    monitoring: &MonitoringConfig,
    system_type: SystemType,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if reading.ph < monitoring.ph_min {
        let severity = if monitoring.ph_min - reading.ph > PH_CRITICAL_MARGIN {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert::new(
            AlertKind::PhLow,
            severity,
            format!("pH too low: {:.2} (min {:.2})", reading.ph, monitoring.ph_min),
        ));
    } else if reading.ph > monitoring.ph_max {
        let severity = if reading.ph - monitoring.ph_max > PH_CRITICAL_MARGIN {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert::new(
            AlertKind::PhHigh,
            severity,
            format!("pH too high: {:.2} (max {:.2})", reading.ph, monitoring.ph_max),
        ));
    }

    if reading.ec < monitoring.ec_min {
        alerts.push(Alert::warning(
            AlertKind::EcLow,
            format!("EC too low: {:.2} mS/cm (min {:.2})", reading.ec, monitoring.ec_min),
        ));
    } else if reading.ec > monitoring.ec_max {
        alerts.push(Alert::warning(
            AlertKind::EcHigh,
            format!("EC too high: {:.2} mS/cm (max {:.2})", reading.ec, monitoring.ec_max),
        ));
    }

    if reading.temperature < monitoring.temp_min_c {
        alerts.push(Alert::warning(
            AlertKind::TemperatureLow,
            format!(
                "Solution temperature too low: {:.1}°C (min {:.1})",
                reading.temperature, monitoring.temp_min_c
            ),
        ));
    } else if reading.temperature > monitoring.temp_max_c {
        alerts.push(Alert::warning(
            AlertKind::TemperatureHigh,
            format!(
                "Solution temperature too high: {:.1}°C (max {:.1})",
                reading.temperature, monitoring.temp_max_c
            ),
        ));
    }

    if reading.dissolved_oxygen < monitoring.do_min_mg_l {
        let severity = if reading.dissolved_oxygen < monitoring.do_min_mg_l / 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert::new(
            AlertKind::OxygenLow,
            severity,
            format!(
                "Dissolved oxygen low: {:.1} mg/L (min {:.1})",
                reading.dissolved_oxygen, monitoring.do_min_mg_l
            ),
        ));
    }

    if reading.water_level < monitoring.low_water_level_pct {
        let severity = if reading.water_level < monitoring.low_water_level_pct / 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        alerts.push(Alert::new(
            AlertKind::WaterLevelLow,
            severity,
            format!(
                "Water level low: {:.0}% (min {:.0}%)",
                reading.water_level, monitoring.low_water_level_pct
            ),
        ));
    }

    if system_type == SystemType::Aeroponic {
        if let Some(pressure) = reading.pressure {
            if pressure < monitoring.low_pressure_psi {
                alerts.push(Alert::warning(
                    AlertKind::PressureLow,
                    format!(
                        "Misting pressure low: {:.0} psi (min {:.0})",
                        pressure, monitoring.low_pressure_psi
                    ),
                ));
            }
        }
    }

    alerts
}
