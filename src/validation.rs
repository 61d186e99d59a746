//! Input validation module
//!
//! Range checks on configuration and sensor data, plus the semantic checks
//! (ordering of thresholds, cycle variant vs system type) that derive-based
//! validation cannot express.

use tracing::{debug, warn};
use validator::{Validate, ValidationErrors};

use crate::error::{ControllerError, ControllerResult, SensorFailure};
use crate::maintenance::MaintenanceRequest;
use crate::models::SensorReading;
use crate::system::{CycleSettings, SystemConfig};

/// Largest reporting / history window accepted from collaborators
pub const MAX_WINDOW_HOURS: i64 = 24 * 30;

fn describe(validation_errors: &ValidationErrors) -> String {
    let error_messages: Vec<String> = validation_errors
        .field_errors()
        .iter()
        .map(|(field, errors)| {
            let msgs: Vec<String> = errors
                .iter()
                .map(|e| match &e.message {
                    Some(message) => message.to_string(),
                    None => e.code.to_string(),
                })
                .collect();
            format!("{}: {}", field, msgs.join(", "))
        })
        .collect();
    error_messages.join("; ")
}

fn check<T: Validate>(section: &str, value: &T) -> ControllerResult<()> {
    value.validate().map_err(|errors| {
        let message = format!("{section}: {}", describe(&errors));
        warn!(section, errors = %message, "Configuration validation failed");
        ControllerError::Configuration(message)
    })
}

fn ordered(name: &str, min: f64, max: f64) -> ControllerResult<()> {
    if min >= max {
        return Err(ControllerError::Configuration(format!(
            "{name} minimum {min} must be below maximum {max}"
        )));
    }
    Ok(())
}

fn positive(name: &str, value: f64) -> ControllerResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ControllerError::Configuration(format!(
            "{name} must be a positive finite number, got {value}"
        )));
    }
    Ok(())
}

/// Validate the timing parameters of one cycle variant
pub fn validate_cycle(cycle: &CycleSettings) -> ControllerResult<()> {
    match *cycle {
        CycleSettings::Nft {
            flow_rate_lpm,
            channel_slope_pct,
            flow_tolerance_pct,
        } => {
            positive("flow_rate_lpm", flow_rate_lpm)?;
            positive("channel_slope_pct", channel_slope_pct)?;
            if !(0.0..=50.0).contains(&flow_tolerance_pct) {
                return Err(ControllerError::Configuration(
                    "flow_tolerance_pct must be between 0 and 50".to_string(),
                ));
            }
        }
        CycleSettings::DeepWaterCulture {
            aeration_rate_lpm,
            water_change_interval_days,
        } => {
            positive("aeration_rate_lpm", aeration_rate_lpm)?;
            if water_change_interval_days == 0 {
                return Err(ControllerError::Configuration(
                    "water_change_interval_days must be at least 1".to_string(),
                ));
            }
        }
        CycleSettings::Aeroponic {
            mist_duration_secs,
            mist_interval_secs,
            droplet_size_microns,
            pressure_psi,
        } => {
            if mist_duration_secs == 0 || mist_duration_secs >= mist_interval_secs {
                return Err(ControllerError::Configuration(format!(
                    "mist duration {mist_duration_secs}s must be non-zero and shorter than the {mist_interval_secs}s interval"
                )));
            }
            positive("droplet_size_microns", droplet_size_microns)?;
            positive("pressure_psi", pressure_psi)?;
        }
        CycleSettings::EbbFlow {
            flood_duration_mins,
            drain_duration_mins,
            floods_per_day,
        } => {
            if floods_per_day == 0 || floods_per_day > 48 {
                return Err(ControllerError::Configuration(
                    "floods_per_day must be between 1 and 48".to_string(),
                ));
            }
            let period_mins = 24 * 60 / floods_per_day;
            if flood_duration_mins == 0 || flood_duration_mins + drain_duration_mins > period_mins {
                return Err(ControllerError::Configuration(format!(
                    "flood ({flood_duration_mins}m) plus drain ({drain_duration_mins}m) must fit in the {period_mins}m flood period"
                )));
            }
        }
        CycleSettings::Drip {
            on_duration_mins,
            off_duration_mins,
            emitter_flow_lph,
        } => {
            if on_duration_mins == 0 || off_duration_mins == 0 {
                return Err(ControllerError::Configuration(
                    "drip on/off durations must be non-zero".to_string(),
                ));
            }
            positive("emitter_flow_lph", emitter_flow_lph)?;
        }
    }
    Ok(())
}

/// Validate a complete system configuration
pub fn validate_system_config(config: &SystemConfig) -> ControllerResult<()> {
    positive("tank_capacity_liters", config.tank_capacity_liters)?;
    if !config.nominal_flow_rate_lpm.is_finite() || config.nominal_flow_rate_lpm < 0.0 {
        return Err(ControllerError::Configuration(
            "nominal_flow_rate_lpm must be non-negative".to_string(),
        ));
    }

    if !config.cycle.matches(config.system_type) {
        return Err(ControllerError::Configuration(format!(
            "{} cycle settings cannot drive a {} system",
            config.cycle.variant_name(),
            config.system_type
        )));
    }
    validate_cycle(&config.cycle)?;

    if let Some(night) = &config.night_override {
        if night.start_hour > 23 || night.end_hour > 23 || night.start_hour == night.end_hour {
            return Err(ControllerError::Configuration(
                "night override hours must be distinct values in 0-23".to_string(),
            ));
        }
        if !night.cycle.matches(config.system_type) {
            return Err(ControllerError::Configuration(format!(
                "night override {} settings cannot drive a {} system",
                night.cycle.variant_name(),
                config.system_type
            )));
        }
        validate_cycle(&night.cycle)?;
    }

    check("nutrients", &config.nutrients)?;
    check("nutrients.elements", &config.nutrients.elements)?;
    check("monitoring", &config.monitoring)?;
    check("dosing", &config.dosing)?;

    let m = &config.monitoring;
    ordered("pH", m.ph_min, m.ph_max)?;
    ordered("EC", m.ec_min, m.ec_max)?;
    ordered("Temperature", m.temp_min_c, m.temp_max_c)?;

    debug!(system_id = %config.system_id, "System configuration validation passed");
    Ok(())
}

/// Reject physically implausible readings (probe faults, wiring noise)
pub fn validate_sensor_reading(reading: &SensorReading) -> Result<(), SensorFailure> {
    let values = [
        ("ph", reading.ph),
        ("ec", reading.ec),
        ("tds", reading.tds),
        ("dissolved_oxygen", reading.dissolved_oxygen),
        ("temperature", reading.temperature),
        ("water_level", reading.water_level),
        ("flow_rate", reading.flow_rate),
        ("root_zone_temperature", reading.root_zone_temperature),
        ("root_zone_oxygen", reading.root_zone_oxygen),
    ];
    if let Some((name, _)) = values.iter().find(|(_, v)| !v.is_finite()) {
        return Err(SensorFailure(format!("{name} is not a finite number")));
    }
    if matches!(reading.pressure, Some(p) if !p.is_finite()) {
        return Err(SensorFailure("pressure is not a finite number".to_string()));
    }

    reading
        .validate()
        .map_err(|errors| SensorFailure(format!("implausible reading: {}", describe(&errors))))
}

/// Validate a history / report window in hours
pub fn validate_window_hours(hours: i64) -> ControllerResult<i64> {
    if hours <= 0 || hours > MAX_WINDOW_HOURS {
        return Err(ControllerError::OutOfRange {
            variable: format!("window hours (1 to {MAX_WINDOW_HOURS})"),
            value: hours as f64,
        });
    }
    Ok(hours)
}

pub fn validate_maintenance_request(request: &MaintenanceRequest) -> ControllerResult<()> {
    check("maintenance", request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProvisionRequest;
    use crate::system::SystemType;

    fn config(system_type: SystemType) -> SystemConfig {
        SystemConfig::provision(ProvisionRequest::new(system_type, 100.0)).unwrap()
    }

    #[test]
    fn test_defaults_pass() {
        assert!(validate_system_config(&config(SystemType::Aeroponic)).is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut cfg = config(SystemType::Nft);
        cfg.monitoring.ph_min = 7.0;
        cfg.monitoring.ph_max = 6.0;
        let err = validate_system_config(&cfg).unwrap_err();
        assert!(matches!(err, ControllerError::Configuration(ref m) if m.contains("pH")));
    }

    #[test]
    fn test_mismatched_variant_rejected() {
        let mut cfg = config(SystemType::Nft);
        cfg.cycle = crate::profile::default_cycle(SystemType::Aeroponic);
        assert!(validate_system_config(&cfg).is_err());
    }

    #[test]
    fn test_flood_schedule_must_fit_period() {
        let cycle = CycleSettings::EbbFlow {
            flood_duration_mins: 200,
            drain_duration_mins: 200,
            floods_per_day: 4,
        };
        assert!(validate_cycle(&cycle).is_err());
    }

    #[test]
    fn test_out_of_range_target_rejected() {
        let mut cfg = config(SystemType::Drip);
        cfg.nutrients.target_ph = 12.0;
        let err = validate_system_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("nutrients"));
    }

    #[test]
    fn test_implausible_reading_rejected() {
        let mut reading = SensorReading::nominal();
        assert!(validate_sensor_reading(&reading).is_ok());

        reading.ph = 15.5;
        assert!(validate_sensor_reading(&reading).is_err());

        reading.ph = f64::NAN;
        assert!(validate_sensor_reading(&reading).is_err());
    }

    #[test]
    fn test_window_validation() {
        assert_eq!(validate_window_hours(24).unwrap(), 24);
        assert!(validate_window_hours(0).is_err());
        assert!(validate_window_hours(MAX_WINDOW_HOURS + 1).is_err());
        assert!(validate_window_hours(i64::MAX).is_err());
    }
}
