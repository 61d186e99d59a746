//! System configuration model
//!
//! Identity, cycle settings, chemistry targets, monitoring thresholds and
//! automation toggles for one hydroponic system instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::profile::CycleTuning;

/// Supported hydroponic system layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemType {
    Nft,
    DeepWaterCulture,
    Aeroponic,
    EbbAndFlow,
    Drip,
    FloodDrain,
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nft => "nft",
            Self::DeepWaterCulture => "deep-water-culture",
            Self::Aeroponic => "aeroponic",
            Self::EbbAndFlow => "ebb-and-flow",
            Self::Drip => "drip",
            Self::FloodDrain => "flood-drain",
        };
        f.write_str(name)
    }
}

/// Per-system-type timing parameters. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CycleSettings {
    Nft {
        /// Target channel flow (L/min)
        flow_rate_lpm: f64,
        channel_slope_pct: f64,
        /// Allowed deviation from target before a flow adjustment (percent)
        flow_tolerance_pct: f64,
    },
    DeepWaterCulture {
        /// Air pump delivery (L/min)
        aeration_rate_lpm: f64,
        water_change_interval_days: u32,
    },
    Aeroponic {
        mist_duration_secs: u32,
        mist_interval_secs: u32,
        droplet_size_microns: f64,
        pressure_psi: f64,
    },
    /// Shared by ebb-and-flow and flood-drain systems.
    EbbFlow {
        flood_duration_mins: u32,
        drain_duration_mins: u32,
        floods_per_day: u32,
    },
    Drip {
        on_duration_mins: u32,
        off_duration_mins: u32,
        emitter_flow_lph: f64,
    },
}

impl CycleSettings {
    /// Whether this variant drives the given system type.
    pub fn matches(&self, system_type: SystemType) -> bool {
        matches!(
            (self, system_type),
            (Self::Nft { .. }, SystemType::Nft)
                | (Self::DeepWaterCulture { .. }, SystemType::DeepWaterCulture)
                | (Self::Aeroponic { .. }, SystemType::Aeroponic)
                | (Self::EbbFlow { .. }, SystemType::EbbAndFlow | SystemType::FloodDrain)
                | (Self::Drip { .. }, SystemType::Drip)
        )
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Nft { .. } => "nft",
            Self::DeepWaterCulture { .. } => "deep-water-culture",
            Self::Aeroponic { .. } => "aeroponic",
            Self::EbbFlow { .. } => "ebb-flow",
            Self::Drip { .. } => "drip",
        }
    }
}

/// Alternate cycle settings applied during the dark period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightOverride {
    /// Start hour (0-23), e.g. 20 = 8 PM.
    pub start_hour: u8,
    /// End hour (0-23), e.g. 6 = 6 AM.
    pub end_hour: u8,
    pub cycle: CycleSettings,
}

impl NightOverride {
    /// Check if the given hour falls in the dark window.
    pub fn is_dark(&self, hour: u32) -> bool {
        let (start, end) = (u32::from(self.start_hour), u32::from(self.end_hour));
        if start <= end {
            hour >= start && hour < end
        } else {
            // wraps around midnight
            hour >= start || hour < end
        }
    }
}

/// Element concentrations in ppm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ElementTargets {
    #[validate(range(min = 0.0, max = 1000.0))]
    pub nitrogen: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub phosphorus: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub potassium: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub calcium: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub magnesium: f64,
    #[validate(range(min = 0.0, max = 1000.0))]
    pub sulfur: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub iron: f64,
    /// Trace elements keyed by symbol (Mn, Zn, B, Cu, Mo)
    #[serde(default)]
    pub trace: BTreeMap<String, f64>,
}

impl Default for ElementTargets {
    fn default() -> Self {
        let trace = [("Mn", 0.5), ("Zn", 0.05), ("B", 0.5), ("Cu", 0.02), ("Mo", 0.01)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            nitrogen: 150.0,
            phosphorus: 50.0,
            potassium: 200.0,
            calcium: 150.0,
            magnesium: 50.0,
            sulfur: 60.0,
            iron: 3.0,
            trace,
        }
    }
}

/// Chemistry setpoints and the drift tolerances that gate correction dosing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NutrientConfig {
    #[validate(range(min = 3.0, max = 9.0, message = "Target pH must be between 3 and 9"))]
    pub target_ph: f64,
    /// mS/cm
    #[validate(range(min = 0.1, max = 10.0, message = "Target EC must be between 0.1 and 10 mS/cm"))]
    pub target_ec: f64,
    /// ppm
    #[validate(range(min = 0.0, max = 5000.0))]
    pub target_tds: f64,
    /// mg/L
    #[validate(range(min = 0.5, max = 20.0, message = "Target DO must be between 0.5 and 20 mg/L"))]
    pub target_do: f64,
    pub elements: ElementTargets,
    #[validate(range(min = 0.01, max = 2.0))]
    pub ph_tolerance: f64,
    #[validate(range(min = 0.01, max = 2.0))]
    pub ec_tolerance: f64,
}

impl Default for NutrientConfig {
    fn default() -> Self {
        Self {
            target_ph: 6.0,
            target_ec: 1.8,
            target_tds: 900.0,
            target_do: 7.0,
            elements: ElementTargets::default(),
            ph_tolerance: 0.2,
            ec_tolerance: 0.2,
        }
    }
}

/// Alert thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MonitoringConfig {
    #[validate(range(min = 0.0, max = 14.0))]
    pub ph_min: f64,
    #[validate(range(min = 0.0, max = 14.0))]
    pub ph_max: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub ec_min: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub ec_max: f64,
    #[validate(range(min = -5.0, max = 50.0))]
    pub temp_min_c: f64,
    #[validate(range(min = -5.0, max = 50.0))]
    pub temp_max_c: f64,
    #[validate(range(min = 0.0, max = 20.0))]
    pub do_min_mg_l: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub low_water_level_pct: f64,
    /// Aeroponic systems only
    #[validate(range(min = 0.0, max = 200.0))]
    pub low_pressure_psi: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            ph_min: 5.5,
            ph_max: 6.8,
            ec_min: 1.0,
            ec_max: 2.8,
            temp_min_c: 18.0,
            temp_max_c: 24.0,
            do_min_mg_l: 5.0,
            low_water_level_pct: 30.0,
            low_pressure_psi: 60.0,
        }
    }
}

/// Dosing model constants. These are linear approximations, not calibrated
/// chemistry, so every one of them is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DosingConfig {
    /// Litres of solution moved one pH unit per mL of pH up/down
    #[validate(range(min = 0.1, max = 1000.0))]
    pub ph_calibration: f64,
    /// mS/cm x litres raised per mL of concentrate
    #[validate(range(min = 0.1, max = 1000.0))]
    pub ec_calibration: f64,
    #[validate(range(min = 0.0, max = 10000.0))]
    pub max_dose_per_tick_ml: f64,
    #[validate(range(min = 0.0, max = 1000000.0))]
    pub max_dilution_per_tick_ml: f64,
    /// Per-kind 24 h volume cap
    #[validate(range(min = 0.0, max = 1000000.0))]
    pub max_daily_dose_ml: f64,
    /// Consecutive failed corrections before escalating
    #[validate(range(min = 1, max = 100))]
    pub failure_escalation_count: u32,
}

impl Default for DosingConfig {
    fn default() -> Self {
        Self {
            ph_calibration: 10.0,
            ec_calibration: 10.0,
            max_dose_per_tick_ml: 50.0,
            max_dilution_per_tick_ml: 20_000.0,
            max_daily_dose_ml: 500.0,
            failure_escalation_count: 3,
        }
    }
}

/// Automation toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub auto_cycle: bool,
    pub auto_ph: bool,
    pub auto_nutrients: bool,
    pub auto_top_off: bool,
    pub notifications: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_cycle: true,
            auto_ph: true,
            auto_nutrients: true,
            auto_top_off: true,
            notifications: true,
        }
    }
}

/// One provisioned hydroponic system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub system_id: Uuid,
    pub facility_id: String,
    pub zone_id: String,
    pub name: String,
    pub system_type: SystemType,
    pub tank_capacity_liters: f64,
    pub nominal_flow_rate_lpm: f64,
    pub cycle: CycleSettings,
    pub night_override: Option<NightOverride>,
    pub nutrients: NutrientConfig,
    pub monitoring: MonitoringConfig,
    pub dosing: DosingConfig,
    pub automation: AutomationConfig,
    pub created_at: DateTime<Utc>,
}

impl SystemConfig {
    /// Cycle settings in force at the given hour of day.
    pub fn active_cycle(&self, hour: u32) -> &CycleSettings {
        match &self.night_override {
            Some(night) if night.is_dark(hour) => &night.cycle,
            _ => &self.cycle,
        }
    }

    /// Produce the merged candidate for a partial update. Identity and
    /// system type are never touched.
    pub fn merged(&self, update: &ConfigUpdate) -> SystemConfig {
        let mut next = self.clone();
        if let Some(name) = &update.name {
            next.name = name.clone();
        }
        if let Some(capacity) = update.tank_capacity_liters {
            next.tank_capacity_liters = capacity;
        }
        if let Some(flow) = update.nominal_flow_rate_lpm {
            next.nominal_flow_rate_lpm = flow;
        }
        if let Some(tuning) = &update.cycle {
            next.cycle = next.cycle.tuned(tuning);
        }
        if update.clear_night_override {
            next.night_override = None;
        }
        if let Some(night) = &update.night_override {
            next.night_override = Some(night.clone());
        }
        if let Some(nutrients) = &update.nutrients {
            next.nutrients = nutrients.clone();
        }
        if let Some(monitoring) = &update.monitoring {
            next.monitoring = monitoring.clone();
        }
        if let Some(dosing) = &update.dosing {
            next.dosing = dosing.clone();
        }
        if let Some(automation) = &update.automation {
            next.automation = automation.clone();
        }
        next
    }
}

/// Partial configuration change submitted by a collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub name: Option<String>,
    pub tank_capacity_liters: Option<f64>,
    pub nominal_flow_rate_lpm: Option<f64>,
    pub cycle: Option<CycleTuning>,
    pub night_override: Option<NightOverride>,
    pub clear_night_override: bool,
    pub nutrients: Option<NutrientConfig>,
    pub monitoring: Option<MonitoringConfig>,
    pub dosing: Option<DosingConfig>,
    pub automation: Option<AutomationConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_type_serde_names() {
        let json = serde_json::to_string(&SystemType::DeepWaterCulture).unwrap();
        assert_eq!(json, "\"deep-water-culture\"");
        let parsed: SystemType = serde_json::from_str("\"flood-drain\"").unwrap();
        assert_eq!(parsed, SystemType::FloodDrain);
        assert_eq!(SystemType::EbbAndFlow.to_string(), "ebb-and-flow");
    }

    #[test]
    fn test_cycle_variant_matches_type() {
        let ebb = CycleSettings::EbbFlow {
            flood_duration_mins: 15,
            drain_duration_mins: 15,
            floods_per_day: 4,
        };
        assert!(ebb.matches(SystemType::EbbAndFlow));
        assert!(ebb.matches(SystemType::FloodDrain));
        assert!(!ebb.matches(SystemType::Nft));
    }

    #[test]
    fn test_cycle_settings_tagged_serde() {
        let json = r#"{"type":"aeroponic","mist_duration_secs":5,"mist_interval_secs":300,"droplet_size_microns":50.0,"pressure_psi":80.0}"#;
        let parsed: CycleSettings = serde_json::from_str(json).unwrap();
        assert!(parsed.matches(SystemType::Aeroponic));
    }

    #[test]
    fn test_night_window_wraps_midnight() {
        let night = NightOverride {
            start_hour: 20,
            end_hour: 6,
            cycle: CycleSettings::Drip {
                on_duration_mins: 5,
                off_duration_mins: 120,
                emitter_flow_lph: 2.0,
            },
        };
        assert!(night.is_dark(22));
        assert!(night.is_dark(3));
        assert!(!night.is_dark(6));
        assert!(!night.is_dark(12));
    }

    #[test]
    fn test_default_configs_validate() {
        assert!(NutrientConfig::default().validate().is_ok());
        assert!(MonitoringConfig::default().validate().is_ok());
        assert!(DosingConfig::default().validate().is_ok());
    }
}
