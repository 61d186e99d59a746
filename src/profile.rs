//! System profiles
//!
//! Per-system-type cycle defaults and the merge of user overrides onto them
//! at provisioning time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::ControllerResult;
use crate::system::{
    AutomationConfig, CycleSettings, DosingConfig, MonitoringConfig, NightOverride,
    NutrientConfig, SystemConfig, SystemType,
};
use crate::validation::validate_system_config;

/// Default cycle settings for a system type
pub fn default_cycle(system_type: SystemType) -> CycleSettings {
    match system_type {
        SystemType::Nft => CycleSettings::Nft {
            flow_rate_lpm: 2.0,
            channel_slope_pct: 2.0,
            flow_tolerance_pct: 10.0,
        },
        SystemType::DeepWaterCulture => CycleSettings::DeepWaterCulture {
            aeration_rate_lpm: 4.0,
            water_change_interval_days: 14,
        },
        SystemType::Aeroponic => CycleSettings::Aeroponic {
            mist_duration_secs: 5,
            mist_interval_secs: 300,
            droplet_size_microns: 50.0,
            pressure_psi: 80.0,
        },
        SystemType::EbbAndFlow | SystemType::FloodDrain => CycleSettings::EbbFlow {
            flood_duration_mins: 15,
            drain_duration_mins: 15,
            floods_per_day: 4,
        },
        SystemType::Drip => CycleSettings::Drip {
            on_duration_mins: 15,
            off_duration_mins: 45,
            emitter_flow_lph: 2.0,
        },
    }
}

/// Default nominal pump flow (L/min)
pub fn default_flow_rate(system_type: SystemType) -> f64 {
    match system_type {
        SystemType::Nft => 2.0,
        SystemType::DeepWaterCulture => 0.0,
        SystemType::Aeroponic => 1.0,
        SystemType::EbbAndFlow | SystemType::FloodDrain => 10.0,
        SystemType::Drip => 4.0,
    }
}

/// Partial cycle override. Fields that do not belong to the active variant
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleTuning {
    pub flow_rate_lpm: Option<f64>,
    pub channel_slope_pct: Option<f64>,
    pub flow_tolerance_pct: Option<f64>,
    pub aeration_rate_lpm: Option<f64>,
    pub water_change_interval_days: Option<u32>,
    pub mist_duration_secs: Option<u32>,
    pub mist_interval_secs: Option<u32>,
    pub droplet_size_microns: Option<f64>,
    pub pressure_psi: Option<f64>,
    pub flood_duration_mins: Option<u32>,
    pub drain_duration_mins: Option<u32>,
    pub floods_per_day: Option<u32>,
    pub on_duration_mins: Option<u32>,
    pub off_duration_mins: Option<u32>,
    pub emitter_flow_lph: Option<f64>,
}

impl CycleSettings {
    /// Apply a partial override, keeping the variant.
    pub fn tuned(&self, t: &CycleTuning) -> CycleSettings {
        match *self {
            Self::Nft {
                flow_rate_lpm,
                channel_slope_pct,
                flow_tolerance_pct,
            } => Self::Nft {
                flow_rate_lpm: t.flow_rate_lpm.unwrap_or(flow_rate_lpm),
                channel_slope_pct: t.channel_slope_pct.unwrap_or(channel_slope_pct),
                flow_tolerance_pct: t.flow_tolerance_pct.unwrap_or(flow_tolerance_pct),
            },
            Self::DeepWaterCulture {
                aeration_rate_lpm,
                water_change_interval_days,
            } => Self::DeepWaterCulture {
                aeration_rate_lpm: t.aeration_rate_lpm.unwrap_or(aeration_rate_lpm),
                water_change_interval_days: t
                    .water_change_interval_days
                    .unwrap_or(water_change_interval_days),
            },
            Self::Aeroponic {
                mist_duration_secs,
                mist_interval_secs,
                droplet_size_microns,
                pressure_psi,
            } => Self::Aeroponic {
                mist_duration_secs: t.mist_duration_secs.unwrap_or(mist_duration_secs),
                mist_interval_secs: t.mist_interval_secs.unwrap_or(mist_interval_secs),
                droplet_size_microns: t.droplet_size_microns.unwrap_or(droplet_size_microns),
                pressure_psi: t.pressure_psi.unwrap_or(pressure_psi),
            },
            Self::EbbFlow {
                flood_duration_mins,
                drain_duration_mins,
                floods_per_day,
            } => Self::EbbFlow {
                flood_duration_mins: t.flood_duration_mins.unwrap_or(flood_duration_mins),
                drain_duration_mins: t.drain_duration_mins.unwrap_or(drain_duration_mins),
                floods_per_day: t.floods_per_day.unwrap_or(floods_per_day),
            },
            Self::Drip {
                on_duration_mins,
                off_duration_mins,
                emitter_flow_lph,
            } => Self::Drip {
                on_duration_mins: t.on_duration_mins.unwrap_or(on_duration_mins),
                off_duration_mins: t.off_duration_mins.unwrap_or(off_duration_mins),
                emitter_flow_lph: t.emitter_flow_lph.unwrap_or(emitter_flow_lph),
            },
        }
    }
}

/// Provisioning input. Everything except identity, type and tank size falls
/// back to the profile defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub facility_id: String,
    pub zone_id: String,
    pub name: String,
    pub system_type: SystemType,
    pub tank_capacity_liters: f64,
    #[serde(default)]
    pub nominal_flow_rate_lpm: Option<f64>,
    #[serde(default)]
    pub cycle: Option<CycleTuning>,
    #[serde(default)]
    pub night_override: Option<NightOverride>,
    #[serde(default)]
    pub nutrients: Option<NutrientConfig>,
    #[serde(default)]
    pub monitoring: Option<MonitoringConfig>,
    #[serde(default)]
    pub dosing: Option<DosingConfig>,
    #[serde(default)]
    pub automation: Option<AutomationConfig>,
}

impl ProvisionRequest {
    pub fn new(system_type: SystemType, tank_capacity_liters: f64) -> Self {
        Self {
            facility_id: "facility-1".to_string(),
            zone_id: "zone-1".to_string(),
            name: format!("{system_type} system"),
            system_type,
            tank_capacity_liters,
            nominal_flow_rate_lpm: None,
            cycle: None,
            night_override: None,
            nutrients: None,
            monitoring: None,
            dosing: None,
            automation: None,
        }
    }
}

impl SystemConfig {
    /// Create a system configuration from profile defaults plus overrides.
    pub fn provision(request: ProvisionRequest) -> ControllerResult<SystemConfig> {
        let defaults = default_cycle(request.system_type);
        let cycle = match &request.cycle {
            Some(tuning) => defaults.tuned(tuning),
            None => defaults,
        };

        let config = SystemConfig {
            system_id: Uuid::new_v4(),
            facility_id: request.facility_id,
            zone_id: request.zone_id,
            name: request.name,
            system_type: request.system_type,
            tank_capacity_liters: request.tank_capacity_liters,
            nominal_flow_rate_lpm: request
                .nominal_flow_rate_lpm
                .unwrap_or_else(|| default_flow_rate(request.system_type)),
            cycle,
            night_override: request.night_override,
            nutrients: request.nutrients.unwrap_or_default(),
            monitoring: request.monitoring.unwrap_or_default(),
            dosing: request.dosing.unwrap_or_default(),
            automation: request.automation.unwrap_or_default(),
            created_at: Utc::now(),
        };

        validate_system_config(&config)?;

        info!(
            system_id = %config.system_id,
            system_type = %config.system_type,
            tank_liters = config.tank_capacity_liters,
            "Provisioned hydroponic system"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_matching_default() {
        for t in [
            SystemType::Nft,
            SystemType::DeepWaterCulture,
            SystemType::Aeroponic,
            SystemType::EbbAndFlow,
            SystemType::Drip,
            SystemType::FloodDrain,
        ] {
            assert!(default_cycle(t).matches(t), "default for {t} must match");
        }
    }

    #[test]
    fn test_tuning_merges_relevant_fields_only() {
        let tuning = CycleTuning {
            floods_per_day: Some(6),
            mist_interval_secs: Some(10),
            ..Default::default()
        };
        let tuned = default_cycle(SystemType::EbbAndFlow).tuned(&tuning);
        assert_eq!(
            tuned,
            CycleSettings::EbbFlow {
                flood_duration_mins: 15,
                drain_duration_mins: 15,
                floods_per_day: 6,
            }
        );
    }

    #[test]
    fn test_provision_applies_defaults_and_overrides() {
        let mut request = ProvisionRequest::new(SystemType::Nft, 200.0);
        request.cycle = Some(CycleTuning {
            flow_rate_lpm: Some(3.0),
            ..Default::default()
        });

        let config = SystemConfig::provision(request).unwrap();
        assert_eq!(config.nominal_flow_rate_lpm, 2.0);
        assert_eq!(config.nutrients.target_ph, 6.0);
        match config.cycle {
            CycleSettings::Nft { flow_rate_lpm, .. } => assert_eq!(flow_rate_lpm, 3.0),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_provision_rejects_bad_tank() {
        let request = ProvisionRequest::new(SystemType::Drip, 0.0);
        assert!(SystemConfig::provision(request).is_err());
    }
}
