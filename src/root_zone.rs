//! Root-zone evaluator
//!
//! Pure scoring of root-zone temperature, oxygen and solution pH. Nothing
//! here is stored; the controller keeps only the resulting [`RootHealth`].

use serde::{Deserialize, Serialize};

use crate::models::{Measurement, RootHealth, SensorReading};

/// Number of recent measurements considered for biofilm detection
pub const BIOFILM_WINDOW: usize = 10;

const TEMP_WARM: f64 = 24.0;
const TEMP_HOT: f64 = 26.0;
const OXYGEN_LOW: f64 = 6.0;
const OXYGEN_CRITICAL: f64 = 4.0;
const PH_SAFE: (f64, f64) = (5.0, 7.0);
const PH_TOLERABLE: (f64, f64) = (4.5, 7.5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathogenRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootColor {
    White,
    Cream,
    Tan,
    Brown,
}

impl RootColor {
    fn from_score(score: u8) -> Self {
        match score {
            75..=u8::MAX => Self::White,
            50..=74 => Self::Cream,
            25..=49 => Self::Tan,
            _ => Self::Brown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootZoneAssessment {
    pub temperature: f64,
    pub oxygen: f64,
    pub biofilm_present: bool,
    /// 0.0 to 1.0
    pub root_mass_index: f64,
    pub color: RootColor,
    pub score: u8,
    pub health: RootHealth,
    pub pathogen_risk: PathogenRisk,
    pub recommendations: Vec<String>,
}

/// Health score from 0 to 100. Each variable contributes one penalty, the
/// more severe band replacing the milder one.
pub fn score(temperature: f64, oxygen: f64, ph: f64) -> u8 {
    let mut penalty = 0u32;

    if temperature > TEMP_HOT {
        penalty += 25;
    } else if temperature > TEMP_WARM {
        penalty += 15;
    }

    if oxygen < OXYGEN_CRITICAL {
        penalty += 40;
    } else if oxygen < OXYGEN_LOW {
        penalty += 20;
    }

    if ph < PH_TOLERABLE.0 || ph > PH_TOLERABLE.1 {
        penalty += 40;
    } else if ph < PH_SAFE.0 || ph > PH_SAFE.1 {
        penalty += 20;
    }

    100u32.saturating_sub(penalty) as u8
}

/// Pathogen risk depends on temperature and oxygen only.
pub fn pathogen_risk(temperature: f64, oxygen: f64) -> PathogenRisk {
    if temperature > TEMP_HOT || oxygen < OXYGEN_CRITICAL {
        PathogenRisk::High
    } else if temperature > TEMP_WARM || oxygen < OXYGEN_LOW {
        PathogenRisk::Medium
    } else {
        PathogenRisk::Low
    }
}

/// Assess the current reading. `window` holds recent measurements (any
/// order) used for the rolling oxygen mean.
pub fn assess(reading: &SensorReading, window: &[&Measurement]) -> RootZoneAssessment {
    let temperature = reading.root_zone_temperature;
    let oxygen = reading.root_zone_oxygen;

    let score = score(temperature, oxygen, reading.ph);
    let risk = pathogen_risk(temperature, oxygen);

    let samples = window.len().min(BIOFILM_WINDOW);
    let oxygen_sum: f64 = window
        .iter()
        .take(samples)
        .map(|m| m.root_zone_oxygen)
        .sum::<f64>()
        + oxygen;
    let mean_oxygen = oxygen_sum / (samples + 1) as f64;
    let biofilm_present = temperature > TEMP_WARM && mean_oxygen < OXYGEN_LOW;

    let mut recommendations = Vec::new();
    if temperature > TEMP_HOT {
        recommendations.push("Root zone critically warm - chill the reservoir below 24°C".to_string());
    } else if temperature > TEMP_WARM {
        recommendations.push("Root zone warm - lower solution temperature".to_string());
    }
    if oxygen < OXYGEN_CRITICAL {
        recommendations.push("Root zone oxygen critical - add air stones or increase aeration immediately".to_string());
    } else if oxygen < OXYGEN_LOW {
        recommendations.push("Root zone oxygen low - increase aeration".to_string());
    }
    if reading.ph < PH_SAFE.0 || reading.ph > PH_SAFE.1 {
        recommendations.push(format!(
            "Solution pH {:.1} outside {:.1}-{:.1} - correct pH",
            reading.ph, PH_SAFE.0, PH_SAFE.1
        ));
    }
    if biofilm_present {
        recommendations.push("Biofilm conditions detected - clean channels and consider enzyme treatment".to_string());
    }
    if risk == PathogenRisk::High {
        recommendations.push("High pathogen risk - inspect roots for browning and slime".to_string());
    }

    RootZoneAssessment {
        temperature,
        oxygen,
        biofilm_present,
        root_mass_index: f64::from(score) / 100.0,
        color: RootColor::from_score(score),
        score,
        health: RootHealth::from_score(score),
        pathogen_risk: risk,
        recommendations,
    }
}
