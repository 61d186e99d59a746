//! Reporting aggregator over accumulated history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DosingEvent, Measurement, RootHealth};

/// Samples per half of the trend comparison
pub const TREND_SAMPLES: usize = 5;
/// Relative change below which a trend is stable
pub const TREND_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityScores {
    pub ph: f64,
    pub ec: f64,
    pub temperature: f64,
    pub dissolved_oxygen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosingSummary {
    pub total_events: usize,
    pub resolved_events: usize,
    pub successful_events: usize,
    /// None until at least one event has resolved
    pub success_rate: Option<f64>,
    pub average_dose_ml: Option<f64>,
    pub total_volume_ml: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReport {
    pub system_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub window_hours: i64,
    pub measurement_count: usize,
    pub stability: StabilityScores,
    pub ph_trend: Trend,
    pub ec_trend: Trend,
    pub dosing: DosingSummary,
    pub alert_tick_fraction: f64,
    pub degraded_root_fraction: f64,
    /// 0 to 100
    pub efficiency_score: f64,
    pub latest_root_health: Option<RootHealth>,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// `clamp(1 - variance / mean², 0, 1)`; fewer than two samples count as stable.
pub fn stability(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    if m == 0.0 {
        return if variance == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - variance / (m * m)).clamp(0.0, 1.0)
}

/// Compare the mean of the newest samples against the ones before them.
/// `values` is oldest first.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < TREND_SAMPLES * 2 {
        return Trend::Stable;
    }
    let split = values.len() - TREND_SAMPLES;
    let recent = mean(&values[split..]);
    let prior = mean(&values[split - TREND_SAMPLES..split]);
    if prior == 0.0 {
        return Trend::Stable;
    }
    let change = (recent - prior) / prior.abs();
    if change > TREND_THRESHOLD {
        Trend::Rising
    } else if change < -TREND_THRESHOLD {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

pub fn summarize_dosing(events: &[&DosingEvent]) -> DosingSummary {
    let resolved: Vec<_> = events.iter().filter(|e| !e.is_pending()).collect();
    let successful = resolved.iter().filter(|e| e.success).count();
    let (success_rate, average_dose_ml) = if resolved.is_empty() {
        (None, None)
    } else {
        let n = resolved.len() as f64;
        (
            Some(successful as f64 / n),
            Some(resolved.iter().map(|e| e.volume_ml).sum::<f64>() / n),
        )
    };
    DosingSummary {
        total_events: events.len(),
        resolved_events: resolved.len(),
        successful_events: successful,
        success_rate,
        average_dose_ml,
        total_volume_ml: events.iter().map(|e| e.volume_ml).sum(),
    }
}

/// Build a report. Both slices are expected oldest first and already limited
/// to the reporting window.
pub fn generate(
    system_id: Uuid,
    measurements: &[&Measurement],
    dosing: &[&DosingEvent],
    window_hours: i64,
    now: DateTime<Utc>,
) -> SystemReport {
    let series = |f: fn(&Measurement) -> f64| measurements.iter().map(|m| f(m)).collect::<Vec<_>>();
    let ph = series(|m| m.ph);
    let ec = series(|m| m.ec);

    let count = measurements.len();
    let (alert_fraction, degraded_fraction) = if count == 0 {
        (0.0, 0.0)
    } else {
        let alerting = measurements.iter().filter(|m| !m.alerts.is_empty()).count();
        let degraded = measurements.iter().filter(|m| m.root_health.is_degraded()).count();
        (alerting as f64 / count as f64, degraded as f64 / count as f64)
    };
    let efficiency = (100.0 - 50.0 * alert_fraction - 50.0 * degraded_fraction).clamp(0.0, 100.0);

    SystemReport {
        system_id,
        generated_at: now,
        window_hours,
        measurement_count: count,
        stability: StabilityScores {
            ph: stability(&ph),
            ec: stability(&ec),
            temperature: stability(&series(|m| m.temperature)),
            dissolved_oxygen: stability(&series(|m| m.dissolved_oxygen)),
        },
        ph_trend: trend(&ph),
        ec_trend: trend(&ec),
        dosing: summarize_dosing(dosing),
        alert_tick_fraction: alert_fraction,
        degraded_root_fraction: degraded_fraction,
        efficiency_score: efficiency,
        latest_root_health: measurements.last().map(|m| m.root_health),
    }
}
