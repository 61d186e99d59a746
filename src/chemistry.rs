//! Chemistry controller
//!
//! Two independent proportional loops evaluated every tick:
//!
//! - pH: dose pH up / down proportional to the error and tank volume.
//! - EC: dose concentrate on a deficit, dilution water on an excess, never
//!   both in the same tick.
//!
//! The dosing model is linear (`dose ∝ error × volume / calibration`) and
//! every constant comes from [`DosingConfig`]. The same model predicts the
//! post-dose value used to judge efficacy when no re-sample is available.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::history::DosingLog;
use crate::models::{Alert, AlertKind, ControlledVariable, DosingEvent, DosingKind, SensorReading};
use crate::system::{DosingConfig, NutrientConfig, SystemConfig};

const EPSILON: f64 = 1e-9;

/// One correction the loop wants to make
#[derive(Debug, Clone, PartialEq)]
pub struct DosingPlan {
    pub kind: DosingKind,
    pub volume_ml: f64,
    pub target: f64,
    pub tolerance: f64,
    pub pre_value: f64,
    pub predicted_value: f64,
    /// The computed dose exceeded a limit and was cut down
    pub limited: bool,
}

impl DosingPlan {
    pub fn into_event(self, at: DateTime<Utc>) -> DosingEvent {
        DosingEvent::pending(
            self.kind,
            self.volume_ml,
            self.target,
            self.tolerance,
            self.pre_value,
            self.predicted_value,
            at,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChemistryDecision {
    pub plans: Vec<DosingPlan>,
    pub alerts: Vec<Alert>,
}

/// Value the linear model expects after dosing `volume_ml` of `kind`.
pub fn predict_post_value(
    kind: DosingKind,
    pre_value: f64,
    volume_ml: f64,
    tank_liters: f64,
    dosing: &DosingConfig,
) -> f64 {
    match kind {
        DosingKind::PhUp => pre_value + volume_ml * dosing.ph_calibration / tank_liters,
        DosingKind::PhDown => pre_value - volume_ml * dosing.ph_calibration / tank_liters,
        DosingKind::NutrientA | DosingKind::NutrientB | DosingKind::CalMag => {
            pre_value + volume_ml * dosing.ec_calibration / tank_liters
        }
        DosingKind::DilutionWater => pre_value * tank_liters / (tank_liters + volume_ml / 1000.0),
    }
}

/// Per-tick ceiling for one dosing kind
pub fn per_tick_limit(kind: DosingKind, dosing: &DosingConfig) -> f64 {
    match kind {
        DosingKind::DilutionWater => dosing.max_dilution_per_tick_ml,
        _ => dosing.max_dose_per_tick_ml,
    }
}

fn plan(
    kind: DosingKind,
    raw_volume_ml: f64,
    pre_value: f64,
    target: f64,
    tolerance: f64,
    tank_liters: f64,
    dosing: &DosingConfig,
) -> DosingPlan {
    let limit = per_tick_limit(kind, dosing);
    let volume_ml = raw_volume_ml.clamp(0.0, limit);
    DosingPlan {
        kind,
        volume_ml,
        target,
        tolerance,
        pre_value,
        predicted_value: predict_post_value(kind, pre_value, volume_ml, tank_liters, dosing),
        limited: raw_volume_ml > limit,
    }
}

/// pH loop
pub fn plan_ph(
    ph: f64,
    nutrients: &NutrientConfig,
    dosing: &DosingConfig,
    tank_liters: f64,
) -> Option<DosingPlan> {
    let error = nutrients.target_ph - ph;
    if error.abs() <= nutrients.ph_tolerance + EPSILON {
        return None;
    }
    let kind = if error > 0.0 {
        DosingKind::PhUp
    } else {
        DosingKind::PhDown
    };
    let volume = error.abs() * tank_liters / dosing.ph_calibration;
    Some(plan(
        kind,
        volume,
        ph,
        nutrients.target_ph,
        nutrients.ph_tolerance,
        tank_liters,
        dosing,
    ))
}

/// EC loop: concentrate on a deficit, dilution water on an excess
pub fn plan_ec(
    ec: f64,
    nutrients: &NutrientConfig,
    dosing: &DosingConfig,
    tank_liters: f64,
) -> Option<DosingPlan> {
    let target = nutrients.target_ec;
    let tolerance = nutrients.ec_tolerance;
    let deficit = target - ec;

    if deficit > tolerance + EPSILON {
        let volume = deficit * tank_liters / dosing.ec_calibration;
        Some(plan(
            DosingKind::NutrientA,
            volume,
            ec,
            target,
            tolerance,
            tank_liters,
            dosing,
        ))
    } else if -deficit > tolerance + EPSILON {
        let volume = tank_liters * (ec / target - 1.0) * 1000.0;
        Some(plan(
            DosingKind::DilutionWater,
            volume,
            ec,
            target,
            tolerance,
            tank_liters,
            dosing,
        ))
    } else {
        None
    }
}

/// Apply the 24 h per-kind volume cap. Dilution water is exempt.
fn within_daily_cap(
    mut plan: DosingPlan,
    log: &DosingLog,
    config: &SystemConfig,
    now: DateTime<Utc>,
    alerts: &mut Vec<Alert>,
) -> Option<DosingPlan> {
    if plan.kind == DosingKind::DilutionWater {
        return Some(plan);
    }
    let used = log.daily_volume(plan.kind, now);
    let remaining = config.dosing.max_daily_dose_ml - used;
    if remaining <= EPSILON {
        warn!(kind = %plan.kind, used_ml = used, "Daily dosing cap reached, correction skipped");
        alerts.push(Alert::critical(
            AlertKind::DosingLimitReached,
            format!(
                "Daily {} limit of {:.0} mL reached - correction skipped",
                plan.kind, config.dosing.max_daily_dose_ml
            ),
        ));
        return None;
    }
    if plan.volume_ml > remaining {
        plan.volume_ml = remaining;
        plan.limited = true;
        plan.predicted_value = predict_post_value(
            plan.kind,
            plan.pre_value,
            plan.volume_ml,
            config.tank_capacity_liters,
            &config.dosing,
        );
        alerts.push(Alert::warning(
            AlertKind::DosingLimitReached,
            format!("Daily {} limit nearly reached - dose reduced", plan.kind),
        ));
    }
    Some(plan)
}

/// Evaluate both loops for one reading.
///
/// A loop with an unresolved dose in flight is skipped so the same error is
/// not corrected twice.
pub fn plan_corrections(
    reading: &SensorReading,
    config: &SystemConfig,
    log: &DosingLog,
    now: DateTime<Utc>,
) -> ChemistryDecision {
    let mut decision = ChemistryDecision::default();
    let tank = config.tank_capacity_liters;

    if config.automation.auto_ph && !log.has_pending(ControlledVariable::Ph) {
        if let Some(p) = plan_ph(reading.ph, &config.nutrients, &config.dosing, tank) {
            if let Some(p) = within_daily_cap(p, log, config, now, &mut decision.alerts) {
                decision.plans.push(p);
            }
        }
    }

    if config.automation.auto_nutrients && !log.has_pending(ControlledVariable::Ec) {
        if let Some(p) = plan_ec(reading.ec, &config.nutrients, &config.dosing, tank) {
            if let Some(p) = within_daily_cap(p, log, config, now, &mut decision.alerts) {
                decision.plans.push(p);
            }
        }
    }

    for p in &decision.plans {
        debug!(
            kind = %p.kind,
            volume_ml = p.volume_ml,
            pre = p.pre_value,
            predicted = p.predicted_value,
            limited = p.limited,
            "Correction planned"
        );
    }

    decision
}

/// Critical alert once a loop has failed `threshold` times in a row.
pub fn escalation_alert(
    log: &DosingLog,
    variable: ControlledVariable,
    threshold: u32,
) -> Option<Alert> {
    let failures = log.consecutive_failures(variable);
    if failures < threshold {
        return None;
    }
    let name = match variable {
        ControlledVariable::Ph => "pH",
        ControlledVariable::Ec => "EC",
    };
    Some(Alert::critical(
        AlertKind::DosingFailureRepeated,
        format!("Repeated {name} dosing failure ({failures} in a row) - manual intervention required"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProvisionRequest;
    use crate::system::SystemType;

    fn config() -> SystemConfig {
        SystemConfig::provision(ProvisionRequest::new(SystemType::Nft, 100.0)).unwrap()
    }

    fn reading(ph: f64, ec: f64) -> SensorReading {
        SensorReading {
            ph,
            ec,
            ..SensorReading::nominal()
        }
    }

    #[test]
    fn test_no_dosing_within_tolerance() {
        let cfg = config();
        let log = DosingLog::new();
        for (ph, ec) in [(6.0, 1.8), (5.8, 1.6), (6.2, 2.0), (5.9, 1.95)] {
            let decision = plan_corrections(&reading(ph, ec), &cfg, &log, Utc::now());
            assert!(decision.plans.is_empty(), "dosed at pH {ph} EC {ec}");
        }
    }

    #[test]
    fn test_ph_two_tolerances_low_doses_up() {
        let cfg = config();
        let tol = cfg.nutrients.ph_tolerance;
        let ph = cfg.nutrients.target_ph - 2.0 * tol;
        let decision = plan_corrections(&reading(ph, 1.8), &cfg, &DosingLog::new(), Utc::now());

        assert_eq!(decision.plans.len(), 1);
        let plan = &decision.plans[0];
        assert_eq!(plan.kind, DosingKind::PhUp);
        assert!(plan.volume_ml > 0.0);
        assert!((plan.volume_ml - 4.0).abs() < 1e-9);
        assert!((plan.predicted_value - cfg.nutrients.target_ph).abs() < 1e-9);
    }

    #[test]
    fn test_ph_high_doses_down() {
        let cfg = config();
        let plan = plan_ph(6.8, &cfg.nutrients, &cfg.dosing, 100.0).unwrap();
        assert_eq!(plan.kind, DosingKind::PhDown);
    }

    #[test]
    fn test_dose_scales_with_volume_and_error() {
        let cfg = config();
        let small = plan_ph(5.5, &cfg.nutrients, &cfg.dosing, 50.0).unwrap();
        let large = plan_ph(5.5, &cfg.nutrients, &cfg.dosing, 100.0).unwrap();
        let worse = plan_ph(5.3, &cfg.nutrients, &cfg.dosing, 100.0).unwrap();
        assert!((large.volume_ml - 2.0 * small.volume_ml).abs() < 1e-9);
        assert!(worse.volume_ml > large.volume_ml);
    }

    #[test]
    fn test_ec_deficit_doses_concentrate() {
        let cfg = config();
        let plan = plan_ec(1.3, &cfg.nutrients, &cfg.dosing, 100.0).unwrap();
        assert_eq!(plan.kind, DosingKind::NutrientA);
        assert!((plan.volume_ml - 5.0).abs() < 1e-9);
        assert!((plan.predicted_value - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_ec_excess_dilutes_never_both() {
        let cfg = config();
        let decision = plan_corrections(&reading(6.0, 2.4), &cfg, &DosingLog::new(), Utc::now());
        assert_eq!(decision.plans.len(), 1);
        let plan = &decision.plans[0];
        assert_eq!(plan.kind, DosingKind::DilutionWater);
        // 100 L at 2.4 needs 33.3 L to reach 1.8, more than one tick allows
        assert_eq!(plan.volume_ml, cfg.dosing.max_dilution_per_tick_ml);
        assert!(plan.limited);
        assert!(plan.predicted_value > cfg.nutrients.target_ec);
    }

    #[test]
    fn test_ec_excess_dilution_within_cap() {
        let mut cfg = config();
        cfg.dosing.max_dilution_per_tick_ml = 50_000.0;
        let plan = plan_ec(2.4, &cfg.nutrients, &cfg.dosing, 100.0).unwrap();
        assert_eq!(plan.kind, DosingKind::DilutionWater);
        assert!((plan.volume_ml - 33_333.33).abs() < 1.0);
        assert!(!plan.limited);
        assert!((plan.predicted_value - cfg.nutrients.target_ec).abs() < 1e-6);
    }

    #[test]
    fn test_dose_clamped_to_per_tick_max() {
        let cfg = config();
        let plan = plan_ph(3.5, &cfg.nutrients, &cfg.dosing, 1000.0).unwrap();
        assert_eq!(plan.volume_ml, cfg.dosing.max_dose_per_tick_ml);
        assert!(plan.limited);
        // a clamped dose cannot reach the target
        assert!((plan.predicted_value - cfg.nutrients.target_ph).abs() > cfg.nutrients.ph_tolerance);
    }

    #[test]
    fn test_pending_loop_not_redosed() {
        let cfg = config();
        let mut log = DosingLog::new();
        log.push(DosingEvent::pending(DosingKind::PhUp, 4.0, 6.0, 0.2, 5.6, 6.0, Utc::now()));
        let decision = plan_corrections(&reading(5.6, 1.3), &cfg, &log, Utc::now());
        assert_eq!(decision.plans.len(), 1);
        assert_eq!(decision.plans[0].kind, DosingKind::NutrientA);
    }

    #[test]
    fn test_daily_cap_blocks_dosing() {
        let mut cfg = config();
        cfg.dosing.max_daily_dose_ml = 10.0;
        let now = Utc::now();
        let mut log = DosingLog::new();
        let mut done = DosingEvent::pending(DosingKind::PhUp, 10.0, 6.0, 0.2, 5.0, 6.0, now);
        done.resolve(6.0, now);
        log.push(done);

        let decision = plan_corrections(&reading(5.5, 1.8), &cfg, &log, now);
        assert!(decision.plans.is_empty());
        assert!(decision
            .alerts
            .iter()
            .any(|a| a.kind == AlertKind::DosingLimitReached));
    }

    #[test]
    fn test_automation_toggles_respected() {
        let mut cfg = config();
        cfg.automation.auto_ph = false;
        cfg.automation.auto_nutrients = false;
        let decision = plan_corrections(&reading(4.5, 0.5), &cfg, &DosingLog::new(), Utc::now());
        assert!(decision.plans.is_empty());
    }

    #[test]
    fn test_escalation_after_repeated_failures() {
        let now = Utc::now();
        let mut log = DosingLog::new();
        for _ in 0..3 {
            let mut e = DosingEvent::pending(DosingKind::PhDown, 5.0, 6.0, 0.2, 7.0, 6.0, now);
            e.resolve(6.9, now);
            log.push(e);
        }
        assert!(escalation_alert(&log, ControlledVariable::Ph, 3).is_some());
        assert!(escalation_alert(&log, ControlledVariable::Ph, 4).is_none());
        assert!(escalation_alert(&log, ControlledVariable::Ec, 1).is_none());
    }
}
