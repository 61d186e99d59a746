//! Cycle controller
//!
//! One state machine per system type driving flow, aeration, misting,
//! flooding and drip timing. The controller only decides *when*; every
//! transition comes back as [`ActuatorCommand`]s for the actuation port.
//!
//! ```text
//!   NFT / DWC        continuous: compare to target, adjust
//!   Aeroponic        Idle ──interval──▶ Misting ──duration──▶ Idle
//!   Ebb / flood      Idle ──period──▶ Flooding ──flood──▶ Draining ──drain──▶ Idle
//!   Drip             Idle ──on+off──▶ Flowing ──on──▶ Idle
//! ```

use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::models::{Alert, AlertKind, CyclePhase, SensorReading, ValvePosition};
use crate::ports::ActuatorCommand;
use crate::system::{CycleSettings, SystemConfig};

/// Flow below this fraction of target suggests a blockage
pub const BLOCKAGE_FLOW_FRACTION: f64 = 0.70;
/// Dissolved oxygen below this fraction of target triggers more aeration
pub const AERATION_DO_FRACTION: f64 = 0.80;
/// Nozzle pressure below this fraction of target triggers a pump adjustment
pub const PRESSURE_FRACTION: f64 = 0.90;
/// Reservoir level (percent) that triggers a refill
pub const REFILL_LEVEL_PCT: f64 = 50.0;
pub const REFILL_TARGET_PCT: f64 = 95.0;
/// Consecutive low-flow ticks before a blockage is escalated
pub const BLOCKAGE_ESCALATION_TICKS: u32 = 3;
/// Aeration boost applied on low oxygen
const AERATION_BOOST: f64 = 1.25;

pub const FILL_VALVE: &str = "fill";
pub const DRAIN_VALVE: &str = "drain";
pub const MIST_VALVE: &str = "mist";
pub const DRIP_VALVE: &str = "drip";

pub const LOW_FLOW_ALERT: &str = "Low flow rate - possible blockage";
pub const LOW_OXYGEN_ALERT: &str = "Low dissolved oxygen - increasing aeration";

/// Outcome of one cycle evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct CycleDecision {
    pub phase: CyclePhase,
    pub commands: Vec<ActuatorCommand>,
    pub alerts: Vec<Alert>,
}

/// Per-instance cycle state machine
#[derive(Debug, Clone)]
pub struct CycleController {
    phase: CyclePhase,
    pump_running: bool,
    valves: BTreeMap<String, ValvePosition>,
    last_mist_start: Option<DateTime<Utc>>,
    last_flood_start: Option<DateTime<Utc>>,
    drain_started: Option<DateTime<Utc>>,
    last_drip_start: Option<DateTime<Utc>>,
    low_flow_ticks: u32,
}

impl Default for CycleController {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleController {
    pub fn new() -> Self {
        Self {
            phase: CyclePhase::Idle,
            pump_running: false,
            valves: BTreeMap::new(),
            last_mist_start: None,
            last_flood_start: None,
            drain_started: None,
            last_drip_start: None,
            low_flow_ticks: 0,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn pump_running(&self) -> bool {
        self.pump_running
    }

    pub fn valves(&self) -> &BTreeMap<String, ValvePosition> {
        &self.valves
    }

    /// Evaluate one tick.
    pub fn decide(
        &mut self,
        now: DateTime<Utc>,
        reading: &SensorReading,
        config: &SystemConfig,
    ) -> CycleDecision {
        let mut decision = CycleDecision {
            phase: self.phase,
            commands: Vec::new(),
            alerts: Vec::new(),
        };
        let actuate = config.automation.auto_cycle;

        match *config.active_cycle(now.hour()) {
            CycleSettings::Nft {
                flow_rate_lpm,
                flow_tolerance_pct,
                ..
            } => self.nft(reading, flow_rate_lpm, flow_tolerance_pct, actuate, &mut decision),
            CycleSettings::DeepWaterCulture {
                aeration_rate_lpm, ..
            } => self.deep_water(reading, config, aeration_rate_lpm, actuate, &mut decision),
            CycleSettings::Aeroponic {
                mist_duration_secs,
                mist_interval_secs,
                pressure_psi,
                ..
            } => {
                if actuate {
                    self.misting(now, mist_duration_secs, mist_interval_secs, &mut decision);
                }
                self.pressure(reading, pressure_psi, actuate, &mut decision);
            }
            CycleSettings::EbbFlow {
                flood_duration_mins,
                drain_duration_mins,
                floods_per_day,
            } => {
                if actuate {
                    self.ebb_flow(
                        now,
                        Duration::minutes(i64::from(flood_duration_mins)),
                        Duration::minutes(i64::from(drain_duration_mins)),
                        floods_per_day,
                        &mut decision,
                    );
                }
            }
            CycleSettings::Drip {
                on_duration_mins,
                off_duration_mins,
                ..
            } => {
                if actuate {
                    self.drip(
                        now,
                        Duration::minutes(i64::from(on_duration_mins)),
                        Duration::minutes(i64::from(off_duration_mins)),
                        &mut decision,
                    );
                }
            }
        }

        decision.phase = self.phase;
        decision
    }

    /// Track the pump / valve state a command leaves behind. Call only once
    /// the actuator has accepted the command.
    pub fn apply(&mut self, command: &ActuatorCommand) {
        match command {
            ActuatorCommand::SetPumpSpeed { percent } => self.pump_running = *percent > 0,
            ActuatorCommand::OpenValve { valve } => {
                self.valves.insert(valve.clone(), ValvePosition::Open);
            }
            ActuatorCommand::CloseValve { valve } => {
                self.valves.insert(valve.clone(), ValvePosition::Closed);
            }
            _ => {}
        }
    }

    fn issue(&mut self, decision: &mut CycleDecision, command: ActuatorCommand) {
        debug!(command = ?command, phase = %self.phase, "Cycle command issued");
        decision.commands.push(command);
    }

    fn nft(
        &mut self,
        reading: &SensorReading,
        target: f64,
        tolerance_pct: f64,
        actuate: bool,
        decision: &mut CycleDecision,
    ) {
        self.phase = CyclePhase::Flowing;
        if actuate && !self.pump_running {
            self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 100 });
        }

        let band = target * tolerance_pct / 100.0;
        if actuate && (reading.flow_rate - target).abs() > band {
            self.issue(decision, ActuatorCommand::AdjustFlow { target_lpm: target });
        }

        if reading.flow_rate < target * BLOCKAGE_FLOW_FRACTION {
            self.low_flow_ticks += 1;
            warn!(
                flow_rate = reading.flow_rate,
                target,
                consecutive = self.low_flow_ticks,
                "Low channel flow"
            );
            decision
                .alerts
                .push(Alert::warning(AlertKind::FlowBlockage, LOW_FLOW_ALERT));
            if self.low_flow_ticks >= BLOCKAGE_ESCALATION_TICKS {
                decision.alerts.push(Alert::critical(
                    AlertKind::PersistentBlockage,
                    format!(
                        "Persistent low flow for {} ticks - inspect channels and pump",
                        self.low_flow_ticks
                    ),
                ));
            }
        } else {
            self.low_flow_ticks = 0;
        }
    }

    fn deep_water(
        &mut self,
        reading: &SensorReading,
        config: &SystemConfig,
        aeration_rate_lpm: f64,
        actuate: bool,
        decision: &mut CycleDecision,
    ) {
        self.phase = CyclePhase::Idle;
        if actuate && !self.pump_running {
            self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 100 });
        }

        let target_do = config.nutrients.target_do;
        if reading.dissolved_oxygen < target_do * AERATION_DO_FRACTION {
            if actuate {
                self.issue(
                    decision,
                    ActuatorCommand::IncreaseAeration {
                        rate_lpm: aeration_rate_lpm * AERATION_BOOST,
                    },
                );
            }
            decision
                .alerts
                .push(Alert::warning(AlertKind::OxygenLow, LOW_OXYGEN_ALERT));
        }

        if reading.water_level < REFILL_LEVEL_PCT {
            if config.automation.auto_top_off {
                self.issue(
                    decision,
                    ActuatorCommand::Refill {
                        target_level_pct: REFILL_TARGET_PCT,
                    },
                );
                decision.alerts.push(Alert::warning(
                    AlertKind::RefillRequired,
                    "Low water level - refilling reservoir",
                ));
            } else {
                decision.alerts.push(Alert::warning(
                    AlertKind::RefillRequired,
                    "Low water level - manual refill required",
                ));
            }
        }
    }

    fn misting(
        &mut self,
        now: DateTime<Utc>,
        duration_secs: u32,
        interval_secs: u32,
        decision: &mut CycleDecision,
    ) {
        if self.phase == CyclePhase::Misting {
            let finished = self
                .last_mist_start
                .map_or(true, |start| now - start >= Duration::seconds(i64::from(duration_secs)));
            if finished {
                self.phase = CyclePhase::Idle;
                self.issue(decision, ActuatorCommand::StopMisting);
                self.issue(
                    decision,
                    ActuatorCommand::CloseValve {
                        valve: MIST_VALVE.to_string(),
                    },
                );
            }
        }

        if self.phase != CyclePhase::Misting {
            let due = self
                .last_mist_start
                .map_or(true, |start| now - start >= Duration::seconds(i64::from(interval_secs)));
            if due {
                self.phase = CyclePhase::Misting;
                self.last_mist_start = Some(now);
                self.issue(
                    decision,
                    ActuatorCommand::OpenValve {
                        valve: MIST_VALVE.to_string(),
                    },
                );
                self.issue(decision, ActuatorCommand::StartMisting { duration_secs });
            }
        }
    }

    fn pressure(
        &mut self,
        reading: &SensorReading,
        target_psi: f64,
        actuate: bool,
        decision: &mut CycleDecision,
    ) {
        let Some(pressure) = reading.pressure else {
            return;
        };
        if pressure < target_psi * PRESSURE_FRACTION {
            if actuate {
                self.issue(decision, ActuatorCommand::AdjustPressure { target_psi });
            }
            decision.alerts.push(Alert::warning(
                AlertKind::PressureLow,
                "Low misting pressure - adjusting pump pressure",
            ));
        }
    }

    fn ebb_flow(
        &mut self,
        now: DateTime<Utc>,
        flood_duration: Duration,
        drain_duration: Duration,
        floods_per_day: u32,
        decision: &mut CycleDecision,
    ) {
        match self.phase {
            CyclePhase::Flooding => {
                let flooded_long_enough = self
                    .last_flood_start
                    .map_or(true, |start| now - start >= flood_duration);
                if flooded_long_enough {
                    self.phase = CyclePhase::Draining;
                    self.drain_started = Some(now);
                    self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 0 });
                    self.issue(
                        decision,
                        ActuatorCommand::CloseValve {
                            valve: FILL_VALVE.to_string(),
                        },
                    );
                    self.issue(
                        decision,
                        ActuatorCommand::OpenValve {
                            valve: DRAIN_VALVE.to_string(),
                        },
                    );
                    info!("Flood complete, draining tray");
                }
            }
            CyclePhase::Draining => {
                let drained = self
                    .drain_started
                    .map_or(true, |start| now - start >= drain_duration);
                if drained {
                    self.phase = CyclePhase::Idle;
                    self.drain_started = None;
                    self.issue(
                        decision,
                        ActuatorCommand::CloseValve {
                            valve: DRAIN_VALVE.to_string(),
                        },
                    );
                }
            }
            _ => {}
        }

        if self.phase != CyclePhase::Flooding && self.phase != CyclePhase::Draining {
            let period = Duration::seconds(86_400 / i64::from(floods_per_day.max(1)));
            let due = self
                .last_flood_start
                .map_or(true, |start| now - start >= period);
            if due {
                self.phase = CyclePhase::Flooding;
                self.last_flood_start = Some(now);
                self.issue(
                    decision,
                    ActuatorCommand::OpenValve {
                        valve: FILL_VALVE.to_string(),
                    },
                );
                self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 100 });
                info!(floods_per_day, "Flood started");
            }
        }
    }

    fn drip(
        &mut self,
        now: DateTime<Utc>,
        on_duration: Duration,
        off_duration: Duration,
        decision: &mut CycleDecision,
    ) {
        if self.phase == CyclePhase::Flowing {
            let done = self
                .last_drip_start
                .map_or(true, |start| now - start >= on_duration);
            if done {
                self.phase = CyclePhase::Idle;
                self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 0 });
                self.issue(
                    decision,
                    ActuatorCommand::CloseValve {
                        valve: DRIP_VALVE.to_string(),
                    },
                );
            }
        }

        if self.phase != CyclePhase::Flowing {
            let due = self
                .last_drip_start
                .map_or(true, |start| now - start >= on_duration + off_duration);
            if due {
                self.phase = CyclePhase::Flowing;
                self.last_drip_start = Some(now);
                self.issue(
                    decision,
                    ActuatorCommand::OpenValve {
                        valve: DRIP_VALVE.to_string(),
                    },
                );
                self.issue(decision, ActuatorCommand::SetPumpSpeed { percent: 100 });
            }
        }
    }
}
