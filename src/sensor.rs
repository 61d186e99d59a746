//! Sensor acquisition
//!
//! The controller never talks to probes directly; it pulls readings from a
//! [`SensorSource`]. Two sources ship with the crate:
//!
//! - [`SimulatedSource`] produces realistic drifting water chemistry and
//!   reacts to the controller's own dosing and actuation, closing the loop
//!   without hardware.
//! - [`ReplaySource`] plays back readings pushed through a [`ReplayFeed`],
//!   either recorded data, test fixtures or readings ingested over HTTP from
//!   an external driver.
//!
//! Simulated chemistry characteristics:
//! - pH creeps upward as plants take up nitrate
//! - EC falls slowly with nutrient uptake
//! - reservoir level drops with transpiration
//! - every channel carries Gaussian probe noise

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::SensorFailure;
use crate::models::{ControlledVariable, DosingKind, SensorReading};
use crate::ports::ActuatorCommand;
use crate::system::{CycleSettings, SystemConfig};

/// Pluggable data source behind the acquisition stage
pub trait SensorSource: Send {
    /// Produce one reading.
    fn sample(&mut self) -> Result<SensorReading, SensorFailure>;

    /// Read the current state without consuming or advancing anything the
    /// next `sample` would return. Used to judge a dose after it settles.
    fn peek(&mut self) -> Result<SensorReading, SensorFailure>;

    /// A dose was dispatched and the linear model expects the controlled
    /// variable to reach `predicted_value`.
    fn on_dose(&mut self, _kind: DosingKind, _predicted_value: f64) {}

    /// An actuator command was dispatched.
    fn on_command(&mut self, _command: &ActuatorCommand) {}
}

/// Noise sigma per channel
const PH_NOISE: f64 = 0.02;
const EC_NOISE: f64 = 0.02;
const DO_NOISE: f64 = 0.1;
const TEMP_NOISE: f64 = 0.1;
const FLOW_NOISE: f64 = 0.03;
const PRESSURE_NOISE: f64 = 0.5;

/// Per-tick drift applied to the simulated reservoir
const PH_DRIFT: f64 = 0.01;
const EC_UPTAKE: f64 = 0.005;
const LEVEL_LOSS_PCT: f64 = 0.05;

/// TDS (ppm) per mS/cm, 500 scale
const TDS_FACTOR: f64 = 500.0;

/// Stateful water-chemistry simulator
pub struct SimulatedSource {
    rng: StdRng,
    base: SensorReading,
    target_flow: f64,
    target_pressure: Option<f64>,
    /// Fraction of the predicted dosing effect that actually happens
    efficacy: f64,
    /// Probability that a sample fails outright
    failure_rate: f64,
    tick_count: u64,
}

impl SimulatedSource {
    /// Create a simulator sitting on the system's setpoints.
    pub fn new(system: &SystemConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (target_flow, target_pressure) = match system.cycle {
            CycleSettings::Nft { flow_rate_lpm, .. } => (flow_rate_lpm, None),
            CycleSettings::Aeroponic { pressure_psi, .. } => {
                (system.nominal_flow_rate_lpm, Some(pressure_psi))
            }
            _ => (system.nominal_flow_rate_lpm, None),
        };

        let nutrients = &system.nutrients;
        let base = SensorReading {
            ph: nutrients.target_ph,
            ec: nutrients.target_ec,
            tds: nutrients.target_ec * TDS_FACTOR,
            dissolved_oxygen: nutrients.target_do + 0.5,
            temperature: 21.0,
            water_level: 90.0,
            flow_rate: target_flow,
            pressure: target_pressure,
            root_zone_temperature: 21.0,
            root_zone_oxygen: nutrients.target_do + 0.3,
        };

        info!(
            system_type = %system.system_type,
            seeded = seed.is_some(),
            "Initializing simulated sensor source"
        );

        Self {
            rng,
            base,
            target_flow,
            target_pressure,
            efficacy: 1.0,
            failure_rate: 0.0,
            tick_count: 0,
        }
    }

    pub fn with_efficacy(mut self, efficacy: f64) -> Self {
        self.efficacy = efficacy.clamp(0.0, 2.0);
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Replace the underlying (noise-free) state.
    pub fn with_base(mut self, base: SensorReading) -> Self {
        self.base = base;
        self
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        z * sigma
    }

    fn drift(&mut self) {
        self.base.ph = (self.base.ph + PH_DRIFT).min(8.5);
        self.base.ec = (self.base.ec - EC_UPTAKE).max(0.1);
        self.base.tds = self.base.ec * TDS_FACTOR;
        self.base.water_level = (self.base.water_level - LEVEL_LOSS_PCT).max(0.0);

        // slow diurnal swing in solution temperature
        let phase = (self.tick_count as f64 / 720.0) * std::f64::consts::TAU;
        self.base.temperature = 21.0 + phase.sin() * 1.5;
        self.base.root_zone_temperature = self.base.temperature + 0.3;
    }

    fn observe(&mut self) -> Result<SensorReading, SensorFailure> {
        if self.failure_rate > 0.0 && self.rng.gen::<f64>() < self.failure_rate {
            return Err(SensorFailure("simulated probe timeout".to_string()));
        }

        let pressure = match self.base.pressure {
            Some(p) => Some((p + self.noise(PRESSURE_NOISE)).max(0.0)),
            None => None,
        };

        let reading = SensorReading {
            ph: round2((self.base.ph + self.noise(PH_NOISE)).clamp(0.0, 14.0)),
            ec: round2((self.base.ec + self.noise(EC_NOISE)).max(0.0)),
            tds: self.base.tds.round(),
            dissolved_oxygen: round2((self.base.dissolved_oxygen + self.noise(DO_NOISE)).max(0.0)),
            temperature: round2(self.base.temperature + self.noise(TEMP_NOISE)),
            water_level: round2(self.base.water_level.clamp(0.0, 100.0)),
            flow_rate: round2((self.base.flow_rate + self.noise(FLOW_NOISE)).max(0.0)),
            pressure: pressure.map(round2),
            root_zone_temperature: round2(self.base.root_zone_temperature + self.noise(TEMP_NOISE)),
            root_zone_oxygen: round2((self.base.root_zone_oxygen + self.noise(DO_NOISE)).max(0.0)),
        };

        debug!(
            tick = self.tick_count,
            ph = reading.ph,
            ec = reading.ec,
            dissolved_oxygen = reading.dissolved_oxygen,
            water_level = reading.water_level,
            "Generated simulated reading"
        );

        Ok(reading)
    }
}

impl SensorSource for SimulatedSource {
    fn sample(&mut self) -> Result<SensorReading, SensorFailure> {
        self.tick_count += 1;
        self.drift();
        self.observe()
    }

    fn peek(&mut self) -> Result<SensorReading, SensorFailure> {
        self.observe()
    }

    fn on_dose(&mut self, kind: DosingKind, predicted_value: f64) {
        match kind.controlled_variable() {
            ControlledVariable::Ph => {
                self.base.ph += (predicted_value - self.base.ph) * self.efficacy;
            }
            ControlledVariable::Ec => {
                self.base.ec += (predicted_value - self.base.ec) * self.efficacy;
                self.base.tds = self.base.ec * TDS_FACTOR;
            }
        }
    }

    fn on_command(&mut self, command: &ActuatorCommand) {
        match command {
            ActuatorCommand::AdjustFlow { target_lpm } => self.base.flow_rate = *target_lpm,
            ActuatorCommand::IncreaseAeration { .. } => {
                self.base.dissolved_oxygen = (self.base.dissolved_oxygen + 0.5).min(12.0);
                self.base.root_zone_oxygen = (self.base.root_zone_oxygen + 0.4).min(12.0);
            }
            ActuatorCommand::Refill { target_level_pct } => {
                self.base.water_level = *target_level_pct
            }
            ActuatorCommand::AdjustPressure { target_psi } => {
                self.base.pressure = Some(*target_psi)
            }
            ActuatorCommand::SetPumpSpeed { percent } if self.target_pressure.is_none() => {
                self.base.flow_rate = self.target_flow * f64::from(*percent) / 100.0;
            }
            _ => {}
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
enum ReplayStep {
    Reading(SensorReading),
    Failure(String),
}

/// Producer handle for a [`ReplaySource`]
#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    queue: Arc<Mutex<VecDeque<ReplayStep>>>,
}

impl ReplayFeed {
    pub fn push(&self, reading: SensorReading) {
        self.lock().push_back(ReplayStep::Reading(reading));
    }

    pub fn push_failure(&self, reason: impl Into<String>) {
        self.lock().push_back(ReplayStep::Failure(reason.into()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ReplayStep>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Deterministic source fed from a queue
#[derive(Debug)]
pub struct ReplaySource {
    feed: ReplayFeed,
    last: Option<SensorReading>,
    hold_last: bool,
}

impl ReplaySource {
    /// Create a source and the feed that supplies it.
    pub fn channel() -> (Self, ReplayFeed) {
        let feed = ReplayFeed::default();
        let source = Self {
            feed: feed.clone(),
            last: None,
            hold_last: false,
        };
        (source, feed)
    }

    /// Replay a fixed sequence of readings.
    pub fn from_readings(readings: impl IntoIterator<Item = SensorReading>) -> Self {
        let (source, feed) = Self::channel();
        for reading in readings {
            feed.push(reading);
        }
        source
    }

    /// Repeat the most recent reading once the queue runs dry instead of
    /// failing.
    pub fn holding_last(mut self) -> Self {
        self.hold_last = true;
        self
    }

    fn held(&self) -> Result<SensorReading, SensorFailure> {
        match (&self.last, self.hold_last) {
            (Some(last), true) => Ok(last.clone()),
            _ => Err(SensorFailure("no reading available from replay feed".to_string())),
        }
    }
}

impl SensorSource for ReplaySource {
    fn sample(&mut self) -> Result<SensorReading, SensorFailure> {
        let step = self.feed.lock().pop_front();
        match step {
            Some(ReplayStep::Reading(reading)) => {
                self.last = Some(reading.clone());
                Ok(reading)
            }
            Some(ReplayStep::Failure(reason)) => Err(SensorFailure(reason)),
            None => self.held(),
        }
    }

    fn peek(&mut self) -> Result<SensorReading, SensorFailure> {
        let step = self.feed.lock().front().cloned();
        match step {
            Some(ReplayStep::Reading(reading)) => Ok(reading),
            Some(ReplayStep::Failure(reason)) => Err(SensorFailure(reason)),
            None => self.held(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProvisionRequest;
    use crate::system::SystemType;

    fn system(system_type: SystemType) -> SystemConfig {
        SystemConfig::provision(ProvisionRequest::new(system_type, 100.0)).unwrap()
    }

    #[test]
    fn test_simulated_reading_in_plausible_range() {
        let mut source = SimulatedSource::new(&system(SystemType::Nft), Some(7));
        for _ in 0..50 {
            let reading = source.sample().unwrap();
            assert!(crate::validation::validate_sensor_reading(&reading).is_ok());
            assert!(reading.pressure.is_none());
        }
    }

    #[test]
    fn test_seeded_simulation_is_deterministic() {
        let cfg = system(SystemType::DeepWaterCulture);
        let mut a = SimulatedSource::new(&cfg, Some(42));
        let mut b = SimulatedSource::new(&cfg, Some(42));
        for _ in 0..10 {
            assert_eq!(a.sample().unwrap(), b.sample().unwrap());
        }
    }

    #[test]
    fn test_aeroponic_simulation_reports_pressure() {
        let mut source = SimulatedSource::new(&system(SystemType::Aeroponic), Some(1));
        assert!(source.sample().unwrap().pressure.is_some());
    }

    #[test]
    fn test_simulation_responds_to_dose() {
        let mut source = SimulatedSource::new(&system(SystemType::Nft), Some(3))
            .with_base(SensorReading {
                ph: 5.2,
                ..SensorReading::nominal()
            });
        source.on_dose(DosingKind::PhUp, 6.0);
        let reading = source.sample().unwrap();
        assert!((reading.ph - 6.0).abs() < 0.15);
    }

    #[test]
    fn test_failure_rate_one_always_fails() {
        let mut source =
            SimulatedSource::new(&system(SystemType::Drip), Some(9)).with_failure_rate(1.0);
        assert!(source.sample().is_err());
    }

    #[test]
    fn test_replay_order_and_failures() {
        let (mut source, feed) = ReplaySource::channel();
        let mut first = SensorReading::nominal();
        first.ph = 5.0;
        feed.push(first.clone());
        feed.push_failure("probe unplugged");

        assert_eq!(source.sample().unwrap(), first);
        assert_eq!(
            source.sample().unwrap_err(),
            SensorFailure("probe unplugged".to_string())
        );
        assert!(source.sample().is_err());
    }

    #[test]
    fn test_replay_peek_leaves_queue_intact() {
        let (mut source, feed) = ReplaySource::channel();
        assert!(source.peek().is_err());

        let mut queued = SensorReading::nominal();
        queued.ph = 6.4;
        feed.push(queued.clone());
        assert_eq!(source.peek().unwrap(), queued);
        assert_eq!(feed.len(), 1);
        assert_eq!(source.sample().unwrap(), queued);
        assert!(feed.is_empty());
    }

    #[test]
    fn test_simulated_peek_does_not_drift() {
        let base = SensorReading {
            ph: 6.0,
            ..SensorReading::nominal()
        };
        let mut source =
            SimulatedSource::new(&system(SystemType::Nft), Some(5)).with_base(base);
        for _ in 0..200 {
            let reading = source.peek().unwrap();
            assert!((reading.ph - 6.0).abs() < 0.15);
        }
        assert_eq!(source.tick_count, 0);
    }

    #[test]
    fn test_zero_efficacy_dose_has_no_effect() {
        let mut source = SimulatedSource::new(&system(SystemType::Nft), Some(3))
            .with_base(SensorReading {
                ph: 5.2,
                ..SensorReading::nominal()
            })
            .with_efficacy(0.0);
        source.on_dose(DosingKind::PhUp, 6.0);
        let reading = source.peek().unwrap();
        assert!((reading.ph - 5.2).abs() < 0.15);
    }

    #[test]
    fn test_replay_holding_last() {
        let mut source = ReplaySource::from_readings([SensorReading::nominal()]).holding_last();
        assert!(source.sample().is_ok());
        assert_eq!(source.sample().unwrap(), SensorReading::nominal());
    }
}
