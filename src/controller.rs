//! Controller: tick loop, lifecycle and the in-process API
//!
//! One controller drives one hydroponic system. Each tick runs
//! sample → cycle → chemistry → root zone → alerts → history, then sends
//! notifications. The tick loop is a tokio task raced against a
//! cancellation token; dosing efficacy is judged by separate tasks that
//! peek at the source after the configured delay, leaving queued readings
//! for the next tick.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts;
use crate::chemistry::{self, per_tick_limit, predict_post_value};
use crate::cycle::CycleController;
use crate::error::{ActuationFailure, ControllerError, ControllerResult, SensorFailure};
use crate::history::{DosingLog, MeasurementHistory, DEFAULT_CAPACITY};
use crate::maintenance::{MaintenanceRequest, MaintenanceScheduler, MaintenanceTask};
use crate::models::{
    Alert, AlertKind, ControlledVariable, CyclePhase, DosingEvent, DosingKind, Measurement,
    NutrientEstimate, SensorReading, ValvePosition,
};
use crate::ports::{
    ActuatorCommand, ActuatorSink, Clock, LoggingActuator, LoggingNotifier, Notification,
    NotificationSink, SystemClock,
};
use crate::reporting::{self, SystemReport};
use crate::root_zone::{self, RootZoneAssessment, BIOFILM_WINDOW};
use crate::sensor::SensorSource;
use crate::system::{ConfigUpdate, SystemConfig, SystemType};
use crate::validation::{
    validate_maintenance_request, validate_sensor_reading, validate_system_config,
    validate_window_hours,
};

/// Consecutive sensor failures before the alert turns critical
pub const SENSOR_FAILURE_ESCALATION: u32 = 3;

/// System-level alerts kept for status queries
const MAX_SYSTEM_ALERTS: usize = 100;

/// Dosing events included in a status snapshot
const STATUS_DOSING_EVENTS: usize = 10;

/// Runtime knobs for one controller instance
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub tick_interval: Duration,
    /// Wait between dispatching a dose and re-reading to judge it
    pub dosing_delay: Duration,
    pub retention_hours: i64,
    pub history_capacity: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(120),
            dosing_delay: Duration::from_secs(60),
            retention_hours: 24 * 7,
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// An alert raised outside a measurement, e.g. a skipped tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemAlert {
    pub timestamp: DateTime<Utc>,
    pub alert: Alert,
}

/// Snapshot returned by [`Controller::status`]
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub system_id: Uuid,
    pub name: String,
    pub system_type: SystemType,
    pub running: bool,
    pub phase: CyclePhase,
    pub pump_running: bool,
    pub valves: BTreeMap<String, ValvePosition>,
    pub ticks: u64,
    pub measurements_recorded: u64,
    pub history_len: usize,
    pub pending_doses: usize,
    pub consecutive_sensor_failures: u32,
    pub latest_measurement: Option<Measurement>,
    /// Alerts on the latest measurement followed by the system-level ones
    pub active_alerts: Vec<Alert>,
    /// Most recent dosing events, newest first
    pub recent_dosing: Vec<DosingEvent>,
    /// Earliest-due outstanding maintenance task
    pub next_maintenance: Option<MaintenanceTask>,
    pub system_alerts: Vec<SystemAlert>,
    pub config: SystemConfig,
}

struct ControllerState {
    config: SystemConfig,
    history: MeasurementHistory,
    dosing: DosingLog,
    cycle: CycleController,
    maintenance: MaintenanceScheduler,
    sensor_failures: u32,
    system_alerts: VecDeque<SystemAlert>,
    ticks: u64,
}

impl ControllerState {
    fn push_system_alert(&mut self, alert: Alert, timestamp: DateTime<Utc>) {
        if self.system_alerts.len() >= MAX_SYSTEM_ALERTS {
            self.system_alerts.pop_front();
        }
        self.system_alerts.push_back(SystemAlert { timestamp, alert });
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    state: RwLock<ControllerState>,
    source: Mutex<Box<dyn SensorSource>>,
    actuator: Arc<dyn ActuatorSink>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    options: ControllerOptions,
    lifecycle: StdMutex<Option<Running>>,
    dosing_tasks: StdMutex<Vec<JoinHandle<()>>>,
}

/// Assembles a [`Controller`] from its collaborators
pub struct ControllerBuilder {
    config: SystemConfig,
    source: Box<dyn SensorSource>,
    actuator: Arc<dyn ActuatorSink>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    options: ControllerOptions,
}

impl ControllerBuilder {
    pub fn actuator(mut self, actuator: Arc<dyn ActuatorSink>) -> Self {
        self.actuator = actuator;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> ControllerResult<Controller> {
        validate_system_config(&self.config)?;
        let history = MeasurementHistory::new(
            ChronoDuration::hours(self.options.retention_hours),
            self.options.history_capacity,
        );
        let state = ControllerState {
            maintenance: MaintenanceScheduler::for_system(&self.config),
            config: self.config,
            history,
            dosing: DosingLog::new(),
            cycle: CycleController::new(),
            sensor_failures: 0,
            system_alerts: VecDeque::new(),
            ticks: 0,
        };
        Ok(Controller {
            shared: Arc::new(Shared {
                state: RwLock::new(state),
                source: Mutex::new(self.source),
                actuator: self.actuator,
                notifier: self.notifier,
                clock: self.clock,
                options: self.options,
                lifecycle: StdMutex::new(None),
                dosing_tasks: StdMutex::new(Vec::new()),
            }),
        })
    }
}

/// Handle to one running (or stopped) controller. Cheap to clone.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    /// Start building a controller. Actuation and notification default to
    /// logging adapters and time to the system clock.
    pub fn builder(config: SystemConfig, source: Box<dyn SensorSource>) -> ControllerBuilder {
        ControllerBuilder {
            config,
            source,
            actuator: Arc::new(LoggingActuator),
            notifier: Arc::new(LoggingNotifier),
            clock: Arc::new(SystemClock),
            options: ControllerOptions::default(),
        }
    }

    /// Spawn the tick loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut lifecycle = self
            .shared
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if lifecycle.is_some() {
            debug!("Controller already running");
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(token.clone()));
        *lifecycle = Some(Running { token, handle });
        true
    }

    /// Cancel the tick loop and wait for it to exit. A tick in progress
    /// completes first. Pending dose evaluations keep running.
    pub async fn stop(&self) -> bool {
        let running = self
            .shared
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(running) = running else {
            return false;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            error!(error = %e, "Controller loop terminated abnormally");
        }
        info!("Controller stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    async fn run(self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.shared.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = self.shared.options.tick_interval.as_millis() as u64,
            "Controller loop started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Tick skipped");
                    }
                }
            }
        }
        debug!("Controller loop exited");
    }

    /// Run one control tick and return the recorded measurement.
    pub async fn tick(&self) -> ControllerResult<Measurement> {
        let now = self.shared.clock.now();

        let sampled = {
            let mut source = self.shared.source.lock().await;
            source
                .sample()
                .and_then(|reading| validate_sensor_reading(&reading).map(|_| reading))
        };
        let reading = match sampled {
            Ok(reading) => reading,
            Err(failure) => {
                self.record_sensor_failure(&failure, now).await;
                return Err(failure.into());
            }
        };

        let mut state = self.shared.state.write().await;
        state.sensor_failures = 0;
        state.ticks += 1;
        let config = state.config.clone();
        let mut tick_alerts = Vec::new();
        let mut notifications = Vec::new();

        // Cycle
        let decision = state.cycle.decide(now, &reading, &config);
        tick_alerts.extend(decision.alerts);
        {
            let mut source = self.shared.source.lock().await;
            for command in &decision.commands {
                match self.shared.actuator.dispatch(command) {
                    Ok(()) => {
                        state.cycle.apply(command);
                        source.on_command(command);
                    }
                    Err(failure) => {
                        warn!(command = ?command, error = %failure, "Cycle command failed");
                        tick_alerts.push(Alert::critical(
                            AlertKind::ActuationFailure,
                            failure.to_string(),
                        ));
                    }
                }
            }
        }

        // Chemistry
        let corrections = chemistry::plan_corrections(&reading, &config, &state.dosing, now);
        tick_alerts.extend(corrections.alerts);
        for plan in corrections.plans {
            let kind = plan.kind;
            let predicted = plan.predicted_value;
            let event = plan.into_event(now);
            if let Some(alert) = self.dispatch_dose(&mut *state, event, predicted, now).await {
                tick_alerts.push(alert);
            }
            debug!(kind = %kind, "Dose dispatched");
        }
        for variable in [ControlledVariable::Ph, ControlledVariable::Ec] {
            if let Some(alert) = chemistry::escalation_alert(
                &state.dosing,
                variable,
                config.dosing.failure_escalation_count,
            ) {
                tick_alerts.push(alert);
            }
        }

        // Root zone
        let assessment = {
            let window = state.history.recent(BIOFILM_WINDOW);
            root_zone::assess(&reading, &window)
        };

        // Thresholds
        tick_alerts.extend(alerts::evaluate(
            &reading,
            &config.monitoring,
            config.system_type,
        ));

        // Maintenance
        for task in state.maintenance.take_reminders(now) {
            let description = format!("{} overdue since {}", task.kind, task.next_due.format("%Y-%m-%d"));
            tick_alerts.push(Alert::warning(
                AlertKind::MaintenanceOverdue,
                format!("Maintenance overdue: {}", task.kind),
            ));
            notifications.push(Notification::MaintenanceDue {
                system_id: config.system_id,
                task_id: task.id,
                description,
            });
        }

        let cycle = &state.cycle;
        let measurement = Measurement {
            id: Uuid::new_v4(),
            timestamp: state.history.next_timestamp(now),
            ph: reading.ph,
            ec: reading.ec,
            tds: reading.tds,
            dissolved_oxygen: reading.dissolved_oxygen,
            temperature: reading.temperature,
            water_level: reading.water_level,
            flow_rate: reading.flow_rate,
            pressure: reading.pressure,
            phase: decision.phase,
            root_zone_temperature: reading.root_zone_temperature,
            root_zone_oxygen: reading.root_zone_oxygen,
            root_health: assessment.health,
            nutrients: estimate_nutrients(&reading, &config),
            pump_running: cycle.pump_running(),
            valves: cycle.valves().clone(),
            alerts: tick_alerts,
        };
        state.history.push(measurement.clone());
        drop(state);

        if config.automation.notifications {
            for alert in &measurement.alerts {
                self.shared.notifier.notify(&Notification::Alert {
                    system_id: config.system_id,
                    alert: alert.clone(),
                });
            }
            for notification in &notifications {
                self.shared.notifier.notify(notification);
            }
        }

        debug!(
            measurement_id = %measurement.id,
            phase = %measurement.phase,
            ph = measurement.ph,
            ec = measurement.ec,
            alerts = measurement.alerts.len(),
            "Tick complete"
        );
        Ok(measurement)
    }

    async fn record_sensor_failure(&self, failure: &SensorFailure, now: DateTime<Utc>) {
        let (alert, system_id, notify) = {
            let mut state = self.shared.state.write().await;
            state.sensor_failures += 1;
            let count = state.sensor_failures;
            let alert = if count >= SENSOR_FAILURE_ESCALATION {
                Alert::critical(
                    AlertKind::SensorFailure,
                    format!("Sensor failure on {count} consecutive ticks: {}", failure.0),
                )
            } else {
                Alert::warning(AlertKind::SensorFailure, failure.to_string())
            };
            warn!(consecutive = count, error = %failure, "Sensor sample failed, tick skipped");
            state.push_system_alert(alert.clone(), now);
            (
                alert,
                state.config.system_id,
                state.config.automation.notifications,
            )
        };
        if notify {
            self.shared
                .notifier
                .notify(&Notification::Alert { system_id, alert });
        }
    }

    /// Dispatch a pending event, log it and schedule its evaluation.
    /// Returns an alert if the dosing pump rejected the command.
    async fn dispatch_dose(
        &self,
        state: &mut ControllerState,
        mut event: DosingEvent,
        predicted: f64,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let command = ActuatorCommand::Dose {
            kind: event.kind,
            volume_ml: event.volume_ml,
        };
        match self.shared.actuator.dispatch(&command) {
            Ok(()) => {
                self.shared.source.lock().await.on_dose(event.kind, predicted);
                info!(
                    event_id = %event.id,
                    kind = %event.kind,
                    volume_ml = event.volume_ml,
                    pre = event.pre_value,
                    "Dosing"
                );
                let id = event.id;
                state.dosing.push(event);
                self.spawn_resolver(id);
                None
            }
            Err(failure) => {
                warn!(kind = %event.kind, error = %failure, "Dosing pump failed");
                event.fail(failure.to_string(), now);
                state.dosing.push(event);
                Some(Alert::critical(AlertKind::ActuationFailure, failure.to_string()))
            }
        }
    }

    fn spawn_resolver(&self, event_id: Uuid) {
        let controller = self.clone();
        let delay = self.shared.options.dosing_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.resolve_dose(event_id).await;
        });
        let mut tasks = self
            .shared
            .dosing_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn resolve_dose(&self, event_id: Uuid) {
        let resample = {
            let mut source = self.shared.source.lock().await;
            source
                .peek()
                .and_then(|reading| validate_sensor_reading(&reading).map(|_| reading))
        };
        let now = self.shared.clock.now();

        let mut state = self.shared.state.write().await;
        let system_id = state.config.system_id;
        let notify = state.config.automation.notifications;
        let Some(event) = state.dosing.get_mut(event_id) else {
            warn!(event_id = %event_id, "Dosing event evicted before evaluation");
            return;
        };
        if !event.is_pending() {
            return;
        }

        let variable = event.kind.controlled_variable();
        let post_value = match resample {
            Ok(reading) => variable.read(&reading),
            Err(failure) => {
                debug!(event_id = %event_id, error = %failure, "Re-sample failed, using predicted value");
                event.predicted_value
            }
        };
        if event.resolve(post_value, now) {
            info!(event_id = %event_id, kind = %event.kind, post = post_value, "Dose reached target");
            return;
        }

        let description = format!(
            "{} dose of {:.1} mL left {:.2}, target {:.2} ± {:.2}",
            event.kind, event.volume_ml, post_value, event.target, event.tolerance
        );
        warn!(event_id = %event_id, "Dosing efficacy degraded: {description}");
        let alert = Alert::warning(AlertKind::DosingDegraded, description.clone());
        state.push_system_alert(alert, now);
        drop(state);

        if notify {
            self.shared.notifier.notify(&Notification::DosingDegraded {
                system_id,
                event_id,
                description,
            });
        }
    }

    /// Await every outstanding dose evaluation.
    pub async fn wait_for_dosing(&self) {
        let tasks: Vec<_> = self
            .shared
            .dosing_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Dose evaluation task failed");
            }
        }
    }

    /// Dose on request, bypassing the proportional loops but not the limits.
    pub async fn dose_manually(&self, kind: DosingKind, volume_ml: f64) -> ControllerResult<DosingEvent> {
        let now = self.shared.clock.now();
        let mut state = self.shared.state.write().await;
        let config = state.config.clone();

        let limit = per_tick_limit(kind, &config.dosing);
        if !volume_ml.is_finite() || volume_ml <= 0.0 || volume_ml > limit {
            return Err(ControllerError::OutOfRange {
                variable: format!("{kind} volume (max {limit} mL)"),
                value: volume_ml,
            });
        }
        if kind != DosingKind::DilutionWater {
            let used = state.dosing.daily_volume(kind, now);
            if used + volume_ml > config.dosing.max_daily_dose_ml {
                return Err(ControllerError::OutOfRange {
                    variable: format!("{kind} daily volume (max {} mL)", config.dosing.max_daily_dose_ml),
                    value: used + volume_ml,
                });
            }
        }

        let latest = state
            .history
            .latest()
            .map(Measurement::reading)
            .ok_or_else(|| ControllerError::NotFound("no measurement to dose against".to_string()))?;
        let variable = kind.controlled_variable();
        let (target, tolerance) = match variable {
            ControlledVariable::Ph => (config.nutrients.target_ph, config.nutrients.ph_tolerance),
            ControlledVariable::Ec => (config.nutrients.target_ec, config.nutrients.ec_tolerance),
        };
        let pre_value = variable.read(&latest);
        let predicted = predict_post_value(kind, pre_value, volume_ml, config.tank_capacity_liters, &config.dosing);
        let event = DosingEvent::pending(kind, volume_ml, target, tolerance, pre_value, predicted, now);
        let id = event.id;

        if let Some(alert) = self.dispatch_dose(&mut *state, event, predicted, now).await {
            let message = alert.message.clone();
            state.push_system_alert(alert, now);
            return Err(ControllerError::Actuation(ActuationFailure(message)));
        }
        info!(event_id = %id, kind = %kind, volume_ml, "Manual dose requested");
        state
            .dosing
            .get(id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(format!("dosing event {id}")))
    }

    pub async fn status(&self) -> ControllerStatus {
        let running = self.is_running();
        let state = self.shared.state.read().await;
        let latest_measurement = state.history.latest().cloned();
        let active_alerts = latest_measurement
            .iter()
            .flat_map(|m| m.alerts.iter().cloned())
            .chain(state.system_alerts.iter().map(|a| a.alert.clone()))
            .collect();
        let next_maintenance = state
            .maintenance
            .tasks()
            .iter()
            .filter(|t| t.is_outstanding())
            .min_by_key(|t| t.next_due)
            .cloned();
        ControllerStatus {
            system_id: state.config.system_id,
            name: state.config.name.clone(),
            system_type: state.config.system_type,
            running,
            phase: state.cycle.phase(),
            pump_running: state.cycle.pump_running(),
            valves: state.cycle.valves().clone(),
            ticks: state.ticks,
            measurements_recorded: state.history.total_recorded(),
            history_len: state.history.len(),
            pending_doses: state.dosing.pending_count(),
            consecutive_sensor_failures: state.sensor_failures,
            latest_measurement,
            active_alerts,
            recent_dosing: state
                .dosing
                .recent(STATUS_DOSING_EVENTS)
                .into_iter()
                .cloned()
                .collect(),
            next_maintenance,
            system_alerts: state.system_alerts.iter().cloned().collect(),
            config: state.config.clone(),
        }
    }

    pub async fn config(&self) -> SystemConfig {
        self.shared.state.read().await.config.clone()
    }

    pub async fn latest_measurement(&self) -> Option<Measurement> {
        self.shared.state.read().await.history.latest().cloned()
    }

    /// Measurements recorded strictly after `after`, oldest first. With no
    /// cursor only the latest measurement is returned.
    pub async fn measurements_after(&self, after: Option<DateTime<Utc>>) -> Vec<Measurement> {
        let state = self.shared.state.read().await;
        match after {
            Some(after) => state.history.after(after).into_iter().cloned().collect(),
            None => state.history.latest().cloned().into_iter().collect(),
        }
    }

    fn window_start(&self, hours: i64) -> ControllerResult<DateTime<Utc>> {
        let hours = validate_window_hours(hours)?;
        Ok(self.shared.clock.now() - ChronoDuration::hours(hours))
    }

    /// Measurements from the last `hours`, oldest first
    pub async fn recent_measurements(&self, hours: i64) -> ControllerResult<Vec<Measurement>> {
        let cutoff = self.window_start(hours)?;
        let state = self.shared.state.read().await;
        Ok(state.history.since(cutoff).into_iter().cloned().collect())
    }

    /// Dosing events from the last `hours`, oldest first
    pub async fn dosing_history(&self, hours: i64) -> ControllerResult<Vec<DosingEvent>> {
        let cutoff = self.window_start(hours)?;
        let state = self.shared.state.read().await;
        Ok(state.dosing.since(cutoff).into_iter().cloned().collect())
    }

    /// Apply a partial update. On error the current configuration stays.
    pub async fn update_config(&self, update: ConfigUpdate) -> ControllerResult<SystemConfig> {
        let mut state = self.shared.state.write().await;
        let candidate = state.config.merged(&update);
        validate_system_config(&candidate)?;
        state.maintenance.apply_config(&candidate);
        state.config = candidate.clone();
        info!(system_id = %candidate.system_id, "Configuration updated");
        Ok(candidate)
    }

    pub async fn schedule_maintenance(&self, request: MaintenanceRequest) -> ControllerResult<MaintenanceTask> {
        validate_maintenance_request(&request)?;
        let now = self.shared.clock.now();
        Ok(self.shared.state.write().await.maintenance.schedule(request, now))
    }

    pub async fn record_maintenance_completion(
        &self,
        task_id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> ControllerResult<MaintenanceTask> {
        let at = at.unwrap_or_else(|| self.shared.clock.now());
        self.shared
            .state
            .write()
            .await
            .maintenance
            .record_completion(task_id, at)
    }

    pub async fn overdue_maintenance(&self) -> Vec<MaintenanceTask> {
        let now = self.shared.clock.now();
        self.shared.state.read().await.maintenance.overdue(now)
    }

    pub async fn upcoming_maintenance(&self) -> Vec<MaintenanceTask> {
        let now = self.shared.clock.now();
        self.shared.state.read().await.maintenance.upcoming(now)
    }

    /// Root-zone assessment of the latest measurement
    pub async fn analyze_root_zone(&self) -> ControllerResult<RootZoneAssessment> {
        let state = self.shared.state.read().await;
        let recent = state.history.recent(BIOFILM_WINDOW + 1);
        let (latest, window) = recent
            .split_first()
            .ok_or_else(|| ControllerError::NotFound("no measurements recorded yet".to_string()))?;
        Ok(root_zone::assess(&latest.reading(), window))
    }

    pub async fn generate_report(&self, hours: i64) -> ControllerResult<SystemReport> {
        let now = self.shared.clock.now();
        let cutoff = self.window_start(hours)?;
        let state = self.shared.state.read().await;
        Ok(reporting::generate(
            state.config.system_id,
            &state.history.since(cutoff),
            &state.dosing.since(cutoff),
            hours,
            now,
        ))
    }
}

/// N/P/K scale with EC relative to its target
fn estimate_nutrients(reading: &SensorReading, config: &SystemConfig) -> NutrientEstimate {
    let elements = &config.nutrients.elements;
    let ratio = if config.nutrients.target_ec > 0.0 {
        reading.ec / config.nutrients.target_ec
    } else {
        0.0
    };
    NutrientEstimate {
        nitrogen: elements.nitrogen * ratio,
        phosphorus: elements.phosphorus * ratio,
        potassium: elements.potassium * ratio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::MaintenanceKind;
    use crate::models::Severity;
    use crate::ports::ManualClock;
    use crate::profile::ProvisionRequest;
    use crate::sensor::ReplaySource;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct RecordingActuator {
        commands: StdMutex<Vec<ActuatorCommand>>,
        fail_doses: AtomicBool,
        fail_cycle: AtomicBool,
    }

    impl RecordingActuator {
        fn commands(&self) -> Vec<ActuatorCommand> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl ActuatorSink for RecordingActuator {
        fn dispatch(&self, command: &ActuatorCommand) -> Result<(), ActuationFailure> {
            let failing = match command {
                ActuatorCommand::Dose { .. } => &self.fail_doses,
                _ => &self.fail_cycle,
            };
            if failing.load(Ordering::SeqCst) {
                return Err(ActuationFailure("actuator not responding".to_string()));
            }
            self.commands.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: StdMutex<Vec<Notification>>,
    }

    impl NotificationSink for RecordingNotifier {
        fn notify(&self, notification: &Notification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }

    struct Rig {
        controller: Controller,
        actuator: Arc<RecordingActuator>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn rig(system_type: SystemType, source: ReplaySource) -> Rig {
        let config = SystemConfig::provision(ProvisionRequest::new(system_type, 100.0)).unwrap();
        let actuator = Arc::new(RecordingActuator::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let controller = Controller::builder(config, Box::new(source))
            .actuator(actuator.clone())
            .notifier(notifier.clone())
            .clock(clock.clone())
            .options(ControllerOptions {
                tick_interval: Duration::from_millis(10),
                dosing_delay: Duration::from_millis(5),
                ..ControllerOptions::default()
            })
            .build()
            .unwrap();
        Rig {
            controller,
            actuator,
            notifier,
            clock,
        }
    }

    fn reading(ph: f64, ec: f64) -> SensorReading {
        SensorReading {
            ph,
            ec,
            ..SensorReading::nominal()
        }
    }

    #[tokio::test]
    async fn test_in_tolerance_tick_records_measurement() {
        let rig = rig(SystemType::Nft, ReplaySource::from_readings([reading(6.0, 1.8)]));
        let m = assert_ok!(rig.controller.tick().await);
        assert_eq!(m.phase, CyclePhase::Flowing);
        assert!(m.alerts.is_empty());
        assert!(rig.controller.dosing_history(1).await.unwrap().is_empty());
        assert_eq!(rig.controller.recent_measurements(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ph_dose_resolved_by_resample() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(5.6, 1.8), reading(6.0, 1.8)]),
        );
        assert_ok!(rig.controller.tick().await);
        rig.controller.wait_for_dosing().await;

        let events = rig.controller.dosing_history(1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DosingKind::PhUp);
        assert!(events[0].volume_ml > 0.0);
        assert!(events[0].success);
        assert_eq!(events[0].post_value, Some(6.0));
        assert!(rig
            .actuator
            .commands()
            .iter()
            .any(|c| matches!(c, ActuatorCommand::Dose { kind: DosingKind::PhUp, .. })));
    }

    #[tokio::test]
    async fn test_failed_dose_notifies_degraded() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(5.6, 1.8), reading(5.6, 1.8)]),
        );
        assert_ok!(rig.controller.tick().await);
        rig.controller.wait_for_dosing().await;

        let events = rig.controller.dosing_history(1).await.unwrap();
        assert!(!events[0].success);
        let sent = rig.notifier.sent.lock().unwrap();
        assert!(sent
            .iter()
            .any(|n| matches!(n, Notification::DosingDegraded { .. })));
    }

    #[tokio::test]
    async fn test_resample_failure_uses_prediction() {
        let (source, feed) = ReplaySource::channel();
        feed.push(reading(5.6, 1.8));
        feed.push_failure("probe timeout");
        let rig = rig(SystemType::Nft, source);
        assert_ok!(rig.controller.tick().await);
        rig.controller.wait_for_dosing().await;

        let events = rig.controller.dosing_history(1).await.unwrap();
        assert!(events[0].success);
        assert_eq!(events[0].post_value, Some(events[0].predicted_value));
    }

    #[tokio::test]
    async fn test_dispatch_failure_records_failed_event() {
        let rig = rig(SystemType::Nft, ReplaySource::from_readings([reading(5.6, 1.8)]));
        rig.actuator.fail_doses.store(true, Ordering::SeqCst);
        let m = assert_ok!(rig.controller.tick().await);

        assert!(m.has_alert_kind(AlertKind::ActuationFailure));
        let events = rig.controller.dosing_history(1).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_pending());
        assert!(!events[0].success);
    }

    #[tokio::test]
    async fn test_sensor_failures_escalate() {
        let (source, feed) = ReplaySource::channel();
        for _ in 0..3 {
            feed.push_failure("no response");
        }
        let rig = rig(SystemType::Nft, source);
        for _ in 0..3 {
            assert_err!(rig.controller.tick().await);
        }

        let status = rig.controller.status().await;
        assert_eq!(status.consecutive_sensor_failures, 3);
        assert_eq!(status.history_len, 0);
        let last = status.system_alerts.last().unwrap();
        assert_eq!(last.alert.kind, AlertKind::SensorFailure);
        assert_eq!(last.alert.severity, Severity::Critical);
        assert_eq!(status.system_alerts[0].alert.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_timestamps_strictly_increase_with_frozen_clock() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        for _ in 0..5 {
            assert_ok!(rig.controller.tick().await);
        }
        let history = rig.controller.recent_measurements(1).await.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_invalid_config_update_keeps_previous() {
        let rig = rig(SystemType::Nft, ReplaySource::channel().0);
        let before = rig.controller.config().await;

        let mut monitoring = before.monitoring.clone();
        monitoring.ph_min = 7.0;
        monitoring.ph_max = 6.0;
        let update = ConfigUpdate {
            monitoring: Some(monitoring),
            ..ConfigUpdate::default()
        };
        let err = rig.controller.update_config(update).await.unwrap_err();
        assert!(matches!(err, ControllerError::Configuration(_)));
        assert_eq!(rig.controller.config().await, before);

        let update = ConfigUpdate {
            name: Some("Bench 4".to_string()),
            ..ConfigUpdate::default()
        };
        assert_eq!(assert_ok!(rig.controller.update_config(update).await).name, "Bench 4");
    }

    #[tokio::test]
    async fn test_manual_dose_limits() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        let err = rig.controller.dose_manually(DosingKind::CalMag, 5.0).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));

        assert_ok!(rig.controller.tick().await);
        let err = rig.controller.dose_manually(DosingKind::CalMag, 500.0).await.unwrap_err();
        assert!(matches!(err, ControllerError::OutOfRange { .. }));

        let event = assert_ok!(rig.controller.dose_manually(DosingKind::CalMag, 5.0).await);
        assert!(event.is_pending());
        assert!(event.predicted_value > event.pre_value);
        rig.controller.wait_for_dosing().await;
        assert_eq!(rig.controller.dosing_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_reminder_sent_once() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        assert_ok!(
            rig.controller
                .schedule_maintenance(MaintenanceRequest::new(MaintenanceKind::Inspection))
                .await
        );
        rig.clock.advance(ChronoDuration::days(8));
        assert_eq!(rig.controller.overdue_maintenance().await.len(), 1);

        let first = assert_ok!(rig.controller.tick().await);
        let second = assert_ok!(rig.controller.tick().await);
        assert!(first.has_alert_kind(AlertKind::MaintenanceOverdue));
        assert!(!second.has_alert_kind(AlertKind::MaintenanceOverdue));
        let reminders = rig
            .notifier
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Notification::MaintenanceDue { .. }))
            .count();
        assert_eq!(reminders, 1);
    }

    #[tokio::test]
    async fn test_root_zone_and_report() {
        let rig = rig(
            SystemType::DeepWaterCulture,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        assert_err!(rig.controller.analyze_root_zone().await);
        for _ in 0..3 {
            assert_ok!(rig.controller.tick().await);
            rig.clock.advance(ChronoDuration::minutes(2));
        }
        let assessment = assert_ok!(rig.controller.analyze_root_zone().await);
        assert_eq!(assessment.score, 100);

        let report = rig.controller.generate_report(1).await.unwrap();
        assert_eq!(report.measurement_count, 3);
        assert_eq!(report.efficiency_score, 100.0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        assert!(rig.controller.start());
        assert!(!rig.controller.start());
        assert!(rig.controller.is_running());
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(rig.controller.stop().await);
        assert!(!rig.controller.stop().await);
        assert!(!rig.controller.is_running());

        let recorded = rig.controller.status().await.measurements_recorded;
        assert!(recorded >= 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rig.controller.status().await.measurements_recorded, recorded);
    }

    #[tokio::test]
    async fn test_status_reports_recent_activity() {
        let (source, feed) = ReplaySource::channel();
        feed.push(reading(5.0, 1.8));
        feed.push(reading(6.0, 1.8));
        feed.push_failure("probe unplugged");
        let rig = rig(SystemType::Nft, source);

        let empty = rig.controller.status().await;
        assert!(empty.latest_measurement.is_none());
        assert!(empty.active_alerts.is_empty());
        assert!(empty.recent_dosing.is_empty());
        assert!(empty.next_maintenance.is_none());

        let cleaning = assert_ok!(
            rig.controller
                .schedule_maintenance(MaintenanceRequest::new(MaintenanceKind::Cleaning))
                .await
        );
        let inspection = assert_ok!(
            rig.controller
                .schedule_maintenance(MaintenanceRequest::new(MaintenanceKind::Inspection))
                .await
        );
        assert!(inspection.next_due < cleaning.next_due);

        let measurement = assert_ok!(rig.controller.tick().await);
        rig.controller.wait_for_dosing().await;
        rig.clock.advance(ChronoDuration::minutes(2));
        assert_ok!(rig.controller.tick().await);
        assert_err!(rig.controller.tick().await);

        let status = rig.controller.status().await;
        assert_eq!(status.latest_measurement.as_ref().map(|m| m.ph), Some(6.0));
        assert_ne!(status.latest_measurement.as_ref().map(|m| m.id), Some(measurement.id));
        assert_eq!(status.recent_dosing.len(), 1);
        assert_eq!(status.recent_dosing[0].kind, DosingKind::PhUp);
        assert_eq!(status.next_maintenance.map(|t| t.id), Some(inspection.id));
        assert!(status
            .active_alerts
            .iter()
            .any(|a| a.kind == AlertKind::SensorFailure));
    }

    #[tokio::test]
    async fn test_window_out_of_range_is_rejected() {
        let rig = rig(SystemType::Nft, ReplaySource::channel().0);
        let err = rig.controller.recent_measurements(i64::MAX).await.unwrap_err();
        assert!(matches!(err, ControllerError::OutOfRange { .. }));
        assert_err!(rig.controller.dosing_history(0).await);
        assert_err!(rig.controller.generate_report(-3).await);
        assert_ok!(rig.controller.generate_report(24).await);
    }

    #[tokio::test]
    async fn test_failed_cycle_command_leaves_state() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        rig.actuator.fail_cycle.store(true, Ordering::SeqCst);
        let m = assert_ok!(rig.controller.tick().await);
        assert!(m.has_alert_kind(AlertKind::ActuationFailure));
        assert!(!m.pump_running);
        assert!(!rig.controller.status().await.pump_running);

        rig.actuator.fail_cycle.store(false, Ordering::SeqCst);
        let m = assert_ok!(rig.controller.tick().await);
        assert!(m.pump_running);
        assert!(rig.controller.status().await.pump_running);
    }

    #[tokio::test]
    async fn test_measurements_after_cursor() {
        let rig = rig(
            SystemType::Nft,
            ReplaySource::from_readings([reading(6.0, 1.8)]).holding_last(),
        );
        assert!(rig.controller.measurements_after(None).await.is_empty());

        let first = assert_ok!(rig.controller.tick().await);
        let second = assert_ok!(rig.controller.tick().await);
        let third = assert_ok!(rig.controller.tick().await);

        let latest = rig.controller.measurements_after(None).await;
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, third.id);

        let newer = rig.controller.measurements_after(Some(first.timestamp)).await;
        let ids: Vec<_> = newer.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, third.id]);
        assert!(rig
            .controller
            .measurements_after(Some(third.timestamp))
            .await
            .is_empty());
    }
}
