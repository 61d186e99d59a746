//! Maintenance scheduler
//!
//! A recurrence calendar: every task is anchored on a date and falls due one
//! interval later. Completing a task re-anchors it on the completion date.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ControllerError, ControllerResult};
use crate::system::{CycleSettings, SystemConfig};

/// Look-ahead for `upcoming`
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceKind {
    Cleaning,
    Calibration,
    WaterChange,
    FilterChange,
    Inspection,
}

impl MaintenanceKind {
    pub fn default_interval_days(&self) -> i64 {
        match self {
            Self::Cleaning => 14,
            Self::Calibration => 30,
            Self::WaterChange => 7,
            Self::FilterChange => 90,
            Self::Inspection => 7,
        }
    }
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cleaning => "cleaning",
            Self::Calibration => "calibration",
            Self::WaterChange => "water change",
            Self::FilterChange => "filter change",
            Self::Inspection => "inspection",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    pub id: Uuid,
    pub kind: MaintenanceKind,
    pub scheduled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_due: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MaintenanceTask {
    /// Not yet done for the current due date
    pub fn is_outstanding(&self) -> bool {
        self.completed_at.map_or(true, |done| done < self.next_due)
    }
}

/// Request to put a task on the calendar
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MaintenanceRequest {
    pub kind: MaintenanceKind,
    /// Anchor date; defaults to now
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,
}

impl MaintenanceRequest {
    pub fn new(kind: MaintenanceKind) -> Self {
        Self {
            kind,
            scheduled_at: None,
            notes: None,
        }
    }
}

#[derive(Debug)]
pub struct MaintenanceScheduler {
    tasks: Vec<MaintenanceTask>,
    water_change_days: i64,
    /// Tasks already reported overdue
    reminded: HashSet<Uuid>,
}

impl Default for MaintenanceScheduler {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            water_change_days: MaintenanceKind::WaterChange.default_interval_days(),
            reminded: HashSet::new(),
        }
    }
}

impl MaintenanceScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler using the system's own water-change interval where it has one.
    pub fn for_system(config: &SystemConfig) -> Self {
        let mut scheduler = Self::default();
        scheduler.apply_config(config);
        scheduler
    }

    pub fn apply_config(&mut self, config: &SystemConfig) {
        if let CycleSettings::DeepWaterCulture {
            water_change_interval_days,
            ..
        } = config.cycle
        {
            self.water_change_days = i64::from(water_change_interval_days.max(1));
        }
    }

    pub fn interval(&self, kind: MaintenanceKind) -> Duration {
        match kind {
            MaintenanceKind::WaterChange => Duration::days(self.water_change_days),
            other => Duration::days(other.default_interval_days()),
        }
    }

    pub fn schedule(&mut self, request: MaintenanceRequest, now: DateTime<Utc>) -> MaintenanceTask {
        let scheduled_at = request.scheduled_at.unwrap_or(now);
        let task = MaintenanceTask {
            id: Uuid::new_v4(),
            kind: request.kind,
            scheduled_at,
            completed_at: None,
            next_due: scheduled_at + self.interval(request.kind),
            notes: request.notes,
        };
        info!(task_id = %task.id, kind = %task.kind, next_due = %task.next_due, "Maintenance scheduled");
        self.tasks.push(task.clone());
        task
    }

    pub fn record_completion(&mut self, id: Uuid, at: DateTime<Utc>) -> ControllerResult<MaintenanceTask> {
        let interval = {
            let kind = self
                .tasks
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.kind)
                .ok_or_else(|| ControllerError::NotFound(format!("maintenance task {id}")))?;
            self.interval(kind)
        };
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ControllerError::NotFound(format!("maintenance task {id}")))?;

        task.completed_at = Some(at);
        task.scheduled_at = at;
        task.next_due = at + interval;
        self.reminded.remove(&id);
        info!(task_id = %id, kind = %task.kind, next_due = %task.next_due, "Maintenance completed");
        Ok(task.clone())
    }

    /// Outstanding tasks whose due date has passed, most overdue first
    pub fn overdue(&self, now: DateTime<Utc>) -> Vec<MaintenanceTask> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.is_outstanding() && t.next_due < now)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.next_due);
        tasks
    }

    /// Outstanding tasks falling due within the next week, soonest first
    pub fn upcoming(&self, now: DateTime<Utc>) -> Vec<MaintenanceTask> {
        let horizon = now + Duration::days(UPCOMING_WINDOW_DAYS);
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| t.is_outstanding() && t.next_due >= now && t.next_due <= horizon)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.next_due);
        tasks
    }

    /// Overdue tasks not yet reported. Each task is returned once per due date.
    pub fn take_reminders(&mut self, now: DateTime<Utc>) -> Vec<MaintenanceTask> {
        let due: Vec<_> = self
            .overdue(now)
            .into_iter()
            .filter(|t| !self.reminded.contains(&t.id))
            .collect();
        self.reminded.extend(due.iter().map(|t| t.id));
        due
    }

    pub fn tasks(&self) -> &[MaintenanceTask] {
        &self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProvisionRequest;
    use crate::system::SystemType;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn request(kind: MaintenanceKind, at: DateTime<Utc>) -> MaintenanceRequest {
        MaintenanceRequest {
            kind,
            scheduled_at: Some(at),
            notes: None,
        }
    }

    #[test]
    fn test_next_due_from_interval() {
        let mut scheduler = MaintenanceScheduler::new();
        let task = scheduler.schedule(request(MaintenanceKind::Calibration, start()), start());
        assert_eq!(task.next_due, start() + Duration::days(30));
        assert!(task.next_due > task.scheduled_at);
    }

    #[test]
    fn test_overdue_and_upcoming() {
        let mut scheduler = MaintenanceScheduler::new();
        let cleaning = scheduler.schedule(request(MaintenanceKind::Cleaning, start()), start());
        scheduler.schedule(request(MaintenanceKind::FilterChange, start()), start());

        let now = start() + Duration::days(10);
        assert!(scheduler.overdue(now).is_empty());
        let upcoming = scheduler.upcoming(now);
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].id, cleaning.id);

        let later = start() + Duration::days(15);
        let overdue = scheduler.overdue(later);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].kind, MaintenanceKind::Cleaning);
    }

    #[test]
    fn test_completion_reanchors() {
        let mut scheduler = MaintenanceScheduler::new();
        let task = scheduler.schedule(request(MaintenanceKind::Inspection, start()), start());
        let done_at = start() + Duration::days(9);
        assert_eq!(scheduler.overdue(done_at).len(), 1);

        let updated = scheduler.record_completion(task.id, done_at).unwrap();
        assert_eq!(updated.next_due, done_at + Duration::days(7));
        assert!(scheduler.overdue(done_at + Duration::days(1)).is_empty());
        assert_eq!(scheduler.overdue(done_at + Duration::days(8)).len(), 1);
    }

    #[test]
    fn test_unknown_task_completion() {
        let mut scheduler = MaintenanceScheduler::new();
        let err = scheduler.record_completion(Uuid::new_v4(), start()).unwrap_err();
        assert!(matches!(err, ControllerError::NotFound(_)));
    }

    #[test]
    fn test_reminders_sent_once() {
        let mut scheduler = MaintenanceScheduler::new();
        let task = scheduler.schedule(request(MaintenanceKind::WaterChange, start()), start());
        let now = start() + Duration::days(8);
        assert_eq!(scheduler.take_reminders(now).len(), 1);
        assert!(scheduler.take_reminders(now + Duration::hours(1)).is_empty());

        scheduler.record_completion(task.id, now).unwrap();
        assert_eq!(scheduler.take_reminders(now + Duration::days(8)).len(), 1);
    }

    #[test]
    fn test_dwc_water_change_interval() {
        let mut req = ProvisionRequest::new(SystemType::DeepWaterCulture, 200.0);
        req.cycle = Some(crate::profile::CycleTuning {
            water_change_interval_days: Some(21),
            ..Default::default()
        });
        let config = SystemConfig::provision(req).unwrap();
        let scheduler = MaintenanceScheduler::for_system(&config);
        assert_eq!(scheduler.interval(MaintenanceKind::WaterChange), Duration::days(21));
        assert_eq!(
            MaintenanceScheduler::new().interval(MaintenanceKind::WaterChange),
            Duration::days(7)
        );
    }
}
