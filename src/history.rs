//! In-memory history buffers
//!
//! The measurement history is append-only and time-ordered; it is the only
//! source of truth for trend and stability analysis. The dosing log is
//! append-only too, except that pending events are resolved in place.

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ControlledVariable, DosingEvent, DosingKind, Measurement};

/// Default hard cap on stored measurements (7 days at 2 minute ticks)
pub const DEFAULT_CAPACITY: usize = 5040;

/// Bounded, strictly time-ordered measurement buffer
#[derive(Debug)]
pub struct MeasurementHistory {
    /// Circular buffer of measurements
    measurements: VecDeque<Measurement>,
    retention: Duration,
    capacity: usize,
    /// Total measurements ever recorded
    total_recorded: u64,
}

impl MeasurementHistory {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            measurements: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            retention,
            capacity,
            total_recorded: 0,
        }
    }

    /// Earliest timestamp the next measurement may carry.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.measurements.back() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::milliseconds(1),
            _ => now,
        }
    }

    /// Append a measurement, evicting entries outside the retention window.
    /// Returns false (and drops the measurement) if it would break ordering.
    pub fn push(&mut self, measurement: Measurement) -> bool {
        if let Some(last) = self.measurements.back() {
            if measurement.timestamp <= last.timestamp {
                warn!(
                    measurement_id = %measurement.id,
                    last = %last.timestamp,
                    rejected = %measurement.timestamp,
                    "Rejected out-of-order measurement"
                );
                return false;
            }
        }

        let cutoff = measurement.timestamp - self.retention;
        while self
            .measurements
            .front()
            .is_some_and(|m| m.timestamp < cutoff)
        {
            self.measurements.pop_front();
        }
        if self.measurements.len() >= self.capacity {
            self.measurements.pop_front();
        }

        self.total_recorded += 1;
        debug!(
            measurement_id = %measurement.id,
            total = self.total_recorded,
            "Appending measurement to history"
        );
        self.measurements.push_back(measurement);
        true
    }

    pub fn latest(&self) -> Option<&Measurement> {
        self.measurements.back()
    }

    /// Get the last N measurements, newest first
    pub fn recent(&self, count: usize) -> Vec<&Measurement> {
        self.measurements.iter().rev().take(count).collect()
    }

    /// Measurements strictly newer than `after`, oldest first
    pub fn after(&self, after: DateTime<Utc>) -> Vec<&Measurement> {
        let start = self.measurements.partition_point(|m| m.timestamp <= after);
        self.measurements.range(start..).collect()
    }

    /// Measurements at or after `cutoff`, oldest first
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<&Measurement> {
        self.measurements
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}

/// Dosing log capacity
const MAX_DOSING_EVENTS: usize = 2000;

/// Append-only dosing record with in-place resolution
#[derive(Debug, Default)]
pub struct DosingLog {
    events: VecDeque<DosingEvent>,
}

impl DosingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DosingEvent) {
        if self.events.len() >= MAX_DOSING_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut DosingEvent> {
        self.events.iter_mut().rev().find(|e| e.id == id)
    }

    pub fn get(&self, id: Uuid) -> Option<&DosingEvent> {
        self.events.iter().rev().find(|e| e.id == id)
    }

    /// Events at or after `cutoff`, oldest first
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<&DosingEvent> {
        self.events.iter().filter(|e| e.timestamp >= cutoff).collect()
    }

    /// Last N events, newest first
    pub fn recent(&self, count: usize) -> Vec<&DosingEvent> {
        self.events.iter().rev().take(count).collect()
    }

    pub fn has_pending(&self, variable: ControlledVariable) -> bool {
        self.events
            .iter()
            .any(|e| e.is_pending() && e.kind.controlled_variable() == variable)
    }

    pub fn pending_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_pending()).count()
    }

    /// Volume dosed for one kind over the 24 h before `now`
    pub fn daily_volume(&self, kind: DosingKind, now: DateTime<Utc>) -> f64 {
        let cutoff = now - Duration::hours(24);
        self.events
            .iter()
            .filter(|e| e.kind == kind && e.timestamp > cutoff)
            .map(|e| e.volume_ml)
            .sum()
    }

    /// Consecutive failed, resolved events for one variable, newest first
    pub fn consecutive_failures(&self, variable: ControlledVariable) -> u32 {
        let mut count = 0;
        for event in self
            .events
            .iter()
            .rev()
            .filter(|e| e.kind.controlled_variable() == variable && !e.is_pending())
        {
            if event.success {
                break;
            }
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
