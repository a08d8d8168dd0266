//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Per-vehicle soft state and forward throttling."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::{Duration, Instant};

use apex_codec::{TelemetryReading, VehicleId};
use apex_common::ForwardGranularity;
use apex_compliance::{ComplianceStatus, ComplianceVerdict};
use parking_lot::Mutex;

/// Soft state kept for every vehicle seen since startup.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSession {
    /// When the first reading from this vehicle was observed.
    pub first_seen: Instant,
    /// Newest sender timestamp accepted into the session.
    pub latest_timestamp: f64,
    /// Status of the newest accepted reading.
    pub last_status: ComplianceStatus,
    /// Last time an event for this vehicle was forwarded.
    pub last_forward: Option<Instant>,
    /// Accepted (non-stale) readings.
    pub readings: u64,
    /// Accepted readings whose status was not LEGAL.
    pub alerts: u64,
    /// Readings older than `latest_timestamp`.
    pub stale_readings: u64,
}

/// Whether a reading should be sent to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Send it.
    Forward,
    /// LEGAL reading inside the minimum forward interval.
    Throttled,
    /// LEGAL reading older than the session's newest reading.
    StaleDiscarded,
}

impl ForwardDecision {
    /// Whether the reading goes to the collector.
    pub fn should_forward(&self) -> bool {
        matches!(self, ForwardDecision::Forward)
    }
}

/// A change of compliance status for one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    /// Previous status, `None` for the first reading of a vehicle.
    pub from: Option<ComplianceStatus>,
    /// New status.
    pub to: ComplianceStatus,
}

/// Everything the worker needs to know after recording a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Forwarding verdict, already stamped when it is [`ForwardDecision::Forward`].
    pub decision: ForwardDecision,
    /// Set when the accepted reading changed the vehicle's status.
    pub transition: Option<StatusTransition>,
    /// The reading was older than the newest one and left the session untouched.
    pub stale: bool,
    /// This reading created the session.
    pub new_vehicle: bool,
}

#[derive(Debug, Default)]
struct TableState {
    sessions: HashMap<VehicleId, VehicleSession>,
    last_forward: Option<Instant>,
}

/// Shared session table. One coarse lock covers both the sessions and the
/// forward stamps so concurrent workers never double-forward inside an interval.
#[derive(Debug)]
pub struct SessionTable {
    forward_interval: Duration,
    granularity: ForwardGranularity,
    state: Mutex<TableState>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new(forward_interval: Duration, granularity: ForwardGranularity) -> Self {
        Self {
            forward_interval,
            granularity,
            state: Mutex::new(TableState::default()),
        }
    }

    /// Record a reading and decide whether it is forwarded.
    pub fn observe(
        &self,
        reading: &TelemetryReading,
        verdict: &ComplianceVerdict,
        now: Instant,
    ) -> Observation {
        let mut guard = self.state.lock();
        let TableState {
            sessions,
            last_forward,
        } = &mut *guard;

        let status = verdict.status;
        let mut new_vehicle = false;
        let session = sessions
            .entry(reading.vehicle_id.clone())
            .or_insert_with(|| {
                new_vehicle = true;
                VehicleSession {
                    first_seen: now,
                    latest_timestamp: f64::NEG_INFINITY,
                    last_status: status,
                    last_forward: None,
                    readings: 0,
                    alerts: 0,
                    stale_readings: 0,
                }
            });

        if reading.timestamp < session.latest_timestamp {
            session.stale_readings += 1;
            let decision = if status.is_alert() {
                stamp(session, last_forward, now);
                ForwardDecision::Forward
            } else {
                ForwardDecision::StaleDiscarded
            };
            return Observation {
                decision,
                transition: None,
                stale: true,
                new_vehicle,
            };
        }

        let transition = if new_vehicle {
            Some(StatusTransition {
                from: None,
                to: status,
            })
        } else if session.last_status != status {
            Some(StatusTransition {
                from: Some(session.last_status),
                to: status,
            })
        } else {
            None
        };

        session.latest_timestamp = reading.timestamp;
        session.last_status = status;
        session.readings += 1;
        if status.is_alert() {
            session.alerts += 1;
        }

        let reference = match self.granularity {
            ForwardGranularity::Global => *last_forward,
            ForwardGranularity::PerVehicle => session.last_forward,
        };
        let decision = if status.is_alert() || self.interval_elapsed(reference, now) {
            stamp(session, last_forward, now);
            ForwardDecision::Forward
        } else {
            ForwardDecision::Throttled
        };

        Observation {
            decision,
            transition,
            stale: false,
            new_vehicle,
        }
    }

    fn interval_elapsed(&self, reference: Option<Instant>, now: Instant) -> bool {
        match reference {
            None => true,
            Some(_) if self.forward_interval.is_zero() => true,
            Some(last) => now.saturating_duration_since(last) > self.forward_interval,
        }
    }

    /// Copy of one vehicle's session.
    pub fn session(&self, vehicle_id: &VehicleId) -> Option<VehicleSession> {
        self.state.lock().sessions.get(vehicle_id).cloned()
    }

    /// Number of vehicles seen.
    pub fn len(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether no vehicle has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.state.lock().sessions.is_empty()
    }

    /// Identifiers of every known vehicle, sorted.
    pub fn vehicles(&self) -> Vec<VehicleId> {
        let mut ids: Vec<VehicleId> = self.state.lock().sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn stamp(session: &mut VehicleSession, global: &mut Option<Instant>, now: Instant) {
    session.last_forward = Some(now);
    *global = Some(now);
}
