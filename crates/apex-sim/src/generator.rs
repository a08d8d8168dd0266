//! ---
//! apex_section: "06-simulation"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Seeded head-to-head telemetry generator."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use apex_codec::{TelemetryReading, VehicleId};
use apex_common::time::epoch_seconds_now;
use rand::prelude::*;
use rand_distr::Normal;

/// Samples per simulated second.
pub const TICK_HZ: u32 = 60;
/// Car that develops the thermal anomaly.
pub const LEAD_CAR: &str = "CAR_1";
/// Baseline car.
pub const CONTROL_CAR: &str = "CAR_81";

const START_TEMP_C: f64 = 90.0;
const LEAD_TEMP_CEILING_C: f64 = 115.0;
const LEAD_TEMP_STEP_C: f64 = 0.08;
const CONTROL_TEMP_CEILING_C: f64 = 98.0;
const CONTROL_TEMP_STEP_C: f64 = 0.02;
const ANOMALY_TEMP_C: f64 = 105.0;
const THROTTLE_GATE: f64 = 0.4;

/// Gaussian sensor noise added to speed and ride height. Vertical velocity is left clean
/// so compliance verdicts depend only on the scenario.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioNoise {
    /// Standard deviation of speed noise in km/h.
    pub speed_kph: f64,
    /// Standard deviation of ride height noise in millimeters.
    pub ride_height_mm: f64,
}

impl Default for ScenarioNoise {
    fn default() -> Self {
        Self {
            speed_kph: 0.5,
            ride_height_mm: 0.2,
        }
    }
}

/// Deterministic two-car generator. Identical seeds yield identical streams.
#[derive(Debug)]
pub struct HeadToHead {
    rng: StdRng,
    speed_noise: Normal<f64>,
    ride_height_noise: Normal<f64>,
    start_epoch: f64,
    tick: u64,
    lead_temp_c: f64,
    control_temp_c: f64,
    lead: VehicleId,
    control: VehicleId,
}

impl HeadToHead {
    /// Generator with default noise, timestamps starting at `start_epoch`.
    pub fn new(seed: u64, start_epoch: f64) -> Result<Self> {
        Self::with_noise(seed, start_epoch, ScenarioNoise::default())
    }

    /// Generator with default noise whose timestamps start at the current wall clock.
    pub fn starting_now(seed: u64) -> Result<Self> {
        Self::new(seed, epoch_seconds_now())
    }

    /// Generator with explicit noise levels.
    pub fn with_noise(seed: u64, start_epoch: f64, noise: ScenarioNoise) -> Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            speed_noise: Normal::new(0.0, noise.speed_kph)
                .context("speed noise sigma must be finite and non-negative")?,
            ride_height_noise: Normal::new(0.0, noise.ride_height_mm)
                .context("ride height noise sigma must be finite and non-negative")?,
            start_epoch,
            tick: 0,
            lead_temp_c: START_TEMP_C,
            control_temp_c: START_TEMP_C,
            lead: VehicleId::new(LEAD_CAR).context("lead car id")?,
            control: VehicleId::new(CONTROL_CAR).context("control car id")?,
        })
    }

    /// Simulated seconds since the start.
    pub fn elapsed(&self) -> f64 {
        self.tick as f64 / f64::from(TICK_HZ)
    }

    /// Whether the lead car is hot and under hard acceleration at the current tick.
    pub fn torque_anomaly_active(&self) -> bool {
        self.lead_temp_c > ANOMALY_TEMP_C && (self.elapsed() * 1.5).sin() > THROTTLE_GATE
    }

    /// Advance one tick and return `[lead, control]` readings sharing a timestamp.
    pub fn next_tick(&mut self) -> [TelemetryReading; 2] {
        if self.lead_temp_c < LEAD_TEMP_CEILING_C {
            self.lead_temp_c += LEAD_TEMP_STEP_C;
        }
        if self.control_temp_c < CONTROL_TEMP_CEILING_C {
            self.control_temp_c += CONTROL_TEMP_STEP_C;
        }

        let t = self.elapsed();
        let timestamp = self.start_epoch + t;
        let baseline_rh_mm = 30.0 + 5.0 * (t * 2.0).sin();

        let (lead_vz, lead_rh_mm) = if self.torque_anomaly_active() {
            ((t * 20.0).sin() * 1.8, baseline_rh_mm - 2.5)
        } else {
            (0.3, baseline_rh_mm)
        };

        let lead = TelemetryReading {
            timestamp,
            vehicle_id: self.lead.clone(),
            speed_kph: (320.0 + t.sin() * 10.0 + self.speed_sample()) as f32,
            ride_height_m: ((lead_rh_mm + self.ride_height_sample()) / 1000.0) as f32,
            vertical_velocity: lead_vz as f32,
            engine_temp_c: self.lead_temp_c as f32,
        };
        let control = TelemetryReading {
            timestamp,
            vehicle_id: self.control.clone(),
            speed_kph: (322.0 + t.sin() * 10.0 + self.speed_sample()) as f32,
            ride_height_m: ((baseline_rh_mm + self.ride_height_sample()) / 1000.0) as f32,
            vertical_velocity: 0.25,
            engine_temp_c: self.control_temp_c as f32,
        };

        self.tick += 1;
        [lead, control]
    }

    /// Generate `ticks` ticks, flattened in send order.
    pub fn take_ticks(&mut self, ticks: usize) -> Vec<TelemetryReading> {
        (0..ticks).flat_map(|_| self.next_tick()).collect()
    }

    fn speed_sample(&mut self) -> f64 {
        self.speed_noise.sample(&mut self.rng)
    }

    fn ride_height_sample(&mut self) -> f64 {
        self.ride_height_noise.sample(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use apex_compliance::{evaluate, ComplianceLimits, ComplianceStatus};

    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let a = HeadToHead::new(7, 1_000.0).unwrap().take_ticks(120);
        let b = HeadToHead::new(7, 1_000.0).unwrap().take_ticks(120);
        assert_eq!(a, b);
        let c = HeadToHead::new(8, 1_000.0).unwrap().take_ticks(120);
        assert_ne!(a, c);
    }

    #[test]
    fn ticks_advance_at_sixty_hertz() {
        let mut sim = HeadToHead::new(1, 0.0).unwrap();
        let [first, _] = sim.next_tick();
        let [second, _] = sim.next_tick();
        assert!((second.timestamp - first.timestamp - 1.0 / 60.0).abs() < 1e-9);
        assert_eq!(first.vehicle_id.as_str(), LEAD_CAR);
    }

    #[test]
    fn lead_car_squats_once_hot_and_control_stays_legal() {
        let limits = ComplianceLimits::default();
        let mut sim = HeadToHead::new(42, 0.0).unwrap();
        let readings = sim.take_ticks(600);

        let (lead, control): (Vec<_>, Vec<_>) = readings
            .iter()
            .partition(|r| r.vehicle_id.as_str() == LEAD_CAR);

        assert!(lead
            .iter()
            .any(|r| evaluate(r, &limits).status == ComplianceStatus::CriticalThermalSquat));
        assert!(control
            .iter()
            .all(|r| evaluate(r, &limits).status == ComplianceStatus::Legal));
        assert!(control.iter().all(|r| r.engine_temp_c <= 98.1));
        assert!(lead
            .iter()
            .filter(|r| r.engine_temp_c <= 105.0)
            .all(|r| evaluate(r, &limits).status == ComplianceStatus::Legal));
    }

    #[test]
    fn ride_height_is_carried_in_meters() {
        let mut sim = HeadToHead::with_noise(
            3,
            0.0,
            ScenarioNoise {
                speed_kph: 0.0,
                ride_height_mm: 0.0,
            },
        )
        .unwrap();
        let [_, control] = sim.next_tick();
        assert!((control.ride_height_m - 0.030).abs() < 1e-6);
        assert!((control.ride_height_mm() - 30.0).abs() < 1e-3);
    }
}
