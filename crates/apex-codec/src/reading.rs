//! ---
//! apex_section: "02-packet-codec"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Decoded telemetry reading."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::VehicleId;

/// One decoded telemetry sample. Every float field is finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Sender clock, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Reporting vehicle.
    pub vehicle_id: VehicleId,
    /// Ground speed in km/h.
    pub speed_kph: f32,
    /// Ride height in meters.
    pub ride_height_m: f32,
    /// Vertical velocity of the chassis in m/s. Negative values are valid.
    pub vertical_velocity: f32,
    /// Engine temperature in °C.
    pub engine_temp_c: f32,
}

impl TelemetryReading {
    /// Ride height converted to millimeters.
    pub fn ride_height_mm(&self) -> f64 {
        f64::from(self.ride_height_m) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ride_height_converts_to_millimeters() {
        let reading = TelemetryReading {
            timestamp: 0.0,
            vehicle_id: VehicleId::new("CAR_1").unwrap(),
            speed_kph: 0.0,
            ride_height_m: 0.03,
            vertical_velocity: 0.0,
            engine_temp_c: 0.0,
        };
        assert!((reading.ride_height_mm() - 30.0).abs() < 1e-3);
    }
}
