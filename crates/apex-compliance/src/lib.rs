//! ---
//! apex_section: "03-compliance-engine"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Energy and compliance classification for decoded telemetry."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
//! Pure compliance rules for vertical oscillation ("porpoising").
//!
//! A reading is reduced to the kinetic energy of its vertical velocity and the
//! thermal mode implied by its engine temperature. The two signals together
//! determine the [`ComplianceStatus`]. Nothing in this crate holds state; the
//! same reading and limits always produce the same verdict.
#![warn(missing_docs)]

pub mod limits;
pub mod verdict;

pub use limits::{
    ComplianceLimits, InvalidLimits, DEFAULT_STANDARD_ENERGY_LIMIT_J, DEFAULT_THERMAL_ENERGY_LIMIT_J,
    DEFAULT_THERMAL_THRESHOLD_C, DEFAULT_VEHICLE_MASS_KG,
};
pub use verdict::{ComplianceStatus, ComplianceVerdict, ThermalMode};

use apex_codec::TelemetryReading;

/// Kinetic energy of the vertical motion, `0.5 * m * v^2`.
///
/// A NaN result (non-finite velocity) is reported as `+inf` so the value is
/// never negative and always lands above any configured limit.
pub fn vertical_energy(vehicle_mass_kg: f64, vertical_velocity: f64) -> f64 {
    let energy = 0.5 * vehicle_mass_kg * vertical_velocity * vertical_velocity;
    if energy.is_nan() {
        f64::INFINITY
    } else {
        energy
    }
}

/// Derive the thermal mode for an engine temperature.
///
/// The threshold is exclusive: a temperature exactly at the threshold stays
/// [`ThermalMode::Standard`].
pub fn thermal_mode(engine_temp_c: f64, limits: &ComplianceLimits) -> ThermalMode {
    if engine_temp_c > limits.thermal_threshold_c {
        ThermalMode::HighCompression
    } else {
        ThermalMode::Standard
    }
}

/// Classify an energy value under the given thermal mode.
pub fn classify(energy_joules: f64, mode: ThermalMode, limits: &ComplianceLimits) -> ComplianceStatus {
    match mode {
        ThermalMode::HighCompression if energy_joules > limits.thermal_energy_limit_j => {
            ComplianceStatus::CriticalThermalSquat
        }
        ThermalMode::Standard if energy_joules > limits.standard_energy_limit_j => {
            ComplianceStatus::ViolationRisk
        }
        _ => ComplianceStatus::Legal,
    }
}

/// Evaluate a decoded reading against the compliance limits.
pub fn evaluate(reading: &TelemetryReading, limits: &ComplianceLimits) -> ComplianceVerdict {
    let energy_joules = vertical_energy(
        limits.vehicle_mass_kg,
        f64::from(reading.vertical_velocity),
    );
    let mode = thermal_mode(f64::from(reading.engine_temp_c), limits);
    ComplianceVerdict {
        energy_joules,
        thermal_mode: mode,
        status: classify(energy_joules, mode, limits),
    }
}
