//! ---
//! apex_section: "03-compliance-engine"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Compliance thresholds and their validation."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference vehicle mass including driver.
pub const DEFAULT_VEHICLE_MASS_KG: f64 = 798.0;
/// Engine temperature above which the car is treated as thermally compressed.
pub const DEFAULT_THERMAL_THRESHOLD_C: f64 = 105.0;
/// Energy limit applied in the standard thermal mode.
pub const DEFAULT_STANDARD_ENERGY_LIMIT_J: f64 = 100.0;
/// Stricter energy limit applied while thermally compressed.
pub const DEFAULT_THERMAL_ENERGY_LIMIT_J: f64 = 80.0;

/// Physical constants and thresholds used by the compliance rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceLimits {
    /// Mass used for the kinetic energy computation.
    pub vehicle_mass_kg: f64,
    /// Exclusive lower bound for [`crate::ThermalMode::HighCompression`].
    pub thermal_threshold_c: f64,
    /// Limit applied when the engine is below the thermal threshold.
    pub standard_energy_limit_j: f64,
    /// Limit applied when the engine is above the thermal threshold.
    pub thermal_energy_limit_j: f64,
}

impl Default for ComplianceLimits {
    fn default() -> Self {
        Self {
            vehicle_mass_kg: DEFAULT_VEHICLE_MASS_KG,
            thermal_threshold_c: DEFAULT_THERMAL_THRESHOLD_C,
            standard_energy_limit_j: DEFAULT_STANDARD_ENERGY_LIMIT_J,
            thermal_energy_limit_j: DEFAULT_THERMAL_ENERGY_LIMIT_J,
        }
    }
}

/// Raised when a limit set cannot produce meaningful verdicts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidLimits {
    /// A value was NaN or infinite.
    #[error("{field} must be finite (got {value})")]
    NonFinite {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// Mass must be strictly positive for energy to be non-negative.
    #[error("vehicle_mass_kg must be positive (got {0})")]
    NonPositiveMass(f64),
    /// Energy limits must not be negative.
    #[error("{field} must not be negative (got {value})")]
    NegativeLimit {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
}

impl ComplianceLimits {
    /// Validate structural invariants.
    pub fn validate(&self) -> Result<(), InvalidLimits> {
        let fields = [
            ("vehicle_mass_kg", self.vehicle_mass_kg),
            ("thermal_threshold_c", self.thermal_threshold_c),
            ("standard_energy_limit_j", self.standard_energy_limit_j),
            ("thermal_energy_limit_j", self.thermal_energy_limit_j),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(InvalidLimits::NonFinite { field, value });
            }
        }
        if self.vehicle_mass_kg <= 0.0 {
            return Err(InvalidLimits::NonPositiveMass(self.vehicle_mass_kg));
        }
        for (field, value) in [
            ("standard_energy_limit_j", self.standard_energy_limit_j),
            ("thermal_energy_limit_j", self.thermal_energy_limit_j),
        ] {
            if value < 0.0 {
                return Err(InvalidLimits::NegativeLimit { field, value });
            }
        }
        Ok(())
    }
}
