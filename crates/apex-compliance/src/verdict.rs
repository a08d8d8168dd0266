//! ---
//! apex_section: "03-compliance-engine"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Energy and compliance classification for decoded telemetry."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Thermal operating mode derived from the engine temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermalMode {
    /// Engine at or below the thermal threshold.
    Standard,
    /// Engine above the thermal threshold; the stricter energy limit applies.
    HighCompression,
}

impl ThermalMode {
    /// Static label used on the wire and in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalMode::Standard => "STANDARD",
            ThermalMode::HighCompression => "HIGH_COMPRESSION",
        }
    }
}

impl fmt::Display for ThermalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compliance classification of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    /// Within limits.
    Legal,
    /// Standard mode energy above the standard limit.
    ViolationRisk,
    /// High-compression mode energy above the thermal limit.
    CriticalThermalSquat,
}

impl ComplianceStatus {
    /// Static label used on the wire and in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Legal => "LEGAL",
            ComplianceStatus::ViolationRisk => "VIOLATION_RISK",
            ComplianceStatus::CriticalThermalSquat => "CRITICAL_THERMAL_SQUAT",
        }
    }

    /// Whether the status bypasses forward throttling.
    pub fn is_alert(&self) -> bool {
        !matches!(self, ComplianceStatus::Legal)
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    /// Vertical oscillation energy in joules, never negative.
    pub energy_joules: f64,
    /// Thermal mode at the time of the reading.
    pub thermal_mode: ThermalMode,
    /// Resulting classification.
    pub status: ComplianceStatus,
}
