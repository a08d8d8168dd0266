//! ---
//! apex_section: "06-simulation"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Simulation fixture exports."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
//! Synthetic telemetry for exercising the validator end to end.
//!
//! Two cars run side by side at 60 Hz. `CAR_1` heats up until it crosses the
//! thermal threshold and then porpoises on every corner exit; `CAR_81` stays
//! cool and smooth as the control.

pub mod emitter;
pub mod generator;

pub use emitter::UdpEmitter;
pub use generator::{HeadToHead, ScenarioNoise, CONTROL_CAR, LEAD_CAR, TICK_HZ};
