//! ---
//! apex_section: "01-core-functionality"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Shared primitives and utilities for the validator runtime."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
//! Core shared primitives for the Apex validator workspace.
//! This crate exposes environment configuration loading, tracing setup,
//! log throttling, and small time helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod throttle;
pub mod time;

pub use config::{
    CollectorConfig, ConfigError, DrainPolicy, ForwardGranularity, ListenerConfig, LoggingConfig,
    MetricsConfig, PipelineConfig, SecretToken, ValidatorConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use throttle::LogThrottle;
