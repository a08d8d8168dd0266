//! ---
//! apex_section: "01-core-functionality"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Environment-driven configuration for the validator runtime."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use apex_compliance::{ComplianceLimits, InvalidLimits};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::LogFormat;

const DEFAULT_COLLECTOR_URL: &str = "https://127.0.0.1:8088/services/collector/event";
const DEFAULT_AUTH_SCHEME: &str = "Splunk";
const DEFAULT_HEC_HOST: &str = "apex-edge-node";
const DEFAULT_HEC_SOURCE: &str = "apex_edge_bridge";
const DEFAULT_HEC_SOURCETYPE: &str = "apex_telemetry";
const DEFAULT_LISTEN_PORT: u16 = 20777;
const DEFAULT_RECV_BUFFER_BYTES: usize = 1024 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 2048;

/// Values that must never reach a collector as a credential.
const PLACEHOLDER_TOKENS: &[&str] = &["REPLACE_WITH_SECURE_TOKEN", "CHANGE_ME", "CHANGEME"];

/// Errors raised while assembling [`ValidatorConfig`]. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("required environment variable {0} is not set")]
    MissingVariable(&'static str),
    /// The collector token is still a template value.
    #[error("{0} holds a placeholder value; provision a real collector token")]
    PlaceholderToken(&'static str),
    /// A variable could not be parsed or failed validation.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value as read.
        value: String,
        /// What went wrong.
        reason: String,
    },
    /// Compliance limits are structurally unusable.
    #[error("invalid compliance limits: {0}")]
    Limits(#[from] InvalidLimits),
}

/// Collector credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    /// Wrap a token value.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw secret, for building the authorization header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(<redacted>)")
    }
}

/// Downstream collector endpoint and event envelope.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Full URL of the event endpoint.
    pub url: String,
    /// Authentication secret.
    pub token: SecretToken,
    /// Scheme placed before the token in the `Authorization` header.
    pub auth_scheme: String,
    /// Verify the collector's TLS certificate.
    pub verify_tls: bool,
    /// Hard upper bound on a single forward.
    pub timeout: Duration,
    /// Envelope `host`.
    pub host: String,
    /// Envelope `source`.
    pub source: String,
    /// Envelope `sourcetype`.
    pub sourcetype: String,
    /// Envelope `index`; omitted when unset.
    pub index: Option<String>,
}

impl CollectorConfig {
    /// Collector settings with defaults for everything except the token.
    pub fn with_token(url: impl Into<String>, token: SecretToken) -> Self {
        Self {
            url: url.into(),
            token,
            auth_scheme: DEFAULT_AUTH_SCHEME.to_owned(),
            verify_tls: true,
            timeout: Duration::from_millis(500),
            host: DEFAULT_HEC_HOST.to_owned(),
            source: DEFAULT_HEC_SOURCE.to_owned(),
            sourcetype: DEFAULT_HEC_SOURCETYPE.to_owned(),
            index: None,
        }
    }

    /// Refuse a placeholder token or a non-HTTP URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_placeholder(self.token.expose()) {
            return Err(ConfigError::PlaceholderToken("APEX_COLLECTOR_TOKEN"));
        }
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                var: "APEX_COLLECTOR_URL",
                value: self.url.clone(),
                reason: "expected an http:// or https:// URL".to_owned(),
            });
        }
        Ok(())
    }
}

/// UDP listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address.
    pub addr: SocketAddr,
    /// Requested `SO_RCVBUF` size.
    pub recv_buffer_bytes: usize,
    /// Receive timeout, bounds how long shutdown can go unnoticed.
    pub recv_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
            recv_timeout: Duration::from_millis(200),
        }
    }
}

/// Whether the LEGAL forward interval is shared by all vehicles or kept per vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForwardGranularity {
    /// One interval across the whole fleet.
    #[default]
    Global,
    /// An independent interval per vehicle.
    PerVehicle,
}

impl FromStr for ForwardGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per-vehicle" | "per_vehicle" | "vehicle" => Ok(Self::PerVehicle),
            other => Err(format!("expected `global` or `per-vehicle`, got `{other}`")),
        }
    }
}

/// What workers do with queued datagrams once shutdown is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainPolicy {
    /// Process everything already queued, then exit.
    #[default]
    Drain,
    /// Exit at once, abandoning queued datagrams.
    Immediate,
}

/// Queue and worker settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of queued datagrams.
    pub queue_capacity: usize,
    /// Longest a worker waits on an empty queue before re-checking shutdown.
    pub queue_wait: Duration,
    /// Minimum spacing between forwarded LEGAL readings.
    pub forward_interval: Duration,
    /// Scope of the forward interval.
    pub granularity: ForwardGranularity,
    /// Number of validation workers.
    pub workers: usize,
    /// Shutdown behaviour.
    pub drain: DrainPolicy,
    /// Upper bound on draining once shutdown starts; later datagrams are abandoned.
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_wait: Duration::from_secs(1),
            forward_interval: Duration::from_millis(100),
            granularity: ForwardGranularity::Global,
            workers: 1,
            drain: DrainPolicy::Drain,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Stdout layer format.
    pub format: LogFormat,
    /// Directory for the daily rolling JSON log; disabled when unset.
    pub directory: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Default)]
pub struct MetricsConfig {
    /// Address to serve `/metrics` on; disabled when unset.
    pub listen: Option<SocketAddr>,
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Downstream collector.
    pub collector: CollectorConfig,
    /// UDP listener.
    pub listener: ListenerConfig,
    /// Compliance thresholds.
    pub limits: ComplianceLimits,
    /// Queue and workers.
    pub pipeline: PipelineConfig,
    /// Tracing.
    pub logging: LoggingConfig,
    /// Metrics exporter.
    pub metrics: MetricsConfig,
}

impl ValidatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup, so callers can supply variables from a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let token = env
            .raw("APEX_COLLECTOR_TOKEN")
            .ok_or(ConfigError::MissingVariable("APEX_COLLECTOR_TOKEN"))?;

        let collector = CollectorConfig {
            url: env.string("APEX_COLLECTOR_URL", DEFAULT_COLLECTOR_URL),
            token: SecretToken::new(token),
            auth_scheme: env.string("APEX_AUTH_SCHEME", DEFAULT_AUTH_SCHEME),
            verify_tls: env.parse_bool("APEX_TLS_VERIFY", true)?,
            timeout: env.millis("APEX_FORWARD_TIMEOUT_MS", 500)?,
            host: env.string("APEX_HEC_HOST", DEFAULT_HEC_HOST),
            source: env.string("APEX_HEC_SOURCE", DEFAULT_HEC_SOURCE),
            sourcetype: env.string("APEX_HEC_SOURCETYPE", DEFAULT_HEC_SOURCETYPE),
            index: env.raw("APEX_HEC_INDEX").filter(|v| !v.trim().is_empty()),
        };
        collector.validate()?;

        let listener = ListenerConfig {
            addr: SocketAddr::new(
                env.parse("APEX_LISTEN_IP", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
                env.parse("APEX_LISTEN_PORT", DEFAULT_LISTEN_PORT)?,
            ),
            recv_buffer_bytes: env.parse("APEX_RECV_BUFFER_BYTES", DEFAULT_RECV_BUFFER_BYTES)?,
            recv_timeout: env.millis("APEX_RECV_TIMEOUT_MS", 200)?,
        };

        let defaults = ComplianceLimits::default();
        let limits = ComplianceLimits {
            vehicle_mass_kg: env.parse("APEX_VEHICLE_MASS_KG", defaults.vehicle_mass_kg)?,
            thermal_threshold_c: env
                .parse("APEX_THERMAL_THRESHOLD_C", defaults.thermal_threshold_c)?,
            standard_energy_limit_j: env.parse(
                "APEX_STANDARD_ENERGY_LIMIT_J",
                defaults.standard_energy_limit_j,
            )?,
            thermal_energy_limit_j: env
                .parse("APEX_THERMAL_ENERGY_LIMIT_J", defaults.thermal_energy_limit_j)?,
        };
        limits.validate()?;

        let pipeline = PipelineConfig {
            queue_capacity: env.positive("APEX_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            queue_wait: env.millis("APEX_QUEUE_WAIT_MS", 1000)?,
            forward_interval: env.millis_allow_zero("APEX_FORWARD_INTERVAL_MS", 100)?,
            granularity: env.parse("APEX_FORWARD_GRANULARITY", ForwardGranularity::Global)?,
            workers: env.positive("APEX_WORKERS", 1)?,
            drain: if env.parse_bool("APEX_DRAIN_ON_SHUTDOWN", true)? {
                DrainPolicy::Drain
            } else {
                DrainPolicy::Immediate
            },
            drain_timeout: env.millis("APEX_DRAIN_TIMEOUT_MS", 5000)?,
        };

        let logging = LoggingConfig {
            format: env.parse("APEX_LOG_FORMAT", LogFormat::Pretty)?,
            directory: env
                .raw("APEX_LOG_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        let metrics = MetricsConfig {
            listen: env.optional("APEX_METRICS_LISTEN")?,
        };

        let config = Self {
            collector,
            listener,
            limits,
            pipeline,
            logging,
            metrics,
        };
        debug!(?config, "configuration assembled");
        Ok(config)
    }
}

fn is_placeholder(token: &str) -> bool {
    let trimmed = token.trim();
    trimmed.is_empty()
        || PLACEHOLDER_TOKENS
            .iter()
            .any(|placeholder| trimmed.eq_ignore_ascii_case(placeholder))
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.raw(var)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_owned())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.optional(var)?.unwrap_or(default))
    }

    fn optional<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(var).filter(|v| !v.trim().is_empty()) {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|err| ConfigError::Invalid {
                    var,
                    reason: err.to_string(),
                    value,
                }),
        }
    }

    fn parse_bool(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.raw(var).filter(|v| !v.trim().is_empty()) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected a boolean (true/false)".to_owned(),
            }),
        }
    }

    fn positive(&self, var: &'static str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parse(var, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        Ok(value)
    }

    fn millis(&self, var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        let duration = self.millis_allow_zero(var, default_ms)?;
        if duration.is_zero() {
            return Err(ConfigError::Invalid {
                var,
                value: "0".to_owned(),
                reason: "timeouts must be greater than zero".to_owned(),
            });
        }
        Ok(duration)
    }

    fn millis_allow_zero(
        &self,
        var: &'static str,
        default_ms: u64,
    ) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(self.parse(var, default_ms)?))
    }
}
