//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Event envelope and HTTP collector forwarder."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::time::Duration;

use apex_codec::TelemetryReading;
use apex_common::{CollectorConfig, ConfigError, LogThrottle};
use apex_compliance::{ComplianceStatus, ComplianceVerdict, ThermalMode};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::ServiceError;

const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 256;

/// Outcome of a single delivery attempt.
pub type SendResult = Result<(), SendError>;

/// Why the collector did not accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// No answer within the forward timeout.
    #[error("collector did not answer within {0:?}")]
    Timeout(Duration),
    /// Connection, TLS or protocol failure.
    #[error("collector transport error: {0}")]
    Transport(String),
    /// The collector answered with a non-2xx status.
    #[error("collector rejected event with HTTP {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Leading part of the response body.
        body: String,
    },
}

impl SendError {
    /// Static label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::Timeout(_) => "timeout",
            SendError::Transport(_) => "transport",
            SendError::Rejected { .. } => "rejected",
        }
    }
}

/// Destination for enriched events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations must return within a bounded time.
    async fn send(&self, event: &HecEvent) -> SendResult;
}

/// Compliance payload carried inside the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    /// Vehicle identifier.
    pub car_id: String,
    /// Speed rounded to whole km/h.
    pub speed_kph: i64,
    /// Vertical oscillation energy, two decimals.
    pub vertical_energy: f64,
    /// Engine temperature, one decimal.
    pub engine_temp_c: f64,
    /// Ride height in millimeters, two decimals.
    pub rear_rh_mm: f64,
    /// Compliance verdict.
    pub compliance_status: ComplianceStatus,
    /// Thermal mode behind the verdict.
    pub thermal_mode: ThermalMode,
}

/// HEC-style event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HecEvent {
    /// Reading timestamp, epoch seconds.
    pub time: f64,
    /// Reporting host.
    pub host: String,
    /// Event source.
    pub source: String,
    /// Event sourcetype.
    pub sourcetype: String,
    /// Target index, omitted when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Payload.
    pub event: EventBody,
}

/// Static envelope fields applied to every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    host: String,
    source: String,
    sourcetype: String,
    index: Option<String>,
}

impl EventEnvelope {
    /// Envelope taken from the collector settings.
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            host: config.host.clone(),
            source: config.source.clone(),
            sourcetype: config.sourcetype.clone(),
            index: config.index.clone(),
        }
    }

    /// Build the event for one evaluated reading.
    pub fn event(&self, reading: &TelemetryReading, verdict: &ComplianceVerdict) -> HecEvent {
        HecEvent {
            time: reading.timestamp,
            host: self.host.clone(),
            source: self.source.clone(),
            sourcetype: self.sourcetype.clone(),
            index: self.index.clone(),
            event: EventBody {
                car_id: reading.vehicle_id.to_string(),
                speed_kph: f64::from(reading.speed_kph).round() as i64,
                vertical_energy: round_to(verdict.energy_joules, 2),
                engine_temp_c: round_to(f64::from(reading.engine_temp_c), 1),
                rear_rh_mm: round_to(reading.ride_height_mm(), 2),
                compliance_status: verdict.status,
                thermal_mode: verdict.thermal_mode,
            },
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Forwarder posting JSON events to an HEC-style collector.
///
/// One client is built at startup and reused, so connections are pooled.
#[derive(Debug)]
pub struct HecForwarder {
    client: reqwest::Client,
    url: Url,
    authorization: HeaderValue,
    timeout: Duration,
    error_log: LogThrottle,
}

impl HecForwarder {
    /// Build the forwarder and its HTTP client. Fails on an unusable URL or credential.
    pub fn new(config: &CollectorConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let url = parse_collector_url(&config.url)?;

        if HeaderValue::from_str(&config.auth_scheme).is_err() {
            return Err(ConfigError::Invalid {
                var: "APEX_AUTH_SCHEME",
                value: config.auth_scheme.clone(),
                reason: "contains characters not allowed in HTTP headers".to_owned(),
            }
            .into());
        }
        if HeaderValue::from_str(config.token.expose()).is_err() {
            return Err(ConfigError::Invalid {
                var: "APEX_COLLECTOR_TOKEN",
                value: "<redacted>".to_owned(),
                reason: "contains characters not allowed in HTTP headers".to_owned(),
            }
            .into());
        }
        let mut authorization = HeaderValue::from_str(&format!(
            "{} {}",
            config.auth_scheme,
            config.token.expose()
        ))
        .map_err(|_| ConfigError::Invalid {
            var: "APEX_AUTH_SCHEME",
            value: config.auth_scheme.clone(),
            reason: "authorization header is not a valid HTTP header value".to_owned(),
        })?;
        authorization.set_sensitive(true);

        if !config.verify_tls {
            warn!(
                url = %config.url,
                "TLS CERTIFICATE VERIFICATION IS DISABLED for the collector; \
                 events and credentials can be intercepted"
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(ServiceError::HttpClient)?;

        info!(
            url = %config.url,
            scheme = %config.auth_scheme,
            timeout_ms = config.timeout.as_millis() as u64,
            "collector forwarder ready"
        );

        Ok(Self {
            client,
            url,
            authorization,
            timeout: config.timeout,
            error_log: LogThrottle::new(ERROR_LOG_INTERVAL),
        })
    }

    async fn post(&self, event: &HecEvent) -> SendResult {
        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .json(event)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> SendError {
        if err.is_timeout() {
            SendError::Timeout(self.timeout)
        } else {
            SendError::Transport(err.without_url().to_string())
        }
    }
}

fn parse_collector_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "APEX_COLLECTOR_URL",
        value: raw.to_owned(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(url)
}

#[async_trait]
impl EventSink for HecForwarder {
    async fn send(&self, event: &HecEvent) -> SendResult {
        let result = self.post(event).await;
        if let Err(err) = &result {
            if let Some(suppressed) = self.error_log.check() {
                warn!(
                    error = %err,
                    kind = err.kind(),
                    suppressed,
                    "collector forward failed; event dropped"
                );
            }
        }
        result
    }
}
