//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Fault classification and startup errors for the pipeline."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::fmt;
use std::io;
use std::net::SocketAddr;

use apex_common::{ConfigError, LogThrottle};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Every way the pipeline can fail, grouped by how it must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineFault {
    /// Socket bind or permission failure.
    Transport,
    /// Missing secret or unusable setting.
    Configuration,
    /// Datagram rejected by the codec.
    Decode,
    /// Ingest queue full.
    Overload,
    /// Collector timed out, refused, or answered non-2xx.
    Sink,
}

/// What the pipeline does when a fault occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Refuse to start.
    AbortStartup,
    /// Drop the item, log at debug, count it.
    DropQuietly,
    /// Drop the item, log a rate-limited warning, count it.
    DropWithThrottledWarning,
}

impl PipelineFault {
    /// Policy table. Only startup faults are fatal; nothing on the packet path stops a loop.
    pub fn action(&self) -> FaultAction {
        match self {
            PipelineFault::Transport | PipelineFault::Configuration => FaultAction::AbortStartup,
            PipelineFault::Decode => FaultAction::DropQuietly,
            PipelineFault::Overload | PipelineFault::Sink => {
                FaultAction::DropWithThrottledWarning
            }
        }
    }

    /// Log a dropped item at the level [`PipelineFault::action`] prescribes. Returns whether
    /// a line was emitted; throttled warnings report how many were suppressed before it.
    pub fn report_drop(&self, throttle: &LogThrottle, detail: fmt::Arguments<'_>) -> bool {
        match self.action() {
            FaultAction::DropQuietly => {
                debug!(fault = %self, %detail, "item dropped");
                true
            }
            FaultAction::DropWithThrottledWarning => match throttle.check() {
                Some(suppressed) => {
                    warn!(fault = %self, suppressed, %detail, "item dropped");
                    true
                }
                None => false,
            },
            FaultAction::AbortStartup => {
                error!(
                    fault = %self,
                    %detail,
                    "startup fault raised on the packet path; item dropped"
                );
                true
            }
        }
    }

    /// Static label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineFault::Transport => "transport",
            PipelineFault::Configuration => "configuration",
            PipelineFault::Decode => "decode",
            PipelineFault::Overload => "overload",
            PipelineFault::Sink => "sink",
        }
    }
}

impl fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that prevent the service from starting.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The UDP socket could not be created or bound.
    #[error("failed to bind UDP listener on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying OS error.
        source: io::Error,
    },
    /// The HTTP client for the collector could not be built.
    #[error("failed to build collector HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// Metrics could not be registered.
    #[error("failed to register pipeline metrics: {0:#}")]
    Metrics(anyhow::Error),
}

impl ServiceError {
    /// Fault class of this error.
    pub fn fault(&self) -> PipelineFault {
        match self {
            ServiceError::Bind { .. } => PipelineFault::Transport,
            ServiceError::Config(_) | ServiceError::HttpClient(_) | ServiceError::Metrics(_) => {
                PipelineFault::Configuration
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_startup_faults_are_fatal() {
        assert_eq!(PipelineFault::Transport.action(), FaultAction::AbortStartup);
        assert_eq!(PipelineFault::Configuration.action(), FaultAction::AbortStartup);
        assert_eq!(PipelineFault::Decode.action(), FaultAction::DropQuietly);
        assert_eq!(
            PipelineFault::Overload.action(),
            FaultAction::DropWithThrottledWarning
        );
        assert_eq!(
            PipelineFault::Sink.action(),
            FaultAction::DropWithThrottledWarning
        );
    }

    #[test]
    fn drop_reports_follow_the_policy_table() {
        let throttle = LogThrottle::new(std::time::Duration::from_secs(60));
        assert!(PipelineFault::Overload.report_drop(&throttle, format_args!("queue full")));
        assert!(!PipelineFault::Overload.report_drop(&throttle, format_args!("queue full")));
        assert!(!PipelineFault::Sink.report_drop(&throttle, format_args!("deadline")));

        // Quiet drops are never throttled.
        assert!(PipelineFault::Decode.report_drop(&throttle, format_args!("bad_length")));
        assert!(PipelineFault::Decode.report_drop(&throttle, format_args!("bad_length")));
    }

    #[test]
    fn bind_errors_name_the_address() {
        let err = ServiceError::Bind {
            addr: "0.0.0.0:20777".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.fault(), PipelineFault::Transport);
        assert!(err.to_string().contains("0.0.0.0:20777"));
    }

    #[test]
    fn config_errors_are_configuration_faults() {
        let err = ServiceError::from(ConfigError::MissingVariable("APEX_COLLECTOR_TOKEN"));
        assert_eq!(err.fault(), PipelineFault::Configuration);
        assert!(err.to_string().contains("APEX_COLLECTOR_TOKEN"));
    }
}
