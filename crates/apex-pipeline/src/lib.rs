//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Ingest, validation and forwarding pipeline."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
//! Real-time pipeline: UDP datagrams flow through a bounded queue to validation
//! workers, which decode, evaluate and forward events to the collector.
//!
//! ```text
//! UDP ──► Ingestor ──► IngestQueue ──► ValidationWorker × N ──► EventSink
//!                      (tail drop)      decode · evaluate ·
//!                                       SessionTable throttle
//! ```
//!
//! The ingestor never waits on anything downstream. Workers bound every wait.
#![warn(missing_docs)]

pub mod error;
pub mod forwarder;
pub mod ingestor;
pub mod queue;
pub mod service;
pub mod session;
pub mod worker;

pub use error::{FaultAction, PipelineFault, ServiceError};
pub use forwarder::{
    EventBody, EventEnvelope, EventSink, HecEvent, HecForwarder, SendError, SendResult,
};
pub use ingestor::Ingestor;
pub use queue::{Datagram, IngestQueue, PushOutcome};
pub use service::{ServiceHandle, ShutdownReport, ValidatorService};
pub use session::{
    ForwardDecision, Observation, SessionTable, StatusTransition, VehicleSession,
};
pub use worker::{Heartbeat, ProcessOutcome, ValidationWorker, WorkerContext};
