//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Validation workers: decode, evaluate, throttle, forward."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use apex_codec::{decode, VehicleId};
use apex_common::time::duration_to_micros;
use apex_common::{DrainPolicy, LogThrottle};
use apex_compliance::{evaluate, ComplianceLimits};
use apex_metrics::PipelineMetrics;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::PipelineFault;
use crate::forwarder::{EventEnvelope, EventSink, SendError};
use crate::queue::{Datagram, IngestQueue};
use crate::session::{ForwardDecision, SessionTable};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const DROP_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Extra time granted beyond the forward timeout before the worker abandons a send.
const SINK_GRACE: Duration = Duration::from_millis(100);

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Rejected by the codec.
    Undecodable,
    /// Accepted but not forwarded (interval throttle).
    Throttled,
    /// Older than the vehicle's newest reading and LEGAL.
    StaleDiscarded,
    /// Delivered to the sink.
    Forwarded,
    /// The sink did not accept the event.
    ForwardFailed,
}

/// Liveness summary shared by all workers, logged at most once per minute.
#[derive(Debug)]
pub struct Heartbeat {
    throttle: LogThrottle,
    window: Mutex<HeartbeatWindow>,
}

#[derive(Debug, Default)]
struct HeartbeatWindow {
    processed: u64,
    forwarded: u64,
    decode_errors: u64,
    last_vehicle: Option<VehicleId>,
}

impl Heartbeat {
    /// Heartbeat with the default one minute cadence.
    pub fn new() -> Self {
        Self::with_interval(HEARTBEAT_INTERVAL)
    }

    /// Heartbeat with a custom cadence.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            throttle: LogThrottle::deferred(interval),
            window: Mutex::new(HeartbeatWindow::default()),
        }
    }

    fn processed(&self, vehicle: &VehicleId) {
        let mut window = self.window.lock();
        window.processed += 1;
        if window.last_vehicle.as_ref() != Some(vehicle) {
            window.last_vehicle = Some(vehicle.clone());
        }
    }

    fn forwarded(&self) {
        self.window.lock().forwarded += 1;
    }

    fn decode_error(&self) {
        self.window.lock().decode_errors += 1;
    }

    /// Emit the summary if the interval has passed and reset the window.
    pub fn maybe_log(&self) {
        if self.throttle.check().is_none() {
            return;
        }
        let window = std::mem::take(&mut *self.window.lock());
        info!(
            processed = window.processed,
            forwarded = window.forwarded,
            decode_errors = window.decode_errors,
            last_vehicle = window.last_vehicle.as_ref().map(VehicleId::as_str),
            "validator heartbeat"
        );
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by every validation worker.
pub struct WorkerContext {
    /// Source of datagrams.
    pub queue: Arc<IngestQueue>,
    /// Per-vehicle state and forward stamps.
    pub sessions: Arc<SessionTable>,
    /// Event destination.
    pub sink: Arc<dyn EventSink>,
    /// Static envelope fields.
    pub envelope: EventEnvelope,
    /// Compliance thresholds.
    pub limits: ComplianceLimits,
    /// Pipeline instrumentation.
    pub metrics: PipelineMetrics,
    /// Shared liveness summary.
    pub heartbeat: Heartbeat,
    /// Longest wait on an empty queue.
    pub queue_wait: Duration,
    /// Forward timeout configured on the sink.
    pub forward_timeout: Duration,
    /// Shutdown behaviour.
    pub drain: DrainPolicy,
    /// Longest a worker keeps draining after shutdown.
    pub drain_timeout: Duration,
    drop_log: LogThrottle,
}

impl WorkerContext {
    /// Assemble a context. The drop log throttle is created internally.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<IngestQueue>,
        sessions: Arc<SessionTable>,
        sink: Arc<dyn EventSink>,
        envelope: EventEnvelope,
        limits: ComplianceLimits,
        metrics: PipelineMetrics,
        queue_wait: Duration,
        forward_timeout: Duration,
        drain: DrainPolicy,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            sessions,
            sink,
            envelope,
            limits,
            metrics,
            heartbeat: Heartbeat::new(),
            queue_wait,
            forward_timeout,
            drain,
            drain_timeout,
            drop_log: LogThrottle::new(DROP_LOG_INTERVAL),
        }
    }
}

/// One consumer of the ingest queue.
pub struct ValidationWorker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

impl ValidationWorker {
    /// Create worker `id` over the shared context.
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Run until shutdown is signalled, then drain according to the policy.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "validation worker started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = self.ctx.queue.pop_timeout(self.ctx.queue_wait) => {
                    if let Some(datagram) = next {
                        self.process(datagram).await;
                    }
                }
            }
            self.ctx.heartbeat.maybe_log();
        }

        let mut drained = 0u64;
        if self.ctx.drain == DrainPolicy::Drain {
            // Each send is already bounded, so this overruns by at most one forward guard.
            let deadline = Instant::now() + self.ctx.drain_timeout;
            while Instant::now() < deadline {
                let Some(datagram) = self.ctx.queue.try_pop() else {
                    break;
                };
                self.process(datagram).await;
                drained += 1;
            }
            if !self.ctx.queue.is_empty() {
                warn!(
                    worker = self.id,
                    drain_timeout_ms = self.ctx.drain_timeout.as_millis() as u64,
                    "drain deadline reached; abandoning queued datagrams"
                );
            }
        }
        info!(
            worker = self.id,
            drained,
            abandoned = self.ctx.queue.len(),
            "validation worker stopped"
        );
    }

    /// Handle a single datagram end to end. Never fails; every fault is counted and dropped.
    pub async fn process(&self, datagram: Datagram) -> ProcessOutcome {
        let ctx = &self.ctx;
        ctx.metrics.set_queue_depth(ctx.queue.len());

        let reading = match decode(&datagram) {
            Ok(reading) => reading,
            Err(err) => {
                ctx.metrics.record_decode_error(err.reason());
                ctx.heartbeat.decode_error();
                PipelineFault::Decode.report_drop(
                    &ctx.drop_log,
                    format_args!(
                        "worker {}: {} byte datagram rejected: {err}",
                        self.id,
                        datagram.len()
                    ),
                );
                return ProcessOutcome::Undecodable;
            }
        };

        let verdict = evaluate(&reading, &ctx.limits);
        ctx.metrics.record_verdict(verdict.status.as_str());
        ctx.heartbeat.processed(&reading.vehicle_id);

        let observation = ctx.sessions.observe(&reading, &verdict, Instant::now());
        if observation.new_vehicle {
            ctx.metrics.set_active_vehicles(ctx.sessions.len());
        }
        if let Some(transition) = observation.transition {
            info!(
                vehicle = %reading.vehicle_id,
                from = transition.from.map(|s| s.as_str()).unwrap_or("NONE"),
                to = %transition.to,
                energy_j = verdict.energy_joules,
                engine_temp_c = reading.engine_temp_c,
                thermal_mode = %verdict.thermal_mode,
                "compliance status changed"
            );
        }
        if observation.stale {
            debug!(
                vehicle = %reading.vehicle_id,
                timestamp = reading.timestamp,
                status = %verdict.status,
                "out-of-order reading"
            );
        }

        match observation.decision {
            ForwardDecision::Forward => {}
            ForwardDecision::Throttled => return ProcessOutcome::Throttled,
            ForwardDecision::StaleDiscarded => return ProcessOutcome::StaleDiscarded,
        }

        let event = ctx.envelope.event(&reading, &verdict);
        let started = Instant::now();
        let guard = ctx.forward_timeout + SINK_GRACE;
        let result = match timeout(guard, ctx.sink.send(&event)).await {
            Ok(result) => result,
            Err(_) => {
                PipelineFault::Sink.report_drop(
                    &ctx.drop_log,
                    format_args!(
                        "worker {}: sink exceeded the {} ms forward deadline",
                        self.id,
                        guard.as_millis()
                    ),
                );
                Err(SendError::Timeout(guard))
            }
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                ctx.metrics.record_forwarded(elapsed);
                ctx.heartbeat.forwarded();
                trace!(
                    vehicle = %reading.vehicle_id,
                    status = %verdict.status,
                    latency_us = duration_to_micros(elapsed),
                    "event forwarded"
                );
                ProcessOutcome::Forwarded
            }
            Err(err) => {
                ctx.metrics.record_forward_failure(err.kind(), elapsed);
                ProcessOutcome::ForwardFailed
            }
        }
    }
}
