//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Service assembly and ordered shutdown."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use apex_common::ValidatorConfig;
use apex_metrics::PipelineMetrics;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::forwarder::{EventEnvelope, EventSink, HecForwarder};
use crate::ingestor::Ingestor;
use crate::queue::IngestQueue;
use crate::session::SessionTable;
use crate::worker::{ValidationWorker, WorkerContext};

/// Builder for a running validator.
pub struct ValidatorService {
    config: ValidatorConfig,
    sink: Option<Arc<dyn EventSink>>,
    metrics: Option<PipelineMetrics>,
}

impl ValidatorService {
    /// Service using the HTTP collector from `config`.
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            sink: None,
            metrics: None,
        }
    }

    /// Replace the collector forwarder with another sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record into existing metrics, typically ones registered on an exported registry.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bind the socket and spawn the ingestor and workers.
    ///
    /// Every failure here is fatal: nothing is left running when an error is returned.
    pub async fn start(self) -> Result<ServiceHandle, ServiceError> {
        let ValidatorService {
            config,
            sink,
            metrics,
        } = self;
        config.limits.validate().map_err(apex_common::ConfigError::from)?;
        config.collector.validate()?;

        let metrics = match metrics {
            Some(metrics) => metrics,
            None => PipelineMetrics::unregistered().map_err(ServiceError::Metrics)?,
        };
        let sink: Arc<dyn EventSink> = match sink {
            Some(sink) => sink,
            None => Arc::new(HecForwarder::new(&config.collector)?),
        };

        let pipeline = &config.pipeline;
        let queue = Arc::new(IngestQueue::new(pipeline.queue_capacity));
        let sessions = Arc::new(SessionTable::new(
            pipeline.forward_interval,
            pipeline.granularity,
        ));

        let ingestor = Ingestor::bind(&config.listener, queue.clone(), metrics.clone())?;
        let local_addr = ingestor.local_addr();
        let (ingest_shutdown, ingest_rx) = watch::channel(false);
        let ingest_task = tokio::spawn(ingestor.run(ingest_rx));

        let ctx = Arc::new(WorkerContext::new(
            queue.clone(),
            sessions.clone(),
            sink,
            EventEnvelope::from_config(&config.collector),
            config.limits,
            metrics.clone(),
            pipeline.queue_wait,
            config.collector.timeout,
            pipeline.drain,
            pipeline.drain_timeout,
        ));
        let (worker_shutdown, worker_rx) = watch::channel(false);
        let workers = (0..pipeline.workers)
            .map(|id| tokio::spawn(ValidationWorker::new(id, ctx.clone()).run(worker_rx.clone())))
            .collect();

        info!(
            listen = %local_addr,
            workers = pipeline.workers,
            queue_capacity = pipeline.queue_capacity,
            forward_interval_ms = pipeline.forward_interval.as_millis() as u64,
            granularity = ?pipeline.granularity,
            drain = ?pipeline.drain,
            "validator service started"
        );

        Ok(ServiceHandle {
            local_addr,
            queue,
            sessions,
            metrics,
            ingest_shutdown,
            ingest_task,
            worker_shutdown,
            workers,
        })
    }
}

/// Counters captured at the end of [`ServiceHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Datagrams accepted into the queue.
    pub accepted: u64,
    /// Datagrams dropped because the queue was full.
    pub dropped: u64,
    /// Events the collector accepted.
    pub forwarded: u64,
    /// Datagrams still queued when the workers stopped.
    pub abandoned: usize,
    /// Vehicles seen.
    pub vehicles: usize,
}

/// Handle to a running validator.
#[derive(Debug)]
pub struct ServiceHandle {
    local_addr: SocketAddr,
    queue: Arc<IngestQueue>,
    sessions: Arc<SessionTable>,
    metrics: PipelineMetrics,
    ingest_shutdown: watch::Sender<bool>,
    ingest_task: JoinHandle<()>,
    worker_shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    /// Bound UDP address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The ingest queue.
    pub fn queue(&self) -> &Arc<IngestQueue> {
        &self.queue
    }

    /// The session table.
    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Pipeline metrics.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Stop the ingestor (closing the socket), then stop the workers.
    pub async fn shutdown(self) -> ShutdownReport {
        let _ = self.ingest_shutdown.send(true);
        if let Err(err) = self.ingest_task.await {
            warn!(error = %err, "ingestor join error");
        }

        let _ = self.worker_shutdown.send(true);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker join error");
            }
        }

        let report = ShutdownReport {
            accepted: self.queue.pushed_total(),
            dropped: self.queue.dropped_total(),
            forwarded: self.metrics.forwarded_total(),
            abandoned: self.queue.len(),
            vehicles: self.sessions.len(),
        };
        info!(?report, "validator service stopped");
        report
    }
}
