//! ---
//! apex_section: "04-observability"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Metrics collection and export utilities."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, resolved when port 0 was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges for the ingest → validate → forward pipeline.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: SharedRegistry,
    datagrams_received: IntCounter,
    datagrams_dropped: IntCounter,
    decode_errors: IntCounterVec,
    verdicts: IntCounterVec,
    events_forwarded: IntCounter,
    forward_failures: IntCounterVec,
    forward_seconds: Histogram,
    queue_depth: IntGauge,
    active_vehicles: IntGauge,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("received", &self.datagrams_received.get())
            .field("dropped", &self.datagrams_dropped.get())
            .field("forwarded", &self.events_forwarded.get())
            .field("queue_depth", &self.queue_depth.get())
            .finish_non_exhaustive()
    }
}

impl PipelineMetrics {
    /// Register every pipeline metric on `registry`.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let datagrams_received = IntCounter::with_opts(Opts::new(
            "apex_datagrams_received_total",
            "Datagrams accepted into the ingest queue",
        ))?;
        registry.register(Box::new(datagrams_received.clone()))?;

        let datagrams_dropped = IntCounter::with_opts(Opts::new(
            "apex_datagrams_dropped_total",
            "Datagrams discarded because the ingest queue was full",
        ))?;
        registry.register(Box::new(datagrams_dropped.clone()))?;

        let decode_errors = IntCounterVec::new(
            Opts::new(
                "apex_decode_errors_total",
                "Datagrams rejected by the codec, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(decode_errors.clone()))?;

        let verdicts = IntCounterVec::new(
            Opts::new(
                "apex_verdicts_total",
                "Compliance verdicts produced, by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(verdicts.clone()))?;

        let events_forwarded = IntCounter::with_opts(Opts::new(
            "apex_events_forwarded_total",
            "Events acknowledged by the collector",
        ))?;
        registry.register(Box::new(events_forwarded.clone()))?;

        let forward_failures = IntCounterVec::new(
            Opts::new(
                "apex_forward_failures_total",
                "Events the collector did not accept, by failure kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(forward_failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 12)
            .context("failed to construct histogram buckets")?;
        let forward_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "apex_forward_duration_seconds",
                "Wall time spent delivering one event",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(forward_seconds.clone()))?;

        let queue_depth = IntGauge::with_opts(Opts::new(
            "apex_queue_depth",
            "Datagrams waiting in the ingest queue",
        ))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let active_vehicles = IntGauge::with_opts(Opts::new(
            "apex_active_vehicles",
            "Vehicles with a session since startup",
        ))?;
        registry.register(Box::new(active_vehicles.clone()))?;

        Ok(Self {
            registry,
            datagrams_received,
            datagrams_dropped,
            decode_errors,
            verdicts,
            events_forwarded,
            forward_failures,
            forward_seconds,
            queue_depth,
            active_vehicles,
        })
    }

    /// Metrics on a private registry, for tests and embedding without an exporter.
    pub fn unregistered() -> Result<Self> {
        Self::new(new_registry())
    }

    /// Registry the metrics are registered on.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count a datagram accepted into the queue.
    pub fn record_received(&self) {
        self.datagrams_received.inc();
    }

    /// Count a datagram dropped at a full queue.
    pub fn record_dropped(&self) {
        self.datagrams_dropped.inc();
    }

    /// Count a codec rejection under `reason`.
    pub fn record_decode_error(&self, reason: &str) {
        self.decode_errors.with_label_values(&[reason]).inc();
    }

    /// Count one verdict by status label.
    pub fn record_verdict(&self, status: &str) {
        self.verdicts.with_label_values(&[status]).inc();
    }

    /// Count a delivered event and observe its latency.
    pub fn record_forwarded(&self, elapsed: Duration) {
        self.events_forwarded.inc();
        self.forward_seconds.observe(elapsed.as_secs_f64());
    }

    /// Count a failed delivery by kind and observe its latency.
    pub fn record_forward_failure(&self, kind: &str, elapsed: Duration) {
        self.forward_failures.with_label_values(&[kind]).inc();
        self.forward_seconds.observe(elapsed.as_secs_f64());
    }

    /// Current ingest queue depth.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    /// Number of vehicles with a session.
    pub fn set_active_vehicles(&self, count: usize) {
        self.active_vehicles.set(count as i64);
    }

    /// Datagrams accepted so far.
    pub fn received_total(&self) -> u64 {
        self.datagrams_received.get()
    }

    /// Datagrams dropped so far.
    pub fn dropped_total(&self) -> u64 {
        self.datagrams_dropped.get()
    }

    /// Events delivered so far.
    pub fn forwarded_total(&self) -> u64 {
        self.events_forwarded.get()
    }

    /// Codec rejections recorded under `reason`.
    pub fn decode_errors_total(&self, reason: &str) -> u64 {
        self.decode_errors.with_label_values(&[reason]).get()
    }

    /// Verdicts recorded with `status`.
    pub fn verdicts_total(&self, status: &str) -> u64 {
        self.verdicts.with_label_values(&[status]).get()
    }

    /// Failed deliveries recorded under `kind`.
    pub fn forward_failures_total(&self, kind: &str) -> u64 {
        self.forward_failures.with_label_values(&[kind]).get()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = new_registry();
        let _first = PipelineMetrics::new(registry.clone()).unwrap();
        assert!(PipelineMetrics::new(registry).is_err());
    }

    #[test]
    fn counters_are_labelled() {
        let metrics = PipelineMetrics::unregistered().unwrap();
        metrics.record_decode_error("bad_length");
        metrics.record_decode_error("bad_length");
        metrics.record_verdict("LEGAL");
        metrics.record_forward_failure("timeout", Duration::from_millis(500));
        assert_eq!(metrics.decode_errors_total("bad_length"), 2);
        assert_eq!(metrics.decode_errors_total("non_finite"), 0);
        assert_eq!(metrics.verdicts_total("LEGAL"), 1);
        assert_eq!(metrics.forward_failures_total("timeout"), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exporter_serves_text_format() {
        let metrics = PipelineMetrics::unregistered().unwrap();
        metrics.record_received();
        metrics.set_queue_depth(7);

        let server =
            spawn_http_server(metrics.registry(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let response = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("apex_datagrams_received_total 1"));
        assert!(body.contains("apex_queue_depth 7"));
        server.shutdown().await.unwrap();
    }
}
