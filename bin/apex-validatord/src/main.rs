//! ---
//! apex_section: "07-daemon"
//! apex_subsection: "binary"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Binary entrypoint for the validator daemon."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use apex_common::{init_tracing, LoggingConfig, ValidatorConfig};
use apex_metrics::{new_registry, spawn_http_server, PipelineMetrics};
use apex_pipeline::{ServiceError, ValidatorService};
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "apex-validatord";

#[tokio::main]
async fn main() -> Result<()> {
    let config = match ValidatorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            init_tracing(SERVICE_NAME, &LoggingConfig::default())?;
            error!(fault = "configuration", error = %err, "refusing to start");
            return Err(err.into());
        }
    };
    init_tracing(SERVICE_NAME, &config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        collector = %config.collector.url,
        verify_tls = config.collector.verify_tls,
        "configuration loaded"
    );

    let registry = new_registry();
    let metrics = PipelineMetrics::new(registry.clone()).context("registering pipeline metrics")?;
    let metrics_server = match config.metrics.listen {
        Some(addr) => {
            let server = spawn_http_server(registry, addr)?;
            info!(address = %server.addr(), "metrics exporter enabled");
            Some(server)
        }
        None => {
            info!("metrics exporter disabled by configuration");
            None
        }
    };

    let handle = match ValidatorService::new(config).with_metrics(metrics).start().await {
        Ok(handle) => handle,
        Err(err) => {
            report_startup_failure(&err);
            if let Some(server) = metrics_server {
                server.shutdown().await?;
            }
            return Err(err.into());
        }
    };

    info!(listen = %handle.local_addr(), "daemon running; waiting for termination signal");
    shutdown_signal().await;
    info!("termination signal received; shutting down");

    let report = handle.shutdown().await;
    info!(
        accepted = report.accepted,
        dropped = report.dropped,
        forwarded = report.forwarded,
        abandoned = report.abandoned,
        vehicles = report.vehicles,
        "shutdown complete"
    );

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn report_startup_failure(err: &ServiceError) {
    let fault = err.fault();
    error!(fault = %fault, action = ?fault.action(), error = %err, "refusing to start");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => {},
            _ = terminate() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
