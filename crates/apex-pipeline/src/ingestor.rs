//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "UDP receive loop feeding the ingest queue."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apex_common::{ListenerConfig, LogThrottle};
use apex_metrics::PipelineMetrics;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{PipelineFault, ServiceError};
use crate::queue::{IngestQueue, PushOutcome};

const OVERLOAD_LOG_INTERVAL: Duration = Duration::from_secs(5);
const RECV_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Large enough for any UDP payload, so oversize datagrams keep their real length.
const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Owns the UDP socket and moves datagrams into the queue without inspecting them.
#[derive(Debug)]
pub struct Ingestor {
    socket: UdpSocket,
    local_addr: SocketAddr,
    queue: Arc<IngestQueue>,
    metrics: PipelineMetrics,
    recv_timeout: Duration,
    overload_log: LogThrottle,
    recv_error_log: LogThrottle,
}

impl Ingestor {
    /// Bind the listener. Must be called inside a tokio runtime.
    pub fn bind(
        config: &ListenerConfig,
        queue: Arc<IngestQueue>,
        metrics: PipelineMetrics,
    ) -> Result<Self, ServiceError> {
        let bind_err = |source: io::Error| ServiceError::Bind {
            addr: config.addr,
            source,
        };
        let std_socket = bind_socket(config).map_err(bind_err)?;
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        info!(
            address = %local_addr,
            recv_timeout_ms = config.recv_timeout.as_millis() as u64,
            queue_capacity = queue.capacity(),
            "UDP ingestor bound"
        );

        Ok(Self {
            socket,
            local_addr,
            queue,
            metrics,
            recv_timeout: config.recv_timeout,
            overload_log: LogThrottle::new(OVERLOAD_LOG_INTERVAL),
            recv_error_log: LogThrottle::new(RECV_ERROR_LOG_INTERVAL),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive until shutdown is signalled. The socket closes when this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = timeout(self.recv_timeout, self.socket.recv_from(&mut buf)) => {
                    match received {
                        Err(_elapsed) => {}
                        Ok(Ok((len, _peer))) => self.enqueue(Bytes::copy_from_slice(&buf[..len])),
                        Ok(Err(err)) => {
                            if let Some(suppressed) = self.recv_error_log.check() {
                                warn!(error = %err, suppressed, "UDP receive failed");
                            }
                        }
                    }
                }
            }
        }
        info!(
            address = %self.local_addr,
            accepted = self.queue.pushed_total(),
            dropped = self.queue.dropped_total(),
            "UDP ingestor stopped"
        );
    }

    fn enqueue(&self, datagram: Bytes) {
        match self.queue.try_push(datagram) {
            PushOutcome::Queued => self.metrics.record_received(),
            PushOutcome::Dropped => {
                self.metrics.record_dropped();
                PipelineFault::Overload.report_drop(
                    &self.overload_log,
                    format_args!(
                        "ingest queue full at capacity {}; {} datagrams dropped in total",
                        self.queue.capacity(),
                        self.queue.dropped_total()
                    ),
                );
            }
        }
        self.metrics.set_queue_depth(self.queue.len());
    }
}

fn bind_socket(config: &ListenerConfig) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(config.addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    if let Err(err) = socket.set_recv_buffer_size(config.recv_buffer_bytes) {
        warn!(requested = config.recv_buffer_bytes, error = %err, "could not enlarge UDP receive buffer");
    }
    match socket.recv_buffer_size() {
        Ok(effective) => debug!(
            requested = config.recv_buffer_bytes,
            effective, "UDP receive buffer configured"
        ),
        Err(err) => debug!(error = %err, "could not read UDP receive buffer size"),
    }
    socket.set_nonblocking(true)?;
    socket.bind(&config.addr.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> ListenerConfig {
        ListenerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            recv_buffer_bytes: 256 * 1024,
            recv_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn datagrams_are_queued_untouched() {
        let queue = Arc::new(IngestQueue::new(8));
        let metrics = PipelineMetrics::unregistered().unwrap();
        let ingestor = Ingestor::bind(&loopback(), queue.clone(), metrics.clone()).unwrap();
        let target = ingestor.local_addr();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(ingestor.run(rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"not a telemetry packet", target).await.unwrap();

        let datagram = queue
            .pop_timeout(Duration::from_secs(2))
            .await
            .expect("datagram queued");
        assert_eq!(&datagram[..], b"not a telemetry packet");
        assert_eq!(metrics.received_total(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("ingestor observed shutdown")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_queue_drops_new_datagrams() {
        let queue = Arc::new(IngestQueue::new(2));
        let metrics = PipelineMetrics::unregistered().unwrap();
        let ingestor = Ingestor::bind(&loopback(), queue.clone(), metrics.clone()).unwrap();
        let target = ingestor.local_addr();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(ingestor.run(rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for n in 0u8..5 {
            sender.send_to(&[n], target).await.unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while queue.pushed_total() + queue.dropped_total() < 5
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_total(), 3);
        assert_eq!(metrics.dropped_total(), 3);
        assert_eq!(queue.try_pop().as_deref(), Some(&[0u8][..]));

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_conflict_is_a_transport_fault() {
        let holder = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let config = ListenerConfig {
            addr: holder.local_addr().unwrap(),
            ..loopback()
        };
        let err = Ingestor::bind(
            &config,
            Arc::new(IngestQueue::new(1)),
            PipelineMetrics::unregistered().unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.fault(), crate::error::PipelineFault::Transport);
    }
}
