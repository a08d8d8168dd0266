//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "tests"
//! apex_type: "test"
//! apex_scope: "code"
//! apex_description: "Validator service driven over loopback UDP."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apex_codec::{encode, TelemetryReading, VehicleId};
use apex_common::{DrainPolicy, SecretToken, ValidatorConfig};
use apex_compliance::ComplianceStatus;
use apex_pipeline::{EventSink, HecEvent, PipelineFault, SendResult, ValidatorService};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<HecEvent>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn send(&self, event: &HecEvent) -> SendResult {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct SlowSink {
    delay: Duration,
    delivered: Mutex<usize>,
}

#[async_trait]
impl EventSink for SlowSink {
    async fn send(&self, _event: &HecEvent) -> SendResult {
        tokio::time::sleep(self.delay).await;
        *self.delivered.lock() += 1;
        Ok(())
    }
}

fn config(extra: &[(&str, &str)]) -> ValidatorConfig {
    let mut vars: HashMap<String, String> = [
        ("APEX_COLLECTOR_TOKEN", "test-token"),
        ("APEX_LISTEN_IP", "127.0.0.1"),
        ("APEX_LISTEN_PORT", "0"),
        ("APEX_RECV_TIMEOUT_MS", "50"),
        ("APEX_QUEUE_WAIT_MS", "50"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
    .collect();
    for (k, v) in extra {
        vars.insert((*k).to_owned(), (*v).to_owned());
    }
    ValidatorConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

fn packet(id: &str, timestamp: f64, vz: f32, temp: f32) -> Vec<u8> {
    encode(&TelemetryReading {
        timestamp,
        vehicle_id: VehicleId::new(id).unwrap(),
        speed_kph: 320.0,
        ride_height_m: 0.03,
        vertical_velocity: vz,
        engine_temp_c: temp,
    })
    .to_vec()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn alerts_always_forward_and_legal_readings_are_throttled() {
    let sink = Arc::new(RecordingSink::default());
    let service = ValidatorService::new(config(&[]))
        .with_sink(sink.clone())
        .start()
        .await
        .unwrap();
    let target = service.local_addr();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    sender
        .send_to(&packet("CAR_81", 100.00, 0.25, 90.0), target)
        .await
        .unwrap();
    sender
        .send_to(&packet("CAR_81", 100.01, 0.25, 90.0), target)
        .await
        .unwrap();
    sender
        .send_to(&packet("CAR_1", 100.01, 1.8, 110.0), target)
        .await
        .unwrap();
    sender.send_to(b"garbage", target).await.unwrap();

    let metrics = service.metrics().clone();
    wait_for(|| {
        metrics.verdicts_total("LEGAL") + metrics.verdicts_total("CRITICAL_THERMAL_SQUAT") == 3
            && metrics.decode_errors_total("bad_length") == 1
    })
    .await;

    let report = service.shutdown().await;
    assert_eq!(report.accepted, 4);
    assert_eq!(report.dropped, 0);
    assert_eq!(report.vehicles, 2);

    let events = sink.events.lock();
    assert_eq!(events.len(), 2, "one LEGAL forward plus the alert");
    assert_eq!(events[0].event.car_id, "CAR_81");
    assert_eq!(
        events[1].event.compliance_status,
        ComplianceStatus::CriticalThermalSquat
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_sink_never_blocks_ingest() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(200),
        delivered: Mutex::new(0),
    });
    let service = ValidatorService::new(config(&[
        ("APEX_QUEUE_CAPACITY", "4"),
        ("APEX_DRAIN_ON_SHUTDOWN", "false"),
    ]))
    .with_sink(sink.clone())
    .start()
    .await
    .unwrap();
    let target = service.local_addr();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for n in 0..40 {
        sender
            .send_to(&packet("CAR_1", f64::from(n), 1.8, 110.0), target)
            .await
            .unwrap();
    }

    let queue = service.queue().clone();
    wait_for(|| queue.pushed_total() + queue.dropped_total() >= 40).await;
    assert!(queue.dropped_total() > 0, "tail drop engaged");
    assert!(queue.len() <= queue.capacity());

    let report = tokio::time::timeout(Duration::from_secs(3), service.shutdown())
        .await
        .expect("shutdown completes within the sink deadline");
    assert_eq!(report.accepted + report.dropped, 40);
    assert!(report.abandoned <= 4);
    assert!((*sink.delivered.lock() as u64) < report.accepted);
}

#[tokio::test(flavor = "multi_thread")]
async fn drain_policy_processes_queued_datagrams() {
    let sink = Arc::new(RecordingSink::default());
    let cfg = config(&[("APEX_WORKERS", "2")]);
    assert_eq!(cfg.pipeline.drain, DrainPolicy::Drain);
    let service = ValidatorService::new(cfg)
        .with_sink(sink.clone())
        .start()
        .await
        .unwrap();
    let target = service.local_addr();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for n in 0..20 {
        sender
            .send_to(&packet("CAR_1", f64::from(n), 1.8, 110.0), target)
            .await
            .unwrap();
    }
    let queue = service.queue().clone();
    wait_for(|| queue.pushed_total() == 20).await;

    let report = service.shutdown().await;
    assert_eq!(report.abandoned, 0);
    assert_eq!(sink.events.lock().len(), 20);
    assert_eq!(report.forwarded, 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn placeholder_token_set_in_code_refuses_to_start() {
    let mut cfg = config(&[]);
    cfg.collector.token = SecretToken::new("REPLACE_WITH_SECURE_TOKEN");
    let err = ValidatorService::new(cfg)
        .with_sink(Arc::new(RecordingSink::default()))
        .start()
        .await
        .err()
        .expect("placeholder token must be refused");
    assert_eq!(err.fault(), PipelineFault::Configuration);
    assert!(err.to_string().contains("APEX_COLLECTOR_TOKEN"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_collector_url_refuses_to_start() {
    let cfg = config(&[("APEX_COLLECTOR_URL", "https://")]);
    let err = ValidatorService::new(cfg)
        .start()
        .await
        .err()
        .expect("collector URL without a host must be refused");
    assert_eq!(err.fault(), PipelineFault::Configuration);
    assert!(err.to_string().contains("APEX_COLLECTOR_URL"));
}
