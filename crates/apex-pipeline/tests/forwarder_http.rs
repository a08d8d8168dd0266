//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "tests"
//! apex_type: "test"
//! apex_scope: "code"
//! apex_description: "HecForwarder against a local fake collector."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use apex_codec::{TelemetryReading, VehicleId};
use apex_common::{CollectorConfig, SecretToken};
use apex_compliance::{evaluate, ComplianceLimits};
use apex_pipeline::{EventEnvelope, EventSink, HecEvent, HecForwarder, SendError};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Clone)]
struct FakeCollector {
    status: StatusCode,
    delay: Duration,
    received: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl FakeCollector {
    fn answering(status: StatusCode) -> Self {
        Self {
            status,
            delay: Duration::ZERO,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

async fn collect(
    State(collector): State<FakeCollector>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    if !collector.delay.is_zero() {
        tokio::time::sleep(collector.delay).await;
    }
    collector.received.lock().push((headers, body));
    let text = if collector.status.is_success() {
        r#"{"text":"Success","code":0}"#
    } else {
        r#"{"text":"Invalid token","code":4}"#
    };
    (collector.status, text)
}

async fn serve(collector: FakeCollector) -> SocketAddr {
    let app = Router::new()
        .route("/services/collector/event", post(collect))
        .with_state(collector);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn collector_config(addr: SocketAddr) -> CollectorConfig {
    let mut config = CollectorConfig::with_token(
        format!("http://{addr}/services/collector/event"),
        SecretToken::new("secret-token"),
    );
    config.index = Some("project_apex".to_owned());
    config
}

fn critical_event(config: &CollectorConfig) -> HecEvent {
    let reading = TelemetryReading {
        timestamp: 1_767_225_600.25,
        vehicle_id: VehicleId::new("CAR_1").unwrap(),
        speed_kph: 329.7,
        ride_height_m: 0.0275,
        vertical_velocity: 1.8,
        engine_temp_c: 110.0,
    };
    let verdict = evaluate(&reading, &ComplianceLimits::default());
    EventEnvelope::from_config(config).event(&reading, &verdict)
}

#[tokio::test(flavor = "multi_thread")]
async fn posts_json_with_hec_authorization() {
    let collector = FakeCollector::answering(StatusCode::OK);
    let addr = serve(collector.clone()).await;
    let config = collector_config(addr);
    let forwarder = HecForwarder::new(&config).unwrap();

    forwarder.send(&critical_event(&config)).await.unwrap();

    let received = collector.received.lock();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];
    assert_eq!(headers["authorization"], "Splunk secret-token");
    assert!(headers["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
    assert_eq!(body["time"], 1_767_225_600.25);
    assert_eq!(body["host"], "apex-edge-node");
    assert_eq!(body["source"], "apex_edge_bridge");
    assert_eq!(body["index"], "project_apex");
    assert_eq!(body["event"]["car_id"], "CAR_1");
    assert_eq!(body["event"]["speed_kph"], 330);
    assert_eq!(body["event"]["compliance_status"], "CRITICAL_THERMAL_SQUAT");
    assert_eq!(body["event"]["thermal_mode"], "HIGH_COMPRESSION");
    assert_eq!(body["event"]["rear_rh_mm"], 27.5);
}

#[tokio::test(flavor = "multi_thread")]
async fn bearer_scheme_is_configurable() {
    let collector = FakeCollector::answering(StatusCode::OK);
    let addr = serve(collector.clone()).await;
    let mut config = collector_config(addr);
    config.auth_scheme = "Bearer".to_owned();
    let forwarder = HecForwarder::new(&config).unwrap();

    forwarder.send(&critical_event(&config)).await.unwrap();
    assert_eq!(
        collector.received.lock()[0].0["authorization"],
        "Bearer secret-token"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn non_success_status_is_rejected() {
    let addr = serve(FakeCollector::answering(StatusCode::FORBIDDEN)).await;
    let config = collector_config(addr);
    let forwarder = HecForwarder::new(&config).unwrap();

    let err = forwarder.send(&critical_event(&config)).await.unwrap_err();
    match err {
        SendError::Rejected { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("Invalid token"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_collector_times_out() {
    let mut collector = FakeCollector::answering(StatusCode::OK);
    collector.delay = Duration::from_secs(2);
    let addr = serve(collector).await;
    let mut config = collector_config(addr);
    config.timeout = Duration::from_millis(100);
    let forwarder = HecForwarder::new(&config).unwrap();

    let started = std::time::Instant::now();
    let err = forwarder.send(&critical_event(&config)).await.unwrap_err();
    assert_eq!(err, SendError::Timeout(Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_a_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = collector_config(addr);
    let forwarder = HecForwarder::new(&config).unwrap();

    let err = forwarder.send(&critical_event(&config)).await.unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(!err.to_string().contains("secret-token"));
}
