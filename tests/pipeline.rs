//! End-to-end detection flow against an in-process upstream server:
//! poll -> dedup -> classify -> resolve image -> event log.

use anpr_dashboard::connection_notifier::{ConnectionNotifier, ConnectionStatus};
use anpr_dashboard::detection_pipeline::DetectionPipeline;
use anpr_dashboard::detection_source::HttpDetectionSource;
use anpr_dashboard::event_log_service::EventLogService;
use anpr_dashboard::event_sink;
use anpr_dashboard::image_resolver::HttpImageFetcher;
use anpr_dashboard::polling_orchestrator::{PollingConfig, PollingOrchestrator};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

#[derive(Clone, Default)]
struct Upstream {
    detections: Arc<RwLock<Value>>,
    failing: Arc<AtomicBool>,
    hits: Arc<AtomicUsize>,
}

async fn detections(State(upstream): State<Upstream>) -> impl IntoResponse {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if upstream.failing.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "down"}))).into_response();
    }
    Json(upstream.detections.read().await.clone()).into_response()
}

async fn processed_image() -> impl IntoResponse {
    ([("content-type", "image/jpeg")], vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9])
}

async fn raw_image() -> impl IntoResponse {
    ([("content-type", "image/jpeg")], vec![0xFF, 0xD8, 0x02, 0xFF, 0xD9])
}

async fn spawn_upstream(upstream: Upstream) -> String {
    let app = Router::new()
        .route("/api/detections", get(detections))
        .route("/site/Camara1/20240101/Procesado/in.jpg", get(processed_image))
        .route("/site/Camara2X/20240101/out.jpg", get(raw_image))
        .with_state(upstream);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Harness {
    polling: Arc<PollingOrchestrator>,
    notifier: Arc<ConnectionNotifier>,
    event_log: Arc<EventLogService>,
}

async fn start_pipeline(base: &str) -> Harness {
    let (sink, sink_rx) = event_sink::channel();
    let sink = Arc::new(sink);
    let event_log = Arc::new(EventLogService::default());
    event_log.clone().spawn(sink_rx);

    let notifier = Arc::new(ConnectionNotifier::new(sink.clone()));
    let source = Arc::new(
        HttpDetectionSource::new(format!("{}/api/detections", base), Duration::from_secs(2))
            .unwrap(),
    );
    let fetcher = Arc::new(HttpImageFetcher::new(base, Duration::from_secs(2)).unwrap());

    let (tx, rx) = mpsc::unbounded_channel();
    Arc::new(DetectionPipeline::new(fetcher, sink)).spawn(rx);

    let polling = Arc::new(PollingOrchestrator::new(
        source,
        notifier.clone(),
        PollingConfig {
            interval: Duration::from_millis(20),
            seen_capacity: 100,
        },
    ));
    polling.start(tx).await.unwrap();

    Harness {
        polling,
        notifier,
        event_log,
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_detections_reach_lane_panels_and_sidebar() {
    let upstream = Upstream::default();
    *upstream.detections.write().await = json!([
        {"absTime": "20240101080000000", "placa": "IN123", "lane": "1",
         "imageUrl": "/site/Camara1/20240101/Procesado/in.jpg"},
        {"absTime": "20240101080001000", "placa": "unknown", "lane": "2",
         "imageUrl": "/site/Camara2X/20240101/out.jpg"},
        {"absTime": "20240101080002000", "placa": "OUT456", "lane": "",
         "imageUrl": "/site/Camara2X/20240101/out.jpg"}
    ]);
    let base = spawn_upstream(upstream.clone()).await;
    let harness = start_pipeline(&base).await;

    let log = harness.event_log.clone();
    eventually("both panels", || {
        let log = log.clone();
        async move {
            let panels = log.panels().await;
            panels.entrance.is_some() && panels.exit.is_some()
        }
    })
    .await;

    let panels = harness.event_log.panels().await;
    let entrance = panels.entrance.unwrap();
    assert_eq!(entrance.plate, "IN123");
    assert_eq!(entrance.timestamp, "01/01/2024 08:00:00");

    // processed sibling is missing upstream, raw capture is the fallback
    let exit = panels.exit.unwrap();
    assert_eq!(exit.plate, "OUT456");
    assert_eq!(exit.image_url, "/site/Camara2X/20240101/out.jpg");
    assert_eq!(exit.image.as_slice(), &[0xFF, 0xD8, 0x02, 0xFF, 0xD9]);

    // wait a few more cycles: the same list must not be re-delivered
    let hits = upstream.hits.load(Ordering::SeqCst);
    eventually("more poll cycles", || {
        let upstream = upstream.clone();
        async move { upstream.hits.load(Ordering::SeqCst) >= hits + 3 }
    })
    .await;

    let recent = harness.event_log.recent(10).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].plate, "OUT456");
    assert_eq!(recent[0].camera, "Camara2");
    assert_eq!(harness.event_log.summary().await.captures, 1);

    harness.polling.stop();
}

#[tokio::test]
async fn test_outage_reported_once_and_recovery_once() {
    let upstream = Upstream::default();
    *upstream.detections.write().await = json!([]);
    upstream.failing.store(true, Ordering::SeqCst);
    let base = spawn_upstream(upstream.clone()).await;
    let harness = start_pipeline(&base).await;

    eventually("several failed cycles", || {
        let upstream = upstream.clone();
        async move { upstream.hits.load(Ordering::SeqCst) >= 3 }
    })
    .await;
    assert_eq!(harness.notifier.api_status().await, ConnectionStatus::Offline);

    let log = harness.event_log.clone();
    eventually("outage alert", || {
        let log = log.clone();
        async move { log.summary().await.api_alerts == 1 }
    })
    .await;

    upstream.failing.store(false, Ordering::SeqCst);
    let notifier = harness.notifier.clone();
    eventually("recovery", || {
        let notifier = notifier.clone();
        async move { notifier.api_status().await == ConnectionStatus::Online }
    })
    .await;

    let log = harness.event_log.clone();
    eventually("dashboard online", || {
        let log = log.clone();
        async move { log.summary().await.api_connected }
    })
    .await;
    assert_eq!(harness.event_log.summary().await.api_alerts, 1);

    harness.polling.stop();
}
