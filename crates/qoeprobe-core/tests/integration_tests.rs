//! Integration tests for QoeProbe Core

use qoeprobe_core::{
    report::{write_report, MetricsReport},
    DeviceInfo, EngineHandle, HeadlessPlayer, HttpFirstByteProbe, HttpTransport, MeasureConfig,
    MetricsAggregator, MetricsSession, ObservedTransport, PlaybackEngine, PlaybackEvent,
    PlayerConfig, QualityLevel, SessionCollector, SourceCatalog, StreamSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::advance;
use url::Url;

// =============================================================================
// Helpers
// =============================================================================

#[derive(Clone, Default)]
struct TestEngine {
    bytes: Arc<AtomicU64>,
    width: Option<u32>,
}

impl PlaybackEngine for TestEngine {
    fn media_bytes_transferred(&self) -> Option<u64> {
        Some(self.bytes.load(Ordering::SeqCst))
    }

    fn element_width(&self) -> Option<u32> {
        self.width
    }
}

fn collector(width: Option<u32>) -> SessionCollector<TestEngine> {
    let url = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
    let mut collector = SessionCollector::new(url, MeasureConfig::default());
    collector
        .attach(TestEngine { width, ..Default::default() })
        .unwrap();
    collector
}

/// Minimal HTTP/1.1 server answering each connection from a path table
async fn serve(routes: HashMap<&'static str, (u16, Vec<u8>)>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = routes
                    .get(path.as_str())
                    .cloned()
                    .unwrap_or((404, Vec::new()));
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
            });
        }
    });

    Url::parse(&format!("http://{}/", addr)).unwrap()
}

// =============================================================================
// Collector scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stall_count_and_latency_mean() {
    let mut c = collector(None);
    for ms in [120u64, 380, 500] {
        c.handle(PlaybackEvent::Waiting);
        advance(Duration::from_millis(ms)).await;
        c.handle(PlaybackEvent::Playing);
    }

    let snap = c.snapshot();
    assert_eq!(snap.stall_count, 3);
    assert!((snap.latency_ms - 1000.0 / 3.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_upscaling_toggle_accumulates() {
    let mut c = collector(Some(1000));
    for width in [850, 950, 1000] {
        c.handle(PlaybackEvent::QualityAdded(QualityLevel::new(width, width as u64 * 1000)));
    }
    c.handle(PlaybackEvent::Play);

    c.handle(PlaybackEvent::QualityChanged { selected_index: 0 });
    advance(Duration::from_secs(2)).await;
    c.handle(PlaybackEvent::QualityChanged { selected_index: 1 });
    advance(Duration::from_secs(5)).await;
    c.handle(PlaybackEvent::QualityChanged { selected_index: 0 });
    advance(Duration::from_secs(1)).await;
    c.handle(PlaybackEvent::Pause);

    assert!((c.snapshot().upscaling_time_secs - 3.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn test_replay_is_deterministic() {
    async fn replay() -> (f64, f64) {
        let mut c = collector(Some(1280));
        for (i, width) in [320u32, 640, 1280].iter().enumerate() {
            c.handle(PlaybackEvent::QualityAdded(QualityLevel::new(*width, (i as u64 + 1) * 750_000)));
        }
        c.handle(PlaybackEvent::Play);
        for index in [0usize, 2, 1, 2, 0] {
            c.handle(PlaybackEvent::QualityChanged { selected_index: index });
            c.handle(PlaybackEvent::RequestIssued);
            c.handle(PlaybackEvent::RequestCompleted { failed: index == 1 });
            advance(Duration::from_millis(300)).await;
        }
        let snap = c.record();
        (snap.average_bitrate_kbps, snap.error_rate)
    }

    let first = replay().await;
    let second = replay().await;
    assert_eq!(first, second);
    assert!((first.0 - 1500.0).abs() < 1e-9);
    assert!((first.1 - 20.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_ten_requests_two_failures() {
    let mut c = collector(None);
    for i in 0..10 {
        c.handle(PlaybackEvent::RequestIssued);
        c.handle(PlaybackEvent::RequestCompleted { failed: i % 5 == 0 });
    }
    let snap = c.snapshot();
    assert_eq!(snap.request_count, 10);
    assert_eq!(snap.failed_request_count, 2);
    assert!((snap.error_rate - 20.0).abs() < 1e-9);
}

// =============================================================================
// Aggregation and reports
// =============================================================================

#[test]
fn test_reset_keeps_other_sources() {
    let catalog = SourceCatalog::default();
    let sources: Vec<StreamSource> = catalog.groups()[0].videos.clone();

    let mut agg = MetricsAggregator::new();
    for (i, source) in sources.iter().enumerate() {
        let snapshot = qoeprobe_core::MetricsSnapshot {
            time_to_first_byte_ms: 100.0 * (i + 1) as f64,
            stall_count: i as u32,
            ..Default::default()
        };
        agg.append_at(source, &snapshot, 1_700_000_000_000);
    }

    agg.reset(&sources[1].video_url).unwrap();

    let reset = agg.get(&sources[1].video_url).unwrap();
    assert_eq!(reset.source.cdn_provider, "VNetwork");
    assert_eq!(reset.record_count(), 0);
    assert_eq!(reset.time_to_first_byte.average_value, 0.0);

    let untouched = agg.get(&sources[3].video_url).unwrap();
    assert_eq!(untouched.time_to_first_byte.average_value, 400.0);
    assert_eq!(untouched.stall_count.records.len(), 1);
}

#[test]
fn test_report_file_shape() {
    let mut agg = MetricsAggregator::new();
    let source = StreamSource::new("https://a.example.com/master.m3u8", "Unknown");
    agg.append_at(&source, &Default::default(), 5);

    let report = MetricsReport::new(
        DeviceInfo {
            device_id: "device".into(),
            device_name: "linux x86_64".into(),
            device_type: "desktop".into(),
            isp_name: "unknown".into(),
            network_type: "WIFI".into(),
        },
        agg.into_metrics(),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = write_report(dir.path(), &report).unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("metrics-report-") && name.ends_with("Z.json"));

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["device_info"]["ISP_name"], "unknown");
    assert_eq!(value["metrics"][0]["throughput"]["unit"], "mbps");
}

// =============================================================================
// End to end over HTTP
// =============================================================================

#[tokio::test]
async fn test_measure_stream_over_http() {
    let playlist = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:1
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:0.2,
seg0.ts
#EXTINF:0.2,
seg1.ts
#EXTINF:0.2,
seg2.ts
#EXT-X-ENDLIST
";
    let mut routes = HashMap::new();
    routes.insert("/index.m3u8", (200, playlist.as_bytes().to_vec()));
    routes.insert("/seg0.ts", (200, vec![0u8; 2048]));
    routes.insert("/seg1.ts", (500, Vec::new()));
    routes.insert("/seg2.ts", (200, vec![0u8; 2048]));
    let base = serve(routes).await;
    let url = base.join("index.m3u8").unwrap();

    let player_config = PlayerConfig {
        watch_duration: 0.0,
        ..Default::default()
    };
    let measure = MeasureConfig {
        min_measure_time: 0.1,
        auto_record: true,
        ..Default::default()
    };

    let http = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let stats = http.stats();
    let engine = EngineHandle::new(stats.clone(), player_config.viewport_width);
    let probe = Arc::new(HttpFirstByteProbe::new(Duration::from_secs(5)).unwrap());
    let (sink, mut records) = mpsc::unbounded_channel();

    let session = MetricsSession::attach(url.clone(), engine, probe, measure, Some(sink)).unwrap();
    let transport = ObservedTransport::new(http, session.events());
    let player = HeadlessPlayer::new(url, transport, stats.clone(), session.events(), player_config);

    let summary = player.run().await.unwrap();
    assert!(summary.ended);
    assert_eq!(summary.segments_loaded, 2);
    assert_eq!(summary.segments_failed, 1);

    let snapshot = tokio::time::timeout(Duration::from_secs(5), records.recv())
        .await
        .unwrap()
        .unwrap();
    // playlist + 3 segments, one failing
    assert_eq!(snapshot.request_count, 4);
    assert!((snapshot.error_rate - 25.0).abs() < 1e-9);
    assert!(!snapshot.throughput_measuring);
    assert!(snapshot.throughput_bps > 0.0);
    assert_eq!(stats.media_bytes_transferred(), 4096);

    session.detach().await.unwrap();
}

#[tokio::test]
async fn test_failed_entry_playlist_still_recorded() {
    let mut routes = HashMap::new();
    routes.insert("/index.m3u8", (500, Vec::new()));
    let base = serve(routes).await;
    let url = base.join("index.m3u8").unwrap();

    let player_config = PlayerConfig::default();
    let http = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let stats = http.stats();
    let engine = EngineHandle::new(stats.clone(), player_config.viewport_width);
    let probe = Arc::new(HttpFirstByteProbe::new(Duration::from_secs(5)).unwrap());

    let session =
        MetricsSession::attach(url.clone(), engine, probe, MeasureConfig::default(), None).unwrap();
    let transport = ObservedTransport::new(http, session.events());
    let player = HeadlessPlayer::new(url, transport, stats, session.events(), player_config);

    assert!(player.run().await.is_err());

    // The failed request reaches the collector before the record
    let snapshot = session.record().await.unwrap();
    assert_eq!(snapshot.request_count, 1);
    assert_eq!(snapshot.failed_request_count, 1);
    assert!((snapshot.error_rate - 100.0).abs() < 1e-9);

    let mut aggregator = MetricsAggregator::new();
    let metric = aggregator.append(&StreamSource::new(base.as_str(), "Unknown"), &snapshot);
    assert_eq!(metric.record_count(), 1);
    assert!((metric.error_rate.average_value - 100.0).abs() < 1e-9);

    session.detach().await.unwrap();
}
