//! Benchmark tests for qoeprobe-core operations
//!
//! Run with: cargo bench -p qoeprobe-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use url::Url;

use qoeprobe_core::aggregator::{MetricsAggregator, StreamSource};
use qoeprobe_core::manifest::{parse_entry, parse_media};
use qoeprobe_core::{MeasureConfig, MetricsSnapshot, PlaybackEngine, PlaybackEvent, QualityLevel, SessionCollector};

// ============================================================================
// Helpers
// ============================================================================

struct StaticEngine;

impl PlaybackEngine for StaticEngine {
    fn media_bytes_transferred(&self) -> Option<u64> {
        Some(1_000_000)
    }

    fn element_width(&self) -> Option<u32> {
        Some(1280)
    }
}

fn event_stream(len: usize) -> Vec<PlaybackEvent> {
    let mut events = vec![
        PlaybackEvent::QualityAdded(QualityLevel::new(320, 400_000)),
        PlaybackEvent::QualityAdded(QualityLevel::new(640, 1_000_000)),
        PlaybackEvent::QualityAdded(QualityLevel::new(1280, 2_400_000)),
        PlaybackEvent::Play,
    ];
    for i in 0..len {
        events.push(match i % 6 {
            0 => PlaybackEvent::RequestIssued,
            1 => PlaybackEvent::RequestCompleted { failed: i % 7 == 0 },
            2 => PlaybackEvent::QualityChanged { selected_index: i % 3 },
            3 => PlaybackEvent::Waiting,
            4 => PlaybackEvent::Playing,
            _ => PlaybackEvent::RequestIssued,
        });
    }
    events
}

fn generate_hls_master(variant_count: usize) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for i in 0..variant_count {
        let width = 320 * (i + 1);
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\nvariant{}/index.m3u8\n",
            400_000 * (i + 1),
            width,
            width * 9 / 16,
            i
        ));
    }
    playlist
}

fn generate_hls_media(segment_count: usize) -> String {
    let mut playlist =
        String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:0\n");
    for i in 0..segment_count {
        playlist.push_str(&format!("#EXTINF:4.0,\nseg{}.ts\n", i));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

// ============================================================================
// Collector
// ============================================================================

fn bench_event_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let _guard = rt.enter();
    let url = Url::parse("https://cdn.example.com/master.m3u8").unwrap();

    let mut group = c.benchmark_group("event_dispatch");
    for len in [100usize, 1_000, 10_000] {
        let events = event_stream(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| {
                let mut collector = SessionCollector::new(url.clone(), MeasureConfig::default());
                collector.attach(StaticEngine).unwrap();
                for event in events {
                    black_box(collector.handle(event.clone()));
                }
                black_box(collector.record())
            })
        });
    }
    group.finish();
}

// ============================================================================
// Aggregation
// ============================================================================

fn bench_aggregation(c: &mut Criterion) {
    let sources: Vec<StreamSource> = (0..20)
        .map(|i| StreamSource::new(format!("https://cdn{}.example.com/master.m3u8", i), "Bench"))
        .collect();
    let snapshot = MetricsSnapshot {
        time_to_first_byte_ms: 120.0,
        throughput_bps: 8_000_000.0,
        stall_count: 2,
        ..Default::default()
    };

    let mut group = c.benchmark_group("aggregation");
    for sessions in [10usize, 100] {
        group.bench_with_input(BenchmarkId::new("append", sessions), &sessions, |b, &sessions| {
            b.iter(|| {
                let mut agg = MetricsAggregator::new();
                for i in 0..sessions {
                    agg.append_at(&sources[i % sources.len()], &snapshot, i as i64);
                }
                black_box(agg.len())
            })
        });
    }
    group.finish();
}

// ============================================================================
// Playlist parsing
// ============================================================================

fn bench_playlist_parsing(c: &mut Criterion) {
    let base = Url::parse("https://cdn.example.com/vod/master.m3u8").unwrap();
    let master = generate_hls_master(8);
    let media = generate_hls_media(500);

    let mut group = c.benchmark_group("playlist_parsing");
    group.bench_function("master_8_variants", |b| {
        b.iter(|| parse_entry(black_box(master.as_bytes()), &base))
    });
    group.bench_function("media_500_segments", |b| {
        b.iter(|| parse_media(black_box(media.as_bytes()), &base))
    });
    group.finish();
}

criterion_group!(benches, bench_event_dispatch, bench_aggregation, bench_playlist_parsing);
criterion_main!(benches);
