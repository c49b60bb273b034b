//! Playlist parse and rewrite throughput
//!
//! Run with: cargo bench --bench playlist_rewrite

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hls_relay::hls::{PlaylistRewriter, ProxyUriBuilder, RewritePolicy, parse};
use std::fmt::Write;

const BASE: &str = "https://cdn.example/live/stream/index.m3u8";

fn media_playlist(segments: usize) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:1000\n\
         #EXT-X-KEY:METHOD=AES-128,URI=\"keys/current.key\",IV=0x0000000000000000000000000000abcd\n\
         #EXT-X-MAP:URI=\"init.mp4\"\n",
    );
    for i in 0..segments {
        let _ = write!(
            out,
            "#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:{:02}:{:02}.000Z\n#EXTINF:6.006,\nsegment_{i:05}.m4s?token=abc\n",
            (i * 6 / 60) % 60,
            (i * 6) % 60
        );
    }
    out
}

fn master_playlist() -> &'static str {
    "#EXTM3U\n\
     #EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aac\",NAME=\"English\",DEFAULT=YES,URI=\"audio/en.m3u8\"\n\
     #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,AUDIO=\"aac\"\n360p/index.m3u8\n\
     #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720,AUDIO=\"aac\"\n720p/index.m3u8\n\
     #EXT-X-STREAM-INF:BANDWIDTH=6000000,RESOLUTION=1920x1080,AUDIO=\"aac\"\n1080p/index.m3u8\n\
     #EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=200000,URI=\"iframes/index.m3u8\"\n"
}

fn rewriter() -> PlaylistRewriter {
    PlaylistRewriter::new(
        RewritePolicy::default(),
        ProxyUriBuilder::new("https://relay.example", "/o", "u"),
    )
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for segments in [10, 100, 1000] {
        let playlist = media_playlist(segments);
        group.bench_with_input(BenchmarkId::from_parameter(segments), &playlist, |b, p| {
            b.iter(|| black_box(parse(black_box(p), BASE)))
        });
    }
    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let rewriter = rewriter();

    let mut group = c.benchmark_group("rewrite_media");
    for segments in [10, 100, 1000] {
        let playlist = media_playlist(segments);
        group.bench_with_input(BenchmarkId::from_parameter(segments), &playlist, |b, p| {
            b.iter(|| black_box(rewriter.rewrite(black_box(p), BASE)))
        });
    }
    group.finish();

    c.bench_function("rewrite_master", |b| {
        b.iter(|| black_box(rewriter.rewrite(black_box(master_playlist()), BASE)))
    });

    let playlist = media_playlist(100);
    c.bench_function("fallback_rewrite_100", |b| {
        b.iter(|| black_box(rewriter.fallback_rewrite(black_box(&playlist), BASE)))
    });
}

criterion_group!(benches, bench_parse, bench_rewrite);
criterion_main!(benches);
