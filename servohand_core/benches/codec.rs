use std::collections::BTreeMap;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use servohand_core::playback::interpolate;
use servohand_core::protocol::{self, checksum, encode_word};
use servohand_core::recording::RecordingFrame;

// Status packet as a servo would answer a present-position read.
fn status_reply(id: u8, value: i16) -> Vec<u8> {
    let [lo, hi] = encode_word(value);
    let mut p = vec![0xFF, 0xFF, id, 4, 0, lo, hi];
    p.push(checksum(&p[2..]));
    p
}

fn hand_frame(t: f64, offset: i32) -> RecordingFrame {
    let positions: BTreeMap<u8, i32> = (1..=17u8).map(|id| (id, i32::from(id) * 100 + offset)).collect();
    RecordingFrame {
        timestamp: t,
        positions,
    }
}

fn sample_size(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // BENCH_SAMPLE_SIZE=10 cargo bench -p servohand_core --bench codec
    match std::env::var("BENCH_SAMPLE_SIZE").ok().and_then(|s| s.parse::<usize>().ok()) {
        Some(n) => {
            g.sample_size(n.max(10));
        }
        None => {
            g.sample_size(50);
        }
    }
}

pub fn bench_packets(c: &mut Criterion) {
    let mut g = c.benchmark_group("packets");
    sample_size(&mut g);

    g.bench_function("read_packet", |b| {
        b.iter(|| protocol::read_packet(black_box(7), black_box(56), black_box(2)))
    });

    let block = [10u8, 0xF4, 0x01, 0xE8, 0x03, 0xBC, 0x02];
    let entries: Vec<(u8, &[u8])> = (1..=17u8).map(|id| (id, &block[..])).collect();
    g.bench_function("sync_write_17", |b| {
        b.iter(|| protocol::sync_write_packet(black_box(41), black_box(7), black_box(&entries)))
    });

    let reply = status_reply(7, -1234);
    g.bench_function("parse_status", |b| {
        b.iter(|| {
            let status = protocol::parse_status(black_box(&reply), 7, 2);
            black_box(status.map(|s| s.data.len()))
        })
    });
    g.finish();
}

pub fn bench_interpolation(c: &mut Criterion) {
    let mut g = c.benchmark_group("interpolation");
    sample_size(&mut g);
    let a = hand_frame(0.0, 0);
    let b = hand_frame(1.0, 900);
    g.bench_function("full_hand_20_steps", |bch| {
        bch.iter(|| {
            for k in 1..=20 {
                black_box(interpolate(&a, &b, f64::from(k) / 20.0));
            }
        })
    });
    g.finish();
}

criterion_group!(codec, bench_packets, bench_interpolation);
criterion_main!(codec);
