//! Sanitizer pipeline scenarios exercised end to end.

mod common;

use common::make_packet;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use seis_relay::packet::now_us;
use seis_relay::sanitizer::{
    DuplicateDetector, DuplicateDetectorOptions, ExpiredDetector, ExpiredDetectorOptions,
    FutureDetector, FutureDetectorOptions,
};
use std::time::Duration;

#[test]
fn expired_boundary() {
    let detector = ExpiredDetector::new(ExpiredDetectorOptions {
        max_expired_time: Duration::from_millis(10),
        ..Default::default()
    })
    .unwrap();

    let fresh = make_packet("UU", "ELU", "EHZ", "01", 100.0, 100, now_us() - 9_000);
    assert!(detector.allow(&fresh));

    let stale = make_packet("UU", "ELU", "EHZ", "01", 100.0, 100, now_us() - 11_000);
    assert!(!detector.allow(&stale));
}

#[test]
fn future_boundary_one_sample_zero_latency() {
    let detector = FutureDetector::new(FutureDetectorOptions {
        max_future_time: Duration::ZERO,
        ..Default::default()
    })
    .unwrap();

    // One sample at 100 Hz: end time equals start time, so "now" passes
    // even with a zero allowance.
    let packet = make_packet("UU", "MOUT", "HHZ", "01", 100.0, 1, now_us());
    assert!(detector.allow(&packet));

    // Ten samples at 1 Hz starting now reach nine seconds into the future.
    let future = make_packet("UU", "MOUT", "HHZ", "01", 1.0, 10, now_us());
    assert!(!detector.allow(&future));
}

#[test]
fn duplicate_exact_match_at_100_hz() {
    let detector = DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(15)).unwrap();
    let start = now_us() - 600_000_000;

    let first = make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, start);
    assert!(detector.allow(&first));

    // Replayed 10 ms later: inside the 15 ms tolerance at 100 Hz.
    let replay = make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, start + 10_000);
    assert!(!detector.allow(&replay));
}

#[test]
fn gps_slip_overlap_rejected() {
    let detector = DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(15)).unwrap();
    let t = now_us() - 600_000_000;

    // One packet spanning [t, t + 3 s].
    assert!(detector.allow(&make_packet("UU", "CTU", "HHZ", "01", 100.0, 301, t)));

    // The slipped copy spans [t + 1.5 s, t + 4.5 s].
    assert!(!detector.allow(&make_packet(
        "UU",
        "CTU",
        "HHZ",
        "01",
        100.0,
        301,
        t + 1_500_000
    )));
}

#[test]
fn out_of_order_back_fill_accepted() {
    let detector = DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(15)).unwrap();
    let base = now_us() - 600_000_000;

    // Fifteen 1 s packets with one second missing in the middle.
    for i in 0..16i64 {
        if i == 7 {
            continue;
        }
        assert!(detector.allow(&make_packet(
            "UU",
            "CTU",
            "HHZ",
            "01",
            100.0,
            100,
            base + i * 1_000_000
        )));
    }

    // The straggler fits exactly in the gap.
    assert!(detector.allow(&make_packet(
        "UU",
        "CTU",
        "HHZ",
        "01",
        100.0,
        100,
        base + 7_000_000
    )));
}

#[test]
fn monotone_stream_longer_than_capacity_fully_accepted() {
    let capacity = 15usize;
    let detector =
        DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(capacity)).unwrap();
    let base = now_us() - 600_000_000;

    // Twice the capacity in strictly increasing order: everything passes,
    // and replaying any of the last `capacity` packets trips the detector.
    let mut starts = Vec::new();
    for i in 0..(2 * capacity) as i64 {
        let start = base + i * 3_000_000;
        assert!(detector.allow(&make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, start)));
        starts.push(start);
    }
    for &start in starts.iter().rev().take(capacity) {
        assert!(!detector.allow(&make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, start)));
    }
}

#[test]
fn shuffled_prefix_accepted_exactly_once() {
    let detector = DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(32)).unwrap();
    let base = now_us() - 600_000_000;

    let mut packets: Vec<_> = (0..15i64)
        .map(|i| make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, base + i * 3_000_000))
        .collect();
    let mut rng = rand::rngs::StdRng::seed_from_u64(188_382);
    packets.shuffle(&mut rng);

    for packet in &packets {
        assert!(detector.allow(packet));
    }
    for packet in &packets {
        assert!(!detector.allow(packet));
    }
}

#[test]
fn every_other_packet_is_a_duplicate() {
    let detector = DuplicateDetector::new(DuplicateDetectorOptions::with_buffer_size(15)).unwrap();
    let base = now_us() - 600_000_000;

    for i in 0..30i64 {
        let packet = make_packet("UU", "CTU", "HHZ", "01", 100.0, 300, base + i * 3_000_000);
        assert!(detector.allow(&packet));
        assert!(!detector.allow(&packet));
    }
}
