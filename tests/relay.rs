//! Stream fan-out and subscription manager scenarios.

mod common;

use common::make_packet;
use seis_relay::relay::{StreamOptions, SubscriberId, SubscriptionManager};

#[test]
fn fan_out_two_subscribers_in_publish_order() {
    let manager = SubscriptionManager::new(StreamOptions::default());
    let base = 1_700_000_000_000_000i64;

    // Initial packet creates the stream.
    manager
        .enqueue_packet(make_packet("UU", "CWU", "HHZ", "01", 100.0, 200, base))
        .unwrap();

    // Both subscribers ask for the stream by name after it exists and are
    // promoted immediately; neither receives past data on a late join, so
    // publish four more and check order instead.
    let a = SubscriberId::next();
    let b = SubscriberId::next();
    manager.subscribe(a, &["UU.CWU.HHZ.01".to_string()]).unwrap();
    manager.subscribe(b, &["UU.CWU.HHZ.01".to_string()]).unwrap();

    for i in 1..=4i64 {
        manager
            .enqueue_packet(make_packet(
                "UU",
                "CWU",
                "HHZ",
                "01",
                100.0,
                200,
                base + i * 2_000_000,
            ))
            .unwrap();
    }

    for id in [a, b] {
        let mut times = Vec::new();
        loop {
            let batch = manager.get_packets(id);
            if batch.is_empty() {
                break;
            }
            times.extend(batch.iter().map(|p| p.start_time_us));
        }
        assert_eq!(
            times,
            vec![
                base + 2_000_000,
                base + 4_000_000,
                base + 6_000_000,
                base + 8_000_000
            ]
        );
    }

    manager.unsubscribe_from_all(a);
    manager.unsubscribe_from_all(b);
    assert_eq!(manager.subscriber_count(), 0);
}

#[test]
fn pending_subscriber_receives_seed_packet() {
    let manager = SubscriptionManager::new(StreamOptions::default());
    let id = SubscriberId::next();
    manager
        .subscribe(id, &["UU.CWU.HHZ.01".to_string()])
        .unwrap();

    let base = 1_700_000_000_000_000i64;
    manager
        .enqueue_packet(make_packet("UU", "CWU", "HHZ", "01", 100.0, 200, base))
        .unwrap();

    // Promotion from pending enqueues the stream's first packet, so the
    // subscriber sees all five packets.
    for i in 1..=4i64 {
        manager
            .enqueue_packet(make_packet(
                "UU",
                "CWU",
                "HHZ",
                "01",
                100.0,
                200,
                base + i * 2_000_000,
            ))
            .unwrap();
    }

    let mut count = 0;
    loop {
        let batch = manager.get_packets(id);
        if batch.is_empty() {
            break;
        }
        count += batch.len();
    }
    assert_eq!(count, 5);
}

#[test]
fn subscribe_to_all_follows_future_streams() {
    let manager = SubscriptionManager::new(StreamOptions::default());
    let id = SubscriberId::next();
    manager.subscribe_to_all(id);

    let base = 1_700_000_000_000_000i64;
    for station in ["CWU", "CTU", "SPU"] {
        manager
            .enqueue_packet(make_packet("UU", station, "HHZ", "01", 100.0, 200, base))
            .unwrap();
    }

    // One seed packet per newly created stream.
    let batch = manager.get_packets(id);
    assert_eq!(batch.len(), 3);
    for station in ["CWU", "CTU", "SPU"] {
        assert!(manager.is_subscribed(id, &format!("UU.{}.HHZ.01", station)));
    }
}

#[test]
fn slow_subscriber_loses_oldest_packets() {
    let manager = SubscriptionManager::new(StreamOptions { max_queue_size: 4 });
    let id = SubscriberId::next();
    manager.subscribe_to_all(id);

    let base = 1_700_000_000_000_000i64;
    for i in 0..10i64 {
        manager
            .enqueue_packet(make_packet(
                "UU",
                "CWU",
                "HHZ",
                "01",
                100.0,
                200,
                base + i * 2_000_000,
            ))
            .unwrap();
    }

    // Queue capacity 4: only the newest four survive, still in order.
    let mut times = Vec::new();
    loop {
        let batch = manager.get_packets(id);
        if batch.is_empty() {
            break;
        }
        times.extend(batch.iter().map(|p| p.start_time_us));
    }
    assert_eq!(
        times,
        vec![
            base + 12_000_000,
            base + 14_000_000,
            base + 16_000_000,
            base + 18_000_000
        ]
    );
}

#[test]
fn unsubscribe_from_all_clears_every_trace() {
    let manager = SubscriptionManager::new(StreamOptions::default());
    let id = SubscriberId::next();
    let base = 1_700_000_000_000_000i64;

    manager
        .enqueue_packet(make_packet("UU", "CWU", "HHZ", "01", 100.0, 200, base))
        .unwrap();
    manager.subscribe_to_all(id);
    manager
        .subscribe(id, &["UU.FUTURE.HHZ.01".to_string()])
        .unwrap();

    manager.unsubscribe_from_all(id);
    assert!(!manager.is_subscribed(id, "UU.CWU.HHZ.01"));
    assert!(manager.get_packets(id).is_empty());
    assert_eq!(manager.subscriber_count(), 0);

    // The pending entries went too: a stream arriving later finds nobody.
    manager
        .enqueue_packet(make_packet("UU", "FUTURE", "HHZ", "01", 100.0, 200, base))
        .unwrap();
    assert!(!manager.is_subscribed(id, "UU.FUTURE.HHZ.01"));
    assert_eq!(manager.subscriber_count(), 0);
}
