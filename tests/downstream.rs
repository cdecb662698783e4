//! Downstream server exercised over a real TCP connection.

mod common;

use common::make_packet;
use prost::Message;
use seis_relay::relay::{StreamOptions, SubscriptionManager};
use seis_relay::streaming::wire::{self, service, FrameReader};
use seis_relay::streaming::DownstreamServer;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Grabs an unused loopback port.
fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn request(request: service::client_request::Request) -> service::ClientRequest {
    service::ClientRequest {
        request: Some(request),
    }
}

fn send_and_receive(
    stream: &mut TcpStream,
    reader: &mut FrameReader,
    message: &service::ClientRequest,
) -> service::ServerReply {
    wire::write_frame(stream, message).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(frame) = reader
            .read_timeout(stream, Duration::from_millis(100))
            .unwrap()
        {
            return service::ServerReply::decode(frame).unwrap();
        }
        assert!(Instant::now() < deadline, "timed out waiting for a reply");
    }
}

#[test]
fn subscribe_fetch_unsubscribe_over_tcp() {
    let manager = Arc::new(SubscriptionManager::new(StreamOptions::default()));
    let running = Arc::new(AtomicBool::new(true));
    let port = free_port();
    let mut server = DownstreamServer::start(
        &format!("127.0.0.1:{}", port),
        Arc::clone(&manager),
        Arc::clone(&running),
    )
    .unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut reader = FrameReader::new();

    // Subscribe to a stream that does not exist yet.
    let reply = send_and_receive(
        &mut client,
        &mut reader,
        &request(service::client_request::Request::Subscribe(
            service::SubscribeRequest {
                stream_names: vec!["UU.CWU.HHZ.01".to_string()],
            },
        )),
    );
    assert!(matches!(
        reply.reply,
        Some(service::server_reply::Reply::Ack(_))
    ));

    // An empty subscribe request is refused.
    let reply = send_and_receive(
        &mut client,
        &mut reader,
        &request(service::client_request::Request::Subscribe(
            service::SubscribeRequest {
                stream_names: Vec::new(),
            },
        )),
    );
    assert!(matches!(
        reply.reply,
        Some(service::server_reply::Reply::Error(_))
    ));

    // The stream's first packet promotes the pending subscription.
    let base = 1_700_000_000_000_000i64;
    manager
        .enqueue_packet(make_packet("UU", "CWU", "HHZ", "01", 100.0, 200, base))
        .unwrap();

    let reply = send_and_receive(
        &mut client,
        &mut reader,
        &request(service::client_request::Request::Fetch(
            service::FetchRequest {},
        )),
    );
    match reply.reply {
        Some(service::server_reply::Reply::Packets(batch)) => {
            assert_eq!(batch.packets.len(), 1);
            let packet = wire::packet_from_wire(batch.packets[0].clone()).unwrap();
            assert_eq!(packet.name(), "UU.CWU.HHZ.01");
            assert_eq!(packet.start_time_us, base);
        }
        other => panic!("Expected a packet batch, got {:?}", other),
    }

    // Unsubscribe empties future fetches.
    let reply = send_and_receive(
        &mut client,
        &mut reader,
        &request(service::client_request::Request::Unsubscribe(
            service::UnsubscribeRequest {},
        )),
    );
    assert!(matches!(
        reply.reply,
        Some(service::server_reply::Reply::Ack(_))
    ));
    manager
        .enqueue_packet(make_packet(
            "UU",
            "CWU",
            "HHZ",
            "01",
            100.0,
            200,
            base + 2_000_000,
        ))
        .unwrap();
    let reply = send_and_receive(
        &mut client,
        &mut reader,
        &request(service::client_request::Request::Fetch(
            service::FetchRequest {},
        )),
    );
    match reply.reply {
        Some(service::server_reply::Reply::Packets(batch)) => {
            assert!(batch.packets.is_empty());
        }
        other => panic!("Expected an empty batch, got {:?}", other),
    }

    running.store(false, Ordering::SeqCst);
    server.stop();
}

#[test]
fn disconnect_tears_down_the_subscription() {
    let manager = Arc::new(SubscriptionManager::new(StreamOptions::default()));
    let running = Arc::new(AtomicBool::new(true));
    let port = free_port();
    let mut server = DownstreamServer::start(
        &format!("127.0.0.1:{}", port),
        Arc::clone(&manager),
        Arc::clone(&running),
    )
    .unwrap();

    {
        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut reader = FrameReader::new();
        let reply = send_and_receive(
            &mut client,
            &mut reader,
            &request(service::client_request::Request::SubscribeToAll(
                service::SubscribeToAllRequest {},
            )),
        );
        assert!(matches!(
            reply.reply,
            Some(service::server_reply::Reply::Ack(_))
        ));
        assert_eq!(manager.subscriber_count(), 1);
        // Dropped here: the handler must clean up.
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while manager.subscriber_count() != 0 {
        assert!(
            Instant::now() < deadline,
            "subscriber was not removed after disconnect"
        );
        std::thread::sleep(Duration::from_millis(50));
    }

    running.store(false, Ordering::SeqCst);
    server.stop();
}
