//! Downstream subscriber server.
//!
//! Accepts TCP connections from pull-mode consumers.  Each connection gets
//! its own handler thread and a fresh [`SubscriberId`]; the consumer then
//! speaks length-prefixed [`wire::service::ClientRequest`] frames to
//! subscribe (by name or to everything), fetch its next batch, and
//! unsubscribe.  A disconnect tears the subscriber's state down.

use crate::error::{Error, Result};
use crate::relay::{SubscriberId, SubscriptionManager};
use crate::streaming::wire::{self, service, FrameReader};
use prost::Message;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the accept and read loops wake to check the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// TCP server exposing the downstream subscription surface.
pub struct DownstreamServer {
    accept_thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl DownstreamServer {
    /// Binds `bind_address` and spawns the accept loop.  The server runs
    /// until `running` goes false.
    pub fn start(
        bind_address: &str,
        manager: Arc<SubscriptionManager>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).map_err(|e| {
            Error::Config(format!("Failed to bind to {}: {}", bind_address, e))
        })?;
        listener.set_nonblocking(true)?;
        log::info!("Downstream server listening on {}", bind_address);

        let accept_running = Arc::clone(&running);
        let accept_thread = thread::Builder::new()
            .name("downstream-accept".to_string())
            .spawn(move || accept_loop(listener, manager, accept_running))?;

        Ok(Self {
            accept_thread: Some(accept_thread),
            running,
        })
    }

    /// Signals the accept loop to stop and waits for it.  Handler threads
    /// watch the same flag and unwind on their own.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DownstreamServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    manager: Arc<SubscriptionManager>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let client_manager = Arc::clone(&manager);
                let client_running = Arc::clone(&running);
                let spawned = thread::Builder::new()
                    .name("downstream-client".to_string())
                    .spawn(move || {
                        handle_client(stream, addr.to_string(), client_manager, client_running);
                    });
                if let Err(e) = spawned {
                    log::error!("Failed to spawn handler for {}: {}", addr, e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
            }
        }
    }
    log::info!("Downstream accept loop exiting");
}

fn handle_client(
    mut stream: TcpStream,
    addr: String,
    manager: Arc<SubscriptionManager>,
    running: Arc<AtomicBool>,
) {
    let id = SubscriberId::next();
    log::info!("Client {} connected as subscriber {}", addr, id);

    let mut reader = FrameReader::new();
    while running.load(Ordering::Relaxed) {
        let frame = match reader.read_timeout(&mut stream, POLL_INTERVAL) {
            Ok(None) => continue,
            Ok(Some(frame)) => frame,
            Err(Error::Io(e)) => {
                log::debug!("Client {} read failed: {}", addr, e);
                break;
            }
            Err(e) => {
                log::warn!("Client {} sent a bad frame: {}", addr, e);
                break;
            }
        };
        let request = match service::ClientRequest::decode(frame) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("Failed to decode request from {}: {}", addr, e);
                break;
            }
        };
        let reply = process_request(&request, id, &manager);
        if let Err(e) = wire::write_frame(&mut stream, &reply) {
            log::debug!("Client {} write failed: {}", addr, e);
            break;
        }
    }

    manager.unsubscribe_from_all(id);
    log::info!("Client {} disconnected; subscriber {} removed", addr, id);
}

fn process_request(
    request: &service::ClientRequest,
    id: SubscriberId,
    manager: &SubscriptionManager,
) -> service::ServerReply {
    use service::client_request::Request;

    let reply = match &request.request {
        Some(Request::Subscribe(subscribe)) => manager
            .subscribe(id, &subscribe.stream_names)
            .map(|()| service::server_reply::Reply::Ack(service::Ack {})),
        Some(Request::SubscribeToAll(_)) => {
            manager.subscribe_to_all(id);
            Ok(service::server_reply::Reply::Ack(service::Ack {}))
        }
        Some(Request::Fetch(_)) => {
            let packets = manager
                .get_packets(id)
                .iter()
                .map(wire::packet_to_wire)
                .collect();
            Ok(service::server_reply::Reply::Packets(service::PacketBatch {
                packets,
            }))
        }
        Some(Request::Unsubscribe(_)) => {
            manager.unsubscribe_from_all(id);
            Ok(service::server_reply::Reply::Ack(service::Ack {}))
        }
        None => Err(Error::InvalidArgument("Empty request".to_string())),
    };

    match reply {
        Ok(reply) => service::ServerReply { reply: Some(reply) },
        Err(e) => service::ServerReply {
            reply: Some(service::server_reply::Reply::Error(service::ErrorReply {
                message: e.to_string(),
            })),
        },
    }
}
