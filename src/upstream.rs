//! Upstream packet subscriber.
//!
//! A long-lived streaming client of the import service.  Connects, sends a
//! [`wire::import::SubscriptionRequest`], then consumes packet frames and
//! hands each one to the user callback.  When the stream drops, the
//! subscriber walks a reconnect schedule; any successfully delivered packet
//! resets the schedule so transient drops never exhaust it.
//!
//! Cancellation is cooperative: [`UpstreamSubscriber::stop`] flips an
//! atomic flag and wakes the reconnect sleeper, and the read loop polls the
//! flag between short read timeouts.

use crate::error::{Error, Result};
use crate::streaming::wire::{self, import, FrameReader};
use parking_lot::{Condvar, Mutex};
use prost::Message;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the read loop wakes to check the shutdown flag.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Options for the upstream subscriber.
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
    /// Import service address, `host:port`.
    pub address: String,

    /// Backoff durations walked after failed or ended attempts, sorted
    /// ascending.  The first attempt never waits.  Default: 0 s, 5 s, 15 s.
    pub reconnect_schedule: Vec<Duration>,

    /// Optional subscriber identifier forwarded in the subscription
    /// request.
    pub identifier: Option<String>,

    /// Optional bearer token forwarded in the subscription request.
    pub auth_token: Option<String>,
}

impl Default for UpstreamOptions {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:5560".to_string(),
            reconnect_schedule: vec![
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            identifier: None,
            auth_token: None,
        }
    }
}

/// Callback invoked for every packet delivered by the import service.
pub type PacketCallback = dyn Fn(import::Packet) + Send + Sync;

/// How a single streaming attempt ended.
enum AttemptEnd {
    /// Local shutdown was requested; the loop exits cleanly.
    Cancelled,
    /// The server closed the stream; keep reconnecting.
    StreamClosed,
    /// The server could not be reached or dropped the connection; keep
    /// reconnecting.
    Unavailable(String),
    /// Protocol failure; the subscriber gives up.
    Fatal(Error),
}

struct Attempt {
    had_read: bool,
    end: AttemptEnd,
}

/// Long-lived streaming consumer of the import service.
pub struct UpstreamSubscriber {
    options: UpstreamOptions,
    callback: Arc<PacketCallback>,
    keep_running: Arc<AtomicBool>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
}

impl UpstreamSubscriber {
    pub fn new<F>(options: UpstreamOptions, callback: F) -> Self
    where
        F: Fn(import::Packet) + Send + Sync + 'static,
    {
        Self {
            options,
            callback: Arc::new(callback),
            keep_running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Spawns the subscriber worker and returns its handle.  The handle
    /// resolves to an error only on a fatal stream failure or when the
    /// reconnect schedule is exhausted without progress; after a requested
    /// [`UpstreamSubscriber::stop`] it resolves `Ok`.
    pub fn start(&self) -> Result<JoinHandle<Result<()>>> {
        self.keep_running.store(true, Ordering::SeqCst);
        *self.shutdown.0.lock() = false;

        let options = self.options.clone();
        let callback = Arc::clone(&self.callback);
        let keep_running = Arc::clone(&self.keep_running);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = thread::Builder::new()
            .name("upstream-subscriber".to_string())
            .spawn(move || acquire_packets(&options, callback.as_ref(), &keep_running, &shutdown))?;
        Ok(handle)
    }

    /// Requests shutdown: wakes the reconnect sleeper and lets the read
    /// loop observe the flag on its next poll.  Idempotent.
    pub fn stop(&self) {
        let (lock, condvar) = &*self.shutdown;
        let mut requested = lock.lock();
        *requested = true;
        condvar.notify_all();
        drop(requested);
        self.keep_running.store(false, Ordering::SeqCst);
    }
}

impl Drop for UpstreamSubscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquire_packets(
    options: &UpstreamOptions,
    callback: &PacketCallback,
    keep_running: &AtomicBool,
    shutdown: &(Mutex<bool>, Condvar),
) -> Result<()> {
    let schedule = &options.reconnect_schedule;
    let attempts = schedule.len() as i64;
    let mut reconnect_index: i64 = -1;
    while reconnect_index < attempts {
        if !keep_running.load(Ordering::SeqCst) {
            break;
        }
        if reconnect_index >= 0 {
            let wait = schedule[reconnect_index as usize];
            log::info!("Will attempt to reconnect in {} s", wait.as_secs());
            let (lock, condvar) = shutdown;
            let mut requested = lock.lock();
            if !*requested {
                condvar.wait_for(&mut requested, wait);
            }
            drop(requested);
            if !keep_running.load(Ordering::SeqCst) {
                break;
            }
        }

        let attempt = run_attempt(options, callback, keep_running);
        match attempt.end {
            AttemptEnd::Cancelled => {
                log::info!("Subscriber stream successfully finished");
                break;
            }
            AttemptEnd::StreamClosed => {
                log::warn!("Upstream closed the stream but I should keep reading");
            }
            AttemptEnd::Unavailable(reason) => {
                log::warn!("Import service unavailable ({})", reason);
            }
            AttemptEnd::Fatal(e) => {
                log::error!("Subscribe stream failed: {}", e);
                return Err(Error::PrematureSubscriberExit);
            }
        }
        if attempt.had_read {
            reconnect_index = -1;
        }
        reconnect_index += 1;
    }

    if keep_running.load(Ordering::SeqCst) {
        log::error!("Subscriber thread quitting!");
        return Err(Error::PrematureSubscriberExit);
    }
    log::info!("Subscriber thread exiting");
    Ok(())
}

/// One connect-subscribe-consume cycle.
fn run_attempt(
    options: &UpstreamOptions,
    callback: &PacketCallback,
    keep_running: &AtomicBool,
) -> Attempt {
    let mut had_read = false;

    // Connections do not wait for readiness; an unreachable server
    // surfaces immediately.
    let mut stream = match TcpStream::connect(&options.address) {
        Ok(stream) => stream,
        Err(e) => {
            return Attempt {
                had_read,
                end: AttemptEnd::Unavailable(e.to_string()),
            };
        }
    };
    log::info!("Connected to import service at {}", options.address);

    let request = import::SubscriptionRequest {
        identifier: options.identifier.clone(),
        auth_token: options.auth_token.clone(),
    };
    if let Err(e) = wire::write_frame(&mut stream, &request) {
        return Attempt {
            had_read,
            end: AttemptEnd::Unavailable(e.to_string()),
        };
    }

    let mut reader = FrameReader::new();
    loop {
        if !keep_running.load(Ordering::SeqCst) {
            return Attempt {
                had_read,
                end: AttemptEnd::Cancelled,
            };
        }
        match reader.read_timeout(&mut stream, READ_POLL_INTERVAL) {
            Ok(None) => continue,
            Ok(Some(frame)) => match import::Packet::decode(frame) {
                Ok(packet) => {
                    had_read = true;
                    callback(packet);
                }
                Err(e) => {
                    return Attempt {
                        had_read,
                        end: AttemptEnd::Fatal(e.into()),
                    };
                }
            },
            Err(Error::Io(e)) => {
                let end = if keep_running.load(Ordering::SeqCst) {
                    match e.kind() {
                        // Clean close reads as an end-of-stream.
                        ErrorKind::UnexpectedEof => AttemptEnd::StreamClosed,
                        _ => AttemptEnd::Unavailable(e.to_string()),
                    }
                } else {
                    AttemptEnd::Cancelled
                };
                return Attempt { had_read, end };
            }
            Err(e) => {
                return Attempt {
                    had_read,
                    end: AttemptEnd::Fatal(e),
                };
            }
        }
    }
}
