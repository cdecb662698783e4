//! Application orchestration for the SeisRelay daemon
//!
//! Wires the upstream subscriber, the sanitizer pipeline, the bounded
//! import queue with its drain worker, the subscription manager, and the
//! downstream server together, and manages graceful shutdown.
//!
//! # Threads
//!
//! - `upstream-subscriber`: reads the import stream, runs the conversion,
//!   sanitizer, and queue push inside its packet callback
//! - `packet-drain`: pops the import queue into the subscription manager
//! - `downstream-accept` plus one `downstream-client` per connection
//!
//! All loops watch one shared `AtomicBool`; SIGINT/SIGTERM flip it.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::relay::SubscriptionManager;
use crate::sanitizer::Sanitizer;
use crate::streaming::wire;
use crate::streaming::DownstreamServer;
use crate::upstream::UpstreamSubscriber;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Main application structure that manages all components
pub struct App {
    config: Config,
    sanitizer: Arc<Sanitizer>,
    manager: Arc<SubscriptionManager>,
    running: Arc<AtomicBool>,
}

impl App {
    /// Builds the pipeline from a validated configuration.  Detector
    /// construction is the last place a bad configuration can fail.
    pub fn new(config: Config) -> Result<Self> {
        let sanitizer = Sanitizer::new(
            config.expired_detector_options(),
            config.future_detector_options(),
            config.duplicate_detector_options(),
        )?;
        let manager = Arc::new(SubscriptionManager::new(config.stream_options()));
        Ok(Self {
            config,
            sanitizer: Arc::new(sanitizer),
            manager,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Runs until a shutdown signal arrives or the upstream subscriber
    /// dies.  Returns the subscriber's verdict: `Ok` after a requested
    /// shutdown, the fatal error otherwise.
    pub fn run(&mut self) -> Result<()> {
        let running = Arc::clone(&self.running);
        let signal_running = Arc::clone(&self.running);
        ctrlc::set_handler(move || {
            log::info!("Received shutdown signal");
            signal_running.store(false, Ordering::Relaxed);
        })
        .map_err(|e| Error::Other(format!("Error setting signal handler: {}", e)))?;

        let import_queue: Arc<ArrayQueue<Packet>> = Arc::new(ArrayQueue::new(
            self.config.application.import_queue_capacity,
        ));

        // The subscriber's packet callback: convert, sanitize, enqueue.
        // A full queue sheds its oldest packet first.
        let callback_queue = Arc::clone(&import_queue);
        let callback_sanitizer = Arc::clone(&self.sanitizer);
        let subscriber = UpstreamSubscriber::new(
            self.config.upstream_options(),
            move |import_packet| {
                let packet = match wire::packet_from_import(import_packet) {
                    Ok(packet) => packet,
                    Err(e) => {
                        log::warn!("Dropping malformed import packet: {}", e);
                        return;
                    }
                };
                if !callback_sanitizer.allow(&packet) {
                    return;
                }
                if callback_queue.is_full() {
                    let _ = callback_queue.pop();
                }
                if callback_queue.push(packet).is_err() {
                    log::warn!("Import queue full; dropping packet");
                }
            },
        );
        let upstream_handle = subscriber.start()?;

        let drain_queue = Arc::clone(&import_queue);
        let drain_manager = Arc::clone(&self.manager);
        let drain_running = Arc::clone(&running);
        let drain_thread = thread::Builder::new()
            .name("packet-drain".to_string())
            .spawn(move || {
                while drain_running.load(Ordering::Relaxed) {
                    match drain_queue.pop() {
                        Some(packet) => {
                            let name = packet.name();
                            if let Err(e) = drain_manager.enqueue_packet(packet) {
                                log::warn!("Failed to enqueue {}: {}", name, e);
                            }
                        }
                        None => thread::sleep(Duration::from_millis(10)),
                    }
                }
                log::info!("Drain worker exiting");
            })?;

        let mut server = DownstreamServer::start(
            &self.config.network.bind_address,
            Arc::clone(&self.manager),
            Arc::clone(&running),
        )?;

        log::info!(
            "{} running. Press Ctrl-C to stop.",
            self.config.application.name
        );
        while running.load(Ordering::Relaxed) && !upstream_handle.is_finished() {
            thread::sleep(Duration::from_millis(100));
        }

        log::info!("Shutting down...");
        running.store(false, Ordering::SeqCst);
        subscriber.stop();
        let upstream_result = match upstream_handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Other("Subscriber thread panicked".to_string())),
        };
        let _ = drain_thread.join();
        server.stop();

        log::info!("{} stopped", self.config.application.name);
        upstream_result
    }
}
