//! Future packet rejection.
//!
//! A packet whose last sample postdates the wall clock (beyond a small
//! configurable allowance) is physically impossible and points at a broken
//! digitizer clock upstream.

use crate::error::Result;
use crate::packet::{now_us, Packet};
use crate::sanitizer::RejectionLog;
use std::time::Duration;

/// Configuration for the future-packet detector.
#[derive(Debug, Clone, Copy)]
pub struct FutureDetectorOptions {
    /// How far past `now` a packet's end time may reach.  Zero is valid and
    /// still admits a zero-latency single-sample packet, whose end time
    /// equals its start time.  Default: 0.
    pub max_future_time: Duration,

    /// How often the set of rejected channel names is flushed to the log.
    /// `None` disables rejection logging.  Default: 1 hour.
    pub log_interval: Option<Duration>,
}

impl Default for FutureDetectorOptions {
    fn default() -> Self {
        Self {
            max_future_time: Duration::ZERO,
            log_interval: Some(Duration::from_secs(3600)),
        }
    }
}

/// Rejects packets whose end time exceeds `now + max_future_time`.
pub struct FutureDetector {
    max_future_us: i64,
    log: Option<RejectionLog>,
}

impl FutureDetector {
    pub fn new(options: FutureDetectorOptions) -> Result<Self> {
        Ok(Self {
            max_future_us: options.max_future_time.as_micros() as i64,
            log: options
                .log_interval
                .map(|interval| RejectionLog::new("Future data detected for:", interval)),
        })
    }

    /// True when the packet's end time is at or before
    /// `now + max_future_time`.
    pub fn allow(&self, packet: &Packet) -> bool {
        let end_time_us = match packet.end_time_us() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Failed to compute packet end time: {}; not allowing", e);
                return false;
            }
        };
        // The clock is read after computing the end time; with a zero
        // allowance this is what lets a zero-latency 1-sample packet pass.
        let now = now_us();
        let latest = now + self.max_future_us;
        let allow = end_time_us <= latest;
        if let Some(log) = &self.log {
            let rejected_name = if allow { None } else { Some(packet.name()) };
            log.observe(rejected_name.as_deref(), now);
        }
        allow
    }
}
