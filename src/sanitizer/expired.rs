//! Expired (late-arriving) packet rejection.
//!
//! Telemetry backhaul can deliver data minutes late; past a configurable
//! horizon the relay is no longer interested and the packet is dropped
//! before it reaches any subscriber.

use crate::error::{Error, Result};
use crate::packet::{now_us, Packet};
use crate::sanitizer::RejectionLog;
use std::time::Duration;

/// Configuration for the expired-packet detector.
#[derive(Debug, Clone, Copy)]
pub struct ExpiredDetectorOptions {
    /// Oldest acceptable packet age.  A packet whose start time precedes
    /// `now - max_expired_time` is rejected.  Must be positive.
    /// Default: 5 minutes.
    pub max_expired_time: Duration,

    /// How often the set of rejected channel names is flushed to the log.
    /// `None` disables rejection logging.  Default: 1 hour.
    pub log_interval: Option<Duration>,
}

impl Default for ExpiredDetectorOptions {
    fn default() -> Self {
        Self {
            max_expired_time: Duration::from_secs(300),
            log_interval: Some(Duration::from_secs(3600)),
        }
    }
}

/// Rejects packets whose start time precedes the expiry horizon.
pub struct ExpiredDetector {
    max_expired_us: i64,
    log: Option<RejectionLog>,
}

impl ExpiredDetector {
    pub fn new(options: ExpiredDetectorOptions) -> Result<Self> {
        if options.max_expired_time.is_zero() {
            return Err(Error::Config(
                "Max expired time must be positive".to_string(),
            ));
        }
        Ok(Self {
            max_expired_us: options.max_expired_time.as_micros() as i64,
            log: options
                .log_interval
                .map(|interval| RejectionLog::new("Expired data detected for:", interval)),
        })
    }

    /// True when the packet's start time is at or after
    /// `now - max_expired_time`.
    pub fn allow(&self, packet: &Packet) -> bool {
        let now = now_us();
        let earliest = now - self.max_expired_us;
        let allow = packet.start_time_us >= earliest;
        if let Some(log) = &self.log {
            let rejected_name = if allow { None } else { Some(packet.name()) };
            log.observe(rejected_name.as_deref(), now);
        }
        allow
    }
}
