//! Duplicate and timing-slip rejection.
//!
//! Keeps a fixed-capacity, start-time-ordered ring of packet headers per
//! channel.  An arriving packet is compared against the ring to catch three
//! failure modes seen in real telemetry:
//!
//! - **Exact duplicates**: the same packet delivered twice (retries,
//!   redundant telemetry paths).  Observed start times wobble around the
//!   nominal instant, so equality uses a sampling-rate-dependent tolerance.
//! - **GPS slips**: a receiver clock jump produces a packet whose time span
//!   overlaps data already seen on the channel.
//! - **Stale back-fill**: data older than the ring's retention window.
//!
//! Genuinely new data, including out-of-order back-fill that lands in a gap,
//! is admitted and the ring re-sorted.

use crate::error::{Error, Result};
use crate::packet::Packet;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Configuration for the duplicate-packet detector.
///
/// Exactly one of `buffer_size` and `buffer_duration` must be set.  With
/// `buffer_duration`, each channel's ring capacity is derived from its first
/// packet so that roughly 1.5x the target window of packets is retained.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateDetectorOptions {
    /// Fixed per-channel ring capacity.  Must be positive when set.
    pub buffer_size: Option<usize>,

    /// Target retention window.  Must be positive when set.
    /// Default: 5 minutes.
    pub buffer_duration: Option<Duration>,
}

impl Default for DuplicateDetectorOptions {
    fn default() -> Self {
        Self {
            buffer_size: None,
            buffer_duration: Some(Duration::from_secs(300)),
        }
    }
}

impl DuplicateDetectorOptions {
    /// Fixed-capacity configuration.
    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            buffer_size: Some(size),
            buffer_duration: None,
        }
    }

    /// Duration-derived-capacity configuration.
    pub fn with_buffer_duration(duration: Duration) -> Self {
        Self {
            buffer_size: None,
            buffer_duration: Some(duration),
        }
    }
}

/// Header retained per packet in a channel's ring.
#[derive(Debug, Clone)]
struct PacketHeader {
    name: String,
    /// UTC time of the first sample, microseconds.
    start_time_us: i64,
    /// UTC time of the last sample, microseconds.
    end_time_us: i64,
    /// Observed sampling rates wobble around a nominal rate; comparisons
    /// use the rounded nominal value.
    nominal_rate: i32,
    n_samples: i32,
}

impl PacketHeader {
    fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.number_of_samples <= 0 {
            return Err(Error::InvalidPacket("No samples in packet".to_string()));
        }
        Ok(Self {
            name: packet.name(),
            start_time_us: packet.start_time_us,
            end_time_us: packet.end_time_us()?,
            nominal_rate: packet.sampling_rate.round() as i32,
            n_samples: packet.number_of_samples,
        })
    }

    /// Tolerant equality: same channel, same sample count, and a start-time
    /// difference under the rate band's tolerance.  A nominal-rate mismatch
    /// on the same channel cannot be compared and is an error, as is a rate
    /// past the supported bands.
    fn matches(&self, rhs: &PacketHeader) -> Result<bool> {
        if rhs.name != self.name {
            return Ok(false);
        }
        if rhs.nominal_rate != self.nominal_rate {
            return Err(Error::InconsistentSamplingRate(self.name.clone()));
        }
        if rhs.n_samples != self.n_samples {
            return Ok(false);
        }
        let tolerance_us: i64 = if self.nominal_rate < 105 {
            15_000
        } else if self.nominal_rate < 255 {
            4_500
        } else if self.nominal_rate < 505 {
            2_500
        } else if self.nominal_rate < 1005 {
            1_500
        } else {
            return Err(Error::UnsupportedSamplingRate {
                name: self.name.clone(),
                rate: self.nominal_rate,
            });
        };
        Ok((rhs.start_time_us - self.start_time_us).abs() < tolerance_us)
    }
}

/// Ring capacity derived from a channel's first packet:
/// `max(10, floor(1.5 * window / packet_duration)) + 1`, with the packet
/// duration in whole seconds clamped to at least one.
fn estimate_capacity(header: &PacketHeader, window: Duration) -> usize {
    let packet_seconds = (f64::from(header.n_samples - 1)
        / f64::from(header.nominal_rate.max(1)))
    .round()
    .max(1.0);
    let derived = (1.5 * window.as_secs_f64() / packet_seconds) as usize;
    derived.max(10) + 1
}

/// Start-time-ordered header ring with fixed capacity.
struct ChannelRing {
    capacity: usize,
    headers: VecDeque<PacketHeader>,
}

impl ChannelRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            headers: VecDeque::with_capacity(capacity),
        }
    }

    fn is_full(&self) -> bool {
        self.headers.len() >= self.capacity
    }

    /// Push to the back, evicting the oldest header when full.
    fn push_back_evicting(&mut self, header: PacketHeader) {
        if self.is_full() {
            self.headers.pop_front();
        }
        self.headers.push_back(header);
    }

    fn sort(&mut self) {
        self.headers
            .make_contiguous()
            .sort_by_key(|h| h.start_time_us);
    }
}

enum CapacityRule {
    Fixed(usize),
    FromDuration(Duration),
}

/// Per-channel duplicate, slip, and stale-back-fill screening.
pub struct DuplicateDetector {
    capacity_rule: CapacityRule,
    rings: Mutex<HashMap<String, ChannelRing>>,
}

impl DuplicateDetector {
    pub fn new(options: DuplicateDetectorOptions) -> Result<Self> {
        let capacity_rule = match (options.buffer_size, options.buffer_duration) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "Circular buffer size and duration are mutually exclusive".to_string(),
                ));
            }
            (None, None) => {
                return Err(Error::Config(
                    "Circular buffer size or duration must be specified".to_string(),
                ));
            }
            (Some(size), None) => {
                if size == 0 {
                    return Err(Error::Config(
                        "Circular buffer size must be positive".to_string(),
                    ));
                }
                CapacityRule::Fixed(size)
            }
            (None, Some(duration)) => {
                if duration.is_zero() {
                    return Err(Error::Config(
                        "Circular buffer duration must be positive".to_string(),
                    ));
                }
                CapacityRule::FromDuration(duration)
            }
        };
        Ok(Self {
            capacity_rule,
            rings: Mutex::new(HashMap::new()),
        })
    }

    /// True when the packet is new data for its channel.
    ///
    /// Header extraction or comparison failures (no samples, inconsistent or
    /// unsupported sampling rate) are logged at WARN and treated as
    /// rejections; they never escape the pipeline.
    pub fn allow(&self, packet: &Packet) -> bool {
        let header = match PacketHeader::from_packet(packet) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Failed to unpack packet header: {}; not allowing", e);
                return false;
            }
        };
        let mut rings = self.rings.lock();
        match self.check(&mut rings, header) {
            Ok(allowed) => allowed,
            Err(e) => {
                log::warn!("{}; not allowing", e);
                false
            }
        }
    }

    fn check(&self, rings: &mut HashMap<String, ChannelRing>, header: PacketHeader) -> Result<bool> {
        if !rings.contains_key(&header.name) {
            let capacity = match self.capacity_rule {
                CapacityRule::Fixed(size) => size,
                CapacityRule::FromDuration(window) => estimate_capacity(&header, window),
            };
            log::debug!(
                "Creating circular buffer for {} with capacity {}",
                header.name,
                capacity
            );
            let mut ring = ChannelRing::new(capacity);
            let name = header.name.clone();
            ring.headers.push_back(header);
            rings.insert(name, ring);
            // First packet on the channel cannot be a duplicate.
            return Ok(true);
        }
        let Some(ring) = rings.get_mut(&header.name) else {
            log::warn!("Circular buffer does not exist for {}", header.name);
            return Ok(false);
        };

        // Exact duplicate anywhere in the ring?
        for retained in &ring.headers {
            if header.matches(retained)? {
                log::debug!("Detected duplicate for {}", header.name);
                return Ok(false);
            }
        }

        // Typically new data shows up: append past the newest entry.
        let newest_end = ring.headers.back().map(|h| h.end_time_us).unwrap_or(i64::MIN);
        if header.start_time_us > newest_end {
            ring.push_back_evicting(header);
            return Ok(true);
        }

        // Strictly older than everything retained: keep it if there is
        // room, otherwise it has aged out of the retention window.
        let oldest_start = ring
            .headers
            .front()
            .map(|h| h.start_time_us)
            .unwrap_or(i64::MAX);
        if header.end_time_us < oldest_start {
            if !ring.is_full() {
                log::debug!("Inserting {} at front of circular buffer", header.name);
                ring.headers.push_front(header);
                return Ok(true);
            }
            return Ok(false);
        }

        // The packet is old; look for a timing slip.  Closed-interval test:
        // either endpoint landing inside a retained span is an overlap.
        for retained in &ring.headers {
            let start_inside = header.start_time_us >= retained.start_time_us
                && header.start_time_us <= retained.end_time_us;
            let end_inside = header.end_time_us >= retained.start_time_us
                && header.end_time_us <= retained.end_time_us;
            if start_inside || end_inside {
                log::debug!("Detected possible timing slip for {}", header.name);
                return Ok(false);
            }
        }

        // A valid out-of-order back-fill landing in a gap.
        log::debug!("Inserting {} into circular buffer then sorting", header.name);
        ring.push_back_evicting(header);
        ring.sort();
        Ok(true)
    }
}
