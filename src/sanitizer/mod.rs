//! Packet sanitation pipeline.
//!
//! Three stateful detectors screen every packet arriving from the upstream
//! import service, in a fixed order:
//!
//! 1. [`ExpiredDetector`]: data older than the service cares about
//! 2. [`FutureDetector`]: data claiming to come from the future
//! 3. [`DuplicateDetector`]: exact duplicates, GPS timing slips, and
//!    packets older than the per-channel retention window
//!
//! Any rejection short-circuits the rest of the pipeline.  Detectors never
//! raise across the pipeline boundary; internal failures become quiet
//! rejections logged at WARN.

pub mod duplicate;
pub mod expired;
pub mod future;

pub use duplicate::{DuplicateDetector, DuplicateDetectorOptions};
pub use expired::{ExpiredDetector, ExpiredDetectorOptions};
pub use future::{FutureDetector, FutureDetectorOptions};

use crate::error::Result;
use crate::packet::Packet;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::time::Duration;

/// Batched rejection logging shared by the expired and future detectors.
///
/// Rejected channel names accumulate in a set that is flushed to a single
/// INFO line every `interval` of wall time.  Each channel contributes at
/// most one entry between flushes, so the set is bounded by channel
/// cardinality.
pub(crate) struct RejectionLog {
    reason: &'static str,
    interval_us: i64,
    state: Mutex<RejectionLogState>,
}

struct RejectionLogState {
    channels: BTreeSet<String>,
    last_log_us: i64,
}

impl RejectionLog {
    pub(crate) fn new(reason: &'static str, interval: Duration) -> Self {
        Self {
            reason,
            interval_us: interval.as_micros() as i64,
            state: Mutex::new(RejectionLogState {
                channels: BTreeSet::new(),
                last_log_us: 0,
            }),
        }
    }

    /// Records a rejection (if any) and flushes the set when the logging
    /// interval has elapsed.  Called on every packet so the flush clock
    /// keeps ticking even while data is clean.
    pub(crate) fn observe(&self, rejected_channel: Option<&str>, now_us: i64) {
        let mut state = self.state.lock();
        if let Some(name) = rejected_channel {
            if !state.channels.contains(name) {
                state.channels.insert(name.to_string());
            }
        }
        if now_us >= state.last_log_us + self.interval_us && !state.channels.is_empty() {
            let channels = state
                .channels
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            log::info!("{} {}", self.reason, channels);
            state.channels.clear();
            state.last_log_us = now_us;
        }
    }
}

/// The full expired -> future -> duplicate pipeline.
pub struct Sanitizer {
    expired: ExpiredDetector,
    future: FutureDetector,
    duplicate: DuplicateDetector,
}

impl Sanitizer {
    pub fn new(
        expired_options: ExpiredDetectorOptions,
        future_options: FutureDetectorOptions,
        duplicate_options: DuplicateDetectorOptions,
    ) -> Result<Self> {
        Ok(Self {
            expired: ExpiredDetector::new(expired_options)?,
            future: FutureDetector::new(future_options)?,
            duplicate: DuplicateDetector::new(duplicate_options)?,
        })
    }

    /// True when the packet survives every detector.
    pub fn allow(&self, packet: &Packet) -> bool {
        self.expired.allow(packet) && self.future.allow(packet) && self.duplicate.allow(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{now_us, DataType, StreamId};

    fn packet_at(start_time_us: i64) -> Packet {
        Packet {
            stream_id: StreamId::new("UU", "SPU", "HHZ", Some("01".to_string())),
            start_time_us,
            sampling_rate: 100.0,
            number_of_samples: 100,
            data_type: DataType::Integer32,
            data: vec![0u8; 400],
        }
    }

    #[test]
    fn test_pipeline_passes_fresh_packet() {
        let sanitizer = Sanitizer::new(
            ExpiredDetectorOptions::default(),
            FutureDetectorOptions::default(),
            DuplicateDetectorOptions::with_buffer_size(10),
        )
        .unwrap();
        let packet = packet_at(now_us() - 2_000_000);
        assert!(sanitizer.allow(&packet));
        // Same packet again trips the duplicate stage.
        assert!(!sanitizer.allow(&packet));
    }

    #[test]
    fn test_pipeline_rejects_stale_packet() {
        let sanitizer = Sanitizer::new(
            ExpiredDetectorOptions::default(),
            FutureDetectorOptions::default(),
            DuplicateDetectorOptions::with_buffer_size(10),
        )
        .unwrap();
        let packet = packet_at(now_us() - 3600 * 1_000_000);
        assert!(!sanitizer.allow(&packet));
    }
}
