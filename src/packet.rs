//! Packet and stream identifier types.
//!
//! A [`Packet`] is an opaque carrier: a small fixed header (channel
//! identity, start time, sampling rate, sample count, data type) plus an
//! uninterpreted little-endian sample blob.  The service never looks inside
//! the blob; it only checks that its length is consistent with the header.
//!
//! Streams are keyed by the canonical channel name `NET.STA.CHA.LOC`
//! (uppercased, with `"--"` standing in for an absent location code).

use crate::error::{Error, Result};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel substituted for an absent location code in channel names.
pub const ABSENT_LOCATION_CODE: &str = "--";

/// Seismic channel identity: (network, station, channel, location code).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId {
    pub network: String,
    pub station: String,
    pub channel: String,
    /// Some stations do not report a location code.
    pub location_code: Option<String>,
}

impl StreamId {
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        channel: impl Into<String>,
        location_code: Option<String>,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            channel: channel.into(),
            location_code,
        }
    }

    /// Canonical channel name `NET.STA.CHA.LOC`, fields uppercased,
    /// `"--"` substituted for an absent (or empty) location code.
    pub fn name(&self) -> String {
        let location = self
            .location_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .unwrap_or(ABSENT_LOCATION_CODE);
        format!(
            "{}.{}.{}.{}",
            self.network.to_uppercase(),
            self.station.to_uppercase(),
            self.channel.to_uppercase(),
            location.to_uppercase()
        )
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Sample encoding of the packet's data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer32,
    Integer64,
    Float,
    Double,
    Text,
    Unknown,
}

impl DataType {
    /// Bytes per sample, or `None` for [`DataType::Unknown`].
    pub fn size_of(self) -> Option<usize> {
        match self {
            DataType::Integer32 | DataType::Float => Some(4),
            DataType::Integer64 | DataType::Double => Some(8),
            DataType::Text => Some(1),
            DataType::Unknown => None,
        }
    }
}

/// A short window of samples on a single channel.
///
/// Times are absolute microseconds since the Unix epoch (UTC), matching the
/// wire format's microsecond precision.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_id: StreamId,
    /// UTC time of the first sample, microseconds since the epoch.
    pub start_time_us: i64,
    /// Nominal sampling rate in Hz.  Must be positive.
    pub sampling_rate: f64,
    pub number_of_samples: i32,
    pub data_type: DataType,
    /// Little-endian packed samples, `number_of_samples * sizeof(data_type)`
    /// bytes.
    pub data: Vec<u8>,
}

impl Packet {
    /// Canonical channel name of this packet's stream.
    pub fn name(&self) -> String {
        self.stream_id.name()
    }

    /// UTC time of the last sample:
    /// `start + round((n - 1) * 1e6 / sampling_rate)` microseconds.
    ///
    /// A 1-sample packet ends when it starts.
    pub fn end_time_us(&self) -> Result<i64> {
        if self.number_of_samples <= 0 {
            return Err(Error::InvalidPacket("No samples in packet".to_string()));
        }
        if self.sampling_rate <= 0.0 {
            return Err(Error::InvalidPacket(
                "Sampling rate not positive".to_string(),
            ));
        }
        let duration_us = ((f64::from(self.number_of_samples - 1)) * 1_000_000.0
            / self.sampling_rate)
            .round() as i64;
        Ok(self.start_time_us + duration_us)
    }

    /// Checks the invariants a packet must satisfy before it may be
    /// published: positive sample count and rate, a known data type, and a
    /// data blob whose length matches the header.
    pub fn validate(&self) -> Result<()> {
        if self.number_of_samples <= 0 {
            return Err(Error::InvalidPacket(
                "Number of samples not positive".to_string(),
            ));
        }
        if self.sampling_rate <= 0.0 {
            return Err(Error::InvalidPacket(
                "Sampling rate not positive".to_string(),
            ));
        }
        let sample_size = self
            .data_type
            .size_of()
            .ok_or_else(|| Error::InvalidPacket("Undefined data type".to_string()))?;
        if self.data.is_empty() {
            return Err(Error::InvalidPacket("Data not set".to_string()));
        }
        let expected = self.number_of_samples as usize * sample_size;
        if self.data.len() != expected {
            return Err(Error::InvalidPacket(format!(
                "Data length {} inconsistent with {} samples of size {}",
                self.data.len(),
                self.number_of_samples,
                sample_size
            )));
        }
        Ok(())
    }
}

/// Current UTC time in microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
