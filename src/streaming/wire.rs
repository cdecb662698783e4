//! Wire format serialization using Protobuf
//!
//! # TCP Protocol Specification
//!
//! All TCP communication, upstream and downstream, uses length-prefixed
//! framing:
//!
//! ```text
//! +------------------+--------------------------+
//! | Length (4 bytes) | Payload (variable)       |
//! | Big-endian u32   | Protobuf binary          |
//! +------------------+--------------------------+
//! ```
//!
//! - **Length field**: 4-byte big-endian unsigned integer
//! - **Payload**: Protobuf-encoded message
//! - **Maximum message size**: 1MB (1,048,576 bytes)
//!
//! Two packages are spoken: `seisrelay.import.v1` (the upstream acquisition
//! service's packets) and `seisrelay.v1` (the sanitized service format and
//! the downstream request/reply surface).

use crate::error::{Error, Result};
use crate::packet::{DataType, Packet, StreamId, ABSENT_LOCATION_CODE};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

// Include generated protobuf types
pub mod import {
    include!(concat!(env!("OUT_DIR"), "/seisrelay.import.v1.rs"));
}

pub mod service {
    include!(concat!(env!("OUT_DIR"), "/seisrelay.v1.rs"));
}

/// Default frame buffer size (64KB handles most packets)
const DEFAULT_BUFFER_SIZE: usize = 65536;

/// Maximum frame size (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Writes one length-prefixed frame.
pub fn write_frame<M: prost::Message>(stream: &mut TcpStream, message: &M) -> Result<()> {
    let payload = message.encode_to_vec();
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::Serialization(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads length-prefixed frames, reusing one growable buffer.
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
        }
    }

    /// Reads the next frame, waiting at most `timeout` for it to begin.
    ///
    /// Returns `Ok(None)` on timeout.  The timeout applies only to the
    /// length prefix; once a length has been read we are committed and use
    /// a longer payload timeout so a slow sender does not leave the stream
    /// mid-frame in a corrupted state.
    pub fn read_timeout(
        &mut self,
        stream: &mut TcpStream,
        timeout: Duration,
    ) -> Result<Option<&[u8]>> {
        let old_timeout = stream.read_timeout()?;
        stream.set_read_timeout(Some(timeout))?;

        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                stream.set_read_timeout(old_timeout)?;
                return Ok(None);
            }
            Err(e) => {
                stream.set_read_timeout(old_timeout)?;
                return Err(Error::Io(e));
            }
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            stream.set_read_timeout(old_timeout)?;
            return Err(Error::Serialization(format!(
                "Peer announced a {} byte frame; limit is {}",
                len, MAX_FRAME_SIZE
            )));
        }
        if len > self.buffer.len() {
            self.buffer.resize(len, 0);
        }

        // Committed to a frame now; allow the payload more time.
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        let payload_read = stream.read_exact(&mut self.buffer[..len]);
        stream.set_read_timeout(old_timeout)?;
        payload_read?;

        Ok(Some(&self.buffer[..len]))
    }
}

fn timestamp_to_us(timestamp: &prost_types::Timestamp) -> i64 {
    timestamp.seconds * 1_000_000 + i64::from(timestamp.nanos) / 1_000
}

fn us_to_timestamp(us: i64) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: us.div_euclid(1_000_000),
        nanos: (us.rem_euclid(1_000_000) * 1_000) as i32,
    }
}

fn data_type_from_import(value: import::DataType) -> DataType {
    match value {
        import::DataType::Integer32 => DataType::Integer32,
        import::DataType::Integer64 => DataType::Integer64,
        import::DataType::Float => DataType::Float,
        import::DataType::Double => DataType::Double,
        import::DataType::Text => DataType::Text,
        import::DataType::Unknown => DataType::Unknown,
    }
}

fn data_type_from_service(value: service::DataType) -> DataType {
    match value {
        service::DataType::Integer32 => DataType::Integer32,
        service::DataType::Integer64 => DataType::Integer64,
        service::DataType::Float => DataType::Float,
        service::DataType::Double => DataType::Double,
        service::DataType::Text => DataType::Text,
        service::DataType::Unknown => DataType::Unknown,
    }
}

fn data_type_to_service(value: DataType) -> service::DataType {
    match value {
        DataType::Integer32 => service::DataType::Integer32,
        DataType::Integer64 => service::DataType::Integer64,
        DataType::Float => service::DataType::Float,
        DataType::Double => service::DataType::Double,
        DataType::Text => service::DataType::Text,
        DataType::Unknown => service::DataType::Unknown,
    }
}

/// Converts an import-format packet to the service format.
///
/// Identifier fields are uppercased and an absent (or empty) location code
/// is normalized to `"--"`.  The sample blob passes through untouched.
/// Missing required fields are an [`Error::InvalidPacket`].
pub fn packet_from_import(packet: import::Packet) -> Result<Packet> {
    let data_type = data_type_from_import(packet.data_type());
    let identifier = packet
        .stream_identifier
        .ok_or_else(|| Error::InvalidPacket("Stream identifier not set".to_string()))?;
    let start_time = packet
        .start_time
        .as_ref()
        .ok_or_else(|| Error::InvalidPacket("Start time not set".to_string()))?;
    let number_of_samples = packet
        .number_of_samples
        .ok_or_else(|| Error::InvalidPacket("Number of samples not set".to_string()))?;
    let data = packet
        .data
        .ok_or_else(|| Error::InvalidPacket("Data not set".to_string()))?;

    let location_code = identifier
        .location_code
        .as_deref()
        .filter(|code| !code.is_empty())
        .unwrap_or(ABSENT_LOCATION_CODE)
        .to_uppercase();

    Ok(Packet {
        stream_id: StreamId::new(
            identifier.network.to_uppercase(),
            identifier.station.to_uppercase(),
            identifier.channel.to_uppercase(),
            Some(location_code),
        ),
        start_time_us: timestamp_to_us(start_time),
        sampling_rate: packet.sampling_rate,
        number_of_samples,
        data_type,
        data,
    })
}

/// Renders a service-format packet for the downstream wire.
pub fn packet_to_wire(packet: &Packet) -> service::Packet {
    let location_code = packet
        .stream_id
        .location_code
        .as_deref()
        .filter(|code| !code.is_empty())
        .unwrap_or(ABSENT_LOCATION_CODE)
        .to_uppercase();
    service::Packet {
        stream_identifier: Some(service::StreamIdentifier {
            network: packet.stream_id.network.to_uppercase(),
            station: packet.stream_id.station.to_uppercase(),
            channel: packet.stream_id.channel.to_uppercase(),
            location_code,
        }),
        start_time: Some(us_to_timestamp(packet.start_time_us)),
        sampling_rate: packet.sampling_rate,
        number_of_samples: Some(packet.number_of_samples),
        data_type: data_type_to_service(packet.data_type) as i32,
        data: Some(packet.data.clone()),
    }
}

/// Parses a service-format wire packet.  Used by consumers of the
/// downstream surface (and the tests standing in for them).
pub fn packet_from_wire(packet: service::Packet) -> Result<Packet> {
    let data_type = data_type_from_service(packet.data_type());
    let identifier = packet
        .stream_identifier
        .ok_or_else(|| Error::InvalidPacket("Stream identifier not set".to_string()))?;
    let start_time = packet
        .start_time
        .as_ref()
        .ok_or_else(|| Error::InvalidPacket("Start time not set".to_string()))?;
    let number_of_samples = packet
        .number_of_samples
        .ok_or_else(|| Error::InvalidPacket("Number of samples not set".to_string()))?;
    let data = packet
        .data
        .ok_or_else(|| Error::InvalidPacket("Data not set".to_string()))?;

    Ok(Packet {
        stream_id: StreamId::new(
            identifier.network,
            identifier.station,
            identifier.channel,
            Some(identifier.location_code),
        ),
        start_time_us: timestamp_to_us(start_time),
        sampling_rate: packet.sampling_rate,
        number_of_samples,
        data_type,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import_packet() -> import::Packet {
        import::Packet {
            stream_identifier: Some(import::StreamIdentifier {
                network: "Uu".to_string(),
                station: "CwU".to_string(),
                channel: "HHz".to_string(),
                location_code: Some("01".to_string()),
            }),
            start_time: Some(us_to_timestamp(1_769_631_059_123_321)),
            sampling_rate: 99.9995,
            number_of_samples: Some(8),
            data_type: import::DataType::Integer32 as i32,
            data: Some(vec![0u8; 32]),
        }
    }

    #[test]
    fn test_timestamp_round_trip() {
        for us in [0i64, 1, 999_999, 1_000_000, 1_769_631_059_123_321] {
            assert_eq!(timestamp_to_us(&us_to_timestamp(us)), us);
        }
        // Pre-epoch instants survive too.
        assert_eq!(timestamp_to_us(&us_to_timestamp(-1_500_000)), -1_500_000);
    }

    #[test]
    fn test_import_conversion_uppercases_identifier() {
        let packet = packet_from_import(import_packet()).unwrap();
        assert_eq!(packet.name(), "UU.CWU.HHZ.01");
        assert_eq!(packet.number_of_samples, 8);
        assert_eq!(packet.data_type, DataType::Integer32);
        assert_eq!(packet.start_time_us, 1_769_631_059_123_321);
    }

    #[test]
    fn test_import_conversion_defaults_location_code() {
        let mut wire = import_packet();
        wire.stream_identifier.as_mut().unwrap().location_code = None;
        let packet = packet_from_import(wire).unwrap();
        assert_eq!(
            packet.stream_id.location_code.as_deref(),
            Some(ABSENT_LOCATION_CODE)
        );
        assert_eq!(packet.name(), "UU.CWU.HHZ.--");
    }

    #[test]
    fn test_import_conversion_requires_fields() {
        let mut wire = import_packet();
        wire.stream_identifier = None;
        assert!(packet_from_import(wire).is_err());

        let mut wire = import_packet();
        wire.start_time = None;
        assert!(packet_from_import(wire).is_err());

        let mut wire = import_packet();
        wire.number_of_samples = None;
        assert!(packet_from_import(wire).is_err());

        let mut wire = import_packet();
        wire.data = None;
        assert!(packet_from_import(wire).is_err());
    }

    #[test]
    fn test_service_wire_round_trip() {
        let packet = packet_from_import(import_packet()).unwrap();
        let wire = packet_to_wire(&packet);
        assert_eq!(
            wire.stream_identifier.as_ref().unwrap().location_code,
            "01"
        );
        let back = packet_from_wire(wire).unwrap();
        assert_eq!(back.name(), packet.name());
        assert_eq!(back.start_time_us, packet.start_time_us);
        assert_eq!(back.number_of_samples, packet.number_of_samples);
        assert_eq!(back.data, packet.data);
    }
}
