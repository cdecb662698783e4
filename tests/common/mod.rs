//! Shared helpers for integration tests.

use seis_relay::packet::{DataType, Packet, StreamId};

/// Little-endian packs 32-bit integer samples the way the import service
/// does.
pub fn pack_i32(samples: &[i32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|sample| sample.to_le_bytes())
        .collect()
}

/// Builds a service-format packet with `n` zero-valued Integer32 samples.
pub fn make_packet(
    network: &str,
    station: &str,
    channel: &str,
    location_code: &str,
    sampling_rate: f64,
    n: i32,
    start_time_us: i64,
) -> Packet {
    let samples = vec![0i32; n as usize];
    Packet {
        stream_id: StreamId::new(network, station, channel, Some(location_code.to_string())),
        start_time_us,
        sampling_rate,
        number_of_samples: n,
        data_type: DataType::Integer32,
        data: pack_i32(&samples),
    }
}
