//! ---
//! apex_section: "02-packet-codec"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Wire format and decoded types for vehicle telemetry."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
//! Codec for the fixed-size telemetry datagram.
//!
//! Layout (little-endian, 34 bytes):
//!
//! | offset | size | field               | type                 |
//! |--------|------|---------------------|----------------------|
//! | 0      | 8    | `timestamp`         | f64, epoch seconds   |
//! | 8      | 10   | `vehicle_id`        | ASCII, NUL padded    |
//! | 18     | 4    | `speed_kph`         | f32                  |
//! | 22     | 4    | `ride_height_m`     | f32, meters          |
//! | 26     | 4    | `vertical_velocity` | f32, m/s             |
//! | 30     | 4    | `engine_temp_c`     | f32                  |
//!
//! Ride height travels in meters and is stored in meters; the only conversion
//! to millimeters is [`TelemetryReading::ride_height_mm`].
#![warn(missing_docs)]

mod reading;
mod vehicle;

pub use reading::TelemetryReading;
pub use vehicle::{InvalidVehicleId, VehicleId, VEHICLE_ID_LEN};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Exact size of a telemetry datagram.
pub const PACKET_LEN: usize = 34;

/// Result type for decoding operations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Reasons a datagram is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The datagram is not exactly [`PACKET_LEN`] bytes.
    #[error("datagram must be {expected} bytes, got {actual}", expected = PACKET_LEN)]
    BadLength {
        /// Received length.
        actual: usize,
    },
    /// The identifier field is empty or contains non-printable bytes.
    #[error("invalid vehicle identifier: {0}")]
    InvalidIdentifier(#[from] InvalidVehicleId),
    /// A float field decoded to NaN or infinity.
    #[error("field {field} is not finite")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
    },
}

impl DecodeError {
    /// Short label suitable for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::BadLength { .. } => "bad_length",
            DecodeError::InvalidIdentifier(_) => "invalid_identifier",
            DecodeError::NonFinite { .. } => "non_finite",
        }
    }
}

/// Decode a datagram into a reading.
pub fn decode(datagram: &[u8]) -> DecodeResult<TelemetryReading> {
    if datagram.len() != PACKET_LEN {
        return Err(DecodeError::BadLength {
            actual: datagram.len(),
        });
    }

    let mut buf = datagram;
    let timestamp = finite_f64("timestamp", buf.get_f64_le())?;
    let mut raw_id = [0u8; VEHICLE_ID_LEN];
    buf.copy_to_slice(&mut raw_id);
    let vehicle_id = VehicleId::from_wire(&raw_id)?;
    let speed_kph = finite_f32("speed_kph", buf.get_f32_le())?;
    let ride_height_m = finite_f32("ride_height_m", buf.get_f32_le())?;
    let vertical_velocity = finite_f32("vertical_velocity", buf.get_f32_le())?;
    let engine_temp_c = finite_f32("engine_temp_c", buf.get_f32_le())?;

    Ok(TelemetryReading {
        timestamp,
        vehicle_id,
        speed_kph,
        ride_height_m,
        vertical_velocity,
        engine_temp_c,
    })
}

/// Encode a reading into a freshly allocated datagram.
pub fn encode(reading: &TelemetryReading) -> Bytes {
    let mut buf = BytesMut::with_capacity(PACKET_LEN);
    encode_into(reading, &mut buf);
    buf.freeze()
}

/// Append the wire form of `reading` to `buf`.
pub fn encode_into(reading: &TelemetryReading, buf: &mut BytesMut) {
    buf.reserve(PACKET_LEN);
    buf.put_f64_le(reading.timestamp);
    buf.put_slice(&reading.vehicle_id.to_wire());
    buf.put_f32_le(reading.speed_kph);
    buf.put_f32_le(reading.ride_height_m);
    buf.put_f32_le(reading.vertical_velocity);
    buf.put_f32_le(reading.engine_temp_c);
}

fn finite_f64(field: &'static str, value: f64) -> DecodeResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite { field })
    }
}

fn finite_f32(field: &'static str, value: f32) -> DecodeResult<f32> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryReading {
        TelemetryReading {
            timestamp: 1_767_225_600.125,
            vehicle_id: VehicleId::new("CAR_81").unwrap(),
            speed_kph: 322.5,
            ride_height_m: 0.0275,
            vertical_velocity: -0.25,
            engine_temp_c: 97.5,
        }
    }

    #[test]
    fn layout_matches_documented_offsets() {
        let bytes = encode(&sample());
        assert_eq!(bytes.len(), PACKET_LEN);
        assert_eq!(&bytes[0..8], &1_767_225_600.125f64.to_le_bytes());
        assert_eq!(&bytes[8..18], b"CAR_81\0\0\0\0");
        assert_eq!(&bytes[18..22], &322.5f32.to_le_bytes());
        assert_eq!(&bytes[22..26], &0.0275f32.to_le_bytes());
        assert_eq!(&bytes[26..30], &(-0.25f32).to_le_bytes());
        assert_eq!(&bytes[30..34], &97.5f32.to_le_bytes());
    }

    #[test]
    fn decode_restores_encoded_reading() {
        let reading = sample();
        assert_eq!(decode(&encode(&reading)).unwrap(), reading);
    }

    #[test]
    fn full_width_identifier_has_no_terminator() {
        let mut reading = sample();
        reading.vehicle_id = VehicleId::new("ABCDEFGHIJ").unwrap();
        let bytes = encode(&reading);
        assert_eq!(&bytes[8..18], b"ABCDEFGHIJ");
        assert_eq!(decode(&bytes).unwrap().vehicle_id.as_str(), "ABCDEFGHIJ");
    }

    #[test]
    fn rejects_wrong_lengths() {
        let bytes = encode(&sample());
        assert_eq!(
            decode(&bytes[..33]),
            Err(DecodeError::BadLength { actual: 33 })
        );
        let mut longer = bytes.to_vec();
        longer.push(0);
        assert_eq!(decode(&longer), Err(DecodeError::BadLength { actual: 35 }));
        assert_eq!(decode(&[]), Err(DecodeError::BadLength { actual: 0 }));
    }

    #[test]
    fn rejects_legacy_short_identifier_packets() {
        // Decommissioned variants carried 5 or 6 byte identifiers (29/30 bytes).
        assert!(matches!(
            decode(&[0u8; 29]),
            Err(DecodeError::BadLength { actual: 29 })
        ));
        assert!(matches!(
            decode(&[0u8; 30]),
            Err(DecodeError::BadLength { actual: 30 })
        ));
    }

    #[test]
    fn rejects_non_printable_identifier() {
        let mut bytes = encode(&sample()).to_vec();
        bytes[9] = 0x07;
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::InvalidIdentifier(
                InvalidVehicleId::NonPrintable { position: 1, byte: 0x07 }
            ))
        ));
    }

    #[test]
    fn rejects_all_nul_identifier() {
        let mut bytes = encode(&sample()).to_vec();
        bytes[8..18].fill(0);
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::InvalidIdentifier(InvalidVehicleId::Empty))
        );
    }

    #[test]
    fn rejects_non_finite_fields() {
        let mut bytes = encode(&sample()).to_vec();
        bytes[26..30].copy_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::NonFinite {
                field: "vertical_velocity"
            })
        );

        let mut bytes = encode(&sample()).to_vec();
        bytes[0..8].copy_from_slice(&f64::INFINITY.to_le_bytes());
        assert_eq!(
            decode(&bytes).map_err(|err| err.reason()),
            Err("non_finite")
        );
    }

    #[test]
    fn accepts_unknown_identifiers() {
        let mut reading = sample();
        reading.vehicle_id = VehicleId::new("GHOST 99").unwrap();
        assert_eq!(decode(&encode(&reading)).unwrap().vehicle_id.as_str(), "GHOST 99");
    }
}
