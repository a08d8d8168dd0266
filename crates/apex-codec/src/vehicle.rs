//! ---
//! apex_section: "02-packet-codec"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Validated vehicle identifier."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the identifier field on the wire.
pub const VEHICLE_ID_LEN: usize = 10;

/// Reasons an identifier is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidVehicleId {
    /// Nothing left after stripping NUL padding.
    #[error("identifier is empty")]
    Empty,
    /// More bytes than the wire field holds.
    #[error("identifier is {len} bytes, limit is {limit}", limit = VEHICLE_ID_LEN)]
    TooLong {
        /// Byte length of the rejected identifier.
        len: usize,
    },
    /// A byte outside printable ASCII (0x20..=0x7E).
    #[error("byte 0x{byte:02x} at position {position} is not printable ASCII")]
    NonPrintable {
        /// Index of the offending byte.
        position: usize,
        /// Offending byte value.
        byte: u8,
    },
}

/// Short printable ASCII label such as `CAR_1` or `CAR_81`.
///
/// Any identifier that passes validation is accepted; the fleet is not
/// restricted to a fixed roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VehicleId(String);

impl VehicleId {
    /// Validate and wrap an identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidVehicleId> {
        let id = id.into();
        validate(id.as_bytes())?;
        Ok(Self(id))
    }

    /// Parse the fixed-width wire field, dropping trailing NUL padding.
    pub fn from_wire(raw: &[u8; VEHICLE_ID_LEN]) -> Result<Self, InvalidVehicleId> {
        let end = raw.iter().rposition(|b| *b != 0).map_or(0, |idx| idx + 1);
        let trimmed = &raw[..end];
        validate(trimmed)?;
        // validate() guarantees ASCII, so this conversion cannot fail.
        let id = String::from_utf8_lossy(trimmed).into_owned();
        Ok(Self(id))
    }

    /// NUL padded wire representation.
    pub fn to_wire(&self) -> [u8; VEHICLE_ID_LEN] {
        let mut raw = [0u8; VEHICLE_ID_LEN];
        let bytes = self.0.as_bytes();
        raw[..bytes.len()].copy_from_slice(bytes);
        raw
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(bytes: &[u8]) -> Result<(), InvalidVehicleId> {
    if bytes.is_empty() {
        return Err(InvalidVehicleId::Empty);
    }
    if bytes.len() > VEHICLE_ID_LEN {
        return Err(InvalidVehicleId::TooLong { len: bytes.len() });
    }
    if let Some((position, byte)) = bytes
        .iter()
        .copied()
        .enumerate()
        .find(|(_, b)| !(0x20..=0x7E).contains(b))
    {
        return Err(InvalidVehicleId::NonPrintable { position, byte });
    }
    Ok(())
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VehicleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VehicleId {
    type Error = InvalidVehicleId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VehicleId> for String {
    fn from(value: VehicleId) -> Self {
        value.0
    }
}
