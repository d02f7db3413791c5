//! Key and value codecs for the SMC wire format.
//!
//! Keys are four ASCII characters packed big-endian into a `u32`. Values travel
//! as raw bytes tagged with a data-type code, which is itself a four-character
//! code. Only the encodings needed for fans and temperatures are implemented:
//!
//! - `sp78`: signed fixed point, 8 integer bits and 8 fractional bits
//! - `fpe2`: unsigned fixed point, value scaled by 4
//! - `ui8 `: a single unsigned byte
//!
//! # Example
//!
//! ```
//! use smc_fand::smc::codec::{ManagementKey, decode_fan_speed, encode_fan_speed};
//!
//! let key = ManagementKey::new("F0Ac");
//! assert_eq!(key.code(), 0x4630_4163);
//! assert_eq!(decode_fan_speed(encode_fan_speed(2000)), 2000);
//! ```

use std::fmt;

use serde::{Serialize, Serializer};

/// Largest payload a single SMC value can carry.
pub const MAX_VALUE_SIZE: usize = 32;

/// Largest RPM representable in `fpe2`.
pub const FPE2_MAX: u32 = 16383;

pub const TYPE_SP78: ManagementKey = ManagementKey::from_bytes(*b"sp78");
pub const TYPE_FPE2: ManagementKey = ManagementKey::from_bytes(*b"fpe2");
pub const TYPE_UI8: ManagementKey = ManagementKey::from_bytes(*b"ui8 ");

/// Four-character identifier of one SMC value, stored as its wire code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagementKey(u32);

impl ManagementKey {
    /// Builds a key from an identifier, truncating to 4 bytes or zero-padding.
    pub fn new(id: &str) -> Self {
        Self(encode_key(id))
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// Per-fan key such as `F0Ac` (current speed) or `F1Md` (mode).
    pub fn fan(index: usize, suffix: &str) -> Self {
        Self::new(&format!("F{index}{suffix}"))
    }

    pub const fn code(self) -> u32 {
        self.0
    }

    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ManagementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&decode_key(self.0))
    }
}

impl fmt::Debug for ManagementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagementKey({:?})", decode_key(self.0))
    }
}

impl From<&str> for ManagementKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl Serialize for ManagementKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&decode_key(self.0))
    }
}

/// Packs the first four bytes of `id` big-endian; missing bytes are zero.
pub fn encode_key(id: &str) -> u32 {
    let mut bytes = [0u8; 4];
    for (slot, byte) in bytes.iter_mut().zip(id.bytes()) {
        *slot = byte;
    }
    u32::from_be_bytes(bytes)
}

/// Inverse of [`encode_key`]. Trailing padding is dropped and non-printable
/// bytes are shown as `.`.
pub fn decode_key(code: u32) -> String {
    let bytes = code.to_be_bytes();
    let len = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    bytes[..len]
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

/// `sp78` to degrees Celsius.
pub fn decode_temperature(bytes: [u8; 2]) -> f32 {
    f32::from(i16::from_be_bytes(bytes)) / 256.0
}

/// Degrees Celsius to `sp78`, saturating at the representable range.
pub fn encode_temperature(celsius: f32) -> [u8; 2] {
    let raw = (celsius * 256.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX));
    (raw as i16).to_be_bytes()
}

/// RPM to `fpe2`. Values above [`FPE2_MAX`] are clamped.
pub fn encode_fan_speed(rpm: u32) -> [u8; 2] {
    let clamped = rpm.min(FPE2_MAX) as u16;
    (clamped << 2).to_be_bytes()
}

/// `fpe2` to RPM; the two fractional bits are discarded.
pub fn decode_fan_speed(bytes: [u8; 2]) -> u32 {
    u32::from(u16::from_be_bytes(bytes) >> 2)
}

pub fn encode_mode(mode: u8) -> [u8; 1] {
    [mode]
}

/// Raw SMC value together with its declared type and size.
#[derive(Clone, PartialEq, Eq)]
pub struct TypedValue {
    data_type: ManagementKey,
    size: usize,
    bytes: [u8; MAX_VALUE_SIZE],
}

impl TypedValue {
    /// Wraps `payload`; anything past [`MAX_VALUE_SIZE`] is dropped.
    pub fn new(data_type: ManagementKey, payload: &[u8]) -> Self {
        let size = payload.len().min(MAX_VALUE_SIZE);
        let mut bytes = [0u8; MAX_VALUE_SIZE];
        bytes[..size].copy_from_slice(&payload[..size]);
        Self {
            data_type,
            size,
            bytes,
        }
    }

    pub fn temperature(celsius: f32) -> Self {
        Self::new(TYPE_SP78, &encode_temperature(celsius))
    }

    pub fn fan_speed(rpm: u32) -> Self {
        Self::new(TYPE_FPE2, &encode_fan_speed(rpm))
    }

    pub fn mode(mode: u8) -> Self {
        Self::new(TYPE_UI8, &encode_mode(mode))
    }

    pub fn data_type(&self) -> ManagementKey {
        self.data_type
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    /// Decodes an `sp78` value; `None` for any other type.
    pub fn as_temperature(&self) -> Option<f32> {
        self.pair(TYPE_SP78).map(decode_temperature)
    }

    /// Decodes an `fpe2` value; `None` for any other type.
    pub fn as_fan_speed(&self) -> Option<u32> {
        self.pair(TYPE_FPE2).map(decode_fan_speed)
    }

    /// Decodes a `ui8 ` value; `None` for any other type.
    pub fn as_u8(&self) -> Option<u8> {
        (self.data_type == TYPE_UI8 && self.size >= 1).then(|| self.bytes[0])
    }

    fn pair(&self, expected: ManagementKey) -> Option<[u8; 2]> {
        (self.data_type == expected && self.size >= 2).then(|| [self.bytes[0], self.bytes[1]])
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedValue")
            .field("data_type", &self.data_type)
            .field("payload", &self.payload())
            .finish()
    }
}
