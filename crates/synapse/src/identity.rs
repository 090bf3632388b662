use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

pub const IDENTITY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdentityError {
    #[error("client id is empty")]
    Empty,
    #[error("client id has non-digit byte {byte:#04x} at index {index}")]
    InvalidDigit { index: usize, byte: u8 },
    #[error("client id does not fit in 128 bits")]
    Overflow,
}

/// 128-bit client identifier. Travels as 16 big-endian bytes in punch packets
/// and as an unsigned decimal string in control-plane queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdentity(u128);

impl ClientIdentity {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().as_u128())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn to_decimal(&self) -> String {
        encode_decimal(self.0)
    }

    pub fn from_decimal(s: &str) -> Result<Self, ParseIdentityError> {
        decode_decimal(s).map(Self)
    }

    pub const fn to_be_bytes(&self) -> [u8; IDENTITY_LEN] {
        encode_binary_be(self.0)
    }

    pub const fn from_be_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(decode_binary_be(bytes))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal(s)
    }
}

pub fn encode_decimal(id: u128) -> String {
    id.to_string()
}

// u128::from_str accepts a leading '+', which the wire form never carries.
pub fn decode_decimal(s: &str) -> Result<u128, ParseIdentityError> {
    if s.is_empty() {
        return Err(ParseIdentityError::Empty);
    }

    let mut value: u128 = 0;
    for (index, byte) in s.bytes().enumerate() {
        if !byte.is_ascii_digit() {
            return Err(ParseIdentityError::InvalidDigit { index, byte });
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u128::from(byte - b'0')))
            .ok_or(ParseIdentityError::Overflow)?;
    }

    Ok(value)
}

pub const fn encode_binary_be(id: u128) -> [u8; IDENTITY_LEN] {
    id.to_be_bytes()
}

pub const fn decode_binary_be(bytes: [u8; IDENTITY_LEN]) -> u128 {
    u128::from_be_bytes(bytes)
}
