use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Wire value at and above which a key parameters byte is not a known key type.
pub const INVALID_KEY_TYPE: u8 = 3;

/// Token Binding key parameters negotiated on the TLS connection (RFC 8471 §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyType {
    Rsa2048Pkcs15 = 0,
    Rsa2048Pss = 1,
    EcdsaP256 = 2,
}

impl KeyType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rsa2048Pkcs15 => "rsa2048_pkcs1.5",
            Self::Rsa2048Pss => "rsa2048_pss",
            Self::EcdsaP256 => "ecdsap256",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid token binding key parameters value {0}")]
pub struct InvalidKeyType(pub u8);

impl TryFrom<u8> for KeyType {
    type Error = InvalidKeyType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Rsa2048Pkcs15),
            1 => Ok(Self::Rsa2048Pss),
            2 => Ok(Self::EcdsaP256),
            other => Err(InvalidKeyType(other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown key type '{0}', expected one of: rsa2048_pkcs1.5, rsa2048_pss, ecdsap256")]
pub struct UnknownKeyTypeName(pub String);

impl FromStr for KeyType {
    type Err = UnknownKeyTypeName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa2048_pkcs1.5" | "rsa2048_pkcs15" | "0" => Ok(Self::Rsa2048Pkcs15),
            "rsa2048_pss" | "1" => Ok(Self::Rsa2048Pss),
            "ecdsap256" | "ecdsa_p256" | "2" => Ok(Self::EcdsaP256),
            _ => Err(UnknownKeyTypeName(s.to_string())),
        }
    }
}

/// Raw key parameters byte as reported by the TLS stack.
///
/// Kept unconverted until it is used so that an out-of-range value surfaces
/// as a hard failure at the point of use instead of being coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyParameters(pub u8);

impl KeyParameters {
    pub fn key_type(self) -> Result<KeyType, InvalidKeyType> {
        KeyType::try_from(self.0)
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 < INVALID_KEY_TYPE
    }
}

impl From<KeyType> for KeyParameters {
    fn from(key_type: KeyType) -> Self {
        Self(key_type.as_u8())
    }
}
