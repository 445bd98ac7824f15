// blockchain-crypto/src/address.rs

use crate::{hash::keccak256, CryptoError, CryptoResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address length in bytes
pub const ADDRESS_SIZE: usize = 20;

/// 20-byte account or contract address
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        if slice.len() != ADDRESS_SIZE {
            return Err(CryptoError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_SIZE,
                slice.len()
            )));
        }
        let mut arr = [0u8; ADDRESS_SIZE];
        arr.copy_from_slice(slice);
        Ok(Self(arr))
    }

    /// Address derived from the last 20 bytes of keccak256(data)
    pub fn from_keccak(data: &[u8]) -> Self {
        let hash = keccak256(data);
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&hash[12..32]);
        Self(address)
    }

    /// Address held in the low 20 bytes of a 32-byte word
    pub fn from_word(word: &[u8; 32]) -> Self {
        let mut address = [0u8; ADDRESS_SIZE];
        address.copy_from_slice(&word[12..32]);
        Self(address)
    }

    /// Left-padded 32-byte representation
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)
            .map_err(|e| CryptoError::DeserializationError(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn zero() -> Self {
        Self([0u8; ADDRESS_SIZE])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let address = Address::new([0xab; 20]);
        let hex = address.to_hex();
        assert_eq!(hex.len(), 42);
        assert_eq!(Address::from_hex(&hex).unwrap(), address);
        assert_eq!(hex.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_address_rejects_bad_length() {
        assert!(Address::from_hex("0x1234").is_err());
        assert!(Address::from_hex("zz").is_err());
    }

    #[test]
    fn test_word_conversion() {
        let address = Address::new([7u8; 20]);
        let word = address.to_word();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(Address::from_word(&word), address);
    }

    #[test]
    fn test_from_keccak_is_stable() {
        let a = Address::from_keccak(b"deployer");
        let b = Address::from_keccak(b"deployer");
        assert_eq!(a, b);
        assert_ne!(a, Address::from_keccak(b"other"));
    }
}
