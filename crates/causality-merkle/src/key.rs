//! Sparse Merkle Tree keys.
//!
//! A key is a bit string whose length equals the tree depth. Bits are stored
//! left-aligned (MSB first) in a 32-byte buffer with every bit past the key
//! length cleared, so two keys are equal exactly when their bit strings are.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MerkleError, MerkleResult};
use crate::hash::HashValue;
use crate::{HASH_LENGTH, MAX_DEPTH};

/// A key in a sparse Merkle tree of a given depth.
///
/// Decoding (serde or bincode) goes through the same checks as
/// [`SmtKey::from_bytes`], so a received key is always canonical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, bincode::Encode)]
#[serde(try_from = "RawSmtKey")]
pub struct SmtKey {
    bits: HashValue,
    len: u16,
}

/// Wire form of [`SmtKey`] before validation.
#[derive(Deserialize, bincode::Decode)]
struct RawSmtKey {
    bits: HashValue,
    len: u16,
}

impl TryFrom<RawSmtKey> for SmtKey {
    type Error = MerkleError;

    fn try_from(raw: RawSmtKey) -> MerkleResult<Self> {
        let len = raw.len as usize;
        if len == 0 || len > MAX_DEPTH {
            return Err(MerkleError::InvalidInput(format!(
                "key length must be 1..={} bits, got {}",
                MAX_DEPTH, len
            )));
        }
        let (used, rest) = raw.bits.as_bytes().split_at(len.div_ceil(8));
        if rest.iter().any(|b| *b != 0) {
            return Err(MerkleError::InvalidInput(format!(
                "bits past position {} must be zero",
                len
            )));
        }
        Self::from_bytes(used, len)
    }
}

impl<Context> bincode::Decode<Context> for SmtKey {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let raw = <RawSmtKey as bincode::Decode<Context>>::decode(decoder)?;
        Self::try_from(raw).map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

bincode::impl_borrow_decode!(SmtKey);

impl SmtKey {
    /// A full 256-bit key.
    pub fn from_hash(hash: HashValue) -> Self {
        Self {
            bits: hash,
            len: MAX_DEPTH as u16,
        }
    }

    /// A key made of the low `len` bits of `value`, most significant first.
    ///
    /// `SmtKey::from_bits(0b0101, 4)` walks left, right, left, right from the
    /// root.
    pub fn from_bits(value: u64, len: usize) -> MerkleResult<Self> {
        if len == 0 || len > 64 {
            return Err(MerkleError::InvalidInput(format!(
                "integer keys must be 1..=64 bits, got {}",
                len
            )));
        }
        if len < 64 && value >> len != 0 {
            return Err(MerkleError::InvalidInput(format!(
                "value {:#x} does not fit in {} bits",
                value, len
            )));
        }

        let mut bytes = [0u8; HASH_LENGTH];
        bytes[..8].copy_from_slice(&(value << (64 - len)).to_be_bytes());
        Ok(Self {
            bits: HashValue::new(bytes),
            len: len as u16,
        })
    }

    /// A key of `len` bits stored left-aligned in `bytes`.
    ///
    /// `bytes` must be exactly `ceil(len / 8)` long and the unused low bits of
    /// the last byte must be zero.
    pub fn from_bytes(bytes: &[u8], len: usize) -> MerkleResult<Self> {
        if len == 0 || len > MAX_DEPTH {
            return Err(MerkleError::InvalidInput(format!(
                "key length must be 1..={} bits, got {}",
                MAX_DEPTH, len
            )));
        }
        let expected = len.div_ceil(8);
        if bytes.len() != expected {
            return Err(MerkleError::InvalidInput(format!(
                "{}-bit key needs {} bytes, got {}",
                len,
                expected,
                bytes.len()
            )));
        }
        let spare = expected * 8 - len;
        if spare > 0 && bytes[expected - 1] & ((1u8 << spare) - 1) != 0 {
            return Err(MerkleError::InvalidInput(format!(
                "bits past position {} must be zero",
                len
            )));
        }

        let mut buf = [0u8; HASH_LENGTH];
        buf[..expected].copy_from_slice(bytes);
        Ok(Self {
            bits: HashValue::new(buf),
            len: len as u16,
        })
    }

    /// Number of bits in this key.
    pub fn bit_len(&self) -> usize {
        self.len as usize
    }

    /// The bit at `index`, counted from the root (0 is the MSB).
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < self.bit_len(), "key bit index out of bounds");
        self.bits.bit(index)
    }

    /// The minimal left-aligned byte encoding, `ceil(len / 8)` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits.as_bytes()[..self.bit_len().div_ceil(8)]
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_len(&self, other: &SmtKey) -> usize {
        self.bits
            .common_prefix_bits(&other.bits)
            .min(self.bit_len())
            .min(other.bit_len())
    }
}

impl From<HashValue> for SmtKey {
    fn from(hash: HashValue) -> Self {
        Self::from_hash(hash)
    }
}

impl fmt::Display for SmtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}/{}", hex::encode(self.as_bytes()), self.len)
    }
}

impl fmt::Debug for SmtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmtKey({})", self)
    }
}
