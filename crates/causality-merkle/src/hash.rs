//! Hash utilities and types for merkle trees.
//!
//! Every tree is parameterised by a [`MerkleHasher`]. Leaves and internal nodes
//! are hashed with distinct one-byte domain prefixes (see [`prefix`]) so a leaf
//! digest can never be replayed as an internal node digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::sparse::{compute_empty_ladder, BLAKE3_EMPTY_LADDER, SHA256_EMPTY_LADDER};
use crate::{MerkleError, MerkleResult, HASH_LENGTH};

/// A 256-bit hash value used as keys and node hashes in merkle trees.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Default,
    bincode::Encode,
    bincode::Decode,
)]
pub struct HashValue([u8; HASH_LENGTH]);

impl HashValue {
    /// The zero hash (all zeros)
    pub const ZERO: HashValue = HashValue([0u8; HASH_LENGTH]);

    /// Create a new HashValue from a fixed-size array
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create a HashValue from a slice.
    ///
    /// Slices of any other length are rejected, never truncated or padded.
    pub fn from_slice(bytes: &[u8]) -> MerkleResult<Self> {
        if bytes.len() != HASH_LENGTH {
            return Err(MerkleError::HashLengthMismatch {
                expected: HASH_LENGTH,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    /// Create a HashValue from hex string
    pub fn from_hex(hex_str: &str) -> MerkleResult<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)
            .map_err(|e| MerkleError::InvalidInput(format!("Invalid hex: {}", e)))?;
        Self::from_slice(&bytes)
    }

    /// Returns the zero hash
    pub fn zero() -> Self {
        Self::ZERO
    }

    /// Check if this is the zero hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Convert to a Vec<u8>
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Lowercase hex without the `0x` prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the bit at the given index (0-255)
    ///
    /// Index 0 is the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        assert!(index < HASH_LENGTH * 8, "bit index out of bounds");
        let byte = self.0[index / 8];
        let bit_pos = 7 - (index % 8);
        (byte >> bit_pos) & 1 == 1
    }

    /// Compute the common prefix length with another hash (in bits)
    pub fn common_prefix_bits(&self, other: &HashValue) -> usize {
        for i in 0..HASH_LENGTH {
            if self.0[i] != other.0[i] {
                let xor = self.0[i] ^ other.0[i];
                return i * 8 + xor.leading_zeros() as usize;
            }
        }
        HASH_LENGTH * 8
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self)
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LENGTH]> for HashValue {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

/// Domain separation prefixes for hashing
pub mod prefix {
    /// Prefix for leaf nodes in binary merkle tree
    pub const LEAF: &[u8] = &[0x00];
    /// Prefix for internal nodes in binary merkle tree
    pub const INTERNAL: &[u8] = &[0x01];
    /// Prefix for sparse merkle tree leaf nodes
    pub const SPARSE_LEAF: &[u8] = &[0x02];
    /// Prefix for sparse merkle tree internal nodes
    pub const SPARSE_INTERNAL: &[u8] = &[0x03];
    /// Preimage of the canonical empty sparse leaf
    pub const SPARSE_EMPTY: &[u8] = b"SPARSE_EMPTY";
}

/// A collision-resistant hash function used to build merkle trees.
///
/// Implementations must be pure: the same input parts always produce the same
/// digest, and `hash_parts(&[a, b])` must equal `hash(a ‖ b)`.
pub trait MerkleHasher: Clone + Send + Sync + fmt::Debug {
    /// Human readable algorithm name, used in logs.
    fn name(&self) -> &'static str;

    /// Size in bytes of the digests this hasher produces.
    fn digest_len(&self) -> usize {
        HASH_LENGTH
    }

    /// Hash the concatenation of `parts`.
    fn hash_parts(&self, parts: &[&[u8]]) -> HashValue;

    /// Hash a single byte string.
    fn hash(&self, data: &[u8]) -> HashValue {
        self.hash_parts(&[data])
    }

    /// Digests of empty sparse subtrees indexed by height, `0..=MAX_DEPTH`.
    ///
    /// Hashers with a process-wide cached ladder override this to hand out a
    /// shared reference instead of recomputing it.
    fn empty_ladder(&self) -> Arc<[HashValue]> {
        compute_empty_ladder(self)
    }
}

/// SHA-256, the default commitment hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha256Hasher;

impl MerkleHasher for Sha256Hasher {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn hash_parts(&self, parts: &[&[u8]]) -> HashValue {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let result = hasher.finalize();
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&result);
        HashValue(bytes)
    }

    fn empty_ladder(&self) -> Arc<[HashValue]> {
        SHA256_EMPTY_LADDER.clone()
    }
}

/// BLAKE3 in its default 32-byte output mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Blake3Hasher;

impl MerkleHasher for Blake3Hasher {
    fn name(&self) -> &'static str {
        "blake3"
    }

    fn hash_parts(&self, parts: &[&[u8]]) -> HashValue {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        HashValue(*hasher.finalize().as_bytes())
    }

    fn empty_ladder(&self) -> Arc<[HashValue]> {
        BLAKE3_EMPTY_LADDER.clone()
    }
}

/// Runtime-selectable hash algorithm, as named in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl MerkleHasher for HashAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => Sha256Hasher.name(),
            HashAlgorithm::Blake3 => Blake3Hasher.name(),
        }
    }

    fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => Sha256Hasher.digest_len(),
            HashAlgorithm::Blake3 => Blake3Hasher.digest_len(),
        }
    }

    fn hash_parts(&self, parts: &[&[u8]]) -> HashValue {
        match self {
            HashAlgorithm::Sha256 => Sha256Hasher.hash_parts(parts),
            HashAlgorithm::Blake3 => Blake3Hasher.hash_parts(parts),
        }
    }

    fn empty_ladder(&self) -> Arc<[HashValue]> {
        match self {
            HashAlgorithm::Sha256 => Sha256Hasher.empty_ladder(),
            HashAlgorithm::Blake3 => Blake3Hasher.empty_ladder(),
        }
    }
}

/// Reject a hasher whose digest size differs from the configured one.
pub fn check_digest_len<H: MerkleHasher>(hasher: &H, configured: usize) -> MerkleResult<()> {
    let got = hasher.digest_len();
    if got != HASH_LENGTH {
        return Err(MerkleError::HashLengthMismatch {
            expected: HASH_LENGTH,
            got,
        });
    }
    if got != configured {
        return Err(MerkleError::HashLengthMismatch {
            expected: configured,
            got,
        });
    }
    Ok(())
}

/// Hash data using SHA-256
pub fn sha256(data: &[u8]) -> HashValue {
    Sha256Hasher.hash(data)
}

/// Hash leaf data (for binary merkle tree)
pub fn hash_leaf<H: MerkleHasher>(hasher: &H, data: &[u8]) -> HashValue {
    hasher.hash_parts(&[prefix::LEAF, data])
}

/// Hash two child hashes to create parent hash (for binary merkle tree)
pub fn hash_internal<H: MerkleHasher>(hasher: &H, left: &HashValue, right: &HashValue) -> HashValue {
    hasher.hash_parts(&[prefix::INTERNAL, left.as_bytes(), right.as_bytes()])
}

/// Hash a value stored under a sparse tree key
pub fn hash_value<H: MerkleHasher>(hasher: &H, value: &[u8]) -> HashValue {
    hasher.hash(value)
}

/// Hash a sparse tree leaf: `H(0x02 ‖ key ‖ value_hash)`
pub fn hash_sparse_leaf<H: MerkleHasher>(
    hasher: &H,
    key: &[u8],
    value_hash: &HashValue,
) -> HashValue {
    hasher.hash_parts(&[prefix::SPARSE_LEAF, key, value_hash.as_bytes()])
}

/// Hash two sparse tree children: `H(0x03 ‖ left ‖ right)`
pub fn hash_sparse_internal<H: MerkleHasher>(
    hasher: &H,
    left: &HashValue,
    right: &HashValue,
) -> HashValue {
    hasher.hash_parts(&[prefix::SPARSE_INTERNAL, left.as_bytes(), right.as_bytes()])
}

/// Derive a 256-bit sparse tree key for `data` stored under `namespace`:
/// `H(namespace ‖ data)`.
///
/// There is no separator, so callers must use namespaces that are not
/// prefixes of one another.
pub fn derive_key<H: MerkleHasher>(hasher: &H, namespace: &str, data: &[u8]) -> HashValue {
    hasher.hash_parts(&[namespace.as_bytes(), data])
}
