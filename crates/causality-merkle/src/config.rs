//! Configuration for building merkle trees.

use serde::{Deserialize, Serialize};

use crate::binary::BinaryMerkleTree;
use crate::error::{MerkleError, MerkleResult};
use crate::hash::{check_digest_len, HashAlgorithm};
use crate::sparse::SparseMerkleTree;
use crate::verify::ProofVerifier;
use crate::{HASH_LENGTH, MAX_DEPTH};

/// Merkle configuration
///
/// Missing fields take their defaults, so `{}` deserializes to
/// `MerkleConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerkleConfig {
    /// Hash function for every tree built from this config
    pub hash_algorithm: HashAlgorithm,

    /// Sparse tree depth in bits, `1..=256`
    pub depth: usize,

    /// Expected digest size in bytes; must match the hash algorithm
    pub digest_len: usize,
}

impl Default for MerkleConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            depth: MAX_DEPTH,
            digest_len: HASH_LENGTH,
        }
    }
}

impl MerkleConfig {
    /// Validate configuration
    pub fn validate(&self) -> MerkleResult<()> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(MerkleError::InvalidDepth(self.depth));
        }
        check_digest_len(&self.hash_algorithm, self.digest_len)
    }

    /// An empty sparse tree with the configured hash and depth.
    pub fn sparse_tree(&self) -> MerkleResult<SparseMerkleTree<HashAlgorithm>> {
        SparseMerkleTree::from_config(self)
    }

    /// A dense tree over `leaves` with the configured hash.
    pub fn binary_tree<T: AsRef<[u8]>>(
        &self,
        leaves: &[T],
    ) -> MerkleResult<BinaryMerkleTree<HashAlgorithm>> {
        self.validate()?;
        Ok(BinaryMerkleTree::build_with_hasher(self.hash_algorithm, leaves))
    }

    /// A verifier for proofs from trees built with this config.
    pub fn verifier(&self) -> MerkleResult<ProofVerifier<HashAlgorithm>> {
        self.validate()?;
        Ok(ProofVerifier::with_hasher(self.hash_algorithm))
    }
}
