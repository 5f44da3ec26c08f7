//! Stateless proof verification.
//!
//! A verifier holds nothing but a hasher. Only the root passed in is trusted:
//! leaf digests are always recomputed from the claimed leaf, and any mismatch
//! is reported as `false` rather than an error.

use tracing::trace;

use crate::binary::BinaryMerkleProof;
use crate::error::{MerkleError, MerkleResult};
use crate::hash::{HashValue, MerkleHasher, Sha256Hasher};
use crate::key::SmtKey;
use crate::sparse::SparseMerkleProof;

/// Verifier for binary and sparse merkle proofs
#[derive(Clone, Debug, Default)]
pub struct ProofVerifier<H: MerkleHasher = Sha256Hasher> {
    hasher: H,
}

impl ProofVerifier {
    /// Create a SHA-256 verifier
    pub fn new() -> Self {
        Self::with_hasher(Sha256Hasher)
    }
}

impl<H: MerkleHasher> ProofVerifier<H> {
    /// Create a verifier for trees built with `hasher`
    pub fn with_hasher(hasher: H) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Verify that `leaf` is committed under `root`.
    pub fn verify_binary(&self, root: &HashValue, leaf: &[u8], proof: &BinaryMerkleProof) -> bool {
        let ok = proof.verify_with(&self.hasher, root, leaf);
        trace!(root = %root, steps = proof.depth(), ok, "Verified binary proof");
        ok
    }

    /// Verify that the leaf digest `leaf_hash` is committed under `root`.
    pub fn verify_binary_hash(
        &self,
        root: &HashValue,
        leaf_hash: &HashValue,
        proof: &BinaryMerkleProof,
    ) -> bool {
        proof.verify_hash_with(&self.hasher, root, leaf_hash)
    }

    /// Verify a sparse proof (membership or non-membership) against `root`.
    pub fn verify_sparse(&self, root: &HashValue, proof: &SparseMerkleProof) -> bool {
        let ok = proof.verify_with(&self.hasher, root);
        trace!(
            root = %root,
            key = %proof.key(),
            inclusion = proof.is_inclusion(),
            ok,
            "Verified sparse proof"
        );
        ok
    }

    /// Verify that `key` maps to `value` (or is absent, for `None`) under
    /// `root`.
    ///
    /// Unlike [`verify_sparse`](Self::verify_sparse), the key and value come
    /// from the caller and must match what the proof claims.
    pub fn verify_sparse_entry(
        &self,
        root: &HashValue,
        key: &SmtKey,
        value: Option<&[u8]>,
        proof: &SparseMerkleProof,
    ) -> bool {
        proof.key() == key && proof.value() == value && self.verify_sparse(root, proof)
    }

    /// Verify a sparse proof for a tree of known `depth`.
    ///
    /// A key or path of the wrong length is reported as `DepthMismatch`
    /// instead of a plain `false`.
    pub fn verify_sparse_with_depth(
        &self,
        depth: usize,
        root: &HashValue,
        proof: &SparseMerkleProof,
    ) -> MerkleResult<bool> {
        let key_len = proof.key().bit_len();
        if key_len != depth {
            return Err(MerkleError::DepthMismatch {
                expected: depth,
                got: key_len,
            });
        }
        if proof.depth() != depth {
            return Err(MerkleError::DepthMismatch {
                expected: depth,
                got: proof.depth(),
            });
        }
        Ok(&proof.compute_root_with(&self.hasher)? == root)
    }
}
