//! Binary Merkle Tree implementation.
//!
//! A dense binary Merkle tree for ordered data commitments, such as the
//! ordered fact or effect lists committed by the execution layer.
//!
//! # Features
//!
//! - O(log n) proof generation and verification
//! - Domain separation with leaf/inner node prefixes
//! - O(log n) append and in-place leaf update
//!
//! # Odd levels
//!
//! When a level has an odd number of nodes the last node has no sibling. It is
//! promoted unchanged to the next level, and proofs record no step for that
//! level. Because every step carries the side its sibling sits on, the verifier
//! needs neither the leaf index nor the leaf count.
//!
//! # Example
//!
//! ```
//! use causality_merkle::binary::BinaryMerkleTree;
//!
//! let leaves = vec![b"leaf0".to_vec(), b"leaf1".to_vec()];
//! let tree = BinaryMerkleTree::build(&leaves);
//! let root = tree.root();
//!
//! let proof = tree.get_proof(0).unwrap();
//! assert!(proof.verify(&root, &leaves[0]));
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MerkleError, MerkleResult};
use crate::hash::{hash_internal, hash_leaf, HashValue, MerkleHasher, Sha256Hasher};

/// Which side of the path a proof sibling sits on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum Side {
    /// Sibling is the left child; the running hash is the right child
    Left,
    /// Sibling is the right child; the running hash is the left child
    Right,
}

impl Side {
    /// The opposite side.
    pub fn flip(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// One level of a binary merkle proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ProofStep {
    pub sibling: HashValue,
    pub side: Side,
}

/// A proof of inclusion for a leaf in the binary Merkle tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BinaryMerkleProof {
    /// Digest of the proven leaf
    leaf_hash: HashValue,
    /// Sibling steps on the path from leaf to root
    steps: Vec<ProofStep>,
}

impl BinaryMerkleProof {
    /// Create a new proof from a leaf digest and its path
    pub fn new(leaf_hash: HashValue, steps: Vec<ProofStep>) -> Self {
        Self { leaf_hash, steps }
    }

    /// Digest of the leaf this proof was generated for
    pub fn leaf_hash(&self) -> HashValue {
        self.leaf_hash
    }

    /// Get the sibling steps in this proof, leaf to root
    pub fn steps(&self) -> &[ProofStep] {
        &self.steps
    }

    /// Mutable access to the path, mainly for building adversarial proofs
    pub fn steps_mut(&mut self) -> &mut Vec<ProofStep> {
        &mut self.steps
    }

    /// Get the number of recorded steps
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Fold the path over `leaf_hash` and return the resulting root.
    pub fn compute_root_with<H: MerkleHasher>(&self, hasher: &H, leaf_hash: &HashValue) -> HashValue {
        self.steps
            .iter()
            .fold(*leaf_hash, |current, step| match step.side {
                Side::Left => hash_internal(hasher, &step.sibling, &current),
                Side::Right => hash_internal(hasher, &current, &step.sibling),
            })
    }

    /// Verify that `leaf` (raw bytes) is committed under `root`.
    pub fn verify_with<H: MerkleHasher>(&self, hasher: &H, root: &HashValue, leaf: &[u8]) -> bool {
        self.verify_hash_with(hasher, root, &hash_leaf(hasher, leaf))
    }

    /// Verify a leaf digest against `root`.
    ///
    /// The digest recorded in the proof must match the claimed one; it is
    /// never used in place of it.
    pub fn verify_hash_with<H: MerkleHasher>(
        &self,
        hasher: &H,
        root: &HashValue,
        leaf_hash: &HashValue,
    ) -> bool {
        if &self.leaf_hash != leaf_hash {
            return false;
        }
        &self.compute_root_with(hasher, leaf_hash) == root
    }

    /// [`verify_with`](Self::verify_with) using SHA-256.
    pub fn verify(&self, root: &HashValue, leaf: &[u8]) -> bool {
        self.verify_with(&Sha256Hasher, root, leaf)
    }

    /// [`verify_hash_with`](Self::verify_hash_with) using SHA-256.
    pub fn verify_hash(&self, root: &HashValue, leaf_hash: &HashValue) -> bool {
        self.verify_hash_with(&Sha256Hasher, root, leaf_hash)
    }

    /// [`compute_root_with`](Self::compute_root_with) using SHA-256.
    pub fn compute_root(&self, leaf_hash: &HashValue) -> HashValue {
        self.compute_root_with(&Sha256Hasher, leaf_hash)
    }

    /// Encode the proof for transmission to a remote verifier.
    pub fn to_bytes(&self) -> MerkleResult<Vec<u8>> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MerkleError::SerializationError(e.to_string()))
    }

    /// Decode a proof produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> MerkleResult<Self> {
        let (proof, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| MerkleError::SerializationError(e.to_string()))?;
        Ok(proof)
    }
}

/// A binary Merkle tree for ordered data commitments.
///
/// Each leaf is hashed with a domain-separation prefix, and internal nodes are
/// computed by hashing their children with a different prefix.
///
/// The empty tree has the zero hash as its root.
#[derive(Clone, Debug)]
pub struct BinaryMerkleTree<H: MerkleHasher = Sha256Hasher> {
    hasher: H,
    /// Node digests level by level; `levels[0]` holds the leaves and the last
    /// level holds the root.
    levels: Vec<Vec<HashValue>>,
}

impl Default for BinaryMerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryMerkleTree {
    /// Create an empty SHA-256 tree.
    pub fn new() -> Self {
        Self::with_hasher(Sha256Hasher)
    }

    /// Build a SHA-256 tree from leaf data.
    pub fn build<T: AsRef<[u8]>>(leaves: &[T]) -> Self {
        Self::build_with_hasher(Sha256Hasher, leaves)
    }

    /// Build a SHA-256 tree from pre-computed leaf hashes.
    pub fn build_from_hashes(leaf_hashes: Vec<HashValue>) -> Self {
        Self::from_hashes_with_hasher(Sha256Hasher, leaf_hashes)
    }
}

impl<H: MerkleHasher> BinaryMerkleTree<H> {
    /// Create an empty tree using `hasher`.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            hasher,
            levels: vec![Vec::new()],
        }
    }

    /// Build a tree from leaf data using `hasher`.
    pub fn build_with_hasher<T: AsRef<[u8]>>(hasher: H, leaves: &[T]) -> Self {
        let leaf_hashes = leaves
            .iter()
            .map(|leaf| hash_leaf(&hasher, leaf.as_ref()))
            .collect();
        Self::from_hashes_with_hasher(hasher, leaf_hashes)
    }

    /// Build a tree from pre-computed leaf hashes using `hasher`.
    pub fn from_hashes_with_hasher(hasher: H, leaf_hashes: Vec<HashValue>) -> Self {
        let mut tree = Self {
            hasher,
            levels: vec![leaf_hashes],
        };

        while tree.levels[tree.levels.len() - 1].len() > 1 {
            let level = tree.levels.len() - 1;
            let width = tree.levels[level].len();
            let parents: Vec<HashValue> = (0..width)
                .step_by(2)
                .map(|i| tree.parent_of(level, i))
                .collect();
            tree.levels.push(parents);
        }

        debug!(
            hasher = tree.hasher.name(),
            leaves = tree.num_leaves(),
            root = %tree.root(),
            "Built binary merkle tree"
        );
        tree
    }

    /// Parent digest of the node at `index` on `level`.
    ///
    /// An unpaired last node is promoted unchanged.
    fn parent_of(&self, level: usize, index: usize) -> HashValue {
        let nodes = &self.levels[level];
        let left = index & !1;
        match nodes.get(left + 1) {
            Some(right) => hash_internal(&self.hasher, &nodes[left], right),
            None => nodes[left],
        }
    }

    /// Get the root hash of the tree.
    pub fn root(&self) -> HashValue {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(HashValue::ZERO)
    }

    /// Get the number of leaves in the tree.
    pub fn num_leaves(&self) -> usize {
        self.levels[0].len()
    }

    /// Check if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Digest of the leaf at `index`, if any.
    pub fn leaf_hash(&self, index: usize) -> Option<HashValue> {
        self.levels[0].get(index).copied()
    }

    /// The hasher this tree was built with.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Get a proof of inclusion for the leaf at the given index.
    pub fn get_proof(&self, leaf_index: usize) -> MerkleResult<BinaryMerkleProof> {
        let size = self.num_leaves();
        if leaf_index >= size {
            return Err(MerkleError::IndexOutOfRange {
                index: leaf_index,
                size,
            });
        }

        let mut steps = Vec::with_capacity(self.levels.len() - 1);
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            // An even index without a right neighbour was promoted: no step
            if let Some(sibling) = level.get(index ^ 1) {
                let side = if index % 2 == 0 { Side::Right } else { Side::Left };
                steps.push(ProofStep {
                    sibling: *sibling,
                    side,
                });
            }
            index /= 2;
        }

        Ok(BinaryMerkleProof::new(self.levels[0][leaf_index], steps))
    }

    /// Append a leaf, returning the new root.
    pub fn push(&mut self, leaf: &[u8]) -> HashValue {
        let leaf_hash = hash_leaf(&self.hasher, leaf);
        self.push_hash(leaf_hash)
    }

    /// Append a pre-computed leaf digest, returning the new root.
    ///
    /// Only the rightmost path is recomputed.
    pub fn push_hash(&mut self, leaf_hash: HashValue) -> HashValue {
        self.levels[0].push(leaf_hash);
        let mut index = self.levels[0].len() - 1;
        let mut level = 0;

        while self.levels[level].len() > 1 {
            let parent = self.parent_of(level, index);
            index /= 2;
            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }
            let next = &mut self.levels[level + 1];
            if index < next.len() {
                next[index] = parent;
            } else {
                next.push(parent);
            }
            level += 1;
        }

        self.root()
    }

    /// Replace the leaf at `index`, returning the new root.
    pub fn update(&mut self, index: usize, leaf: &[u8]) -> MerkleResult<HashValue> {
        let size = self.num_leaves();
        if index >= size {
            return Err(MerkleError::IndexOutOfRange { index, size });
        }

        self.levels[0][index] = hash_leaf(&self.hasher, leaf);
        let mut index = index;
        for level in 0..self.levels.len() - 1 {
            let parent = self.parent_of(level, index);
            index /= 2;
            self.levels[level + 1][index] = parent;
        }

        Ok(self.root())
    }
}
