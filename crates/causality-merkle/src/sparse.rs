//! Sparse Merkle Tree implementation.
//!
//! A fixed-depth binary tree over the whole key space, optimized for key-value
//! storage with efficient inclusion and non-inclusion proofs.
//!
//! # Features
//!
//! - Configurable depth (`1..=256`), fixed for the lifetime of a tree
//! - Empty subtrees are never materialised; they hash to the empty ladder
//! - Every update touches exactly the `depth` nodes on the key's path
//! - Content-addressed nodes shared across versions, with opt-in history
//!
//! # Design
//!
//! A leaf sits at the position given by its key bits read MSB first (0 = left).
//! The tree stores nodes in a persistent map keyed by node hash, so cloning a
//! tree is O(1) and every earlier root stays readable until [`gc`] prunes it.
//!
//! ```text
//! empty leaf        = H("SPARSE_EMPTY")
//! empty at height h = H(0x03 ‖ empty(h-1) ‖ empty(h-1))
//! leaf              = H(0x02 ‖ key ‖ H(value))
//! internal          = H(0x03 ‖ left ‖ right)
//! ```
//!
//! [`gc`]: SparseMerkleTree::gc
//!
//! # Example
//!
//! ```
//! use causality_merkle::key::SmtKey;
//! use causality_merkle::sparse::SparseMerkleTree;
//!
//! let mut tree = SparseMerkleTree::new(4).unwrap();
//! let key = SmtKey::from_bits(0b0101, 4).unwrap();
//! let root = tree.insert_or_update(key, b"x".to_vec()).unwrap();
//!
//! assert_eq!(tree.get(&key).unwrap(), Some(&b"x"[..]));
//! assert!(tree.prove(&key).unwrap().verify(&root));
//! ```

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::MerkleConfig;
use crate::error::{MerkleError, MerkleResult};
use crate::hash::{
    check_digest_len, hash_sparse_internal, hash_sparse_leaf, hash_value, prefix, Blake3Hasher,
    HashAlgorithm, HashValue, MerkleHasher, Sha256Hasher,
};
use crate::key::SmtKey;
use crate::storage::{MerkleNodeStore, MerkleStore, Version};
use crate::{HASH_LENGTH, MAX_DEPTH};

/// Build the digests of empty subtrees for every height `0..=MAX_DEPTH`.
pub fn compute_empty_ladder<H: MerkleHasher + ?Sized>(hasher: &H) -> Arc<[HashValue]> {
    let mut ladder = Vec::with_capacity(MAX_DEPTH + 1);
    let mut current = hasher.hash(prefix::SPARSE_EMPTY);
    ladder.push(current);
    for _ in 0..MAX_DEPTH {
        current = hasher.hash_parts(&[
            prefix::SPARSE_INTERNAL,
            current.as_bytes(),
            current.as_bytes(),
        ]);
        ladder.push(current);
    }
    ladder.into()
}

lazy_static! {
    pub(crate) static ref SHA256_EMPTY_LADDER: Arc<[HashValue]> =
        compute_empty_ladder(&Sha256Hasher);
    pub(crate) static ref BLAKE3_EMPTY_LADDER: Arc<[HashValue]> =
        compute_empty_ladder(&Blake3Hasher);
}

/// A stored node of the sparse Merkle tree.
///
/// Empty subtrees have no node; they are recognised by their ladder digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SparseMerkleNode {
    /// A leaf node containing a key-value pair
    Leaf {
        key: SmtKey,
        value: Arc<Vec<u8>>,
        value_hash: HashValue,
    },
    /// An internal node with left and right children
    Internal { left: HashValue, right: HashValue },
}

impl SparseMerkleNode {
    /// Compute the hash of this node
    pub fn hash<H: MerkleHasher>(&self, hasher: &H) -> HashValue {
        match self {
            SparseMerkleNode::Leaf {
                key, value_hash, ..
            } => hash_sparse_leaf(hasher, key.as_bytes(), value_hash),
            SparseMerkleNode::Internal { left, right } => {
                hash_sparse_internal(hasher, left, right)
            }
        }
    }
}

/// A proof of membership or non-membership for one key.
///
/// `siblings` holds exactly `depth` digests ordered from the leaf level up to
/// the children of the root. The same shape proves presence (`value` is
/// `Some`) and absence (`value` is `None`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SparseMerkleProof {
    key: SmtKey,
    value: Option<Vec<u8>>,
    siblings: Vec<HashValue>,
}

impl SparseMerkleProof {
    /// Create a new proof
    pub fn new(key: SmtKey, value: Option<Vec<u8>>, siblings: Vec<HashValue>) -> Self {
        Self {
            key,
            value,
            siblings,
        }
    }

    /// The key this proof is about
    pub fn key(&self) -> &SmtKey {
        &self.key
    }

    /// The claimed value, or `None` for a non-membership proof
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Whether this proof claims the key is present
    pub fn is_inclusion(&self) -> bool {
        self.value.is_some()
    }

    /// Sibling digests, leaf to root
    pub fn siblings(&self) -> &[HashValue] {
        &self.siblings
    }

    /// Mutable access to the path, mainly for building adversarial proofs
    pub fn siblings_mut(&mut self) -> &mut Vec<HashValue> {
        &mut self.siblings
    }

    /// Depth of the tree this proof was generated from
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Recompute the root from the claimed value and the sibling path.
    ///
    /// Fails with `DepthMismatch` when the path length and the key length
    /// disagree.
    pub fn compute_root_with<H: MerkleHasher>(&self, hasher: &H) -> MerkleResult<HashValue> {
        let depth = self.key.bit_len();
        if depth == 0 || depth > MAX_DEPTH {
            return Err(MerkleError::InvalidDepth(depth));
        }
        if self.siblings.len() != depth {
            return Err(MerkleError::DepthMismatch {
                expected: depth,
                got: self.siblings.len(),
            });
        }

        let mut current = match &self.value {
            Some(value) => {
                hash_sparse_leaf(hasher, self.key.as_bytes(), &hash_value(hasher, value))
            }
            None => hasher.hash(prefix::SPARSE_EMPTY),
        };

        for (i, sibling) in self.siblings.iter().enumerate() {
            let level = depth - 1 - i;
            current = if self.key.bit(level) {
                hash_sparse_internal(hasher, sibling, &current)
            } else {
                hash_sparse_internal(hasher, &current, sibling)
            };
        }

        Ok(current)
    }

    /// Verify this proof against a trusted root.
    pub fn verify_with<H: MerkleHasher>(&self, hasher: &H, root: &HashValue) -> bool {
        matches!(self.compute_root_with(hasher), Ok(computed) if &computed == root)
    }

    /// [`verify_with`](Self::verify_with) using SHA-256.
    pub fn verify(&self, root: &HashValue) -> bool {
        self.verify_with(&Sha256Hasher, root)
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

/// Nodes created since the last commit, ready to be written to a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeChanges {
    /// New nodes keyed by hash, sorted by hash
    pub nodes: Vec<(HashValue, SparseMerkleNode)>,
    /// Root at the time the changes were taken
    pub root: HashValue,
}

impl NodeChanges {
    /// Whether there are no pending nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A sparse Merkle tree of fixed depth.
///
/// Mutations apply in place to a single current root. Nodes of earlier roots
/// are kept until [`gc`](Self::gc), so [`get_at`](Self::get_at) and
/// [`prove_at`](Self::prove_at) can still answer for them.
#[derive(Clone, Debug)]
pub struct SparseMerkleTree<H: MerkleHasher = Sha256Hasher> {
    hasher: H,
    depth: usize,
    ladder: Arc<[HashValue]>,
    root: HashValue,
    nodes: im::HashMap<HashValue, SparseMerkleNode>,
    leaf_count: usize,
    /// Historic roots protected from gc
    retained: BTreeSet<HashValue>,
    /// Nodes not yet written to a store
    dirty: HashSet<HashValue>,
}

impl Default for SparseMerkleTree {
    fn default() -> Self {
        Self::empty(Sha256Hasher, MAX_DEPTH)
    }
}

impl SparseMerkleTree {
    /// Create an empty SHA-256 tree of the given depth.
    pub fn new(depth: usize) -> MerkleResult<Self> {
        Self::with_hasher(Sha256Hasher, depth)
    }
}

impl SparseMerkleTree<HashAlgorithm> {
    /// Create an empty tree as described by `config`.
    pub fn from_config(config: &MerkleConfig) -> MerkleResult<Self> {
        config.validate()?;
        Self::with_hasher(config.hash_algorithm, config.depth)
    }
}

impl<H: MerkleHasher> SparseMerkleTree<H> {
    /// Create an empty tree of the given depth using `hasher`.
    pub fn with_hasher(hasher: H, depth: usize) -> MerkleResult<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(MerkleError::InvalidDepth(depth));
        }
        check_digest_len(&hasher, HASH_LENGTH)?;
        Ok(Self::empty(hasher, depth))
    }

    fn empty(hasher: H, depth: usize) -> Self {
        let ladder = hasher.empty_ladder();
        Self {
            root: ladder[depth],
            hasher,
            depth,
            ladder,
            nodes: im::HashMap::new(),
            leaf_count: 0,
            retained: BTreeSet::new(),
            dirty: HashSet::new(),
        }
    }

    /// Get the current root hash.
    pub fn root(&self) -> HashValue {
        self.root
    }

    /// Root of a tree of this depth with no entries.
    pub fn empty_root(&self) -> HashValue {
        self.ladder[self.depth]
    }

    /// Number of key bits and levels below the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of entries under the current root.
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// The hasher this tree was built with.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Number of nodes held in memory, across all addressable versions.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn check_key(&self, key: &SmtKey) -> MerkleResult<()> {
        if key.bit_len() != self.depth {
            return Err(MerkleError::DepthMismatch {
                expected: self.depth,
                got: key.bit_len(),
            });
        }
        Ok(())
    }

    /// Follow `key` down from `root`, reporting each sibling root to leaf,
    /// and return the digest found at the leaf position.
    fn walk(
        &self,
        root: &HashValue,
        key: &SmtKey,
        mut on_sibling: impl FnMut(HashValue),
    ) -> MerkleResult<HashValue> {
        let mut current = *root;
        for level in 0..self.depth {
            let height = self.depth - level;
            if current == self.ladder[height] {
                for h in (0..height).rev() {
                    on_sibling(self.ladder[h]);
                }
                return Ok(self.ladder[0]);
            }
            match self.nodes.get(&current) {
                Some(SparseMerkleNode::Internal { left, right }) => {
                    if key.bit(level) {
                        on_sibling(*left);
                        current = *right;
                    } else {
                        on_sibling(*right);
                        current = *left;
                    }
                }
                _ => return Err(MerkleError::UnknownRoot(*root)),
            }
        }
        Ok(current)
    }

    fn leaf_value(&self, root: &HashValue, leaf_hash: &HashValue) -> MerkleResult<Option<&[u8]>> {
        if leaf_hash == &self.ladder[0] {
            return Ok(None);
        }
        match self.nodes.get(leaf_hash) {
            Some(SparseMerkleNode::Leaf { value, .. }) => Ok(Some(value.as_slice())),
            _ => Err(MerkleError::UnknownRoot(*root)),
        }
    }

    fn store_node(&mut self, hash: HashValue, node: SparseMerkleNode) {
        if !self.nodes.contains_key(&hash) {
            self.nodes.insert(hash, node);
            self.dirty.insert(hash);
        }
    }

    /// Recompute the `depth` ancestors of a leaf from its siblings (given
    /// root to leaf) and return the new root.
    fn rebuild_path(
        &mut self,
        key: &SmtKey,
        siblings: &[HashValue],
        leaf_hash: HashValue,
    ) -> HashValue {
        let mut current = leaf_hash;
        for level in (0..self.depth).rev() {
            let sibling = siblings[level];
            let (left, right) = if key.bit(level) {
                (sibling, current)
            } else {
                (current, sibling)
            };
            let parent = hash_sparse_internal(&self.hasher, &left, &right);
            if parent != self.ladder[self.depth - level] {
                self.store_node(parent, SparseMerkleNode::Internal { left, right });
            }
            current = parent;
        }
        current
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &SmtKey) -> MerkleResult<Option<&[u8]>> {
        self.get_at(&self.root, key)
    }

    /// Get the value stored under `key` as of an earlier `root`.
    pub fn get_at(&self, root: &HashValue, key: &SmtKey) -> MerkleResult<Option<&[u8]>> {
        self.check_key(key)?;
        let leaf_hash = self.walk(root, key, |_| {})?;
        self.leaf_value(root, &leaf_hash)
    }

    /// Check if a key exists in the tree.
    pub fn contains(&self, key: &SmtKey) -> MerkleResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace the value under `key`, returning the new root.
    pub fn insert_or_update(&mut self, key: SmtKey, value: Vec<u8>) -> MerkleResult<HashValue> {
        self.check_key(&key)?;
        let root = self.root;
        let mut siblings = Vec::with_capacity(self.depth);
        let old_leaf = self.walk(&root, &key, |sibling| siblings.push(sibling))?;

        let value_hash = hash_value(&self.hasher, &value);
        let leaf = SparseMerkleNode::Leaf {
            key,
            value: Arc::new(value),
            value_hash,
        };
        let leaf_hash = leaf.hash(&self.hasher);
        if leaf_hash == old_leaf {
            return Ok(self.root);
        }

        if old_leaf == self.ladder[0] {
            self.leaf_count += 1;
        }
        self.store_node(leaf_hash, leaf);
        self.root = self.rebuild_path(&key, &siblings, leaf_hash);

        debug!(
            key = %key,
            root = %self.root,
            entries = self.leaf_count,
            "Updated sparse merkle tree"
        );
        Ok(self.root)
    }

    /// Remove `key`, returning the new root. Removing an absent key leaves
    /// the root unchanged.
    pub fn delete(&mut self, key: &SmtKey) -> MerkleResult<HashValue> {
        self.check_key(key)?;
        let root = self.root;
        let mut siblings = Vec::with_capacity(self.depth);
        let old_leaf = self.walk(&root, key, |sibling| siblings.push(sibling))?;
        if old_leaf == self.ladder[0] {
            trace!(key = %key, "Delete of absent key");
            return Ok(self.root);
        }

        let empty_leaf = self.ladder[0];
        self.root = self.rebuild_path(key, &siblings, empty_leaf);
        self.leaf_count -= 1;

        debug!(
            key = %key,
            root = %self.root,
            entries = self.leaf_count,
            "Deleted from sparse merkle tree"
        );
        Ok(self.root)
    }

    /// Apply several updates in order; a `None` value deletes the key.
    ///
    /// Every key is checked before anything is applied, so a bad key leaves
    /// the tree untouched.
    pub fn batch_update<I>(&mut self, entries: I) -> MerkleResult<HashValue>
    where
        I: IntoIterator<Item = (SmtKey, Option<Vec<u8>>)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        for (key, _) in &entries {
            self.check_key(key)?;
        }
        for (key, value) in entries {
            match value {
                Some(value) => self.insert_or_update(key, value)?,
                None => self.delete(&key)?,
            };
        }
        Ok(self.root)
    }

    /// Prove membership or non-membership of `key` under the current root.
    pub fn prove(&self, key: &SmtKey) -> MerkleResult<SparseMerkleProof> {
        self.prove_at(&self.root, key)
    }

    /// Prove membership or non-membership of `key` under an earlier `root`.
    pub fn prove_at(&self, root: &HashValue, key: &SmtKey) -> MerkleResult<SparseMerkleProof> {
        self.check_key(key)?;
        let mut siblings = Vec::with_capacity(self.depth);
        let leaf_hash = self.walk(root, key, |sibling| siblings.push(sibling))?;
        siblings.reverse();
        let value = self.leaf_value(root, &leaf_hash)?.map(<[u8]>::to_vec);
        Ok(SparseMerkleProof::new(*key, value, siblings))
    }

    /// Entries under the current root in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&SmtKey, &[u8])> + '_ {
        let mut entries = Vec::with_capacity(self.leaf_count);
        let mut stack = vec![(self.root, self.depth)];
        while let Some((hash, height)) = stack.pop() {
            if hash == self.ladder[height] {
                continue;
            }
            match self.nodes.get(&hash) {
                Some(SparseMerkleNode::Internal { left, right }) if height > 0 => {
                    stack.push((*right, height - 1));
                    stack.push((*left, height - 1));
                }
                Some(SparseMerkleNode::Leaf { key, value, .. }) => {
                    entries.push((key, value.as_slice()));
                }
                _ => {}
            }
        }
        entries.into_iter()
    }

    /// A cheap copy of the tree sharing all nodes with this one.
    ///
    /// The snapshot starts with no pending changes.
    pub fn snapshot(&self) -> Self {
        let mut snapshot = self.clone();
        snapshot.dirty.clear();
        snapshot
    }

    /// Keep the nodes of `root` alive across [`gc`](Self::gc).
    pub fn retain_root(&mut self, root: HashValue) -> MerkleResult<()> {
        if root != self.empty_root() && !self.nodes.contains_key(&root) {
            return Err(MerkleError::UnknownRoot(root));
        }
        self.retained.insert(root);
        Ok(())
    }

    /// Stop protecting `root`. Returns whether it was retained.
    pub fn release_root(&mut self, root: &HashValue) -> bool {
        self.retained.remove(root)
    }

    /// Roots currently protected from gc.
    pub fn retained_roots(&self) -> impl Iterator<Item = &HashValue> {
        self.retained.iter()
    }

    /// Drop every node not reachable from the current root or a retained
    /// root. Returns the number of nodes removed.
    pub fn gc(&mut self) -> usize {
        let mut live = HashSet::new();
        let roots: Vec<HashValue> = std::iter::once(self.root)
            .chain(self.retained.iter().copied())
            .collect();
        for root in roots {
            self.mark_reachable(root, &mut live);
        }

        let before = self.nodes.len();
        self.nodes.retain(|hash, _| live.contains(hash));
        self.dirty.retain(|hash| live.contains(hash));
        let removed = before - self.nodes.len();

        debug!(
            removed,
            remaining = self.nodes.len(),
            retained = self.retained.len(),
            "Garbage collected sparse merkle tree"
        );
        removed
    }

    fn mark_reachable(&self, root: HashValue, live: &mut HashSet<HashValue>) {
        let mut stack = vec![(root, self.depth)];
        while let Some((hash, height)) = stack.pop() {
            if hash == self.ladder[height] || !live.insert(hash) {
                continue;
            }
            if let Some(SparseMerkleNode::Internal { left, right }) = self.nodes.get(&hash) {
                if height > 0 {
                    stack.push((*left, height - 1));
                    stack.push((*right, height - 1));
                }
            }
        }
    }

    /// Whether nodes were created since the last commit or `take_changes`.
    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn pending_nodes(&self) -> Vec<(HashValue, SparseMerkleNode)> {
        let mut nodes: Vec<_> = self
            .dirty
            .iter()
            .filter_map(|hash| self.nodes.get(hash).map(|node| (*hash, node.clone())))
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        nodes
    }

    /// Hand over the nodes created since the last call and clear the
    /// pending set.
    pub fn take_changes(&mut self) -> NodeChanges {
        let changes = NodeChanges {
            nodes: self.pending_nodes(),
            root: self.root,
        };
        self.dirty.clear();
        changes
    }

    /// Write pending nodes and the current root to `store` under `version`.
    ///
    /// Pending changes are only cleared once the store accepted them.
    pub fn commit_to<S: MerkleStore + ?Sized>(
        &mut self,
        store: &S,
        version: Version,
    ) -> MerkleResult<HashValue> {
        let nodes = self.pending_nodes();
        store.batch_put_nodes(&nodes)?;
        store.put_root(version, &self.root)?;
        store.flush()?;
        self.dirty.clear();

        debug!(
            version,
            root = %self.root,
            nodes = nodes.len(),
            "Committed sparse merkle tree"
        );
        Ok(self.root)
    }

    /// Rebuild a tree for `root` from nodes held in `store`.
    ///
    /// Every fetched node is re-hashed and must match the digest it was
    /// stored under. A leaf must also carry a value matching its value hash
    /// and a key equal to the path that reaches it.
    pub fn load_from<S: MerkleNodeStore + ?Sized>(
        hasher: H,
        depth: usize,
        store: &S,
        root: HashValue,
    ) -> MerkleResult<Self> {
        let mut tree = Self::with_hasher(hasher, depth)?;
        let mut stack = vec![(root, depth, [0u8; HASH_LENGTH])];

        while let Some((hash, height, path)) = stack.pop() {
            if hash == tree.ladder[height] {
                continue;
            }
            // a non-empty subtree commits to its leaf keys, so it has one position
            if tree.nodes.contains_key(&hash) {
                return Err(MerkleError::StorageError(format!(
                    "node {} is reachable from more than one position",
                    hash
                )));
            }
            let node = store
                .get_node(&hash)?
                .ok_or(MerkleError::UnknownRoot(root))?;
            if node.hash(&tree.hasher) != hash {
                return Err(MerkleError::StorageError(format!(
                    "node stored under {} hashes to a different digest",
                    hash
                )));
            }
            match (&node, height) {
                (SparseMerkleNode::Internal { left, right }, h) if h > 0 => {
                    let level = depth - h;
                    let mut right_path = path;
                    right_path[level / 8] |= 0x80 >> (level % 8);
                    stack.push((*left, h - 1, path));
                    stack.push((*right, h - 1, right_path));
                }
                (
                    SparseMerkleNode::Leaf {
                        key,
                        value,
                        value_hash,
                    },
                    0,
                ) => {
                    if hash_value(&tree.hasher, value) != *value_hash {
                        return Err(MerkleError::StorageError(format!(
                            "leaf {} holds a value that does not match its value hash",
                            hash
                        )));
                    }
                    if key.bit_len() != depth || key.as_bytes() != &path[..depth.div_ceil(8)] {
                        return Err(MerkleError::StorageError(format!(
                            "leaf {} for key {} is stored at another position",
                            hash, key
                        )));
                    }
                    tree.leaf_count += 1;
                }
                _ => {
                    return Err(MerkleError::StorageError(format!(
                        "node {} does not fit at height {}",
                        hash, height
                    )))
                }
            }
            tree.nodes.insert(hash, node);
        }

        tree.root = root;
        debug!(
            root = %root,
            depth,
            nodes = tree.nodes.len(),
            entries = tree.leaf_count,
            "Loaded sparse merkle tree"
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryMerkleStore, MerkleRootStore};

    fn key4(bits: u64) -> SmtKey {
        SmtKey::from_bits(bits, 4).unwrap()
    }

    fn key256(byte: u8) -> SmtKey {
        SmtKey::from_hash(HashValue::new([byte; 32]))
    }

    #[test]
    fn test_empty_tree() {
        let tree = SparseMerkleTree::new(4).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.root(), tree.empty_root());
        assert_eq!(tree.node_count(), 0);
        assert_eq!(tree.get(&key4(3)).unwrap(), None);
    }

    #[test]
    fn test_empty_ladder() {
        let ladder = Sha256Hasher.empty_ladder();
        assert_eq!(ladder.len(), MAX_DEPTH + 1);
        assert_eq!(ladder[0], Sha256Hasher.hash(b"SPARSE_EMPTY"));
        for h in 1..=MAX_DEPTH {
            assert_eq!(
                ladder[h],
                hash_sparse_internal(&Sha256Hasher, &ladder[h - 1], &ladder[h - 1])
            );
        }
        // shared, not recomputed
        assert!(Arc::ptr_eq(&ladder, &Sha256Hasher.empty_ladder()));
        assert_eq!(compute_empty_ladder(&Blake3Hasher), Blake3Hasher.empty_ladder());
    }

    #[test]
    fn test_invalid_depth() {
        assert_eq!(
            SparseMerkleTree::new(0).unwrap_err(),
            MerkleError::InvalidDepth(0)
        );
        assert_eq!(
            SparseMerkleTree::new(257).unwrap_err(),
            MerkleError::InvalidDepth(257)
        );
        assert_eq!(SparseMerkleTree::<Sha256Hasher>::default().depth(), 256);
    }

    #[test]
    fn test_depth_four_scenario() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let present = key4(0b0101);
        let absent = key4(0b0110);

        let root = tree.insert_or_update(present, b"x".to_vec()).unwrap();
        assert_eq!(tree.get(&present).unwrap(), Some(&b"x"[..]));
        assert_eq!(tree.get(&absent).unwrap(), None);

        let inclusion = tree.prove(&present).unwrap();
        assert!(inclusion.is_inclusion());
        assert_eq!(inclusion.siblings().len(), 4);
        assert!(inclusion.verify(&root));

        let exclusion = tree.prove(&absent).unwrap();
        assert!(!exclusion.is_inclusion());
        assert_eq!(exclusion.siblings().len(), 4);
        assert!(exclusion.verify(&root));
    }

    #[test]
    fn test_single_leaf_root_by_hand() {
        let h = Sha256Hasher;
        let ladder = h.empty_ladder();
        let mut tree = SparseMerkleTree::new(2).unwrap();
        let key = SmtKey::from_bits(0b10, 2).unwrap();
        let root = tree.insert_or_update(key, b"v".to_vec()).unwrap();

        let leaf = hash_sparse_leaf(&h, key.as_bytes(), &h.hash(b"v"));
        // bit 1 is 0: leaf on the left of its parent
        let parent = hash_sparse_internal(&h, &leaf, &ladder[0]);
        // bit 0 is 1: parent on the right of the root
        let expected = hash_sparse_internal(&h, &ladder[1], &parent);
        assert_eq!(root, expected);
    }

    #[test]
    fn test_update_value() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let key = key4(9);

        let root1 = tree.insert_or_update(key, b"one".to_vec()).unwrap();
        let root2 = tree.insert_or_update(key, b"two".to_vec()).unwrap();
        assert_ne!(root1, root2);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&key).unwrap(), Some(&b"two"[..]));

        // rewriting the same value is a no-op
        assert_eq!(tree.insert_or_update(key, b"two".to_vec()).unwrap(), root2);
    }

    #[test]
    fn test_delete() {
        let mut tree = SparseMerkleTree::new(8).unwrap();
        let a = SmtKey::from_bits(1, 8).unwrap();
        let b = SmtKey::from_bits(200, 8).unwrap();

        let root_a = tree.insert_or_update(a, b"a".to_vec()).unwrap();
        tree.insert_or_update(b, b"b".to_vec()).unwrap();

        assert_eq!(tree.delete(&b).unwrap(), root_a);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&b).unwrap(), None);

        // absent key: unchanged
        assert_eq!(tree.delete(&b).unwrap(), root_a);

        assert_eq!(tree.delete(&a).unwrap(), tree.empty_root());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_empty_value_is_not_absence() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let key = key4(2);
        let root = tree.insert_or_update(key, Vec::new()).unwrap();
        assert_ne!(root, tree.empty_root());
        assert_eq!(tree.get(&key).unwrap(), Some(&[][..]));
        assert!(tree.prove(&key).unwrap().is_inclusion());
    }

    #[test]
    fn test_insertion_order_independent() {
        let entries: Vec<(SmtKey, Vec<u8>)> = (0..16u64)
            .step_by(3)
            .map(|i| (key4(i), format!("v{}", i).into_bytes()))
            .collect();

        let mut forward = SparseMerkleTree::new(4).unwrap();
        for (k, v) in &entries {
            forward.insert_or_update(*k, v.clone()).unwrap();
        }
        let mut backward = SparseMerkleTree::new(4).unwrap();
        for (k, v) in entries.iter().rev() {
            backward.insert_or_update(*k, v.clone()).unwrap();
        }

        assert_eq!(forward.root(), backward.root());
        assert_eq!(forward.len(), entries.len());
    }

    #[test]
    fn test_depth_mismatch() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let wrong = SmtKey::from_bits(1, 5).unwrap();
        let expected = MerkleError::DepthMismatch {
            expected: 4,
            got: 5,
        };

        assert_eq!(tree.get(&wrong).unwrap_err(), expected);
        assert_eq!(tree.prove(&wrong).unwrap_err(), expected);
        assert_eq!(
            tree.insert_or_update(wrong, b"x".to_vec()).unwrap_err(),
            expected
        );
        assert_eq!(tree.delete(&wrong).unwrap_err(), expected);
    }

    #[test]
    fn test_batch_update_validates_first() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let before = tree.root();
        let result = tree.batch_update(vec![
            (key4(1), Some(b"a".to_vec())),
            (SmtKey::from_bits(1, 3).unwrap(), Some(b"b".to_vec())),
        ]);
        assert!(result.is_err());
        assert_eq!(tree.root(), before);

        let root = tree
            .batch_update(vec![
                (key4(1), Some(b"a".to_vec())),
                (key4(2), Some(b"b".to_vec())),
                (key4(1), None),
            ])
            .unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&key4(2)).unwrap(), Some(&b"b"[..]));
        assert_eq!(root, tree.root());
    }

    #[test]
    fn test_update_touches_only_the_path() {
        let mut tree = SparseMerkleTree::new(8).unwrap();
        for i in 0..40u64 {
            tree.insert_or_update(SmtKey::from_bits(i * 6, 8).unwrap(), vec![i as u8])
                .unwrap();
        }
        tree.take_changes();

        tree.insert_or_update(SmtKey::from_bits(7, 8).unwrap(), b"new".to_vec())
            .unwrap();
        // one leaf plus at most `depth` internal nodes
        assert!(tree.take_changes().nodes.len() <= 1 + 8);
    }

    #[test]
    fn test_proof_locality() {
        let mut tree = SparseMerkleTree::new(8).unwrap();
        let keys: Vec<SmtKey> = [3u64, 17, 100, 101, 250]
            .iter()
            .map(|&k| SmtKey::from_bits(k, 8).unwrap())
            .collect();
        for k in &keys {
            tree.insert_or_update(*k, b"init".to_vec()).unwrap();
        }

        let updated = keys[2];
        let before: Vec<_> = keys.iter().map(|k| tree.prove(k).unwrap()).collect();
        tree.insert_or_update(updated, b"changed".to_vec()).unwrap();

        for (k, old) in keys.iter().zip(&before) {
            if *k == updated {
                continue;
            }
            let new = tree.prove(k).unwrap();
            assert_eq!(new.value(), old.value());

            let p = k.common_prefix_len(&updated);
            for i in 0..8 {
                if i == 8 - 1 - p {
                    assert_ne!(new.siblings()[i], old.siblings()[i], "key {}", k);
                } else {
                    assert_eq!(new.siblings()[i], old.siblings()[i], "key {}", k);
                }
            }
        }
    }

    #[test]
    fn test_tampered_proofs_fail() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        tree.insert_or_update(key4(5), b"x".to_vec()).unwrap();
        tree.insert_or_update(key4(12), b"y".to_vec()).unwrap();
        let root = tree.root();
        let proof = tree.prove(&key4(5)).unwrap();
        assert!(proof.verify(&root));

        let forged_value = SparseMerkleProof::new(
            *proof.key(),
            Some(b"z".to_vec()),
            proof.siblings().to_vec(),
        );
        assert!(!forged_value.verify(&root));

        let claimed_absent =
            SparseMerkleProof::new(*proof.key(), None, proof.siblings().to_vec());
        assert!(!claimed_absent.verify(&root));

        let mut bad_sibling = proof.clone();
        bad_sibling.siblings_mut()[3] = HashValue::new([7u8; 32]);
        assert!(!bad_sibling.verify(&root));

        let mut short = proof.clone();
        short.siblings_mut().pop();
        assert!(!short.verify(&root));
        assert!(matches!(
            short.compute_root_with(&Sha256Hasher),
            Err(MerkleError::DepthMismatch { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn test_history_and_gc() {
        let mut tree = SparseMerkleTree::new(8).unwrap();
        let key = SmtKey::from_bits(42, 8).unwrap();

        let old_root = tree.insert_or_update(key, b"old".to_vec()).unwrap();
        let snapshot = tree.snapshot();
        let new_root = tree.insert_or_update(key, b"new".to_vec()).unwrap();

        assert_eq!(tree.get_at(&old_root, &key).unwrap(), Some(&b"old"[..]));
        let old_proof = tree.prove_at(&old_root, &key).unwrap();
        assert!(old_proof.verify(&old_root));
        assert!(!old_proof.verify(&new_root));

        // the snapshot is unaffected by later writes
        assert_eq!(snapshot.root(), old_root);
        assert_eq!(snapshot.get(&key).unwrap(), Some(&b"old"[..]));

        tree.retain_root(old_root).unwrap();
        assert_eq!(tree.gc(), 0);
        assert!(tree.release_root(&old_root));

        assert!(tree.gc() > 0);
        assert_eq!(
            tree.get_at(&old_root, &key).unwrap_err(),
            MerkleError::UnknownRoot(old_root)
        );
        assert_eq!(tree.get(&key).unwrap(), Some(&b"new"[..]));
    }

    #[test]
    fn test_retain_unknown_root() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let bogus = HashValue::new([9u8; 32]);
        assert_eq!(
            tree.retain_root(bogus),
            Err(MerkleError::UnknownRoot(bogus))
        );
        let empty = tree.empty_root();
        assert!(tree.retain_root(empty).is_ok());
        assert_eq!(tree.retained_roots().count(), 1);
    }

    #[test]
    fn test_iter_in_key_order() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        for k in [9u64, 2, 14, 5] {
            tree.insert_or_update(key4(k), vec![k as u8]).unwrap();
        }
        let keys: Vec<SmtKey> = tree.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![key4(2), key4(5), key4(9), key4(14)]);
    }

    #[test]
    fn test_commit_and_load() {
        let store = InMemoryMerkleStore::new();
        let mut tree: SparseMerkleTree = SparseMerkleTree::default();
        tree.insert_or_update(key256(1), b"one".to_vec()).unwrap();
        tree.insert_or_update(key256(2), b"two".to_vec()).unwrap();
        assert!(tree.has_pending_changes());

        let root = tree.commit_to(&store, 1).unwrap();
        assert!(!tree.has_pending_changes());
        assert_eq!(store.get_latest_root().unwrap(), Some((1, root)));

        let loaded = SparseMerkleTree::load_from(Sha256Hasher, 256, &store, root).unwrap();
        assert_eq!(loaded.root(), root);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(&key256(1)).unwrap(), Some(&b"one"[..]));
        assert_eq!(loaded.get(&key256(3)).unwrap(), None);
    }

    #[test]
    fn test_load_unknown_root() {
        let store = InMemoryMerkleStore::new();
        let bogus = HashValue::new([1u8; 32]);
        assert_eq!(
            SparseMerkleTree::load_from(Sha256Hasher, 4, &store, bogus).unwrap_err(),
            MerkleError::UnknownRoot(bogus)
        );
    }

    #[test]
    fn test_load_rejects_corrupt_node() {
        let store = InMemoryMerkleStore::new();
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let root = tree.insert_or_update(key4(1), b"x".to_vec()).unwrap();
        tree.commit_to(&store, 0).unwrap();

        // swap the root node for one with different children
        store
            .put_node(
                &root,
                &SparseMerkleNode::Internal {
                    left: HashValue::ZERO,
                    right: HashValue::ZERO,
                },
            )
            .unwrap();
        assert!(matches!(
            SparseMerkleTree::load_from(Sha256Hasher, 4, &store, root),
            Err(MerkleError::StorageError(_))
        ));
    }

    #[test]
    fn test_load_rejects_tampered_leaf_value() {
        let store = InMemoryMerkleStore::new();
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let key = key4(0b0101);
        let root = tree.insert_or_update(key, b"honest".to_vec()).unwrap();
        tree.commit_to(&store, 0).unwrap();

        // same key and value hash, so the node digest is unchanged
        let value_hash = hash_value(&Sha256Hasher, b"honest");
        let leaf_hash = hash_sparse_leaf(&Sha256Hasher, key.as_bytes(), &value_hash);
        store
            .put_node(
                &leaf_hash,
                &SparseMerkleNode::Leaf {
                    key,
                    value: Arc::new(b"EVIL".to_vec()),
                    value_hash,
                },
            )
            .unwrap();
        assert!(matches!(
            SparseMerkleTree::load_from(Sha256Hasher, 4, &store, root),
            Err(MerkleError::StorageError(_))
        ));
    }

    #[test]
    fn test_load_rejects_leaf_at_wrong_position() {
        let store = InMemoryMerkleStore::new();
        let ladder = Sha256Hasher.empty_ladder();
        let key = key4(0b0101);
        let leaf = SparseMerkleNode::Leaf {
            key,
            value: Arc::new(b"x".to_vec()),
            value_hash: hash_value(&Sha256Hasher, b"x"),
        };

        // hang the leaf on the all-left path 0b0000 with consistent digests
        let mut current = leaf.hash(&Sha256Hasher);
        store.put_node(&current, &leaf).unwrap();
        for height in 0..4 {
            let node = SparseMerkleNode::Internal {
                left: current,
                right: ladder[height],
            };
            current = node.hash(&Sha256Hasher);
            store.put_node(&current, &node).unwrap();
        }

        assert!(matches!(
            SparseMerkleTree::load_from(Sha256Hasher, 4, &store, current),
            Err(MerkleError::StorageError(_))
        ));

        // the same leaf on its own path loads
        let mut honest = SparseMerkleTree::new(4).unwrap();
        let root = honest.insert_or_update(key, b"x".to_vec()).unwrap();
        honest.commit_to(&store, 1).unwrap();
        let loaded = SparseMerkleTree::load_from(Sha256Hasher, 4, &store, root).unwrap();
        assert_eq!(loaded.get(&key).unwrap(), Some(&b"x"[..]));
    }

    #[test]
    fn test_load_rejects_shared_subtree() {
        let store = InMemoryMerkleStore::new();
        let mut tree = SparseMerkleTree::new(4).unwrap();
        tree.insert_or_update(key4(0b0001), b"x".to_vec()).unwrap();
        tree.commit_to(&store, 0).unwrap();
        let left = match tree.nodes.get(&tree.root()) {
            Some(SparseMerkleNode::Internal { left, .. }) => *left,
            other => panic!("unexpected root node {:?}", other),
        };

        let root_node = SparseMerkleNode::Internal { left, right: left };
        let root = root_node.hash(&Sha256Hasher);
        store.put_node(&root, &root_node).unwrap();
        assert!(matches!(
            SparseMerkleTree::load_from(Sha256Hasher, 4, &store, root),
            Err(MerkleError::StorageError(_))
        ));
    }

    #[test]
    fn test_blake3_tree() {
        let mut sha = SparseMerkleTree::new(16).unwrap();
        let mut b3 = SparseMerkleTree::with_hasher(Blake3Hasher, 16).unwrap();
        let key = SmtKey::from_bits(1234, 16).unwrap();
        sha.insert_or_update(key, b"v".to_vec()).unwrap();
        let root = b3.insert_or_update(key, b"v".to_vec()).unwrap();

        assert_ne!(sha.root(), root);
        let proof = b3.prove(&key).unwrap();
        assert!(proof.verify_with(&Blake3Hasher, &root));
        assert!(!proof.verify(&root));
    }

    #[test]
    fn test_proof_bytes() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        let root = tree.insert_or_update(key4(3), b"x".to_vec()).unwrap();
        let proof = tree.prove(&key4(3)).unwrap();

        let decoded = SparseMerkleProof::from_bytes(&proof.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, proof);
        assert!(decoded.verify(&root));
        assert!(SparseMerkleProof::from_bytes(&[0xff, 0xff]).is_err());
    }
}
