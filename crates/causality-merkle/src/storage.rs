//! Storage traits and interfaces for Merkle tree persistence.
//!
//! The sparse tree keeps its nodes content-addressed (node hash -> node), so a
//! backend only needs a key-value namespace for nodes plus a small versioned
//! index of committed roots. Choosing the engine is left to the embedding
//! system; [`InMemoryMerkleStore`] is provided for tests and single-process use.
//!
//! # Layout
//!
//! ```text
//! nodes  - Key: node_hash -> Value: SparseMerkleNode
//! roots  - Key: version   -> Value: HashValue (root)
//! ```

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::MerkleResult;
use crate::hash::HashValue;
use crate::sparse::SparseMerkleNode;

/// Version identifier of a committed root.
pub type Version = u64;

/// A trait for storing and retrieving Merkle tree nodes by hash.
pub trait MerkleNodeStore: Send + Sync {
    /// Store a node by its hash.
    fn put_node(&self, hash: &HashValue, node: &SparseMerkleNode) -> MerkleResult<()>;

    /// Retrieve a node by its hash.
    fn get_node(&self, hash: &HashValue) -> MerkleResult<Option<SparseMerkleNode>>;

    /// Check if a node exists.
    fn has_node(&self, hash: &HashValue) -> MerkleResult<bool>;

    /// Delete a node.
    fn delete_node(&self, hash: &HashValue) -> MerkleResult<()>;

    /// Put multiple nodes. Backends with write batches should make this atomic.
    fn batch_put_nodes(&self, nodes: &[(HashValue, SparseMerkleNode)]) -> MerkleResult<()> {
        for (hash, node) in nodes {
            self.put_node(hash, node)?;
        }
        Ok(())
    }
}

/// A trait for storing committed roots by version.
pub trait MerkleRootStore: Send + Sync {
    /// Record the root committed at `version`.
    fn put_root(&self, version: Version, root: &HashValue) -> MerkleResult<()>;

    /// Get the root committed at `version`.
    fn get_root(&self, version: Version) -> MerkleResult<Option<HashValue>>;

    /// Get the highest committed version and its root.
    fn get_latest_root(&self) -> MerkleResult<Option<(Version, HashValue)>>;

    /// List committed versions in `start..=end`, ascending.
    fn list_versions(&self, start: Version, end: Version) -> MerkleResult<Vec<Version>>;

    /// Forget roots committed before `version`, returning how many were removed.
    fn prune_roots_before(&self, version: Version) -> MerkleResult<u64>;
}

/// Combined storage interface for Merkle trees.
pub trait MerkleStore: MerkleNodeStore + MerkleRootStore {
    /// Flush pending writes to persistent storage.
    fn flush(&self) -> MerkleResult<()>;
}

/// An in-memory implementation of MerkleStore.
///
/// Clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct InMemoryMerkleStore {
    nodes: Arc<RwLock<HashMap<HashValue, SparseMerkleNode>>>,
    roots: Arc<RwLock<BTreeMap<Version, HashValue>>>,
}

impl InMemoryMerkleStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl MerkleNodeStore for InMemoryMerkleStore {
    fn put_node(&self, hash: &HashValue, node: &SparseMerkleNode) -> MerkleResult<()> {
        self.nodes.write().insert(*hash, node.clone());
        Ok(())
    }

    fn get_node(&self, hash: &HashValue) -> MerkleResult<Option<SparseMerkleNode>> {
        Ok(self.nodes.read().get(hash).cloned())
    }

    fn has_node(&self, hash: &HashValue) -> MerkleResult<bool> {
        Ok(self.nodes.read().contains_key(hash))
    }

    fn delete_node(&self, hash: &HashValue) -> MerkleResult<()> {
        self.nodes.write().remove(hash);
        Ok(())
    }

    fn batch_put_nodes(&self, nodes: &[(HashValue, SparseMerkleNode)]) -> MerkleResult<()> {
        let mut store = self.nodes.write();
        for (hash, node) in nodes {
            store.insert(*hash, node.clone());
        }
        Ok(())
    }
}

impl MerkleRootStore for InMemoryMerkleStore {
    fn put_root(&self, version: Version, root: &HashValue) -> MerkleResult<()> {
        self.roots.write().insert(version, *root);
        Ok(())
    }

    fn get_root(&self, version: Version) -> MerkleResult<Option<HashValue>> {
        Ok(self.roots.read().get(&version).copied())
    }

    fn get_latest_root(&self) -> MerkleResult<Option<(Version, HashValue)>> {
        Ok(self
            .roots
            .read()
            .iter()
            .next_back()
            .map(|(version, root)| (*version, *root)))
    }

    fn list_versions(&self, start: Version, end: Version) -> MerkleResult<Vec<Version>> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.roots.read().range(start..=end).map(|(v, _)| *v).collect())
    }

    fn prune_roots_before(&self, version: Version) -> MerkleResult<u64> {
        let mut roots = self.roots.write();
        let kept = roots.split_off(&version);
        let removed = roots.len() as u64;
        *roots = kept;
        Ok(removed)
    }
}

impl MerkleStore for InMemoryMerkleStore {
    fn flush(&self) -> MerkleResult<()> {
        // No-op for in-memory store
        Ok(())
    }
}
