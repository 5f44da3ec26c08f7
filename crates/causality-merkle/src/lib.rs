//! # causality-merkle
//!
//! Merkle tree implementations for Causality's verifiable state commitments.
//!
//! This crate provides two types of Merkle trees and a stateless verifier:
//!
//! - [`binary::BinaryMerkleTree`]: A dense binary Merkle tree for ordered data commitments
//! - [`sparse::SparseMerkleTree`]: A fixed-depth sparse Merkle tree for key-value state
//! - [`verify::ProofVerifier`]: Checks proofs from either tree against a trusted root
//!
//! ## Design Philosophy
//!
//! - **Binary Merkle Tree**: Used for ordered lists such as effect or fact
//!   logs, where we need compact inclusion proofs for positions.
//!
//! - **Sparse Merkle Tree**: Used for resource and object state, where keys are
//!   fixed-width identifiers and we need both inclusion and non-inclusion proofs.
//!
//! Both trees are generic over a [`MerkleHasher`] and default to SHA-256.
//! Sparse tree nodes are content-addressed, so they can be persisted through the
//! traits in [`storage`] without this crate choosing a storage engine.

pub mod binary;
pub mod config;
pub mod error;
pub mod hash;
pub mod key;
pub mod sparse;
pub mod storage;
pub mod verify;

pub use binary::{BinaryMerkleProof, BinaryMerkleTree, ProofStep, Side};
pub use config::MerkleConfig;
pub use error::{MerkleError, MerkleResult};
pub use hash::{Blake3Hasher, HashAlgorithm, HashValue, MerkleHasher, Sha256Hasher};
pub use key::SmtKey;
pub use sparse::{NodeChanges, SparseMerkleNode, SparseMerkleProof, SparseMerkleTree};
pub use storage::{InMemoryMerkleStore, MerkleNodeStore, MerkleRootStore, MerkleStore, Version};
pub use verify::ProofVerifier;

/// The length of hash digests used in merkle trees (32 bytes = 256 bits)
pub const HASH_LENGTH: usize = 32;

/// Maximum sparse tree depth, one level per bit of a digest
pub const MAX_DEPTH: usize = HASH_LENGTH * 8;
