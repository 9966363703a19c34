//! Sparse Merkle tree proofs.
//!
//! Directory entries live in a binary tree of depth 256 whose leaf positions
//! are the SHA-256 of the entry label. Empty subtrees hash to precomputed
//! defaults so proofs only carry the non-empty siblings.
//!
//! ```text
//! leaf  = H(0x00 || index || revision_be || H(value))
//! node  = H(0x01 || left || right)
//! empty = [0; 32] at height 0, H(0x01 || e || e) above
//! ```
//!
//! A proof lists sibling hashes from the leaf level (height 0) up to the
//! children of the root (height 255). `None` stands for an empty subtree.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::digest::{sha256, sha256_concat};
use crate::error::CryptoError;
use crate::types::Hash;
use crate::constant_time_eq;

/// Depth of the tree in levels.
pub const TREE_DEPTH: usize = 256;

const LEAF_PREFIX: &[u8] = &[0x00];
const NODE_PREFIX: &[u8] = &[0x01];

/// Sibling hashes from leaf level upward; `None` marks an empty subtree.
pub type Siblings = Vec<Option<Hash>>;

/// Leaf position for a label.
#[must_use]
pub fn leaf_index(label: &[u8]) -> Hash {
    sha256(label)
}

/// Hash of a populated leaf.
#[must_use]
pub fn leaf_hash(index: &Hash, revision: u64, value: &[u8]) -> Hash {
    let value_hash = sha256(value);
    sha256_concat(&[LEAF_PREFIX, index, &revision.to_be_bytes(), &value_hash])
}

/// Recompute the root from a leaf and its siblings.
///
/// `leaf = None` computes the root for an empty position, which is how
/// absence is proven.
///
/// # Errors
///
/// Returns error if `siblings` does not have exactly [`TREE_DEPTH`] entries.
pub fn compute_root(index: &Hash, leaf: Option<Hash>, siblings: &[Option<Hash>]) -> Result<Hash, CryptoError> {
    if siblings.len() != TREE_DEPTH {
        return Err(CryptoError::invalid_proof(format!(
            "expected {TREE_DEPTH} siblings, got {}",
            siblings.len()
        )));
    }

    let empty = empty_hashes();
    let mut current = leaf.unwrap_or(empty[0]);
    for (height, sibling) in siblings.iter().enumerate() {
        let sibling = sibling.unwrap_or(empty[height]);
        current = if bit(index, TREE_DEPTH - 1 - height) {
            node_hash(&sibling, &current)
        } else {
            node_hash(&current, &sibling)
        };
    }
    Ok(current)
}

/// Check a proof against an expected root.
///
/// # Errors
///
/// Returns error if the proof is malformed.
pub fn verify_proof(
    index: &Hash,
    leaf: Option<Hash>,
    siblings: &[Option<Hash>],
    root: &Hash,
) -> Result<bool, CryptoError> {
    let computed = compute_root(index, leaf, siblings)?;
    Ok(constant_time_eq(&computed, root))
}

/// In-memory sparse Merkle tree, used to produce proofs.
#[derive(Debug, Default, Clone)]
pub struct SparseMerkleTree {
    leaves: BTreeMap<Hash, Hash>,
}

impl SparseMerkleTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the leaf hash at `index`.
    pub fn insert(&mut self, index: Hash, leaf: Hash) {
        self.leaves.insert(index, leaf);
    }

    /// Clear the leaf at `index`.
    pub fn remove(&mut self, index: &Hash) -> Option<Hash> {
        self.leaves.remove(index)
    }

    /// Number of populated leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the tree has no populated leaves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Current root hash.
    #[must_use]
    pub fn root(&self) -> Hash {
        let leaves: Vec<(Hash, Hash)> = self.leaves.iter().map(|(k, v)| (*k, *v)).collect();
        subtree_hash(&leaves, 0)
    }

    /// Sibling path for `index`, populated or not.
    #[must_use]
    pub fn prove(&self, index: &Hash) -> Siblings {
        let empty = empty_hashes();
        let leaves: Vec<(Hash, Hash)> = self.leaves.iter().map(|(k, v)| (*k, *v)).collect();
        let mut siblings = vec![None; TREE_DEPTH];
        let mut slice: &[(Hash, Hash)] = &leaves;

        for depth in 0..TREE_DEPTH {
            let split = slice.partition_point(|(k, _)| !bit(k, depth));
            let (left, right) = slice.split_at(split);
            let (sibling, next) = if bit(index, depth) {
                (subtree_hash(left, depth + 1), right)
            } else {
                (subtree_hash(right, depth + 1), left)
            };
            let height = TREE_DEPTH - 1 - depth;
            if sibling != empty[height] {
                siblings[height] = Some(sibling);
            }
            slice = next;
        }
        siblings
    }
}

// ========================================================================
// Internal helpers
// ========================================================================

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    sha256_concat(&[NODE_PREFIX, left, right])
}

/// Bit at `depth`, most significant bit of byte 0 first.
fn bit(index: &Hash, depth: usize) -> bool {
    (index[depth / 8] >> (7 - depth % 8)) & 1 == 1
}

fn empty_hashes() -> &'static [Hash; TREE_DEPTH + 1] {
    static EMPTY: OnceLock<[Hash; TREE_DEPTH + 1]> = OnceLock::new();
    EMPTY.get_or_init(|| {
        let mut table = [[0u8; 32]; TREE_DEPTH + 1];
        for height in 1..=TREE_DEPTH {
            table[height] = node_hash(&table[height - 1], &table[height - 1]);
        }
        table
    })
}

/// Hash of the subtree rooted at `depth` holding `leaves` (sorted, sharing
/// the first `depth` bits).
fn subtree_hash(leaves: &[(Hash, Hash)], depth: usize) -> Hash {
    if leaves.is_empty() {
        return empty_hashes()[TREE_DEPTH - depth];
    }
    if depth == TREE_DEPTH {
        return leaves[0].1;
    }
    let split = leaves.partition_point(|(k, _)| !bit(k, depth));
    let (left, right) = leaves.split_at(split);
    node_hash(&subtree_hash(left, depth + 1), &subtree_hash(right, depth + 1))
}
