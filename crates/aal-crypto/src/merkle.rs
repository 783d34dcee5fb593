use aal_types::Digest;
use serde::{Deserialize, Serialize};

use crate::hasher::ContentHasher;

/// Side of a sibling in a Merkle proof path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// Binary Merkle tree over an ordered list of byte records.
///
/// Leaves are hashed with [`ContentHasher::LEAF`]; interior nodes hash the
/// concatenation of their children. When a level has an odd number of nodes
/// the last node is paired with itself, and the proof for that node records
/// its own hash as a right-hand sibling. This rule is shared by tree
/// construction, incremental extension and proof generation.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Digest,
    /// Original leaf hashes, in insertion order.
    leaves: Vec<Digest>,
    /// Level 0 = leaves, last level = `[root]`.
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// An empty tree with a null root.
    pub fn new() -> Self {
        Self {
            root: Digest::null(),
            leaves: Vec::new(),
            levels: Vec::new(),
        }
    }

    /// Build a tree from raw leaf records, hashing each one.
    pub fn build<T: AsRef<[u8]>>(records: &[T]) -> Self {
        let leaves = records
            .iter()
            .map(|r| Self::leaf_hash(r.as_ref()))
            .collect();
        Self::from_leaf_hashes(leaves)
    }

    /// Build a tree from already-hashed leaves.
    pub fn from_leaf_hashes(leaves: Vec<Digest>) -> Self {
        let mut tree = Self {
            root: Digest::null(),
            leaves,
            levels: Vec::new(),
        };
        tree.rebuild();
        tree
    }

    /// Hash of a leaf record.
    pub fn leaf_hash(data: &[u8]) -> Digest {
        ContentHasher::LEAF.hash(data)
    }

    /// Recompute every level from the stored leaf hashes.
    pub fn rebuild(&mut self) {
        self.levels.clear();
        if self.leaves.is_empty() {
            self.root = Digest::null();
            return;
        }

        let mut current = self.leaves.clone();
        self.levels.push(current.clone());
        while current.len() > 1 {
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            self.levels.push(next.clone());
            current = next;
        }
        self.root = current[0];
    }

    /// Append a leaf record and return its index.
    ///
    /// Only the right-most path is recomputed: O(log n) hashes per call.
    pub fn add_leaf(&mut self, data: &[u8]) -> usize {
        self.add_leaf_hash(Self::leaf_hash(data))
    }

    /// Append an already-hashed leaf and return its index.
    pub fn add_leaf_hash(&mut self, leaf: Digest) -> usize {
        let index = self.leaves.len();
        self.leaves.push(leaf);

        // Levels out of sync with the leaf list: fall back to a full rebuild.
        if self.levels.first().map_or(0, Vec::len) != index {
            self.rebuild();
            return index;
        }
        if self.levels.is_empty() {
            self.levels.push(vec![leaf]);
            self.root = leaf;
            return index;
        }

        self.levels[0].push(leaf);
        let mut level = 0;
        let mut idx = index;
        while self.levels[level].len() > 1 {
            let parent_idx = idx / 2;
            let nodes = &self.levels[level];
            let left = nodes[parent_idx * 2];
            let right = nodes.get(parent_idx * 2 + 1).copied().unwrap_or(left);
            let parent = hash_pair(&left, &right);

            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }
            let next = &mut self.levels[level + 1];
            if parent_idx < next.len() {
                next[parent_idx] = parent;
            } else {
                next.push(parent);
            }

            level += 1;
            idx = parent_idx;
        }
        self.levels.truncate(level + 1);
        self.root = self.levels[level][0];
        index
    }

    /// The root hash of the tree (null when empty).
    pub fn root(&self) -> Digest {
        self.root
    }

    /// Number of original leaves (not the padded count).
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Returns `true` if the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Number of levels, counting the leaf level. 0 for an empty tree.
    pub fn height(&self) -> usize {
        self.levels.len()
    }

    /// Leaf hashes in insertion order.
    pub fn leaves(&self) -> &[Digest] {
        &self.leaves
    }

    /// Generate an inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaves.len() || self.levels.is_empty() {
            return None;
        }

        let mut path = Vec::with_capacity(self.levels.len() - 1);
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            // Odd level: the last node is its own sibling.
            let sibling = level.get(sibling_idx).copied().unwrap_or(level[idx]);
            let side = if idx % 2 == 0 { Side::Right } else { Side::Left };
            path.push((sibling, side));
            idx /= 2;
        }

        Some(MerkleProof {
            leaf: self.leaves[index],
            path,
            root: self.root,
        })
    }
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Merkle inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Hash of the leaf being proven.
    pub leaf: Digest,
    /// Path of (sibling_hash, sibling_side) pairs from leaf to root.
    pub path: Vec<(Digest, Side)>,
    /// Expected root hash.
    pub root: Digest,
}

impl MerkleProof {
    /// Verify the proof: recompute the root from the leaf and path.
    pub fn verify(&self) -> bool {
        fold_path(self.leaf, &self.path) == self.root
    }

    /// Verify the proof against a leaf record and an externally supplied root.
    pub fn verify_record(&self, leaf_bytes: &[u8], root: &Digest) -> bool {
        MerkleTree::leaf_hash(leaf_bytes) == self.leaf && verify_inclusion(leaf_bytes, &self.path, root)
    }
}

/// Verify that `leaf_bytes` is included under `root` via `path`.
///
/// Stateless: needs neither the tree nor the ledger that built it.
pub fn verify_inclusion(leaf_bytes: &[u8], path: &[(Digest, Side)], root: &Digest) -> bool {
    fold_path(MerkleTree::leaf_hash(leaf_bytes), path) == *root
}

fn fold_path(leaf: Digest, path: &[(Digest, Side)]) -> Digest {
    path.iter().fold(leaf, |current, (sibling, side)| match side {
        Side::Left => hash_pair(sibling, &current),
        Side::Right => hash_pair(&current, sibling),
    })
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"aal-merkle-v1:");
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Digest::from_hash(*hasher.finalize().as_bytes())
}
