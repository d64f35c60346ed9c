//! Fixed-height Poseidon Merkle tree holding rate commitments.
//!
//! Leaves default to zero; only populated nodes are stored, so a tree of
//! height 20 costs memory proportional to the number of members. Witnesses
//! carry both the sibling hash and the sibling position for every level,
//! which is what the share circuit consumes.

use crate::utils::{field_from_hex, field_to_hex, poseidon_hash};
use anyhow::{Context, Result};
use pasta_curves::pallas;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// Largest supported tree height.
pub const MAX_TREE_HEIGHT: usize = 32;

/// Authentication path for one leaf.
///
/// `positions[level]` is `true` when the path node at that level is the
/// right child, i.e. the sibling sits on the left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleWitness {
    pub siblings: Vec<pallas::Base>,
    pub positions: Vec<bool>,
}

impl MerkleWitness {
    #[must_use]
    pub fn height(&self) -> usize {
        self.siblings.len()
    }

    /// Recomputes the root reached by hashing `leaf` up the path.
    #[must_use]
    pub fn calculate_root(&self, leaf: pallas::Base) -> pallas::Base {
        self.siblings
            .iter()
            .zip(&self.positions)
            .fold(leaf, |current, (sibling, &is_right)| {
                if is_right {
                    poseidon_hash(*sibling, current)
                } else {
                    poseidon_hash(current, *sibling)
                }
            })
    }

    /// Leaf index encoded by the position bits (least significant level first).
    ///
    /// Bits beyond the 64th level do not fit a `u64` and are ignored.
    #[must_use]
    pub fn calculate_index(&self) -> u64 {
        self.positions
            .iter()
            .enumerate()
            .filter(|&(_, &is_right)| is_right)
            .filter_map(|(level, _)| u32::try_from(level).ok())
            .fold(0u64, |index, level| index | 1u64.checked_shl(level).unwrap_or(0))
    }
}

/// A sparse binary Merkle tree of fixed height.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    height: usize,
    /// `zeros[level]` is the root of an empty subtree whose leaves sit `level` levels below.
    zeros: Vec<pallas::Base>,
    nodes: HashMap<(usize, u64), pallas::Base>,
}

impl MerkleTree {
    /// Creates an empty tree of the given height.
    ///
    /// # Errors
    /// Returns an error if `height` is zero or above [`MAX_TREE_HEIGHT`].
    pub fn new(height: usize) -> Result<Self> {
        if height == 0 || height > MAX_TREE_HEIGHT {
            return Err(anyhow::anyhow!(
                "Tree height must be between 1 and {}, got {}",
                MAX_TREE_HEIGHT,
                height
            ));
        }

        let mut zeros = Vec::with_capacity(height + 1);
        zeros.push(pallas::Base::zero());
        for level in 0..height {
            let below = zeros[level];
            zeros.push(poseidon_hash(below, below));
        }

        Ok(Self {
            height,
            zeros,
            nodes: HashMap::new(),
        })
    }

    /// Builds a tree with `leaves` placed at indices `0..leaves.len()`.
    pub fn from_leaves(height: usize, leaves: &[pallas::Base]) -> Result<Self> {
        let mut tree = Self::new(height)?;
        for (index, leaf) in leaves.iter().enumerate() {
            tree.set_leaf(index as u64, *leaf)?;
        }
        Ok(tree)
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of leaf slots, `1 << height`.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        1u64 << self.height
    }

    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.node(self.height, 0)
    }

    #[must_use]
    pub fn leaf(&self, index: u64) -> pallas::Base {
        self.node(0, index)
    }

    fn node(&self, level: usize, index: u64) -> pallas::Base {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn check_index(&self, index: u64) -> Result<()> {
        if index >= self.capacity() {
            return Err(anyhow::anyhow!(
                "Leaf index {} out of range for tree of capacity {}",
                index,
                self.capacity()
            ));
        }
        Ok(())
    }

    /// Writes `leaf` at `index` and rehashes the path to the root.
    pub fn set_leaf(&mut self, index: u64, leaf: pallas::Base) -> Result<()> {
        self.check_index(index)?;

        self.nodes.insert((0, index), leaf);
        let mut current = leaf;
        let mut position = index;
        for level in 0..self.height {
            let sibling = self.node(level, position ^ 1);
            current = if position & 1 == 1 {
                poseidon_hash(sibling, current)
            } else {
                poseidon_hash(current, sibling)
            };
            position >>= 1;
            self.nodes.insert((level + 1, position), current);
        }

        Ok(())
    }

    /// Authentication path for the leaf at `index`.
    pub fn witness(&self, index: u64) -> Result<MerkleWitness> {
        self.check_index(index)?;

        let mut siblings = Vec::with_capacity(self.height);
        let mut positions = Vec::with_capacity(self.height);
        let mut position = index;
        for level in 0..self.height {
            siblings.push(self.node(level, position ^ 1));
            positions.push(position & 1 == 1);
            position >>= 1;
        }

        Ok(MerkleWitness {
            siblings,
            positions,
        })
    }

    /// Checks that `witness` authenticates `leaf` against this tree's root.
    #[must_use]
    pub fn verify(&self, leaf: pallas::Base, witness: &MerkleWitness) -> bool {
        witness.height() == self.height && witness.calculate_root(leaf) == self.root()
    }
}

/// Reads a leaves file: one hex field element per line, blank lines ignored.
pub fn read_leaves(path: &Path, max_file_size: u64) -> Result<Vec<pallas::Base>> {
    let metadata = fs::metadata(path).context("Failed to read leaves file metadata")?;
    if metadata.len() > max_file_size {
        return Err(anyhow::anyhow!(
            "Leaves file too large: {} bytes (max {} bytes)",
            metadata.len(),
            max_file_size
        ));
    }

    let content = fs::read_to_string(path).context("Failed to read leaves file")?;
    let leaves = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            field_from_hex(line).with_context(|| format!("Invalid leaf on line {}", number + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    if leaves.is_empty() {
        return Err(anyhow::anyhow!(
            "No leaves found in leaves file '{}'",
            path.display()
        ));
    }
    Ok(leaves)
}

impl fmt::Display for MerkleWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MerkleWitness:\n  Index: {}\n  Height: {}",
            self.calculate_index(),
            self.height()
        )?;
        if let Some(first) = self.siblings.first() {
            write!(f, "\n  First sibling: {}", field_to_hex(*first))?;
        }
        Ok(())
    }
}
