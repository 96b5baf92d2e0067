// This file contains the code for extracting a tree's bipartitions (splits), optionally restricted
// to a subset of its leaves.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use fxhash::FxHashMap;

use crate::tree::PhyloTree;


/// One side of a split as a bitset over a sorted leaf list. The stored side is always the one
/// that does not contain leaf 0, which pins every split to the same rooting regardless of how the
/// tree was rooted or how its children were ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Split {
    bits: Vec<u64>,
}

impl Split {
    fn empty(leaf_count: usize) -> Self {
        Split { bits: vec![0; leaf_count.div_ceil(64)] }
    }

    fn insert(&mut self, i: usize) {
        self.bits[i / 64] |= 1 << (i % 64);
    }

    pub fn contains(&self, i: usize) -> bool {
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    fn union_with(&mut self, other: &Split) {
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= b;
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    fn complement(&self, leaf_count: usize) -> Split {
        let mut c = Split::empty(leaf_count);
        for i in (0..leaf_count).filter(|&i| !self.contains(i)) {
            c.insert(i);
        }
        c
    }

    fn canonical(self, leaf_count: usize) -> Split {
        if leaf_count > 0 && self.contains(0) { self.complement(leaf_count) } else { self }
    }
}


/// What a split carries from the edge(s) that induce it. When restricting to shared leaves
/// collapses a path of edges into one, lengths are summed and the best support is kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitInfo {
    pub length: f64,
    pub support: Option<f64>,
}

impl SplitInfo {
    fn merge(&mut self, other: SplitInfo) {
        self.length += other.length;
        self.support = match (self.support, other.support) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}


/// The non-trivial splits of a tree over a fixed, sorted leaf list.
#[derive(Debug, Clone)]
pub struct SplitSet {
    pub leaves: Vec<String>,
    pub splits: FxHashMap<Split, SplitInfo>,
}

impl SplitSet {
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn contains(&self, split: &Split) -> bool {
        self.splits.contains_key(split)
    }

    /// Human-readable form of a split: the sorted leaf names of its smaller side (the side
    /// without leaf 0 when the sides are equal in size).
    #[cfg(test)]
    pub fn canonical_string(&self, split: &Split) -> String {
        let n = self.leaf_count();
        let side_size = split.count();
        let use_stored_side = side_size * 2 <= n;
        let names: Vec<&str> = (0..n).filter(|&i| split.contains(i) == use_stored_side)
                                     .map(|i| self.leaves[i].as_str()).collect();
        names.join(",")
    }

    /// All splits as canonical strings, sorted.
    #[cfg(test)]
    pub fn canonical_strings(&self) -> Vec<String> {
        let mut strings: Vec<String> = self.splits.keys().map(|s| self.canonical_string(s))
                                                         .collect();
        strings.sort();
        strings
    }
}


/// Splits of the tree over all of its leaves.
pub fn tree_splits(tree: &PhyloTree) -> SplitSet {
    let mut leaves: Vec<String> = tree.leaf_names().iter().map(|s| s.to_string()).collect();
    leaves.sort();
    restricted_splits(tree, &leaves)
}


/// Splits of the subtree induced by the given leaves (which must be sorted). Leaves of the tree
/// that aren't in the list are ignored, and splits that become trivial (fewer than two leaves on
/// a side) are dropped.
pub fn restricted_splits(tree: &PhyloTree, leaves: &[String]) -> SplitSet {
    let n = leaves.len();
    let leaf_index: FxHashMap<&str, usize> = leaves.iter().enumerate()
                                                   .map(|(i, l)| (l.as_str(), i)).collect();
    let mut below: Vec<Split> = vec![Split::empty(n); tree.nodes.len()];
    let mut splits: FxHashMap<Split, SplitInfo> = FxHashMap::default();
    for i in tree.postorder() {
        let node = &tree.nodes[i];
        if node.is_leaf() {
            if let Some(&index) = node.name.as_deref().and_then(|name| leaf_index.get(name)) {
                below[i].insert(index);
            }
        } else {
            let mut bits = Split::empty(n);
            for &c in &node.children {
                bits.union_with(&below[c]);
            }
            below[i] = bits;
        }
        if i == tree.root {
            continue;
        }
        let side = below[i].count();
        if side < 2 || n - side < 2 {
            continue;
        }
        // Negative lengths (common in NJ and BIONJ trees) count as zero.
        let length = node.length.unwrap_or(0.0).max(0.0);
        let info = SplitInfo { length, support: node.support };
        let split = below[i].clone().canonical(n);
        splits.entry(split).and_modify(|existing| existing.merge(info)).or_insert(info);
    }
    SplitSet { leaves: leaves.to_vec(), splits }
}
