// This file contains the code for the pairwise tree distances: branch-length weighted
// Robinson-Foulds distance and bootstrap-support weighted distance (BSD).

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use clap::ValueEnum;
use rayon::prelude::*;

use crate::bipartition::{SplitInfo, SplitSet, restricted_splits, tree_splits};
use crate::matrix::DistanceMatrix;
use crate::misc::progress_bar;
use crate::tree::{MIN_LEAVES, PhyloTree};


#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum RfWeighting {
    Length,    // each differing split counts its branch length
    Topology,  // each differing split counts 1
}


#[derive(Debug, Clone)]
pub struct DistanceSettings {
    pub rf_weighting: RfWeighting,
    /// Weight given to a differing split that has no support value.
    pub missing_support: f64,
}

impl Default for DistanceSettings {
    fn default() -> Self {
        DistanceSettings { rf_weighting: RfWeighting::Length, missing_support: 0.1 }
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairDistance {
    pub rf: Option<f64>,
    pub bsd: Option<f64>,
}

impl PairDistance {
    pub fn undefined() -> Self {
        PairDistance { rf: None, bsd: None }
    }
}


/// The sorted leaf names shared by both trees.
pub fn shared_leaves(a: &PhyloTree, b: &PhyloTree) -> Vec<String> {
    let b_leaves = b.leaf_name_set();
    let mut shared: Vec<String> = a.leaf_names().into_iter().filter(|l| b_leaves.contains(l))
                                   .map(|l| l.to_string()).collect();
    shared.sort();
    shared
}


/// Distances between two trees, computed on the subtrees induced by their shared leaves. Pairs
/// with fewer than four shared leaves have no meaningful distance and get `None`.
pub fn compare_trees(a: &PhyloTree, b: &PhyloTree, settings: &DistanceSettings) -> PairDistance {
    let shared = shared_leaves(a, b);
    if shared.len() < MIN_LEAVES {
        return PairDistance::undefined();
    }
    let a_splits = restricted_splits(a, &shared);
    let b_splits = restricted_splits(b, &shared);
    compare_split_sets(&a_splits, &b_splits, settings)
}


fn compare_split_sets(a: &SplitSet, b: &SplitSet, settings: &DistanceSettings) -> PairDistance {
    PairDistance {
        rf: Some(robinson_foulds(a, b, settings.rf_weighting)),
        bsd: Some(bootstrap_support_distance(a, b, settings.missing_support)),
    }
}


/// Splits present in exactly one of the two sets, in canonical split order so that sums over them
/// don't depend on how the trees were written.
fn differing_splits<'a>(a: &'a SplitSet, b: &'a SplitSet) -> Vec<&'a SplitInfo> {
    let only_a = a.splits.iter().filter(|(s, _)| !b.contains(s));
    let only_b = b.splits.iter().filter(|(s, _)| !a.contains(s));
    let mut differing: Vec<_> = only_a.chain(only_b).collect();
    differing.sort_by(|x, y| x.0.cmp(y.0));
    differing.into_iter().map(|(_, info)| info).collect()
}


/// The most splits that can differ between two trees on n leaves: each binary unrooted tree has
/// n - 3 non-trivial splits.
fn max_differing_splits(leaf_count: usize) -> f64 {
    (2 * leaf_count.saturating_sub(3)).max(1) as f64
}


/// Robinson-Foulds distance scaled to 0-1. With length weighting, the summed branch lengths of
/// the differing splits are divided by the summed lengths of all splits in both trees (the value
/// if no split were shared). If the trees have no branch lengths at all, it falls back to the
/// topology-only count over 2(n - 3).
pub fn robinson_foulds(a: &SplitSet, b: &SplitSet, weighting: RfWeighting) -> f64 {
    let differing = differing_splits(a, b);
    let topology = differing.len() as f64 / max_differing_splits(a.leaf_count());
    if weighting == RfWeighting::Topology {
        return topology;
    }
    let differing_length: f64 = differing.iter().map(|info| info.length).sum();
    let total_length: f64 = a.splits.values().chain(b.splits.values())
                             .map(|info| info.length).sum();
    if total_length > 0.0 {
        differing_length / total_length
    } else {
        topology
    }
}


/// Bootstrap-support weighted distance scaled to 0-1: each differing split contributes its
/// support (0-1, or `missing_support` if it has none), and the sum is divided by 2(n - 3).
pub fn bootstrap_support_distance(a: &SplitSet, b: &SplitSet, missing_support: f64) -> f64 {
    let weighted: f64 = differing_splits(a, b).iter()
        .map(|info| info.support.unwrap_or(missing_support).clamp(0.0, 1.0)).sum();
    (weighted / max_differing_splits(a.leaf_count())).min(1.0)
}


/// Builds the RF and BSD matrices over all trees. Each pair is an independent task on the rayon
/// pool and the matrices are only filled in once every pair has finished.
pub fn distance_matrices(trees: &[PhyloTree], settings: &DistanceSettings)
        -> (DistanceMatrix, DistanceMatrix) {
    let labels: Vec<String> = trees.iter().map(|t| t.label.clone()).collect();
    let full_splits: Vec<SplitSet> = trees.par_iter().map(tree_splits).collect();
    let pairs: Vec<(usize, usize)> = (0..trees.len())
        .flat_map(|i| (i + 1..trees.len()).map(move |j| (i, j))).collect();
    let pb = progress_bar(pairs.len() as u64);
    let results: Vec<(usize, usize, PairDistance)> = pairs.par_iter().map(|&(i, j)| {
        let (a, b) = (&trees[i], &trees[j]);
        let result = if full_splits[i].leaves == full_splits[j].leaves {
            // Identical leaf sets (the usual case) can reuse the precomputed splits.
            compare_split_sets(&full_splits[i], &full_splits[j], settings)
        } else {
            compare_trees(a, b, settings)
        };
        pb.inc(1);
        (i, j, result)
    }).collect();
    pb.finish_and_clear();

    let mut rf = DistanceMatrix::new(labels.clone());
    let mut bsd = DistanceMatrix::new(labels);
    for (i, j, result) in results {
        rf.set(i, j, result.rf);
        bsd.set(i, j, result.bsd);
    }
    (rf, bsd)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_almost_eq;

    fn tree(newick: &str, label: &str) -> PhyloTree {
        PhyloTree::from_newick(newick, label).unwrap()
    }

    #[test]
    fn test_identical_trees() {
        let settings = DistanceSettings::default();
        let a = tree("((A:1,B:1)90:1,(C:1,D:1)80:1,E:1);", "a");
        let d = compare_trees(&a, &a, &settings);
        assert_eq!(d.rf, Some(0.0));
        assert_eq!(d.bsd, Some(0.0));
    }

    #[test]
    fn test_same_topology_different_supports() {
        let settings = DistanceSettings::default();
        let a = tree("((A:1,B:1)90:1,(C:1,D:1)80:1,E:1);", "a");
        let b = tree("((B:2,A:1)12:3,(D:1,C:1)5:1,E:1);", "b");
        let d = compare_trees(&a, &b, &settings);
        assert_eq!(d.rf, Some(0.0));
        assert_eq!(d.bsd, Some(0.0));
    }

    #[test]
    fn test_topology_rf() {
        let settings = DistanceSettings { rf_weighting: RfWeighting::Topology, missing_support: 0.1 };
        let a = tree("((A,B),(C,D),E);", "a");
        let b = tree("((A,C),(B,D),E);", "b");
        // Both splits differ in both trees: 4 of a possible 2 * (5 - 3).
        assert_eq!(compare_trees(&a, &b, &settings).rf, Some(1.0));
        let c = tree("((A,B),(C,E),D);", "c");
        assert_eq!(compare_trees(&a, &c, &settings).rf, Some(0.5));
    }

    #[test]
    fn test_length_weighted_rf() {
        let settings = DistanceSettings::default();
        let a = tree("((A:1,B:1):2,(C:1,D:1):1,E:1);", "a");
        let c = tree("((A:1,B:1):2,(C:1,E:1):3,D:1);", "c");
        // Differing: CD (1) and CE (3). All: AB (2) + CD (1) + AB (2) + CE (3).
        let rf = compare_trees(&a, &c, &settings).rf.unwrap();
        assert_almost_eq(rf, 4.0 / 8.0, 1e-12);

        // No branch lengths: falls back to the topology count.
        let a = tree("((A,B),(C,D),E);", "a");
        let c = tree("((A,B),(C,E),D);", "c");
        assert_almost_eq(compare_trees(&a, &c, &settings).rf.unwrap(), 0.5, 1e-12);
    }

    #[test]
    fn test_length_weighted_rf_with_negative_lengths() {
        let settings = DistanceSettings::default();
        let a = tree("((A:1,B:1):2,(C:1,D:1):-1,E:1);", "a");
        let b = tree("((A:1,B:1):2,(C:1,E:1):0.5,D:1);", "b");
        // CD counts as 0, so differing: 0 + 0.5, all: 2 + 0 + 2 + 0.5.
        assert_almost_eq(compare_trees(&a, &b, &settings).rf.unwrap(), 0.5 / 4.5, 1e-12);

        let c = tree("((A:1,B:1):-0.5,(C:1,D:1):1,E:1);", "c");
        let d = tree("((A:1,B:1):-0.5,(C:1,E:1):1,D:1);", "d");
        assert_almost_eq(compare_trees(&c, &d, &settings).rf.unwrap(), 1.0, 1e-12);

        let (rf, bsd) = distance_matrices(&[a, b, c, d], &settings);
        assert!(rf.validate().is_ok());
        assert!(bsd.validate().is_ok());
        for i in 0..4 {
            for j in 0..4 {
                let value = rf.get(i, j).unwrap();
                assert!((0.0..=1.0).contains(&value));
            }
        }
    }

    #[test]
    fn test_bsd_weights_by_support() {
        let settings = DistanceSettings::default();
        let a = tree("((A,B)100,(C,D)90,E);", "a");
        let strong = tree("((A,B)100,(C,E)90,D);", "b");
        let weak = tree("((A,B)100,(C,D)10,E);", "c");
        let weak_alt = tree("((A,B)100,(C,E)10,D);", "d");
        let strong_bsd = compare_trees(&a, &strong, &settings).bsd.unwrap();
        let weak_bsd = compare_trees(&weak, &weak_alt, &settings).bsd.unwrap();
        assert_almost_eq(strong_bsd, (0.9 + 0.9) / 4.0, 1e-12);
        assert_almost_eq(weak_bsd, (0.1 + 0.1) / 4.0, 1e-12);
        assert!(strong_bsd > weak_bsd);
    }

    #[test]
    fn test_bsd_missing_support() {
        let settings = DistanceSettings { rf_weighting: RfWeighting::Length, missing_support: 0.25 };
        let a = tree("((A,B),(C,D),E);", "a");
        let b = tree("((A,B),(C,E),D);", "b");
        assert_almost_eq(compare_trees(&a, &b, &settings).bsd.unwrap(), 0.5 / 4.0, 1e-12);
    }

    #[test]
    fn test_disjoint_leaves_are_undefined() {
        let settings = DistanceSettings::default();
        let a = tree("((A:1,B:1):1,(C:1,D:1):1);", "a");
        let b = tree("((W:1,X:1):1,(Y:1,Z:1):1);", "b");
        assert_eq!(compare_trees(&a, &b, &settings), PairDistance::undefined());
        let c = tree("((A:1,B:1):1,(C:1,Z:1):1);", "c");
        assert_eq!(compare_trees(&a, &c, &settings), PairDistance::undefined());
    }

    #[test]
    fn test_partial_overlap_uses_shared_leaves() {
        let settings = DistanceSettings { rf_weighting: RfWeighting::Topology, missing_support: 0.1 };
        let a = tree("((A,B),(C,D),(E,X));", "a");
        let b = tree("((A,B),(C,D),(E,Y));", "b");
        assert_eq!(shared_leaves(&a, &b), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(compare_trees(&a, &b, &settings).rf, Some(0.0));
    }

    #[test]
    fn test_distance_matrices() {
        let trees = vec![tree("((A:1,B:1)90:1,(C:1,D:1)90:1,E:1);", "tree_1"),
                         tree("((A:1,B:1)90:1,(C:1,E:1)90:1,D:1);", "tree_2"),
                         tree("((A:1,C:1)90:1,(B:1,D:1)90:1,E:1);", "tree_3"),
                         tree("((W:1,X:1)90:1,(Y:1,Z:1)90:1,V:1);", "tree_4")];
        let (rf, bsd) = distance_matrices(&trees, &DistanceSettings::default());
        for m in [&rf, &bsd] {
            assert!(m.validate().is_ok());
            assert_eq!(m.labels(), &["tree_1", "tree_2", "tree_3", "tree_4"]);
            for i in 0..4 {
                assert_eq!(m.get(i, i), Some(0.0));
            }
            assert_eq!(m.get(0, 3), None);
            assert_eq!(m.undefined_pair_count(), 3);
        }
        assert_almost_eq(rf.get(0, 1).unwrap(), 0.5, 1e-12);
        assert_almost_eq(rf.get(0, 2).unwrap(), 1.0, 1e-12);
        assert_almost_eq(bsd.get(0, 1).unwrap(), 0.45, 1e-12);
    }
}
