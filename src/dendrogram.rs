// This file contains the UPGMA clustering used for both sequences (similarity distances) and
// trees (RF/BSD distances), along with cutting the resulting dendrogram into flat clusters.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use crate::error::{PipelineError, Result};
use crate::matrix::DistanceMatrix;
use crate::tree::{Node, PhyloTree};


#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: usize,  // leaves are 0..n in matrix order, internal nodes follow in merge order
    pub left: Option<Box<TreeNode>>,
    pub right: Option<Box<TreeNode>>,
    pub height: f64,  // distance at which the two children were merged (0 for leaves)
    pub members: Vec<usize>,  // leaf ids below this node, sorted
}

impl TreeNode {
    fn leaf(id: usize) -> Self {
        TreeNode { id, left: None, right: None, height: 0.0, members: vec![id] }
    }

    pub fn is_tip(&self) -> bool {
        self.left.is_none()
    }

    fn collect_clusters(&self, cutoff: f64, clusters: &mut Vec<Vec<usize>>) {
        if self.height <= cutoff {
            clusters.push(self.members.clone());
        } else {
            for child in [&self.left, &self.right].into_iter().flatten() {
                child.collect_clusters(cutoff, clusters);
            }
        }
    }
}


/// A full UPGMA merge tree over the labels of a distance matrix.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    pub labels: Vec<String>,
    pub root: TreeNode,
    /// Merge heights in the order the merges happened.
    pub merge_heights: Vec<f64>,
}

impl Dendrogram {
    /// Cuts the dendrogram so that any merge above the cutoff is split apart. Each cluster is a
    /// sorted list of labels, and clusters are ordered by their first label.
    pub fn clusters_at(&self, cutoff: f64) -> Vec<Vec<String>> {
        let mut clusters = Vec::new();
        self.root.collect_clusters(cutoff, &mut clusters);
        let mut named: Vec<Vec<String>> = clusters.into_iter().map(|members| {
            let mut names: Vec<String> = members.iter().map(|&i| self.labels[i].clone()).collect();
            names.sort();
            names
        }).collect();
        named.sort();
        named
    }

    pub fn leaf_count(&self) -> usize {
        self.labels.len()
    }

    /// Converts the dendrogram to a rooted tree. Each branch is half the height difference
    /// between its parent and child, so every tip sits at half the root's merge height.
    pub fn to_phylo_tree(&self, label: &str) -> PhyloTree {
        let mut nodes = Vec::new();
        let root = self.add_node(&self.root, None, &mut nodes);
        PhyloTree::from_nodes(label, nodes, root)
    }

    fn add_node(&self, node: &TreeNode, parent_height: Option<f64>, nodes: &mut Vec<Node>) -> usize {
        let length = parent_height.map(|h| (h - node.height) / 2.0);
        let index = nodes.len();
        if node.is_tip() {
            nodes.push(Node::leaf(&self.labels[node.id], length));
            return index;
        }
        nodes.push(Node::internal(Vec::new(), length, None));
        let mut children = Vec::new();
        for child in [&node.left, &node.right].into_iter().flatten() {
            children.push(self.add_node(child, Some(node.height), nodes));
        }
        nodes[index].children = children;
        index
    }

    pub fn to_newick(&self) -> String {
        self.to_phylo_tree("upgma").to_newick()
    }
}


/// Runs UPGMA on a fully-defined distance matrix. At each step the closest pair of clusters is
/// merged, with ties going to the pair whose combined member labels (sorted, comma-joined) sort
/// first. The merged cluster's distance to each other cluster is the size-weighted mean of its
/// parts' distances.
pub fn upgma(matrix: &DistanceMatrix) -> Result<Dendrogram> {
    if let Some((a, b)) = matrix.first_undefined_pair() {
        return Err(PipelineError::SingularMatrix { method: "UPGMA".to_string(),
                                                   a: matrix.labels()[a].clone(),
                                                   b: matrix.labels()[b].clone() });
    }
    if matrix.is_empty() {
        return Err(PipelineError::CorruptInput { file: "distance matrix".to_string(),
                                                 message: "no entities to cluster".to_string() });
    }
    let n = matrix.len();
    let labels = matrix.labels().to_vec();
    let mut distances: Vec<Vec<f64>> = (0..n).map(|i| {
        (0..n).map(|j| matrix.get(i, j).unwrap_or(0.0)).collect()
    }).collect();

    // Slot i holds the cluster that started as leaf i, or None once it has been merged away.
    let mut clusters: Vec<Option<TreeNode>> = (0..n).map(|i| Some(TreeNode::leaf(i))).collect();
    let mut merge_heights = Vec::with_capacity(n.saturating_sub(1));
    let mut next_id = n;

    while merge_heights.len() + 1 < n {
        let (a, b, a_b_distance) = get_closest_pair(&distances, &clusters, &labels);
        let cluster_a = clusters[a].take().unwrap_or_else(|| TreeNode::leaf(a));
        let cluster_b = clusters[b].take().unwrap_or_else(|| TreeNode::leaf(b));
        let (size_a, size_b) = (cluster_a.members.len() as f64, cluster_b.members.len() as f64);

        // Average linkage can't produce inversions, so this only absorbs rounding.
        let height = merge_heights.last().map_or(a_b_distance, |&h: &f64| a_b_distance.max(h));
        merge_heights.push(height);

        let mut members: Vec<usize> = cluster_a.members.iter()
                                                       .chain(&cluster_b.members).copied().collect();
        members.sort_unstable();
        clusters[a] = Some(TreeNode { id: next_id, left: Some(Box::new(cluster_a)),
                                      right: Some(Box::new(cluster_b)), height, members });
        next_id += 1;

        for k in (0..n).filter(|&k| k != a && clusters[k].is_some()) {
            let d = (size_a * distances[a][k] + size_b * distances[b][k]) / (size_a + size_b);
            distances[a][k] = d;
            distances[k][a] = d;
        }
    }

    let root = clusters.into_iter().flatten().next().unwrap_or_else(|| TreeNode::leaf(0));
    Ok(Dendrogram { labels, root, merge_heights })
}


fn get_closest_pair(distances: &[Vec<f64>], clusters: &[Option<TreeNode>], labels: &[String])
        -> (usize, usize, f64) {
    let active: Vec<usize> = (0..clusters.len()).filter(|&i| clusters[i].is_some()).collect();
    let mut min_distance = f64::INFINITY;
    let mut closest_pair = (active[0], active[1]);
    let mut closest_key: Option<String> = None;
    for (x, &a) in active.iter().enumerate() {
        for &b in &active[x + 1..] {
            let dist = distances[a][b];
            if dist < min_distance {
                min_distance = dist;
                closest_pair = (a, b);
                closest_key = None;
            } else if dist == min_distance {
                // Only build member strings when there is actually a tie to break.
                let best = closest_key.get_or_insert_with(|| {
                    member_key(clusters, closest_pair.0, closest_pair.1, labels)
                }).clone();
                let key = member_key(clusters, a, b, labels);
                if key < best {
                    closest_pair = (a, b);
                    closest_key = Some(key);
                }
            }
        }
    }
    (closest_pair.0, closest_pair.1, min_distance)
}


fn member_key(clusters: &[Option<TreeNode>], a: usize, b: usize, labels: &[String]) -> String {
    let mut names: Vec<&str> = [a, b].iter().filter_map(|&i| clusters[i].as_ref())
        .flat_map(|c| c.members.iter().map(|&m| labels[m].as_str())).collect();
    names.sort_unstable();
    names.join(",")
}
