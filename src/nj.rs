// This file contains the neighbor-joining tree builder used to cluster trees by their RF/BSD
// distances.

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


/// Builds a neighbor-joining tree (Saitou & Nei 1987) from a fully-defined distance matrix.
///
/// Each step joins the pair minimising Q(i,j) = (r-2)d(i,j) - R(i) - R(j), where r is the number
/// of active nodes and R is a node's summed distance to the other active nodes. Pairs are scanned
/// in ascending index order and only a strictly smaller Q replaces the best, so ties go to the
/// lowest index pair. Negative branch lengths are clamped to zero.
///
/// Without `rooted`, the last two nodes are joined directly, which leaves the final internal node
/// as a three-way root (the usual unrooted NJ result). With `rooted`, a root is added halfway
/// along that last edge instead.
pub fn neighbor_joining(matrix: &DistanceMatrix, rooted: bool, label: &str) -> Result<PhyloTree> {
    if let Some((a, b)) = matrix.first_undefined_pair() {
        return Err(PipelineError::SingularMatrix { method: "neighbor joining".to_string(),
                                                   a: matrix.labels()[a].clone(),
                                                   b: matrix.labels()[b].clone() });
    }
    if matrix.is_empty() {
        return Err(PipelineError::CorruptInput { file: "distance matrix".to_string(),
                                                 message: "no entities to join".to_string() });
    }
    let n = matrix.len();
    let mut nodes: Vec<Node> = matrix.labels().iter().map(|l| Node::leaf(l, None)).collect();
    if n == 1 {
        return Ok(PhyloTree::from_nodes(label, nodes, 0));
    }

    // Rows/columns 0..n are the leaves; each join adds a row for its new node.
    let max_nodes = 2 * n;
    let mut d = vec![vec![0.0_f64; max_nodes]; max_nodes];
    for (i, row) in d.iter_mut().enumerate().take(n) {
        for (j, value) in row.iter_mut().enumerate().take(n) {
            *value = matrix.get(i, j).unwrap_or(0.0);
        }
    }
    let mut active: Vec<usize> = (0..n).collect();

    while active.len() > 2 {
        let r = active.len() as f64;
        let mut row_sums = vec![0.0_f64; max_nodes];
        for &i in &active {
            row_sums[i] = active.iter().filter(|&&j| j != i).map(|&j| d[i][j]).sum();
        }

        let mut best_q = f64::INFINITY;
        let mut best_pair = (active[0], active[1]);
        for (x, &i) in active.iter().enumerate() {
            for &j in &active[x + 1..] {
                let q = (r - 2.0) * d[i][j] - row_sums[i] - row_sums[j];
                if q < best_q {
                    best_q = q;
                    best_pair = (i, j);
                }
            }
        }
        let (i, j) = best_pair;

        let dij = d[i][j];
        let delta = (row_sums[i] - row_sums[j]) / (r - 2.0);
        let li = (0.5 * (dij + delta)).max(0.0);
        let lj = (0.5 * (dij - delta)).max(0.0);
        nodes[i].length = Some(li);
        nodes[j].length = Some(lj);

        let u = nodes.len();
        nodes.push(Node::internal(vec![i, j], None, None));
        for &k in active.iter().filter(|&&k| k != i && k != j) {
            let dk = 0.5 * (d[i][k] + d[j][k] - dij);
            d[u][k] = dk;
            d[k][u] = dk;
        }
        active.retain(|&x| x != i && x != j);
        active.push(u);
    }

    let (a, b) = (active[0], active[1]);
    let final_d = d[a][b].max(0.0);
    let root = if rooted || nodes[b].is_leaf() {
        // Two leaves (a two-entity matrix) always need a root node between them.
        nodes[a].length = Some(final_d / 2.0);
        nodes[b].length = Some(final_d / 2.0);
        nodes.push(Node::internal(vec![a, b], None, None));
        nodes.len() - 1
    } else {
        // b is the most recent join, so it is internal and becomes the root.
        nodes[a].length = Some(final_d);
        nodes[b].children.push(a);
        b
    };
    Ok(PhyloTree::from_nodes(label, nodes, root))
}
