use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::trace;

use super::{BoundedResults, KnnResult, NeighborIndex, l2_squared, validate_dataset, validate_queries};
use crate::error::IndexError;

pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_MAX_LEAVES: usize = 1000;

#[derive(Debug, Clone, Copy)]
enum Node {
    /// Split on `axis` at `split`. `lo..=hi` is the cell interval of this node along `axis`,
    /// bounded by the splits of its ancestors.
    Internal {
        axis: usize,
        split: f32,
        lo: f32,
        hi: f32,
    },
    /// Points `perm[begin..end]`.
    Leaf { begin: usize, end: usize },
}

/// Pending subtree in the best-bin-first queue. Ordered so the max-heap pops the smallest bound.
#[derive(Debug, Clone, Copy)]
struct Branch {
    bound: f32,
    node: usize,
}

impl Ord for Branch {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .total_cmp(&self.bound)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Branch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Branch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Branch {}

/// Approximate kd-tree with best-bin-first search.
///
/// The tree is a complete binary tree in implicit array layout (children of `i` at
/// `2i + 1` and `2i + 2`). Every internal node splits its points at the median of the axis
/// with the largest variance; the depth is capped so each leaf keeps at least one point.
/// A search stops early after `max_leaves` leaves, so results are approximate.
#[derive(Debug, Clone)]
pub struct KdTreeIndex {
    max_depth: usize,
    max_leaves: usize,
    data: Vec<f32>,
    rows: usize,
    dim: Option<usize>,
    perm: Vec<usize>,
    nodes: Vec<Node>,
}

impl Default for KdTreeIndex {
    fn default() -> Self {
        KdTreeIndex::new(DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEAVES)
    }
}

fn cell_distance(v: f32, lo: f32, hi: f32) -> f32 {
    if v < lo {
        (lo - v) * (lo - v)
    } else if v > hi {
        (v - hi) * (v - hi)
    } else {
        0.0
    }
}

/// `min(max_depth, floor(log2(rows)) + 1)`, at least 1.
pub fn tree_depth(rows: usize, max_depth: usize) -> usize {
    let log_depth = (usize::BITS - rows.max(1).leading_zeros()) as usize;
    log_depth.min(max_depth).max(1)
}

struct Builder<'a> {
    data: &'a [f32],
    dim: usize,
    depth: usize,
    perm: Vec<usize>,
    nodes: Vec<Node>,
    cell: Vec<(f32, f32)>,
}

impl Builder<'_> {
    fn value(&self, row: usize, axis: usize) -> f32 {
        self.data[row * self.dim + axis]
    }

    fn max_variance_axis(&self, begin: usize, end: usize) -> usize {
        let n = (end - begin) as f64;
        let mut best_axis = 0;
        let mut best_var = f64::NEG_INFINITY;
        for axis in 0..self.dim {
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            for &row in &self.perm[begin..end] {
                let v = self.value(row, axis) as f64;
                sum += v;
                sum_sq += v * v;
            }
            let mean = sum / n;
            let var = sum_sq / n - mean * mean;
            if var > best_var {
                best_var = var;
                best_axis = axis;
            }
        }
        best_axis
    }

    fn build_node(&mut self, node: usize, begin: usize, end: usize, level: usize) {
        if level + 1 >= self.depth || end - begin < 2 {
            self.nodes[node] = Node::Leaf { begin, end };
            return;
        }
        let axis = self.max_variance_axis(begin, end);
        let mid = begin + (end - begin) / 2;
        let (data, dim) = (self.data, self.dim);
        self.perm[begin..end].select_nth_unstable_by(mid - begin, |a, b| {
            data[a * dim + axis].total_cmp(&data[b * dim + axis])
        });
        let split = self.value(self.perm[mid], axis);
        let (lo, hi) = self.cell[axis];
        self.nodes[node] = Node::Internal { axis, split, lo, hi };

        self.cell[axis] = (lo, split);
        self.build_node(2 * node + 1, begin, mid, level + 1);
        self.cell[axis] = (split, hi);
        self.build_node(2 * node + 2, mid, end, level + 1);
        self.cell[axis] = (lo, hi);
    }
}

impl KdTreeIndex {
    pub fn new(max_depth: usize, max_leaves: usize) -> KdTreeIndex {
        KdTreeIndex {
            max_depth: max_depth.max(1),
            max_leaves: max_leaves.max(1),
            data: Vec::new(),
            rows: 0,
            dim: None,
            perm: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn max_leaves(&self) -> usize {
        self.max_leaves
    }

    pub fn set_max_leaves(&mut self, max_leaves: usize) {
        self.max_leaves = max_leaves.max(1);
    }

    /// Depth of the built tree, 0 while unbuilt.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            0
        } else {
            (usize::BITS - self.nodes.len().leading_zeros()) as usize
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    fn search_one(&self, query: &[f32], dim: usize, k: usize) -> BoundedResults {
        let mut results = BoundedResults::new(k);
        let mut heap = BinaryHeap::new();
        heap.push(Branch { bound: 0.0, node: 0 });
        let mut leaves = 0;

        while let Some(Branch { bound, mut node }) = heap.pop() {
            if leaves >= self.max_leaves || (results.is_full() && bound > results.worst()) {
                break;
            }
            while let Node::Internal { axis, split, lo, hi } = self.nodes[node] {
                let v = query[axis];
                let diff = v - split;
                let (near, far) = if diff < 0.0 {
                    (2 * node + 1, 2 * node + 2)
                } else {
                    (2 * node + 2, 2 * node + 1)
                };
                let far_bound = (bound - cell_distance(v, lo, hi) + diff * diff).max(bound);
                if !(results.is_full() && far_bound > results.worst()) {
                    heap.push(Branch {
                        bound: far_bound,
                        node: far,
                    });
                }
                node = near;
            }
            if let Node::Leaf { begin, end } = self.nodes[node] {
                for &row in &self.perm[begin..end] {
                    let d = l2_squared(query, &self.data[row * dim..(row + 1) * dim]);
                    results.insert(row, d);
                }
            }
            leaves += 1;
        }
        results
    }
}

impl NeighborIndex for KdTreeIndex {
    fn build(&mut self, dataset: &[f32], rows: usize, dim: usize) -> Result<(), IndexError> {
        validate_dataset(dataset, rows, dim)?;
        let depth = tree_depth(rows, self.max_depth);
        let num_nodes = (1usize << depth) - 1;
        let mut builder = Builder {
            data: dataset,
            dim,
            depth,
            perm: (0..rows).collect(),
            nodes: vec![Node::Leaf { begin: 0, end: 0 }; num_nodes],
            cell: vec![(f32::NEG_INFINITY, f32::INFINITY); dim],
        };
        builder.build_node(0, 0, rows, 0);
        trace!("kd-tree built: {} rows, dim {}, depth {}", rows, dim, depth);

        self.perm = builder.perm;
        self.nodes = builder.nodes;
        self.data = dataset.to_vec();
        self.rows = rows;
        self.dim = Some(dim);
        Ok(())
    }

    fn dim(&self) -> Option<usize> {
        self.dim
    }

    fn len(&self) -> usize {
        self.rows
    }

    fn search_knn(
        &self,
        queries: &[f32],
        num_queries: usize,
        k: usize,
    ) -> Result<KnnResult, IndexError> {
        let dim = validate_queries(self.dim, queries, num_queries, k)?;
        let neighbours = queries
            .chunks_exact(dim)
            .map(|q| self.search_one(q, dim, k).into_vec())
            .collect();
        Ok(KnnResult { neighbours })
    }
}
