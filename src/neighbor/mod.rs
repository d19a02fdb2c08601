//! Nearest-neighbour search over fixed-dimension descriptor vectors.
//!
//! Distances are squared euclidean distances on `f32`. An index is built once from a
//! row-major dataset and is immutable afterwards.

mod kdtree;
mod linear;

pub use kdtree::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEAVES, KdTreeIndex, tree_depth};
pub use linear::LinearIndex;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Search strategy used when an index is created from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Linear,
    #[default]
    KdTree,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub index: usize,
    pub distance: f32,
}

/// Per-query neighbours, closest first. A query gets fewer than `k` entries only when the
/// dataset is smaller than `k` or an approximate search ran out of budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnnResult {
    pub neighbours: Vec<Vec<Neighbour>>,
}

impl KnnResult {
    pub fn len(&self) -> usize {
        self.neighbours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbours.is_empty()
    }

    pub fn nearest(&self, query: usize) -> Option<Neighbour> {
        self.neighbours.get(query).and_then(|n| n.first().copied())
    }

    /// Index of the nearest neighbour of every query, `None` for queries without result.
    pub fn nearest_indices(&self) -> Vec<Option<usize>> {
        self.neighbours
            .iter()
            .map(|n| n.first().map(|n| n.index))
            .collect()
    }

    pub fn nearest_distances(&self) -> Vec<Option<f32>> {
        self.neighbours
            .iter()
            .map(|n| n.first().map(|n| n.distance))
            .collect()
    }
}

pub trait NeighborIndex {
    /// Builds the index from `rows` vectors of dimension `dim` stored row-major in `dataset`.
    /// Any previous content is discarded.
    fn build(&mut self, dataset: &[f32], rows: usize, dim: usize) -> Result<(), IndexError>;

    /// Descriptor dimension, `None` while unbuilt.
    fn dim(&self) -> Option<usize>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn search_knn(
        &self,
        queries: &[f32],
        num_queries: usize,
        k: usize,
    ) -> Result<KnnResult, IndexError>;

    /// Single-query, single-neighbour convenience.
    fn search_neighbour(&self, query: &[f32]) -> Result<Option<Neighbour>, IndexError> {
        Ok(self.search_knn(query, 1, 1)?.nearest(0))
    }
}

/// Creates an unbuilt index of the requested kind.
pub fn new_index(method: MatchMethod, max_depth: usize, max_leaves: usize) -> Box<dyn NeighborIndex> {
    match method {
        MatchMethod::Linear => Box::new(LinearIndex::new()),
        MatchMethod::KdTree => Box::new(KdTreeIndex::new(max_depth, max_leaves)),
    }
}

pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

pub(crate) fn validate_dataset(dataset: &[f32], rows: usize, dim: usize) -> Result<(), IndexError> {
    if dim == 0 {
        return Err(IndexError::InvalidDimension);
    }
    if rows == 0 {
        return Err(IndexError::EmptyDataset);
    }
    if dataset.len() != rows * dim {
        return Err(IndexError::MalformedDataset {
            len: dataset.len(),
            rows,
            dim,
        });
    }
    Ok(())
}

pub(crate) fn validate_queries(
    dim: Option<usize>,
    queries: &[f32],
    num_queries: usize,
    k: usize,
) -> Result<usize, IndexError> {
    let dim = dim.ok_or(IndexError::NotBuilt)?;
    if k == 0 {
        return Err(IndexError::InvalidNeighbourCount);
    }
    if queries.len() != num_queries * dim {
        let actual = if num_queries > 0 {
            queries.len() / num_queries
        } else {
            queries.len()
        };
        return Err(IndexError::DimensionMismatch {
            expected: dim,
            actual,
        });
    }
    Ok(dim)
}

/// Sorted result list holding at most `k` neighbours.
///
/// Ordered by distance, then index, so equal distances keep the smaller dataset index.
#[derive(Debug, Clone)]
pub(crate) struct BoundedResults {
    k: usize,
    items: Vec<Neighbour>,
}

impl BoundedResults {
    pub fn new(k: usize) -> BoundedResults {
        BoundedResults {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.k
    }

    /// Distance a candidate has to beat to enter the list.
    pub fn worst(&self) -> f32 {
        if self.is_full() {
            self.items.last().map_or(f32::INFINITY, |n| n.distance)
        } else {
            f32::INFINITY
        }
    }

    pub fn insert(&mut self, index: usize, distance: f32) {
        if self.is_full() {
            match self.items.last() {
                Some(last) if (distance, index) >= (last.distance, last.index) => return,
                _ => {}
            }
        }
        let pos = self
            .items
            .partition_point(|n| n.distance < distance || (n.distance == distance && n.index < index));
        self.items.insert(pos, Neighbour { index, distance });
        self.items.truncate(self.k);
    }

    pub fn into_vec(self) -> Vec<Neighbour> {
        self.items
    }
}
