use super::{BoundedResults, KnnResult, NeighborIndex, l2_squared, validate_dataset, validate_queries};
use crate::error::IndexError;

/// Exact brute-force search. Every query is compared against every row.
#[derive(Debug, Clone, Default)]
pub struct LinearIndex {
    data: Vec<f32>,
    rows: usize,
    dim: Option<usize>,
}

impl LinearIndex {
    pub fn new() -> LinearIndex {
        LinearIndex::default()
    }
}

impl NeighborIndex for LinearIndex {
    fn build(&mut self, dataset: &[f32], rows: usize, dim: usize) -> Result<(), IndexError> {
        validate_dataset(dataset, rows, dim)?;
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
            .map(|q| {
                let mut results = BoundedResults::new(k);
                for (i, row) in self.data.chunks_exact(dim).enumerate() {
                    let d = l2_squared(q, row);
                    if d < results.worst() {
                        results.insert(i, d);
                    }
                }
                results.into_vec()
            })
            .collect();
        Ok(KnnResult { neighbours })
    }
}
