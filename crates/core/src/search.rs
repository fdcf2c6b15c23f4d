use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

pub fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<usize, SearchError> {
        self.check(vector)?;
        self.data.extend_from_slice(vector);
        Ok(self.len() - 1)
    }

    /// Nearest first; equal distances keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<Neighbor>, SearchError> {
        self.check(query)?;
        if top_k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(index, vector)| Neighbor {
                index,
                distance: squared_l2(query, vector),
            })
            .collect();

        let by_distance_then_index = |left: &Neighbor, right: &Neighbor| -> Ordering {
            left.distance
                .total_cmp(&right.distance)
                .then(left.index.cmp(&right.index))
        };

        if top_k < scored.len() {
            scored.select_nth_unstable_by(top_k - 1, by_distance_then_index);
            scored.truncate(top_k);
        }
        scored.sort_by(by_distance_then_index);
        Ok(scored)
    }

    fn check(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimensions || self.dimensions == 0 {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Top-k nearest candidates to `query`; at most `min(top_k, candidates.len())` results.
pub fn search<V: AsRef<[f32]>>(
    query: &[f32],
    candidates: &[V],
    top_k: usize,
) -> Result<Vec<Neighbor>, SearchError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut index = FlatL2Index::new(query.len());
    for candidate in candidates {
        index.add(candidate.as_ref())?;
    }
    index.search(query, top_k)
}
