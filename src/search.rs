//! # Similarity search
//!
//! Brute-force cosine ranking over a [`VectorStore`].
//!
//! Every stored vector is scored against the query, so a query costs
//! `O(corpus_size × dimension)`. That is fine for the small-to-moderate corpora
//! this crate targets; there is no index to build or keep fresh.
//!
//! Scores come from a streaming [`VectorStore::scan`] feeding a [`TopK`]
//! accumulator that never holds more than `k` candidates.
//!
//! ## Ranking rules
//! - Both vectors are L2-normalized with [`NORM_EPSILON`] added to the norm, so
//!   the zero vector scores `0` against everything instead of dividing by zero.
//! - Results are ordered by non-increasing score. Equal scores keep store order.
//! - An empty store yields an empty result. `k` larger than the corpus yields the
//!   whole corpus, ranked.
//! - A stored vector whose length differs from the query's aborts the search with
//!   [`CopilotError::DimensionMismatch`].

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::error::{CopilotError, Result};
use crate::models::EmbeddingRecord;
use crate::vector_store::VectorStore;

/// Added to every L2 norm before dividing.
pub const NORM_EPSILON: f32 = 1e-9;

/// A stored record and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub score: f32,
    pub record: EmbeddingRecord,
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt() as f32
}

/// Scale `vector` to unit length (`v / (|v| + ε)`).
pub fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let denom = l2_norm(vector) + NORM_EPSILON;
    vector.iter().map(|v| v / denom).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum::<f64>() as f32
}

/// Cosine similarity of two equal-length vectors, in `[-1, 1]`.
///
/// # Errors
/// [`CopilotError::DimensionMismatch`] if the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(CopilotError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let denom = (l2_norm(a) + NORM_EPSILON) * (l2_norm(b) + NORM_EPSILON);
    Ok(dot(a, b) / denom)
}

/// Score one stored vector against an already normalized query.
fn score_against(unit_query: &[f32], stored: &[f32]) -> Result<f32> {
    if stored.len() != unit_query.len() {
        return Err(CopilotError::DimensionMismatch {
            expected: unit_query.len(),
            actual: stored.len(),
        });
    }
    Ok(dot(unit_query, stored) / (l2_norm(stored) + NORM_EPSILON))
}

struct Candidate {
    score: f32,
    /// Position in scan order; lower wins a tie.
    seq: usize,
    record: EmbeddingRecord,
}

impl Ord for Candidate {
    /// `Greater` means "ranks ahead".
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Fixed-capacity accumulator keeping the `k` best candidates seen so far.
///
/// The heap's top is the weakest kept candidate, so each offer costs
/// `O(log k)` and memory stays at `k` records regardless of corpus size.
pub struct TopK {
    k: usize,
    seen: usize,
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            seen: 0,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)),
        }
    }

    /// Offer the next record in scan order.
    ///
    /// A NaN score ranks below every real score and is reported as
    /// `f32::NEG_INFINITY`.
    pub fn offer(&mut self, score: f32, record: EmbeddingRecord) {
        let score = if score.is_nan() { f32::NEG_INFINITY } else { score };
        let candidate = Candidate {
            score,
            seq: self.seen,
            record,
        };
        self.seen += 1;

        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return;
        }
        if let Some(Reverse(weakest)) = self.heap.peek() {
            if candidate > *weakest {
                self.heap.pop();
                self.heap.push(Reverse(candidate));
            }
        }
    }

    /// Number of records offered so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Kept candidates, best first.
    pub fn into_sorted(self) -> Vec<ScoredRecord> {
        // Ascending in `Reverse` order is descending in rank order.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| ScoredRecord {
                score: c.score,
                record: c.record,
            })
            .collect()
    }
}

/// Return the `k` stored records most similar to `query`, best first.
///
/// `k == 0` returns an empty result without touching the store.
pub fn search(store: &VectorStore, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let unit_query = l2_normalize(query);
    let mut top = TopK::new(k);

    for record in store.scan() {
        let record = record?;
        let score = score_against(&unit_query, &record.vector)?;
        top.offer(score, record);
    }

    debug!(corpus = store.corpus(), scanned = top.seen(), k, "Similarity search done");
    Ok(top.into_sorted())
}

/// Same result as [`search`], scoring each scanned page on the rayon pool.
pub fn search_parallel(store: &VectorStore, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let unit_query = l2_normalize(query);
    let mut top = TopK::new(k);
    let mut scan = store.scan();

    while let Some(page) = scan.next_page() {
        let page = page?;
        let scores = page
            .par_iter()
            .map(|record| score_against(&unit_query, &record.vector))
            .collect::<Result<Vec<f32>>>()?;
        for (score, record) in scores.into_iter().zip(page) {
            top.offer(score, record);
        }
    }

    debug!(corpus = store.corpus(), scanned = top.seen(), k, "Parallel similarity search done");
    Ok(top.into_sorted())
}
