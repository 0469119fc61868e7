//! Brute-force vector similarity search.
//!
//! Candidate sets are scoped to one user, so a full linear scan is all we
//! need: no index structure, no approximate search.

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns `Some(0.0)` if either vector has zero norm, and `None` when the
/// lengths differ or the vectors are empty, since those cannot be compared.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return Some(0.0);
    }

    Some((dot / denom) as f32)
}

/// One ranked candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredIndex {
    /// Position in the candidate list passed to [`search_similar`].
    pub index: usize,
    pub score: f32,
}

/// Rank `candidates` against `query`, best first, keeping at most `top_k`.
///
/// Candidates whose length differs from the query are skipped. Ties keep
/// their original candidate order.
pub fn search_similar<V>(query: &[f32], candidates: &[V], top_k: usize) -> Vec<ScoredIndex>
where
    V: AsRef<[f32]>,
{
    let mut scored: Vec<ScoredIndex> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, candidate)| {
            cosine_similarity(query, candidate.as_ref()).map(|score| ScoredIndex { index, score })
        })
        .collect();

    // sort_by is stable, so equal scores stay in candidate order
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k.min(candidates.len()));
    scored
}
