//! Similarity scoring and ranking of stored passages against a query
//! vector.
//!
//! Scoring is plain cosine similarity computed in-process over the user's
//! candidate set — there is no ANN index here, and none is needed at
//! personal-library scale. Candidates with a missing, zero-magnitude, or
//! dimensionally-mismatched vector are excluded from scoring entirely
//! rather than scored as zero.

use crate::models::{ChunkWithProvenance, SearchResult};

/// Result-count bounds for a single query.
pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 10;

/// Dynamic-threshold tuning: short queries trade precision for recall,
/// long queries the reverse.
const SHORT_QUERY_TOKENS: usize = 3;
const LONG_QUERY_TOKENS: usize = 7;
const SHORT_QUERY_DROP: f32 = 0.1;
const LONG_QUERY_RAISE: f32 = 0.05;
const THRESHOLD_FLOOR: f32 = 0.3;
const THRESHOLD_CEILING: f32 = 0.5;

/// Relevance labels, one per configured band plus a catch-all below the
/// last band.
const LABELS: [&str; 5] = [
    "Highly Relevant",
    "Very Relevant",
    "Relevant",
    "Somewhat Relevant",
    "Low Relevance",
];

/// Compute cosine similarity between two vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors, vectors of
/// different lengths, or zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    similarity_checked(a, b).unwrap_or(0.0)
}

/// Cosine similarity, or `None` when the pair cannot be meaningfully
/// scored (length mismatch, empty, or zero magnitude). The ranker uses
/// this to exclude structurally invalid candidates instead of letting
/// them compete with a score of zero.
fn similarity_checked(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return None;
    }

    Some(dot / denom)
}

/// Clamp a requested result count to `[1, 10]`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_LIMIT, MAX_LIMIT)
}

/// Clamp a requested similarity threshold to `[0.0, 1.0]`.
pub fn clamp_similarity(min_similarity: f32) -> f32 {
    min_similarity.clamp(0.0, 1.0)
}

/// Adjust the similarity threshold for query length.
///
/// Fewer than 3 whitespace tokens lowers the threshold by 0.1 (floor 0.3)
/// to favor recall on short, ambiguous queries; more than 7 raises it by
/// 0.05 (ceiling 0.5) to favor precision on long, specific ones. Queries
/// of 3–7 tokens are left unchanged.
pub fn adaptive_threshold(query: &str, base: f32) -> f32 {
    let tokens = query.split_whitespace().count();
    if tokens < SHORT_QUERY_TOKENS {
        (base - SHORT_QUERY_DROP).max(THRESHOLD_FLOOR)
    } else if tokens > LONG_QUERY_TOKENS {
        (base + LONG_QUERY_RAISE).min(THRESHOLD_CEILING)
    } else {
        base
    }
}

/// Map a similarity score onto a human-readable label using the configured
/// descending bands.
pub fn relevance_label(score: f32, bands: &[f32]) -> &'static str {
    for (i, band) in bands.iter().enumerate() {
        if score >= *band {
            return LABELS[i.min(LABELS.len() - 2)];
        }
    }
    LABELS[LABELS.len() - 1]
}

/// Score candidates against the query vector, drop those below
/// `min_similarity`, and return at most `limit` results ordered by
/// descending score. Ties break on (document id, chunk index) so the
/// ordering is deterministic. Candidates without a scorable vector are
/// excluded.
pub fn rank(
    query: &[f32],
    candidates: &[ChunkWithProvenance],
    min_similarity: f32,
    limit: usize,
    bands: &[f32],
) -> Vec<SearchResult> {
    let min_similarity = clamp_similarity(min_similarity);
    let limit = clamp_limit(limit);

    let mut scored: Vec<(f32, &ChunkWithProvenance)> = candidates
        .iter()
        .filter_map(|candidate| {
            let embedding = candidate.chunk.embedding.as_deref()?;
            let score = similarity_checked(query, embedding)?;
            (score >= min_similarity).then_some((score, candidate))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.chunk.document_id.cmp(&b.1.chunk.document_id))
            .then_with(|| a.1.chunk.chunk_index.cmp(&b.1.chunk.chunk_index))
    });
    scored.truncate(limit);

    scored
        .into_iter()
        .map(|(score, candidate)| SearchResult {
            content: candidate.chunk.text.clone(),
            similarity: score,
            relevance: relevance_label(score, bands).to_string(),
            document_id: candidate.chunk.document_id.clone(),
            document_title: candidate.document_title.clone(),
            chunk_index: candidate.chunk.chunk_index,
        })
        .collect()
}
