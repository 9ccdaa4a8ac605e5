//! Overlapping-window text chunker.
//!
//! Splits sanitized document text into passages sized for embedding and
//! retrieval. Consecutive passages share a bounded overlap so that context
//! straddling a window edge is never lost to either side. Window ends
//! prefer paragraph breaks, then sentence ends, then word boundaries near
//! the budget.
//!
//! Guarantees: every character of the input appears in at least one
//! passage, indices are contiguous from 0, and the output is deterministic
//! for identical input and configuration.

use crate::config::ChunkingConfig;

/// One passage produced by the chunker, before ids and embeddings are
/// attached by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// Zero-based position within the document.
    pub index: i64,
    pub text: String,
    /// Character offset of the passage start in the source text. Carried
    /// into chunk metadata as a section hint.
    pub char_start: usize,
}

/// Split text into overlapping passages. Input shorter than one window
/// yields exactly one passage.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<Passage> {
    let chunk_size = config.chunk_size.max(1);
    let overlap = config.overlap.min(chunk_size.saturating_sub(1));

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    if total <= chunk_size {
        return vec![Passage {
            index: 0,
            text: text.to_string(),
            char_start: 0,
        }];
    }

    let mut passages = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    while start < total {
        let hard_end = (start + chunk_size).min(total);
        let end = if hard_end < total {
            pick_cut(&chars, start, hard_end)
        } else {
            hard_end
        };

        passages.push(Passage {
            index,
            text: chars[start..end].iter().collect(),
            char_start: start,
        });
        index += 1;

        if end == total {
            break;
        }
        // Step back by the overlap, but always move forward.
        start = end.saturating_sub(overlap).max(start + 1);
    }

    passages
}

/// How far back from the window end we look for a natural boundary.
const BOUNDARY_LOOKBACK_DIVISOR: usize = 2;

/// Choose where to end a window: the last paragraph break in the lookback
/// region, else the last sentence end, else the last whitespace, else the
/// hard budget. The cut always lands strictly past the window's midpoint
/// so progress is never pathological.
fn pick_cut(chars: &[char], start: usize, hard_end: usize) -> usize {
    let window = hard_end - start;
    let lookback = (window / BOUNDARY_LOOKBACK_DIVISOR).max(1);
    let floor = hard_end - lookback;

    // Paragraph break: "\n\n" — cut after the pair.
    for i in (floor.max(start + 1)..hard_end).rev() {
        if chars[i] == '\n' && chars[i - 1] == '\n' {
            return i + 1;
        }
    }

    // Sentence end followed by whitespace — cut after the whitespace.
    for i in (floor.max(start + 1)..hard_end).rev() {
        if matches!(chars[i - 1], '.' | '!' | '?') && chars[i].is_whitespace() {
            return i + 1;
        }
    }

    // Any whitespace — cut after it so words stay whole.
    for i in (floor..hard_end).rev() {
        if chars[i].is_whitespace() {
            return i + 1;
        }
    }

    hard_end
}
