//! Overlapping sliding-window text chunker.
//!
//! Splits extracted text into chunks of at most `chunk_chars` bytes, where
//! consecutive chunks share an `overlap_chars` region to preserve context
//! across boundaries. Splits prefer newline/space boundaries and always fall
//! on UTF-8 character boundaries. Chunking is deterministic for identical
//! input and parameters.
//!
//! Each chunk also receives a recency score in `[0, 1]` derived from
//! temporal indicator words ("currently", "deprecated", ...), used later to
//! bias ranking toward current information.

use serde_json::json;

use crate::error::EngineError;

/// One chunk produced by [`chunk_document`], with contiguous indices from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub index: i64,
    pub text: String,
    pub recency_score: f64,
    pub metadata_json: String,
}

/// Words signalling current information, with the recency score they imply.
const CURRENT_INDICATORS: &[(&str, f64)] = &[
    ("current", 0.9),
    ("currently", 0.9),
    ("latest", 0.9),
    ("now", 0.85),
    ("today", 0.85),
    ("updated", 0.85),
    ("present", 0.8),
    ("recent", 0.8),
    ("recently", 0.8),
    ("effective", 0.7),
];

/// Words signalling superseded information.
const HISTORICAL_INDICATORS: &[(&str, f64)] = &[
    ("previous", 0.3),
    ("previously", 0.3),
    ("past", 0.3),
    ("former", 0.25),
    ("formerly", 0.25),
    ("old", 0.2),
    ("archived", 0.1),
    ("deprecated", 0.1),
    ("expired", 0.1),
    ("obsolete", 0.1),
];

/// Split text into overlapping chunks with derived metadata.
///
/// Fails with [`EngineError::EmptyInput`] when the text is blank after
/// trimming. Every chunk is at most `chunk_chars` bytes except that the
/// final remainder may be shorter; indices are contiguous starting at 0.
pub fn chunk_document(
    text: &str,
    chunk_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<ChunkPiece>, EngineError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyInput(
            "document text is blank after extraction".to_string(),
        ));
    }
    debug_assert!(overlap_chars < chunk_chars);

    let len = trimmed.len();
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut index = 0i64;

    loop {
        let mut end = (start + chunk_chars).min(len);
        while end < len && !trimmed.is_char_boundary(end) {
            end -= 1;
        }

        // Prefer a newline or space split, as long as it keeps forward
        // progress past the overlap region.
        if end < len {
            let window = &trimmed[start..end];
            if let Some(pos) = window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .map(|p| p + 1)
                .filter(|p| *p > overlap_chars)
            {
                end = start + pos;
            }
        }

        pieces.push(make_piece(index, &trimmed[start..end]));
        index += 1;

        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap_chars).max(start + 1);
        while !trimmed.is_char_boundary(next) {
            next += 1;
        }
        start = next;
    }

    Ok(pieces)
}

fn make_piece(index: i64, text: &str) -> ChunkPiece {
    let (recency_score, keywords) = recency_from_text(text);
    let metadata = json!({
        "chunk_index": index,
        "chunk_chars": text.len(),
        "recency_score": recency_score,
        "temporal_keywords": keywords,
    });

    ChunkPiece {
        index,
        text: text.to_string(),
        recency_score,
        metadata_json: metadata.to_string(),
    }
}

/// Score how "current" a chunk reads, based on temporal indicator words.
///
/// Starts neutral at 0.5. Current indicators raise the score to their
/// maximum; historical indicators lower it to their minimum, but only when
/// no current indicator is present (mixed chunks lean current).
pub fn recency_from_text(text: &str) -> (f64, Vec<String>) {
    let lowered = text.to_lowercase();
    let words: std::collections::HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut score = 0.5f64;
    let mut keywords = Vec::new();
    let mut is_current = false;

    for (word, s) in CURRENT_INDICATORS {
        if words.contains(word) {
            is_current = true;
            keywords.push(word.to_string());
            score = score.max(*s);
        }
    }
    for (word, s) in HISTORICAL_INDICATORS {
        if words.contains(word) {
            keywords.push(word.to_string());
            if !is_current {
                score = score.min(*s);
            }
        }
    }

    (score, keywords)
}
