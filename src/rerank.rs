//! Recency-aware reranking of ANN candidates.
//!
//! Candidates arrive with a cosine distance from the index and two freshness
//! signals: the chunk's stored textual recency score and the owning
//! document's `last_modified` timestamp. The combined score blends
//! similarity with the textual signal only — it is a function of the
//! candidate alone, never of the rest of the set, so adding documents to
//! the corpus cannot lower an existing chunk's score. Document age decides
//! the order among equal scores, newest first.

/// One ANN hit plus the freshness signals needed to rerank it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: i64,
    /// Cosine distance in [0, 2].
    pub distance: f32,
    /// Textual recency score in [0, 1], stored at chunk time.
    pub text_recency: f64,
    /// Unix seconds of the owning document's last modification.
    pub last_modified: i64,
}

#[derive(Debug, Clone)]
pub struct Reranked {
    pub chunk_id: i64,
    pub similarity: f64,
    pub recency: f64,
    pub score: f64,
}

/// Score candidates and sort them for presentation.
///
/// Similarity maps distance into [0, 1]; recency is the chunk's textual
/// score. Equal combined scores order by newer `last_modified` first, then
/// by lower chunk id, keeping results deterministic.
pub fn rerank(candidates: &[Candidate], similarity_weight: f64, recency_weight: f64) -> Vec<Reranked> {
    let mut scored: Vec<(i64, Reranked)> = candidates
        .iter()
        .map(|c| {
            let similarity = (1.0 - f64::from(c.distance) / 2.0).clamp(0.0, 1.0);
            let recency = c.text_recency;
            (
                c.last_modified,
                Reranked {
                    chunk_id: c.chunk_id,
                    similarity,
                    recency,
                    score: similarity_weight * similarity + recency_weight * recency,
                },
            )
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.score
            .total_cmp(&a.1.score)
            .then(b.0.cmp(&a.0))
            .then(a.1.chunk_id.cmp(&b.1.chunk_id))
    });
    scored.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(chunk_id: i64, distance: f32, text_recency: f64, last_modified: i64) -> Candidate {
        Candidate {
            chunk_id,
            distance,
            text_recency,
            last_modified,
        }
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(rerank(&[], 0.7, 0.3).is_empty());
    }

    #[test]
    fn closer_candidate_wins_with_equal_recency() {
        let ranked = rerank(
            &[candidate(1, 0.8, 0.5, 100), candidate(2, 0.2, 0.5, 100)],
            0.7,
            0.3,
        );
        assert_eq!(ranked[0].chunk_id, 2);
        assert!(ranked[0].similarity > ranked[1].similarity);
    }

    #[test]
    fn higher_text_recency_wins_under_equal_similarity() {
        let ranked = rerank(
            &[
                candidate(1, 0.4, 0.2, 1_000),
                candidate(2, 0.4, 0.9, 1_000),
            ],
            0.7,
            0.3,
        );
        assert_eq!(ranked[0].chunk_id, 2);
        assert!(ranked[0].recency > ranked[1].recency);
    }

    #[test]
    fn recency_weight_can_outrank_slightly_better_similarity() {
        // Chunk 2 is marginally farther but reads much more current.
        let ranked = rerank(
            &[
                candidate(1, 0.40, 0.1, 1_000),
                candidate(2, 0.42, 0.9, 1_000),
            ],
            0.7,
            0.3,
        );
        assert_eq!(ranked[0].chunk_id, 2);
    }

    #[test]
    fn equal_scores_order_by_newer_timestamp_first() {
        // Identical similarity and text recency; only last_modified differs.
        // The older candidate has the lower chunk id, so chunk-id ordering
        // alone would place it first.
        let ranked = rerank(
            &[
                candidate(1, 0.4, 0.5, 1_000),
                candidate(2, 0.4, 0.5, 2_000),
            ],
            0.7,
            0.3,
        );
        assert_eq!(ranked[0].chunk_id, 2);
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[test]
    fn full_ties_break_on_chunk_id() {
        let ranked = rerank(
            &[candidate(9, 0.4, 0.5, 100), candidate(3, 0.4, 0.5, 100)],
            0.7,
            0.3,
        );
        assert_eq!(ranked[0].chunk_id, 3);
        assert_eq!(ranked[1].chunk_id, 9);
    }

    #[test]
    fn scores_are_independent_of_other_candidates() {
        let a = candidate(1, 0.3, 0.6, 1_000);
        let alone = rerank(&[a.clone()], 0.7, 0.3);
        let crowded = rerank(
            &[a, candidate(2, 0.1, 0.9, 9_000), candidate(3, 0.9, 0.1, 10)],
            0.7,
            0.3,
        );
        let in_crowd = crowded.iter().find(|r| r.chunk_id == 1).unwrap();
        assert_eq!(alone[0].score, in_crowd.score);
        assert_eq!(alone[0].recency, in_crowd.recency);
        assert_eq!(alone[0].similarity, in_crowd.similarity);
    }

    #[test]
    fn similarity_clamped_to_unit_interval() {
        let ranked = rerank(&[candidate(1, 2.0, 0.0, 0)], 0.7, 0.3);
        assert!((0.0..=1.0).contains(&ranked[0].similarity));
        assert_eq!(ranked[0].similarity, 0.0);
    }
}
