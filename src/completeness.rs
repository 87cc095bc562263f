//! Requirement coverage checking.
//!
//! Given a list of requirement phrases, each is searched against the active
//! corpus; a requirement counts as covered when its best combined score
//! clears the coverage threshold. The report names the best source for each
//! requirement so gaps are actionable.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::EngineError;
use crate::index::VectorIndex;
use crate::models::{CompletenessReport, RequirementCoverage};
use crate::search::search_chunks;

/// Results examined per requirement. Only the best one decides coverage.
const PER_REQUIREMENT_TOP_K: usize = 3;

pub async fn check_completeness(
    pool: &SqlitePool,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    retrieval: &RetrievalConfig,
    requirements: &[String],
) -> Result<CompletenessReport> {
    let requirements: Vec<&String> = requirements
        .iter()
        .filter(|r| !r.trim().is_empty())
        .collect();
    if requirements.is_empty() {
        return Err(EngineError::Validation(
            "no requirements to check".to_string(),
        )
        .into());
    }

    let mut coverage = Vec::with_capacity(requirements.len());
    for requirement in &requirements {
        let results = search_chunks(
            pool,
            index,
            embedder,
            retrieval,
            requirement,
            PER_REQUIREMENT_TOP_K,
        )
        .await?;

        let best = results.first();
        let score = best.map(|r| r.score).unwrap_or(0.0);
        coverage.push(RequirementCoverage {
            requirement: requirement.to_string(),
            covered: score > retrieval.coverage_threshold,
            score,
            best_source: best.map(|r| r.filename.clone()),
        });
    }

    let covered_count = coverage.iter().filter(|c| c.covered).count();
    let total = coverage.len();
    Ok(CompletenessReport {
        requirements: coverage,
        covered_count,
        total,
        percentage: covered_count as f64 / total as f64 * 100.0,
    })
}
