//! Grounded question answering.
//!
//! Retrieves relevant chunks, assembles a labeled context block under the
//! configured budget, and asks the completion provider for an answer that
//! cites its sources. When nothing relevant is found the completion
//! provider is never called.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::completion::CompletionProvider;
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::{Answer, SearchResultItem, SourceRef};
use crate::search::search_chunks;

const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant information in the knowledge base to answer this question.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using only the provided context. Cite the sources you used by their labels. \
If the context does not contain the answer, say so plainly.";

/// Answer a question from the stored documents.
pub async fn answer_question(
    pool: &SqlitePool,
    index: &VectorIndex,
    embedder: &dyn EmbeddingProvider,
    completion: &dyn CompletionProvider,
    retrieval: &RetrievalConfig,
    question: &str,
) -> Result<Answer> {
    let results = search_chunks(pool, index, embedder, retrieval, question, retrieval.top_k).await?;

    let relevant: Vec<SearchResultItem> = results
        .into_iter()
        .filter(|r| r.score >= retrieval.relevance_threshold)
        .collect();

    if relevant.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    let (context, used) = build_context(&relevant, retrieval.context_budget_chars);
    if used.is_empty() {
        return Ok(Answer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    let prompt = format!(
        "Context:\n{}\n\nQuestion: {}\n\nAnswer based only on the context above.",
        context, question
    );

    let text = completion.complete(SYSTEM_PROMPT, &prompt).await?;

    let sources = used
        .into_iter()
        .map(|i| {
            let r = &relevant[i];
            SourceRef {
                document_id: r.document_id.clone(),
                filename: r.filename.clone(),
                chunk_id: r.chunk_id,
            }
        })
        .collect();

    Ok(Answer {
        answer: text,
        sources,
    })
}

/// Assemble labeled source blocks in rank order under a character budget.
///
/// Returns the context string and the indices of the results included.
/// Lower-ranked results are dropped first; a result that would overflow the
/// budget stops assembly so source numbering stays contiguous.
fn build_context(results: &[SearchResultItem], budget_chars: usize) -> (String, Vec<usize>) {
    let mut context = String::new();
    let mut used = Vec::new();

    for (i, result) in results.iter().enumerate() {
        let block = format!("[Source {} - {}]:\n{}\n\n", i + 1, result.filename, result.text);
        if !context.is_empty() && context.len() + block.len() > budget_chars {
            break;
        }
        // The top result is always included, even if it alone exceeds the
        // budget, so the model has something to work with.
        context.push_str(&block);
        used.push(i);
        if context.len() > budget_chars {
            break;
        }
    }

    (context, used)
}
