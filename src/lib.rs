//! # Recall
//!
//! A versioned document ingestion and retrieval engine.
//!
//! Recall ingests documents (PDF, DOCX, TXT), splits them into overlapping
//! chunks, embeds them into a vector space, and answers natural-language
//! queries by combining approximate nearest-neighbor search with
//! version-aware conflict resolution: re-uploading a file with changed
//! content promotes a new version and soft-deletes the old one, so newer
//! facts supersede older ones without losing history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌───────────┐
//! │  Upload  │──▶│ Version Resolver   │──▶│  SQLite   │
//! │ pdf/docx │   │ Chunk + Embed      │   │ docs/vecs │
//! │   /txt   │   │ (per-file lock)    │   └─────┬─────┘
//! └──────────┘   └───────────────────┘         │
//!                                        ┌─────▼─────┐
//!                    query ─────────────▶│   HNSW    │──▶ rerank ──▶ answer
//!                                        │ (active)  │
//!                                        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rcl init                         # create database
//! rcl ingest notes/handbook.pdf    # ingest a document
//! rcl search "vacation policy"     # semantic search
//! rcl ask "how many vacation days do we get?"
//! rcl check "salary data" "performance ratings"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`extract`] | PDF/DOCX/TXT text extraction |
//! | [`chunk`] | Overlapping text chunking with recency scoring |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | HNSW approximate nearest-neighbor index |
//! | [`version`] | Content-hash dedup and version promotion |
//! | [`ingest`] | End-to-end ingestion pipeline |
//! | [`task`] | Polled ingestion task lifecycle |
//! | [`search`] | ANN search over active chunks |
//! | [`rerank`] | Similarity + recency combined scoring |
//! | [`answer`] | Retrieval-augmented answer assembly |
//! | [`completion`] | LLM completion provider abstraction |
//! | [`completeness`] | Requirement coverage scoring |
//! | [`engine`] | High-level engine facade |

pub mod answer;
pub mod chunk;
pub mod completeness;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod search;
pub mod task;
pub mod version;
