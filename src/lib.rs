//! # hybrid-rag
//!
//! Retrieval-augmented answering over a document corpus: parallel lexical
//! and vector retrieval, fusion, an LLM answer streamed back to the caller,
//! and validation of every link the model produces.
//!
//! ## Architecture
//!
//! One request runs through a single pipeline, parameterized by prompt
//! strategy:
//!
//! ```text
//!                          ┌─────────────┐
//!                          │ User Query  │ (+ history, attachment)
//!                          └──────┬──────┘
//!                                 │ budget: query + history ≤ 1000 chars
//!                                 ▼
//!                    ┌────────────────────────┐
//!                    │    Query Expansion     │  LLM, retried, 60s/attempt
//!                    │  5 vector + 20 lexical │  (skipped for free_text)
//!                    └───────────┬────────────┘
//!                  ┌─────────────┴─────────────┐
//!                  ▼                           ▼
//!         ┌─────────────────┐        ┌──────────────────┐
//!         │  Vector family  │        │  Lexical family  │
//!         │  cosine / embed │        │ bm25, tfidf, ... │
//!         │   3 per query   │        │ tantivy fulltext │
//!         └────────┬────────┘        └────────┬─────────┘
//!                  │ merge by id, cap 15      │ merge by id, cap 30
//!                  └─────────────┬────────────┘
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │  Fusion: dedup, hybrid    │
//!                  │  tag, sort desc, cap 45   │
//!                  └─────────────┬─────────────┘
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │  Synthesis (≤2500 chars   │  structured: JSON pages
//!                  │  per document), retried   │  free_text: streamed prose
//!                  └─────────────┬─────────────┘
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │  Validation               │  identifiers: Jaro-Winkler ≥ 0.9
//!                  │  fuzzy identifier repair  │  links: Levenshtein ≥ 0.6
//!                  └─────────────┬─────────────┘
//!                                ▼
//!                  ┌───────────────────────────┐
//!                  │  progress* partial* then  │
//!                  │  exactly one done / error │
//!                  └───────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server, pipeline, search and LLM
//! - [`models`] - Shared data types: documents, query sets, results, request/response types
//! - [`llm`] - Provider trait and HTTP client, expansion, synthesis prompts, retry loop
//! - [`search`] - Search backends (substring, BM25, TF-IDF, learned, tantivy, vector) and fusion
//! - [`validation`] - JSON extraction, fuzzy identifier correction, free-text link repair
//! - [`pipeline`] - The staged request pipeline and its event stream
//! - [`api`] - Axum handlers for chat (SSE), search and health
//! - [`state`] - Shared application state wiring collaborators together

pub mod api;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod state;
pub mod validation;
