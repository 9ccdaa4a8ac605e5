//! # Recall
//!
//! A personal-knowledge retrieval engine for AI assistants.
//!
//! Recall ingests user-uploaded documents (PDF, DOCX, plain text, Markdown,
//! EPUB), splits them into overlapping passages, embeds each passage
//! through a configurable provider, and persists everything per-user in
//! SQLite. Natural-language queries are answered by cosine-ranking stored
//! passages against the query embedding with an adaptive relevance
//! threshold, and the result bundle is explainable: provenance, relevance
//! labels, and query-refinement suggestions when nothing matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│  Extract → Sanitize →     │──▶│  SQLite  │
//! │ pdf/docx │   │  Chunk → Embed (bounded)  │   │ per-user │
//! │ txt/md/  │   └───────────────────────────┘   └────┬─────┘
//! │   epub   │                                        │
//! └──────────┘              ┌─────────────────────────┤
//!                           ▼                         ▼
//!                     ┌──────────┐             ┌──────────┐
//!                     │   CLI    │             │   HTTP   │
//!                     │ (recall) │             │  (tools) │
//!                     └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init                                  # create database
//! recall ingest notes.pdf --user alice         # ingest a document
//! recall search "deployment steps" --user alice
//! recall documents --user alice                # list uploads
//! recall serve                                 # start the tool server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`sanitize`] | Control-byte stripping and whitespace normalization |
//! | [`extract`] | Per-format text extraction |
//! | [`chunk`] | Overlapping passage splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Per-user document and chunk persistence |
//! | [`rank`] | Cosine scoring and adaptive thresholds |
//! | [`ingest`] | Upload pipeline orchestration |
//! | [`search`] | Retrieval orchestration |
//! | [`server`] | HTTP tool server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rank;
pub mod sanitize;
pub mod search;
pub mod server;
pub mod store;
