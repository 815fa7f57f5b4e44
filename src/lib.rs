//! # Video Harness
//!
//! Turns a video (a remote URL or a local file) into time-aligned chunks of
//! transcript and visual captions, embeds them, and answers similarity
//! queries within one video with an adaptive cutoff that returns fewer hits
//! when relevance drops off.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌─────────┐   ┌──────────────┐
//! │  Source  │──▶│ audio + frames    │──▶│  Align  │──▶│ Vector store │
//! │ URL/file │   │ transcript/capts  │   │ chunks  │   │ local/Qdrant │
//! └──────────┘   └───────────────────┘   └─────────┘   └──────┬───────┘
//!                                                             │
//!                                   ┌─────────────────────────┤
//!                                   ▼                         ▼
//!                              ┌──────────┐             ┌──────────┐
//!                              │   CLI    │             │   HTTP   │
//!                              │   (vh)   │             │  (axum)  │
//!                              └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vh ingest --local ./talk.mp4 --fps 0.5
//! vh search 3f9a1c0b2e "where is the whiteboard diagram"
//! vh ask 3f9a1c0b2e "what does the speaker conclude?"
//! vh serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`ingest`] | Staged, cancellable ingestion orchestrator |
//! | [`media`] | Download and decode (yt-dlp, ffmpeg) |
//! | [`transcribe`] | Speech-to-text client |
//! | [`caption`] | Frame captioning |
//! | [`chunk`] | Transcript/caption alignment |
//! | [`embedding`] | Embedding providers and gateway |
//! | [`store`] | Local flat index and Qdrant backends |
//! | [`search`] | Retrieval with rerank and adaptive cutoff |
//! | [`keyword_index`] | Per-video SQLite FTS5 index |
//! | [`rag`] | Answer synthesis with timestamp citations |
//! | [`server`] | HTTP API |

pub mod cancel;
pub mod caption;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod get;
mod http;
pub mod ingest;
pub mod keyword_index;
pub mod layout;
pub mod media;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod rag;
pub mod rerank;
pub mod search;
pub mod server;
pub mod sources;
pub mod store;
pub mod transcribe;
