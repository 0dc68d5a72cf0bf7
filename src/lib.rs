//! repolens: a local code-intelligence engine.
//!
//! Detects what changed in a working tree via a Merkle snapshot, chunks
//! source structurally (AST-aware where supported, sliding-window
//! fallback otherwise), maintains a content-addressed embedding cache, and
//! answers lexical, symbolic, semantic, and hybrid-fused queries over a
//! line-delimited JSON protocol.
//!
//! ## Layout
//!
//! | Module | Responsibility |
//! |--------|-----------------|
//! | [`merkle`] | Hash-tree change detection between indexing runs |
//! | [`chunking`] | Structural + sliding-window source chunking |
//! | [`cache`] | Content-addressed embedding cache |
//! | [`location`] | Where code is, independent of its embedding |
//! | [`catalog`] | Per-repo active model and file-state bookkeeping |
//! | [`vector`] | Exact-scan and ANN nearest-neighbor search |
//! | [`pipeline`] | Dedup → cache lookup → embed → upsert |
//! | [`indexing`] | The indexer facade and its advisory lock |
//! | [`search`] | Lexical/symbolic/semantic adapters and rank fusion |
//! | [`reranker`] | Optional cross-encoder rerank adapters |
//! | [`service`] | The six tool-protocol operations |
//! | [`storage`] | Embedded (SQLite) and server (Postgres) backends |

pub mod cache;
pub mod catalog;
pub mod chunking;
pub mod config;
pub mod embedder;
pub mod error;
pub mod indexing;
pub mod location;
pub mod merkle;
pub mod pipeline;
pub mod reranker;
pub mod search;
pub mod service;
pub mod storage;
pub mod traits;
pub mod types;
pub mod vector;

pub use config::RepolensConfig;
pub use error::Result;
pub use error::RepolensError;
pub use indexing::ChangeType;
pub use indexing::IndexStats;
pub use indexing::Indexer;
pub use pipeline::EmbeddingPipeline;
pub use pipeline::PipelineConfig;
pub use service::RepolensService;
pub use storage::Store;
