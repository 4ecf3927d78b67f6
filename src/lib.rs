//! docvec - chunk, embed and search local documents with an exact vector
//! index.
//!
//! Documents are split into overlapping word windows, embedded through an
//! [`Embedder`], and stored across three stores that always move together:
//! the [`VectorIndex`], the chunk store and the document registry. The
//! [`IndexManager`] owns them and makes every ingest and delete
//! all-or-nothing, both in memory and on disk.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//!
//! use docvec::{HashEmbedder, IndexManager, IndexOptions};
//! use docvec::chunking::ChunkingConfig;
//!
//! let options = IndexOptions {
//!     chunking: ChunkingConfig::new(3, 1).unwrap(),
//!     dimension: 64,
//!     batch_size: 16,
//! };
//! let manager =
//!     IndexManager::in_memory(options, Arc::new(HashEmbedder::new(64)))
//!         .unwrap();
//!
//! let outcome = manager
//!     .ingest("alpha beta gamma delta epsilon", "greek.txt")
//!     .unwrap();
//! assert_eq!(outcome.chunk_count, 2);
//!
//! let hits = manager.search("gamma delta epsilon", 1).unwrap();
//! assert_eq!(hits[0].text, "gamma delta epsilon");
//! ```

pub mod chunk_store;
pub mod chunking;
pub mod config_db;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingestion;
pub mod manager;
pub mod ollama;
pub mod persist;
pub mod registry;
pub mod search;
pub mod settings;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use manager::{IndexManager, IndexOptions, IndexStats, IngestOutcome};
pub use persist::StateFiles;
pub use search::SearchHit;
pub use settings::Settings;
pub use vector_index::VectorIndex;
