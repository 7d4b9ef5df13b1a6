//! Qdrant-backed [`forge_core::vector_index::VectorIndex`].
//!
//! Every request routed through the orchestrator writes and queries a small,
//! fixed set of collections (code patterns, prior agent decisions, error
//! signatures, parsed requirements, past executions). This crate hosts those
//! collections on a remote Qdrant server instead of the in-process brute-force
//! index in `forge-core`, for deployments where the pattern cache and
//! confidence engine need to survive a process restart and scale past what
//! fits in memory.
//!
//! # Prerequisites
//!
//! A running Qdrant server, reachable over its gRPC port:
//!
//! ```bash
//! docker run -p 6333:6333 -p 6334:6334 qdrant/qdrant
//! ```
//!
//! # Example
//!
//! ```ignore
//! use forge_qdrant::QdrantVectorIndex;
//! use forge_core::vector_index::{Collection, Point, VectorIndex};
//!
//! # async fn example() -> forge_core::error::Result<()> {
//! let index = QdrantVectorIndex::new("http://localhost:6334").await?;
//! index
//!     .upsert(
//!         Collection::CodePatterns,
//!         Point { id: uuid::Uuid::new_v4(), vector: vec![0.0; 1536], payload: serde_json::json!({}) },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod index;

pub use error::QdrantError;
pub use index::QdrantVectorIndex;
