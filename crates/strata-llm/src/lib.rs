//! Embedding and single-turn generation contracts.
//!
//! The indexing engine never talks to a model directly: it consumes an
//! [`Embedder`] to turn chunk text into vectors and an [`Llm`] for query
//! rewriting and reranking. Backends live outside this crate.

pub mod error;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;

pub use error::{LlmError, Result};
pub use provider::{BoxFuture, Embedder, GenerateOptions, Llm};
