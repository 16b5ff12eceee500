//! Vector storage contract used by the indexing engine.
//!
//! [`VectorProvider`] is the narrow, object-safe surface the engine talks to;
//! [`InMemoryVectorStore`] implements it with brute-force cosine similarity
//! for tests and single-process deployments.

pub mod in_memory_store;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use vector_store::{
    BoxFuture, FieldCondition, ScoredVectorPoint, VectorFilter, VectorPoint, VectorProvider,
    VectorStoreError,
};
