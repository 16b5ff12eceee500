use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("dimension mismatch: collection {collection} expects {expected}, got {actual}")]
    Dimension {
        collection: String,
        expected: usize,
        actual: usize,
    },
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
}

#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Equality conditions over point payloads. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub value: serde_json::Value,
}

impl VectorFilter {
    /// Filter matching points whose `field` equals `value`.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::default().and(field, value)
    }

    #[must_use]
    pub fn and(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn and_not(
        mut self,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.must_not.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Whether `payload` satisfies every `must` and no `must_not` condition.
    #[must_use]
    pub fn matches(&self, payload: &HashMap<String, serde_json::Value>) -> bool {
        let all_must = self
            .must
            .iter()
            .all(|c| payload.get(&c.field).is_some_and(|v| c.value_matches(v)));
        let any_must_not = self
            .must_not
            .iter()
            .any(|c| payload.get(&c.field).is_some_and(|v| c.value_matches(v)));
        all_must && !any_must_not
    }
}

impl FieldCondition {
    fn value_matches(&self, actual: &serde_json::Value) -> bool {
        match (&self.value, actual) {
            // 3 and 3.0 compare equal regardless of how the payload was built
            (serde_json::Value::Number(a), serde_json::Value::Number(b)) => a.as_f64() == b.as_f64(),
            (expected, actual) => expected == actual,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub vector: Option<Vec<f32>>,
    pub payload: HashMap<String, serde_json::Value>,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence and similarity search for embedded chunks.
///
/// Upserting an existing id replaces the stored point.
pub trait VectorProvider: Send + Sync {
    fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn search_with_filter(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        self.search_with_filter(collection, vector, limit, None)
    }

    fn delete(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Remove every point matching `filter`, returning how many were removed.
    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>>;

    fn name(&self) -> &str;
}
