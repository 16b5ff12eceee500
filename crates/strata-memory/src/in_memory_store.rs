use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, ScoredVectorPoint, VectorFilter, VectorPoint, VectorProvider, VectorStoreError,
};

struct StoredPoint {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    dimension: usize,
    points: HashMap<String, StoredPoint>,
}

/// Brute-force cosine-similarity store kept entirely in process memory.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
    include_vectors: bool,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            include_vectors: false,
        }
    }

    /// Return stored vectors alongside search hits.
    #[must_use]
    pub fn with_vectors(mut self) -> Self {
        self.include_vectors = true;
        self
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .field("include_vectors", &self.include_vectors)
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorProvider for InMemoryVectorStore {
    fn create_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(collection)
                .or_insert_with(|| InMemoryCollection {
                    dimension,
                    points: HashMap::new(),
                });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            if let Some(bad) = points.iter().find(|p| p.vector.len() != col.dimension) {
                return Err(VectorStoreError::Dimension {
                    collection,
                    expected: col.dimension,
                    actual: bad.vector.len(),
                });
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        vector: p.vector,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn search_with_filter(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;

            let empty_filter = VectorFilter::default();
            let f = filter.as_ref().unwrap_or(&empty_filter);

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| f.matches(&sp.payload))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    vector: self.include_vectors.then(|| sp.vector.clone()),
                    payload: sp.payload.clone(),
                })
                .collect();

            // ties broken by id so equal scores come back in a stable order
            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            scored.truncate(limit);
            Ok(scored)
        })
    }

    fn delete(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            for id in &ids {
                col.points.remove(id);
            }
            Ok(())
        })
    }

    fn delete_by_filter(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if filter.is_empty() {
                return Err(VectorStoreError::Delete(
                    "refusing to delete with an empty filter".into(),
                ));
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::CollectionNotFound(collection.clone()))?;
            let before = col.points.len();
            col.points.retain(|_, sp| !filter.matches(&sp.payload));
            let removed = before - col.points.len();
            tracing::debug!(collection = %collection, removed, "deleted points by filter");
            Ok(removed)
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            cols.get(&collection)
                .map(|c| c.points.len())
                .ok_or(VectorStoreError::CollectionNotFound(collection))
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn point(id: &str, vector: Vec<f32>, pairs: &[(&str, serde_json::Value)]) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_collection_and_exists() {
        let store = InMemoryVectorStore::new();
        assert!(!store.collection_exists("test").await.unwrap());
        store.create_collection("test", 3).await.unwrap();
        assert!(store.collection_exists("test").await.unwrap());
    }

    #[tokio::test]
    async fn create_collection_idempotent_keeps_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        store
            .upsert("test", vec![point("a", vec![1.0, 0.0, 0.0], &[])])
            .await
            .unwrap();
        store.create_collection("test", 3).await.unwrap();
        assert_eq!(store.count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_collection_removes() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        store.delete_collection("test").await.unwrap();
        assert!(!store.collection_exists("test").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_and_search() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], &[("name", serde_json::json!("alpha"))]),
                    point("b", vec![0.0, 1.0, 0.0], &[("name", serde_json::json!("beta"))]),
                ],
            )
            .await
            .unwrap();

        let results = store.search("test", vec![1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
        assert!(results[0].vector.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 2).await.unwrap();
        store
            .upsert("test", vec![point("a", vec![1.0, 0.0], &[("v", serde_json::json!(1))])])
            .await
            .unwrap();
        store
            .upsert("test", vec![point("a", vec![0.0, 1.0], &[("v", serde_json::json!(2))])])
            .await
            .unwrap();
        assert_eq!(store.count("test").await.unwrap(), 1);
        let hits = store.search("test", vec![0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].payload["v"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        let err = store
            .upsert("test", vec![point("a", vec![1.0], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Dimension { expected: 3, actual: 1, .. }));
    }

    #[tokio::test]
    async fn upsert_missing_collection_fails() {
        let store = InMemoryVectorStore::new();
        let err = store
            .upsert("nope", vec![point("a", vec![1.0], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn search_with_filter_limits_candidates() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], &[("role", serde_json::json!("user"))]),
                    point("b", vec![0.9, 0.1, 0.0], &[("role", serde_json::json!("assistant"))]),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search_with_filter(
                "test",
                vec![1.0, 0.0, 0.0],
                10,
                Some(VectorFilter::eq("role", "assistant")),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn delete_by_ids_removes_points() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 3).await.unwrap();
        store
            .upsert("test", vec![point("a", vec![1.0, 0.0, 0.0], &[])])
            .await
            .unwrap();
        store.delete("test", vec!["a".into()]).await.unwrap();
        assert!(store.search("test", vec![1.0, 0.0, 0.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_filter_removes_matching_only() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 2).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("d1:chunk:0", vec![1.0, 0.0], &[("document_id", serde_json::json!("d1"))]),
                    point("d1:chunk:1", vec![1.0, 0.0], &[("document_id", serde_json::json!("d1"))]),
                    point("d2:chunk:0", vec![1.0, 0.0], &[("document_id", serde_json::json!("d2"))]),
                ],
            )
            .await
            .unwrap();
        let removed = store
            .delete_by_filter("test", VectorFilter::eq("document_id", "d1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_by_empty_filter_is_rejected() {
        let store = InMemoryVectorStore::new();
        store.create_collection("test", 2).await.unwrap();
        assert!(store
            .delete_by_filter("test", VectorFilter::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn with_vectors_returns_stored_vector() {
        let store = InMemoryVectorStore::new().with_vectors();
        store.create_collection("test", 2).await.unwrap();
        store
            .upsert("test", vec![point("a", vec![0.5, 0.5], &[])])
            .await
            .unwrap();
        let hits = store.search("test", vec![1.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].vector.as_deref(), Some(&[0.5, 0.5][..]));
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b)).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_similarity_zero_vector() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn debug_format() {
        let store = InMemoryVectorStore::new();
        let dbg = format!("{store:?}");
        assert!(dbg.contains("InMemoryVectorStore"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn cosine_similarity_bounded(
            a in proptest::collection::vec(-10.0f32..10.0, 4),
            b in proptest::collection::vec(-10.0f32..10.0, 4),
        ) {
            let s = cosine_similarity(&a, &b);
            prop_assert!((-1.0001..=1.0001).contains(&s));
        }
    }
}
