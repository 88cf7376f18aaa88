// crates/molt-store/src/memory.rs
//
// In-memory vector store implementing the `VectorStore` trait.
//
// Brute-force cosine similarity search over per-namespace ordered maps.
// Aliases are resolved on every namespace lookup, so searching an alias
// behaves like searching the namespace it points at. Sufficient for local
// development, the daemon's dry runs, and the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use molt_core::embedding::cosine_similarity;
use molt_core::error::MoltError;
use molt_core::point::{Point, ScrollPage, SearchHit};
use molt_core::traits::VectorStore;

#[derive(Debug)]
struct Namespace {
    dimension: usize,
    points: BTreeMap<String, Point>,
}

#[derive(Debug, Default)]
struct Inner {
    namespaces: HashMap<String, Namespace>,
    aliases: HashMap<String, String>,
}

impl Inner {
    /// Resolve an alias to its namespace name; plain names pass through.
    fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        match self.aliases.get(name) {
            Some(target) if !self.namespaces.contains_key(name) => target.as_str(),
            _ => name,
        }
    }

    fn namespace(&self, name: &str) -> Result<&Namespace, MoltError> {
        let resolved = self.resolve(name);
        self.namespaces
            .get(resolved)
            .ok_or_else(|| MoltError::NotFound(format!("namespace {}", name)))
    }

    fn namespace_mut(&mut self, name: &str) -> Result<&mut Namespace, MoltError> {
        let resolved = self.resolve(name).to_string();
        self.namespaces
            .get_mut(&resolved)
            .ok_or_else(|| MoltError::NotFound(format!("namespace {}", name)))
    }
}

/// In-memory vector store using brute-force cosine similarity.
#[derive(Debug)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
    /// When false, `delete_all_points` reports `Unsupported`, mimicking
    /// backends without delete-by-empty-filter.
    delete_by_filter: bool,
}

impl InMemoryVectorStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            delete_by_filter: true,
        }
    }

    /// Toggle support for deleting every point by an empty filter.
    pub fn with_delete_by_filter(mut self, supported: bool) -> Self {
        self.delete_by_filter = supported;
        self
    }

    /// Number of points in a namespace (0 if it does not exist).
    pub fn count(&self, namespace: &str) -> usize {
        self.read()
            .ok()
            .and_then(|inner| inner.namespace(namespace).ok().map(|ns| ns.points.len()))
            .unwrap_or(0)
    }

    /// Fetch a single point by id.
    pub fn get_point(&self, namespace: &str, id: &str) -> Option<Point> {
        self.read()
            .ok()
            .and_then(|inner| inner.namespace(namespace).ok()?.points.get(id).cloned())
    }

    /// Dimensionality of a namespace, if it exists.
    pub fn dimension(&self, namespace: &str) -> Option<usize> {
        self.read()
            .ok()
            .and_then(|inner| inner.namespace(namespace).ok().map(|ns| ns.dimension))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, MoltError> {
        self.inner
            .read()
            .map_err(|e| MoltError::Storage(format!("RwLock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, MoltError> {
        self.inner
            .write()
            .map_err(|e| MoltError::Storage(format!("RwLock poisoned: {}", e)))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn scroll_points(
        &self,
        namespace: &str,
        page_size: usize,
        cursor: Option<String>,
    ) -> Result<ScrollPage, MoltError> {
        let inner = self.read()?;
        let ns = inner.namespace(namespace)?;
        let page_size = page_size.max(1);

        let mut iter = match cursor {
            Some(start) => ns.points.range(start..),
            None => ns.points.range::<String, _>(..),
        };

        let points: Vec<Point> = iter.by_ref().take(page_size).map(|(_, p)| p.clone()).collect();
        let next_cursor = iter.next().map(|(id, _)| id.clone());

        Ok(ScrollPage {
            points,
            next_cursor,
        })
    }

    async fn upsert_batch(&self, namespace: &str, points: &[Point]) -> Result<(), MoltError> {
        let mut inner = self.write()?;
        let ns = inner.namespace_mut(namespace)?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != ns.dimension) {
            return Err(MoltError::Storage(format!(
                "point {} has dimension {}, namespace {} expects {}",
                bad.id,
                bad.vector.len(),
                namespace,
                ns.dimension
            )));
        }

        for point in points {
            ns.points.insert(point.id.clone(), point.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, MoltError> {
        let inner = self.read()?;
        let ns = inner.namespace(namespace)?;

        // Brute-force: compute cosine similarity against every stored vector.
        let mut scored: Vec<SearchHit> = ns
            .points
            .values()
            .map(|p| SearchHit {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector) as f32,
            })
            .collect();

        // Sort by descending similarity; ties broken by id for stable output.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        scored.truncate(top_k);
        Ok(scored)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool, MoltError> {
        Ok(self.read()?.namespaces.contains_key(namespace))
    }

    async fn create_namespace(&self, namespace: &str, dimension: usize) -> Result<(), MoltError> {
        let mut inner = self.write()?;
        if inner.namespaces.contains_key(namespace) {
            return Err(MoltError::InvalidState(format!(
                "namespace {} already exists",
                namespace
            )));
        }
        inner.namespaces.insert(
            namespace.to_string(),
            Namespace {
                dimension,
                points: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_all_points(&self, namespace: &str) -> Result<(), MoltError> {
        if !self.delete_by_filter {
            return Err(MoltError::Unsupported(
                "delete by empty filter".to_string(),
            ));
        }
        let mut inner = self.write()?;
        inner.namespace_mut(namespace)?.points.clear();
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), MoltError> {
        let mut inner = self.write()?;
        inner
            .namespaces
            .remove(namespace)
            .map(|_| ())
            .ok_or_else(|| MoltError::NotFound(format!("namespace {}", namespace)))
    }

    async fn get_alias_target(&self, alias: &str) -> Result<Option<String>, MoltError> {
        Ok(self.read()?.aliases.get(alias).cloned())
    }

    async fn set_alias(&self, alias: &str, namespace: &str) -> Result<(), MoltError> {
        // A single write-lock section: readers see either the old or the new target.
        let mut inner = self.write()?;
        if !inner.namespaces.contains_key(namespace) {
            return Err(MoltError::NotFound(format!("namespace {}", namespace)));
        }
        inner
            .aliases
            .insert(alias.to_string(), namespace.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn point(id: &str, vector: Vec<f32>) -> Point {
        Point::new(id, vector, Map::new())
    }

    #[tokio::test]
    async fn test_scroll_pages_through_everything() {
        let store = InMemoryVectorStore::new();
        store.create_namespace("ns", 2).await.unwrap();
        let points: Vec<Point> = (0..7)
            .map(|i| point(&format!("p{}", i), vec![1.0, i as f32]))
            .collect();
        store.upsert_batch("ns", &points).await.unwrap();

        let mut cursor = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.scroll_points("ns", 3, cursor).await.unwrap();
            pages += 1;
            seen.extend(page.points.into_iter().map(|p| p.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 7);
        seen.dedup();
        assert_eq!(seen.len(), 7);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let store = InMemoryVectorStore::new();
        store.create_namespace("ns", 2).await.unwrap();
        store
            .upsert_batch(
                "ns",
                &[
                    point("a", vec![1.0, 0.0]),
                    point("b", vec![0.0, 1.0]),
                    point("c", vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search("ns", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let store = InMemoryVectorStore::new();
        store.create_namespace("ns", 3).await.unwrap();
        let err = store.upsert_batch("ns", &[point("a", vec![1.0])]).await;
        assert!(matches!(err, Err(MoltError::Storage(_))));
    }

    #[tokio::test]
    async fn test_alias_replace_and_resolution() {
        let store = InMemoryVectorStore::new();
        store.create_namespace("blue", 2).await.unwrap();
        store.create_namespace("green", 2).await.unwrap();
        store.upsert_batch("green", &[point("g", vec![1.0, 0.0])]).await.unwrap();

        store.set_alias("live", "blue").await.unwrap();
        assert_eq!(store.get_alias_target("live").await.unwrap().as_deref(), Some("blue"));

        store.set_alias("live", "green").await.unwrap();
        assert_eq!(store.get_alias_target("live").await.unwrap().as_deref(), Some("green"));
        assert_eq!(store.count("live"), 1);

        let missing = store.set_alias("live", "nope").await;
        assert!(matches!(missing, Err(MoltError::NotFound(_))));
        assert_eq!(store.get_alias_target("live").await.unwrap().as_deref(), Some("green"));
    }

    #[tokio::test]
    async fn test_delete_all_points_unsupported() {
        let store = InMemoryVectorStore::new().with_delete_by_filter(false);
        store.create_namespace("ns", 1).await.unwrap();
        let err = store.delete_all_points("ns").await;
        assert!(matches!(err, Err(MoltError::Unsupported(_))));
    }
}
