//! In-memory driver implementation.
//!
//! This module provides a driver that keeps every collection in process memory behind
//! async-safe read-write locks. It evaluates the same filter and update documents a document
//! database would, which makes it suitable for development and tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docmap_core::{
    config::WriteOptions,
    driver::{DriverBuilder, RawCursor, StoreCollection, StoreDriver, UpdateOutcome},
    error::MapperResult,
    index::IndexOptions,
};

use crate::{
    cursor::{MemoryCursor, project},
    error::{MemoryStoreError, MemoryStoreResult},
    evaluator::{DocumentEvaluator, lookup},
    update::apply_update,
};

type CollectionMap = HashMap<String, MemoryCollection>;

/// Thread-safe in-memory document driver.
///
/// `MemoryDriver` is cloneable and uses `Arc`-wrapped internal state, so clones share the same
/// collections. Collections are created the first time they are selected.
///
/// Queries scan every document of a collection. Indexes are recorded and their uniqueness is
/// enforced, but they do not speed up queries.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::MemoryDriver;
/// use bson::doc;
///
/// let driver = MemoryDriver::new();
/// let logs = driver.collection("logs");
/// let id = logs.insert(doc! { "name": "boot" }, &WriteOptions::default()).await?;
/// assert_eq!(logs.count(doc! {}).await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryDriver {
    collections: Arc<Mutex<CollectionMap>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MemoryDriverBuilder {
        MemoryDriverBuilder::default()
    }

    fn handle(&self, name: &str) -> MemoryCollection {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(name.to_string())
            .or_insert_with(|| MemoryCollection::new(name))
            .clone()
    }

    /// The index definitions created on a collection, in creation order.
    pub async fn indexes(&self, collection: &str) -> Vec<(Document, IndexOptions)> {
        let handle = self.handle(collection);
        let indexes = handle.state.indexes.read().await;
        indexes
            .iter()
            .map(|index| (index.keys.clone(), index.options.clone()))
            .collect()
    }

    /// A copy of the stored documents of a collection, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let handle = self.handle(collection);
        let documents = handle.state.documents.read().await;
        documents.clone()
    }
}

#[async_trait]
impl StoreDriver for MemoryDriver {
    fn collection(&self, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(self.handle(name))
    }
}

#[derive(Debug)]
pub(crate) struct IndexDefinition {
    keys: Document,
    options: IndexOptions,
}

#[derive(Debug, Default)]
pub(crate) struct CollectionState {
    pub(crate) documents: RwLock<Vec<Document>>,
    indexes: RwLock<Vec<IndexDefinition>>,
}

/// A handle to one in-memory collection.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    state: Arc<CollectionState>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::default(),
        }
    }

    fn matches(document: &Document, filter: &Document) -> MemoryStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(filter)
    }

    fn position(documents: &[Document], filter: &Document) -> MemoryStoreResult<Option<usize>> {
        for (position, document) in documents.iter().enumerate() {
            if Self::matches(document, filter)? {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Fails when `candidate` would duplicate the `_id` or a unique index key of any document
    /// other than the one at `replacing`.
    async fn check_unique(
        &self,
        documents: &[Document],
        candidate: &Document,
        replacing: Option<usize>,
    ) -> MemoryStoreResult<()> {
        let others = documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != replacing)
            .map(|(_, document)| document);

        let indexes = self.state.indexes.read().await;
        let unique: Vec<&IndexDefinition> = indexes.iter().filter(|index| index.options.unique).collect();

        for other in others {
            if other.get("_id") == candidate.get("_id") {
                return Err(self.duplicate(format!("_id: {:?}", candidate.get("_id"))));
            }

            for index in &unique {
                let key = index_key(&index.keys, candidate);
                if index.options.sparse && key.iter().all(Option::is_none) {
                    continue;
                }
                if key == index_key(&index.keys, other) {
                    return Err(self.duplicate(format!("{} {:?}", index_name(&index.keys), key)));
                }
            }
        }

        Ok(())
    }

    fn duplicate(&self, key: String) -> MemoryStoreError {
        MemoryStoreError::DuplicateKey {
            collection: self.name.clone(),
            key,
        }
    }

    /// Applies `update` to the first match and returns its position and previous state.
    async fn modify_first(
        &self,
        filter: &Document,
        update: &Document,
    ) -> MemoryStoreResult<Option<(Document, bool)>> {
        let mut documents = self.state.documents.write().await;
        let Some(position) = Self::position(&documents, filter)? else {
            return Ok(None);
        };

        let previous = documents[position].clone();
        let mut updated = previous.clone();
        apply_update(&mut updated, update)?;
        self.check_unique(&documents, &updated, Some(position)).await?;

        let modified = updated != previous;
        documents[position] = updated;
        Ok(Some((previous, modified)))
    }
}

fn index_key<'d>(keys: &Document, document: &'d Document) -> Vec<Option<&'d Bson>> {
    keys.keys().map(|column| lookup(document, column)).collect()
}

fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(column, direction)| format!("{column}_{direction}"))
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl StoreCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: Document, projection: Option<Document>) -> MapperResult<Option<Document>> {
        let documents = self.state.documents.read().await;
        let found = Self::position(&documents, &filter)?.map(|position| documents[position].clone());
        Ok(found.map(|document| project(document, projection.as_ref())))
    }

    async fn find(&self, filter: Document, projection: Option<Document>) -> MapperResult<Box<dyn RawCursor>> {
        Ok(Box::new(MemoryCursor::new(Arc::clone(&self.state), filter, projection)))
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        projection: Option<Document>,
    ) -> MapperResult<Option<Document>> {
        let previous = self.modify_first(&filter, &update).await?;
        Ok(previous.map(|(document, _)| project(document, projection.as_ref())))
    }

    async fn insert(&self, mut document: Document, _options: &WriteOptions) -> MapperResult<Bson> {
        let id = match document.get("_id") {
            Some(id) if !matches!(id, Bson::Null) => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let mut documents = self.state.documents.write().await;
        self.check_unique(&documents, &document, None).await?;
        documents.push(document);
        trace!(collection = %self.name, id = %id, "inserted document");

        Ok(id)
    }

    async fn update(&self, filter: Document, update: Document, _options: &WriteOptions) -> MapperResult<UpdateOutcome> {
        let outcome = match self.modify_first(&filter, &update).await? {
            Some((_, modified)) => UpdateOutcome {
                matched: 1,
                modified: u64::from(modified),
            },
            None => UpdateOutcome::default(),
        };
        trace!(collection = %self.name, ?outcome, "updated document");
        Ok(outcome)
    }

    async fn delete(&self, filter: Document, _options: &WriteOptions) -> MapperResult<u64> {
        let mut documents = self.state.documents.write().await;
        match Self::position(&documents, &filter)? {
            Some(position) => {
                documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: Document, _options: &WriteOptions) -> MapperResult<u64> {
        let mut documents = self.state.documents.write().await;
        let mut kept = Vec::with_capacity(documents.len());
        let mut deleted = 0;

        for document in documents.drain(..) {
            if Self::matches(&document, &filter)? {
                deleted += 1;
            } else {
                kept.push(document);
            }
        }

        *documents = kept;
        Ok(deleted)
    }

    async fn count(&self, filter: Document) -> MapperResult<u64> {
        let documents = self.state.documents.read().await;
        let matched = DocumentEvaluator::filter_documents(documents.iter(), &filter)?;
        Ok(matched.len() as u64)
    }

    async fn distinct(&self, column: &str, filter: Document) -> MapperResult<Vec<Bson>> {
        let documents = self.state.documents.read().await;
        let mut values: Vec<Bson> = Vec::new();

        for document in documents.iter() {
            if !Self::matches(document, &filter)? {
                continue;
            }
            let candidates = match lookup(document, column) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for candidate in candidates {
                if !values.contains(&candidate) {
                    values.push(candidate);
                }
            }
        }

        Ok(values)
    }

    async fn create_index(&self, keys: Document, options: &IndexOptions) -> MapperResult<()> {
        let mut indexes = self.state.indexes.write().await;
        if indexes.iter().any(|index| index.keys == keys) {
            return Ok(());
        }

        debug!(collection = %self.name, index = %index_name(&keys), unique = options.unique, "created index");
        indexes.push(IndexDefinition {
            keys,
            options: options.clone(),
        });
        Ok(())
    }
}

/// Builder for constructing [`MemoryDriver`] instances.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::MemoryDriver;
/// use docmap::driver::DriverBuilder;
///
/// let driver = MemoryDriver::builder().build().await?;
/// ```
#[derive(Default)]
pub struct MemoryDriverBuilder;

#[async_trait]
impl DriverBuilder for MemoryDriverBuilder {
    type Driver = MemoryDriver;

    async fn build(self) -> MapperResult<Self::Driver> {
        Ok(MemoryDriver::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn options() -> WriteOptions {
        WriteOptions::default()
    }

    #[tokio::test]
    async fn insert_generates_identifiers() {
        let driver = MemoryDriver::new();
        let logs = driver.collection("logs");

        let id = logs.insert(doc! { "name": "boot" }, &options()).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = logs.find_one(doc! { "_id": id.clone() }, None).await.unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), "boot");
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_identifiers() {
        let logs = MemoryDriver::new().collection("logs");
        logs.insert(doc! { "_id": 1 }, &options()).await.unwrap();
        assert!(logs.insert(doc! { "_id": 1 }, &options()).await.is_err());
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let logs = MemoryDriver::new().collection("logs");
        let unique = IndexOptions {
            unique: true,
            ..IndexOptions::default()
        };
        logs.create_index(doc! { "name": 1 }, &unique).await.unwrap();

        logs.insert(doc! { "name": "boot" }, &options()).await.unwrap();
        assert!(logs.insert(doc! { "name": "boot" }, &options()).await.is_err());
        logs.insert(doc! { "name": "halt" }, &options()).await.unwrap();

        let err = logs
            .update(doc! { "name": "halt" }, doc! { "$set": { "name": "boot" } }, &options())
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn indexes_are_created_once() {
        let driver = MemoryDriver::new();
        let logs = driver.collection("logs");
        logs.create_index(doc! { "name": 1 }, &IndexOptions::default()).await.unwrap();
        logs.create_index(doc! { "name": 1 }, &IndexOptions::default()).await.unwrap();
        assert_eq!(driver.indexes("logs").await.len(), 1);
    }

    #[tokio::test]
    async fn update_reports_matches_and_modifications() {
        let logs = MemoryDriver::new().collection("logs");
        let id = logs.insert(doc! { "hits": 1 }, &options()).await.unwrap();

        let outcome = logs
            .update(doc! { "_id": id.clone() }, doc! { "$inc": { "hits": 2 } }, &options())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });

        let outcome = logs
            .update(doc! { "_id": id.clone() }, doc! { "$set": { "hits": 3 } }, &options())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });

        let outcome = logs
            .update(doc! { "_id": 99 }, doc! { "$set": { "hits": 3 } }, &options())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::default());
    }

    #[tokio::test]
    async fn find_and_modify_returns_the_previous_document() {
        let logs = MemoryDriver::new().collection("logs");
        logs.insert(doc! { "_id": 1, "hits": 1 }, &options()).await.unwrap();

        let previous = logs
            .find_and_modify(doc! { "_id": 1 }, doc! { "$inc": { "hits": 1 } }, None)
            .await
            .unwrap();
        assert_eq!(previous, Some(doc! { "_id": 1, "hits": 1 }));

        let current = logs.find_one(doc! { "_id": 1 }, None).await.unwrap();
        assert_eq!(current, Some(doc! { "_id": 1, "hits": 2 }));
    }

    #[tokio::test]
    async fn delete_single_and_many() {
        let logs = MemoryDriver::new().collection("logs");
        for sort in [1, 1, 2] {
            logs.insert(doc! { "sort": sort }, &options()).await.unwrap();
        }

        assert_eq!(logs.delete(doc! { "sort": 1 }, &options()).await.unwrap(), 1);
        assert_eq!(logs.count(doc! {}).await.unwrap(), 2);
        assert_eq!(logs.delete_many(doc! {}, &options()).await.unwrap(), 2);
        assert_eq!(logs.delete(doc! {}, &options()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let posts = MemoryDriver::new().collection("posts");
        posts.insert(doc! { "tags": ["a", "b"] }, &options()).await.unwrap();
        posts.insert(doc! { "tags": ["b", "c"] }, &options()).await.unwrap();
        posts.insert(doc! { "title": "untagged" }, &options()).await.unwrap();

        let tags = posts.distinct("tags", doc! {}).await.unwrap();
        assert_eq!(tags, vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    }

    #[tokio::test]
    async fn cursors_sort_page_and_rewind() {
        let logs = MemoryDriver::new().collection("logs");
        for sort in [3, 1, 2, 5, 4] {
            logs.insert(doc! { "sort": sort }, &options()).await.unwrap();
        }

        let mut cursor = logs.find(doc! { "sort": { "$gt": 1 } }, None).await.unwrap();
        cursor.options_mut().sort = Some(doc! { "sort": -1 });
        cursor.options_mut().skip = Some(1);
        cursor.options_mut().limit = Some(2);

        let mut seen = Vec::new();
        while let Some(document) = cursor.next_document().await.unwrap() {
            seen.push(document.get_i32("sort").unwrap());
        }
        assert_eq!(seen, vec![4, 3]);
        assert_eq!(cursor.count().await.unwrap(), 4);

        cursor.rewind().await.unwrap();
        let first = cursor.next_document().await.unwrap().unwrap();
        assert_eq!(first.get_i32("sort").unwrap(), 4);
    }

    #[tokio::test]
    async fn clones_share_collections() {
        let driver = MemoryDriver::builder().build().await.unwrap();
        let shared = driver.clone();
        driver.collection("logs").insert(doc! { "n": 1 }, &options()).await.unwrap();
        assert_eq!(shared.documents("logs").await.len(), 1);
    }
}
