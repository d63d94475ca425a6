//! The driver collaborator.
//!
//! The mapping engine never talks to a store directly. It selects collections through a
//! [`StoreDriver`] and issues every read and write through [`StoreCollection`]. Query results come
//! back as a [`RawCursor`] of store documents that the [`ResultCursor`](crate::cursor::ResultCursor)
//! hydrates on demand.
//!
//! # Traits
//!
//! - [`StoreDriver`]: an open connection to one database
//! - [`StoreCollection`]: the operations available on one collection
//! - [`RawCursor`]: a forward cursor over raw documents
//! - [`DriverBuilder`]: factory trait for creating drivers
//!
//! # Examples
//!
//! ```ignore
//! use docmap::driver::StoreDriver;
//! use bson::doc;
//!
//! let logs = driver.collection("logs");
//! let id = logs.insert(doc! { "name": "boot" }, &WriteOptions::default()).await?;
//! let found = logs.find_one(doc! { "_id": id }, None).await?;
//! ```

use std::{collections::VecDeque, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    config::WriteOptions,
    error::{MapperError, MapperResult},
    index::IndexOptions,
};

/// An open connection to a document database.
///
/// Implementations must be thread-safe; a driver is shared by every service of the models that
/// live on its connection.
#[async_trait]
pub trait StoreDriver: Send + Sync + Debug {
    /// Selects a collection by name. Selecting is cheap and never touches the network.
    fn collection(&self, name: &str) -> Arc<dyn StoreCollection>;

    /// Releases the connection. Collections selected earlier must not be used afterwards.
    async fn shutdown(&self) -> MapperResult<()> {
        Ok(())
    }
}

/// The operations the mapper issues against one collection.
///
/// Filters, updates and projections are documents in the store's query language. Failures are
/// returned as [`MapperError::Driver`] and are never retried by the mapper.
#[async_trait]
pub trait StoreCollection: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Returns the first document matching `filter`, or `None`.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter document
    /// * `projection` - The columns to return; `None` returns whole documents
    async fn find_one(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> MapperResult<Option<Document>>;

    /// Starts a query. The returned cursor does not execute until it is first read, so its
    /// [`CursorOptions`] can still be changed.
    async fn find(
        &self,
        filter: Document,
        projection: Option<Document>,
    ) -> MapperResult<Box<dyn RawCursor>>;

    /// Atomically applies `update` to the first document matching `filter`.
    ///
    /// # Returns
    ///
    /// The matched document as it was before the update, or `None` if nothing matched.
    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        projection: Option<Document>,
    ) -> MapperResult<Option<Document>>;

    /// Inserts one document and returns its identifier, generating one when `_id` is absent.
    async fn insert(&self, document: Document, options: &WriteOptions) -> MapperResult<Bson>;

    /// Applies an operator-tagged update to the first document matching `filter`.
    async fn update(
        &self,
        filter: Document,
        update: Document,
        options: &WriteOptions,
    ) -> MapperResult<UpdateOutcome>;

    /// Deletes the first document matching `filter` and returns the number deleted.
    async fn delete(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64>;

    /// Deletes every document matching `filter`.
    async fn delete_many(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64>;

    async fn count(&self, filter: Document) -> MapperResult<u64>;

    /// The distinct values of `column` among documents matching `filter`.
    async fn distinct(&self, column: &str, filter: Document) -> MapperResult<Vec<Bson>>;

    /// Creates an index from a column/direction key document. Creating an index that already
    /// exists with the same keys succeeds.
    async fn create_index(&self, keys: Document, options: &IndexOptions) -> MapperResult<()>;
}

/// The result of a partial update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Paging and execution controls of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Column/direction pairs.
    pub sort: Option<Document>,
    /// Server-side execution time limit.
    pub timeout: Option<Duration>,
    /// Avoid returning a document more than once when it moves during the scan.
    pub snapshot: bool,
}

/// A forward cursor over raw store documents.
#[async_trait]
pub trait RawCursor: Send {
    /// The controls applied the next time the cursor opens.
    fn options_mut(&mut self) -> &mut CursorOptions;

    async fn next_document(&mut self) -> MapperResult<Option<Document>>;

    /// Restarts the scan from the first document, re-applying the current options.
    async fn rewind(&mut self) -> MapperResult<()> {
        Err(MapperError::Unsupported("cursor cannot be rewound".to_string()))
    }

    /// The number of documents matching the query, ignoring skip and limit.
    async fn count(&mut self) -> MapperResult<u64>;
}

/// A cursor over documents that are already in memory, such as a find-and-modify result.
#[derive(Debug, Default)]
pub struct SingleCursor {
    documents: Vec<Document>,
    pending: VecDeque<Document>,
    options: CursorOptions,
}

impl SingleCursor {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let documents: Vec<Document> = documents.into_iter().collect();
        Self {
            pending: documents.iter().cloned().collect(),
            documents,
            options: CursorOptions::default(),
        }
    }
}

impl From<Option<Document>> for SingleCursor {
    fn from(document: Option<Document>) -> Self {
        Self::new(document)
    }
}

#[async_trait]
impl RawCursor for SingleCursor {
    fn options_mut(&mut self) -> &mut CursorOptions {
        &mut self.options
    }

    async fn next_document(&mut self) -> MapperResult<Option<Document>> {
        Ok(self.pending.pop_front())
    }

    async fn rewind(&mut self) -> MapperResult<()> {
        self.pending = self.documents.iter().cloned().collect();
        Ok(())
    }

    async fn count(&mut self) -> MapperResult<u64> {
        Ok(self.documents.len() as u64)
    }
}

/// Factory trait for creating drivers.
#[async_trait]
pub trait DriverBuilder {
    /// The driver type produced by this builder.
    type Driver: StoreDriver;

    /// Opens the connection and returns the driver.
    async fn build(self) -> MapperResult<Self::Driver>;
}
