//! Lazily hydrated query results.
//!
//! A [`ResultCursor`] pulls raw documents from a driver cursor one at a time and turns each into
//! a record of its model only when it is read. It is a single forward pass; [`restart`] only works
//! when the driver can re-scan.
//!
//! ```ignore
//! let mut cursor = service.find_by_filter(Some(&query), &[]).await?;
//! cursor.sort([("created", SortDirection::Desc)]).limit(20);
//!
//! while let Some(log) = cursor.next_record().await? {
//!     println!("{:?}", log.record().get("name"));
//! }
//! ```
//!
//! [`restart`]: ResultCursor::restart

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use bson::Document;
use futures::{Stream, stream};

use crate::{
    driver::RawCursor,
    error::{MapperError, MapperResult},
    model::Model,
    query::SortDirection,
    service::RecordService,
};

/// A cursor over the records matching a query.
pub struct ResultCursor<M: Model> {
    raw: Box<dyn RawCursor>,
    service: Weak<RecordService<M>>,
    position: usize,
    /// The document at `position`, once pulled from the raw cursor.
    head: Option<Option<Document>>,
}

impl<M: Model> fmt::Debug for ResultCursor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("model", &M::model_name())
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl<M: Model> ResultCursor<M> {
    pub fn new(raw: Box<dyn RawCursor>, service: Weak<RecordService<M>>) -> Self {
        Self {
            raw,
            service,
            position: 0,
            head: None,
        }
    }

    fn service(&self) -> MapperResult<Arc<RecordService<M>>> {
        self.service.upgrade().ok_or_else(|| {
            MapperError::InvalidState(format!("the `{}` service was dropped", M::model_name()))
        })
    }

    pub fn skip(&mut self, count: u64) -> &mut Self {
        self.raw.options_mut().skip = Some(count);
        self
    }

    pub fn limit(&mut self, count: i64) -> &mut Self {
        self.raw.options_mut().limit = Some(count);
        self
    }

    /// Sorts by logical field names, in order of precedence.
    pub fn sort<'f>(&mut self, fields: impl IntoIterator<Item = (&'f str, SortDirection)>) -> &mut Self {
        let meta = self.service.upgrade().map(|service| Arc::clone(service.meta()));
        let mut sort = Document::new();
        for (field, direction) in fields {
            let column = meta.as_ref().map_or(field, |meta| meta.column_for(field));
            sort.insert(column, direction);
        }
        self.raw.options_mut().sort = Some(sort);
        self
    }

    /// Limits the server-side execution time of the query.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.raw.options_mut().timeout = Some(timeout);
        self
    }

    /// Asks the store not to return a document twice when it moves during the scan.
    pub fn snapshot(&mut self) -> &mut Self {
        self.raw.options_mut().snapshot = true;
        self
    }

    async fn load_head(&mut self) -> MapperResult<Option<&Document>> {
        if self.head.is_none() {
            self.head = Some(self.raw.next_document().await?);
        }
        Ok(self.head.as_ref().and_then(Option::as_ref))
    }

    /// The record at the current position, `None` past the end.
    pub async fn current(&mut self) -> MapperResult<Option<M>> {
        let service = self.service()?;
        Ok(self
            .load_head()
            .await?
            .cloned()
            .map(|document| service.hydrate(document)))
    }

    /// Moves to the next position.
    pub async fn advance(&mut self) -> MapperResult<()> {
        if self.head.is_none() {
            self.raw.next_document().await?;
        }
        self.head = None;
        self.position += 1;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether a record exists at the current position.
    pub async fn is_valid(&mut self) -> MapperResult<bool> {
        Ok(self.load_head().await?.is_some())
    }

    /// Starts over from the first result, applying the current paging controls.
    ///
    /// # Errors
    ///
    /// [`MapperError::Unsupported`] when the driver cursor cannot be re-scanned.
    pub async fn restart(&mut self) -> MapperResult<()> {
        self.raw.rewind().await?;
        self.position = 0;
        self.head = None;
        Ok(())
    }

    /// Returns the current record and advances past it.
    pub async fn next_record(&mut self) -> MapperResult<Option<M>> {
        let current = self.current().await?;
        if current.is_some() {
            self.advance().await?;
        }
        Ok(current)
    }

    /// Reads every remaining record.
    pub async fn materialize_all(&mut self) -> MapperResult<Vec<M>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// The first result, restarting the cursor if it already moved.
    pub async fn first(&mut self) -> MapperResult<Option<M>> {
        if self.position > 0 {
            self.restart().await?;
        }
        self.current().await
    }

    /// The first result, or a fresh unsaved record when there is none.
    pub async fn first_or_new(&mut self) -> MapperResult<M> {
        match self.first().await? {
            Some(record) => Ok(record),
            None => Ok(self.service()?.instantiate()),
        }
    }

    /// The number of matching documents, ignoring skip and limit.
    pub async fn count(&mut self) -> MapperResult<u64> {
        self.raw.count().await
    }

    /// Converts the cursor into a stream of the remaining records.
    pub fn into_stream(self) -> impl Stream<Item = MapperResult<M>> + Send {
        stream::try_unfold(self, |mut cursor| async move {
            let next = cursor.next_record().await?;
            Ok(next.map(|record| (record, cursor)))
        })
    }
}
