use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection, Cursor, Database, IndexModel,
    options::{
        ClientOptions, CreateIndexOptions, DeleteOptions, FindOneAndUpdateOptions, FindOptions, Hint,
        IndexOptions as MongoIndexOptions, InsertOneOptions, ReturnDocument, UpdateOptions,
    },
};
use tracing::{debug, info};

use docmap_core::{
    config::{ConnectionConfig, WriteOptions},
    driver::{CursorOptions, DriverBuilder, RawCursor, StoreCollection, StoreDriver, UpdateOutcome},
    error::{MapperError, MapperResult},
    index::IndexOptions,
};

use crate::{
    concern::{acknowledgment, apply_config, call_concern},
    query::rewrite_filter,
};

/// A driver over one MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDriver {
    client: Client,
    database: Database,
}

impl MongoDriver {
    pub fn new(client: Client, database: &str) -> Self {
        Self {
            database: client.database(database),
            client,
        }
    }

    pub fn builder(config: ConnectionConfig) -> MongoDriverBuilder {
        MongoDriverBuilder::new(config)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl StoreDriver for MongoDriver {
    fn collection(&self, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            inner: self.database.collection(name),
        })
    }

    async fn shutdown(&self) -> MapperResult<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MongoCollection {
    name: String,
    inner: Collection<Document>,
}

#[async_trait]
impl StoreCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(&self, filter: Document, projection: Option<Document>) -> MapperResult<Option<Document>> {
        let mut options = FindOptions::default();
        options.projection = projection;
        options.limit = Some(1);

        let mut cursor = self
            .inner
            .find(rewrite_filter(filter))
            .with_options(options)
            .await
            .map_err(MapperError::driver)?;

        if cursor.advance().await.map_err(MapperError::driver)? {
            Ok(Some(cursor.deserialize_current().map_err(MapperError::driver)?))
        } else {
            Ok(None)
        }
    }

    async fn find(&self, filter: Document, projection: Option<Document>) -> MapperResult<Box<dyn RawCursor>> {
        Ok(Box::new(MongoCursor {
            collection: self.inner.clone(),
            filter: rewrite_filter(filter),
            projection,
            options: CursorOptions::default(),
            cursor: None,
        }))
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        projection: Option<Document>,
    ) -> MapperResult<Option<Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.projection = projection;
        options.return_document = Some(ReturnDocument::Before);

        self.inner
            .find_one_and_update(rewrite_filter(filter), update)
            .with_options(options)
            .await
            .map_err(MapperError::driver)
    }

    async fn insert(&self, document: Document, options: &WriteOptions) -> MapperResult<Bson> {
        let mut insert_options = InsertOneOptions::default();
        insert_options.write_concern = call_concern(options);

        let result = self
            .inner
            .insert_one(document)
            .with_options(insert_options)
            .await
            .map_err(MapperError::driver)?;
        Ok(result.inserted_id)
    }

    async fn update(&self, filter: Document, update: Document, options: &WriteOptions) -> MapperResult<UpdateOutcome> {
        let mut update_options = UpdateOptions::default();
        update_options.write_concern = call_concern(options);

        let result = self
            .inner
            .update_one(rewrite_filter(filter), update)
            .with_options(update_options)
            .await
            .map_err(MapperError::driver)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64> {
        let mut delete_options = DeleteOptions::default();
        delete_options.write_concern = call_concern(options);

        let result = self
            .inner
            .delete_one(rewrite_filter(filter))
            .with_options(delete_options)
            .await
            .map_err(MapperError::driver)?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64> {
        let mut delete_options = DeleteOptions::default();
        delete_options.write_concern = call_concern(options);

        let result = self
            .inner
            .delete_many(rewrite_filter(filter))
            .with_options(delete_options)
            .await
            .map_err(MapperError::driver)?;
        Ok(result.deleted_count)
    }

    async fn count(&self, filter: Document) -> MapperResult<u64> {
        self.inner
            .count_documents(rewrite_filter(filter))
            .await
            .map_err(MapperError::driver)
    }

    async fn distinct(&self, column: &str, filter: Document) -> MapperResult<Vec<Bson>> {
        self.inner
            .distinct(column, rewrite_filter(filter))
            .await
            .map_err(MapperError::driver)
    }

    async fn create_index(&self, keys: Document, options: &IndexOptions) -> MapperResult<()> {
        let mut create_options = CreateIndexOptions::default();
        if let Some(ack) = &options.write_ack {
            let concern = call_concern(&WriteOptions::default().ack(ack.clone()));
            create_options.write_concern = concern;
        }

        self.inner
            .create_index(index_model(keys, options))
            .with_options(create_options)
            .await
            .map_err(MapperError::driver)?;

        debug!(collection = %self.name, "ensured index");
        Ok(())
    }
}

fn index_model(keys: Document, options: &IndexOptions) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            MongoIndexOptions::builder()
                .unique(options.unique)
                .sparse(options.sparse)
                .background(options.background)
                .expire_after(options.expire_after)
                .build(),
        )
        .build()
}

/// Translates cursor controls into find options.
fn find_options(options: &CursorOptions, projection: Option<&Document>) -> FindOptions {
    let mut find = FindOptions::default();
    find.skip = options.skip;
    find.limit = options.limit;
    find.sort = options.sort.clone();
    find.max_time = options.timeout;
    find.projection = projection.cloned();
    if options.snapshot {
        find.hint = Some(Hint::Keys(doc! { "_id": 1 }));
    }
    find
}

/// A lazily executed MongoDB query.
#[derive(Debug)]
pub struct MongoCursor {
    collection: Collection<Document>,
    filter: Document,
    projection: Option<Document>,
    options: CursorOptions,
    cursor: Option<Cursor<Document>>,
}

#[async_trait]
impl RawCursor for MongoCursor {
    fn options_mut(&mut self) -> &mut CursorOptions {
        &mut self.options
    }

    async fn next_document(&mut self) -> MapperResult<Option<Document>> {
        if self.cursor.is_none() {
            let opened = self
                .collection
                .find(self.filter.clone())
                .with_options(find_options(&self.options, self.projection.as_ref()))
                .await
                .map_err(MapperError::driver)?;
            self.cursor = Some(opened);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        if cursor.advance().await.map_err(MapperError::driver)? {
            Ok(Some(cursor.deserialize_current().map_err(MapperError::driver)?))
        } else {
            Ok(None)
        }
    }

    async fn rewind(&mut self) -> MapperResult<()> {
        self.cursor = None;
        Ok(())
    }

    async fn count(&mut self) -> MapperResult<u64> {
        self.collection
            .count_documents(self.filter.clone())
            .await
            .map_err(MapperError::driver)
    }
}

/// Builder for constructing [`MongoDriver`] instances from a [`ConnectionConfig`].
///
/// # Example
///
/// ```ignore
/// use docmap::{config::ConnectionConfig, driver::DriverBuilder, mongodb::MongoDriver};
///
/// let config = ConnectionConfig::new("localhost:27017", "app").replica_set("rs0");
/// let driver = MongoDriver::builder(config).build().await?;
/// ```
pub struct MongoDriverBuilder {
    config: ConnectionConfig,
}

impl MongoDriverBuilder {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DriverBuilder for MongoDriverBuilder {
    type Driver = MongoDriver;

    async fn build(self) -> MapperResult<Self::Driver> {
        let mut options = ClientOptions::parse(self.config.dsn())
            .await
            .map_err(|e| MapperError::Initialization(e.to_string()))?;
        apply_config(&mut options, &self.config);

        let client = Client::with_options(options).map_err(|e| MapperError::Initialization(e.to_string()))?;
        info!(
            host = %self.config.host,
            database = %self.config.database,
            write_concern = ?acknowledgment(&self.config.write_concern),
            "opened mongodb connection"
        );

        Ok(MongoDriver::new(client, &self.config.database))
    }
}
