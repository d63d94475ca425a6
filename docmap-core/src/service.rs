//! The per-model mapping service.
//!
//! A [`RecordService`] owns everything the mapper knows about one model on one connection: its
//! compiled metadata, the lazily selected collection, its class-level hooks and whether its
//! indexes were created. Services are normally obtained from a [`Mapper`](crate::mapper::Mapper),
//! which creates one per model and shares it.
//!
//! # Example
//!
//! ```ignore
//! let service = mapper.service::<Log>().await?;
//!
//! let mut log = service.instantiate();
//! log.assign("name", "boot".into());
//! service.save(&mut log, &WriteOptions::default()).await?;
//!
//! let mut query = Query::new();
//! query.filter("sort >=", 10)?;
//! let logs = service.find_by_filter(Some(&query), &[]).await?.materialize_all().await?;
//! ```

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use bson::{Bson, Document};
use mea::mutex::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    coerce::{Coerced, TypeCoercer},
    config::WriteOptions,
    cursor::ResultCursor,
    driver::{SingleCursor, StoreCollection, StoreDriver},
    error::{MapperError, MapperResult},
    hooks::{HookPoint, HookRegistry},
    model::{Model, Record},
    payload::WritePayload,
    query::Query,
    registry::MetadataRegistry,
    schema::{EmbedMode, FieldDescriptor, FieldType, ID_COLUMN, ModelMeta},
    value::{RecordRef, Value},
};

/// Maps records of `M` to documents of one collection.
pub struct RecordService<M: Model> {
    meta: Arc<ModelMeta>,
    driver: Arc<dyn StoreDriver>,
    models: Arc<MetadataRegistry>,
    collection: OnceLock<Arc<dyn StoreCollection>>,
    indexes_ready: AtomicBool,
    index_lock: Mutex<()>,
    hooks: HookRegistry<M>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> fmt::Debug for RecordService<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordService")
            .field("model", &self.meta.model())
            .field("collection", &self.meta.collection())
            .field("driver", &self.driver)
            .field("indexes_ready", &self.indexes_ready.load(Ordering::Relaxed))
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl<M: Model> RecordService<M> {
    /// Creates a service for `M` on `driver`, registering the model's metadata.
    pub fn new(driver: Arc<dyn StoreDriver>, models: Arc<MetadataRegistry>) -> MapperResult<Self> {
        let meta = models.register::<M>()?;
        Ok(Self {
            meta,
            driver,
            models,
            collection: OnceLock::new(),
            indexes_ready: AtomicBool::new(false),
            index_lock: Mutex::new(()),
            hooks: HookRegistry::default(),
            _model: PhantomData,
        })
    }

    pub fn meta(&self) -> &Arc<ModelMeta> {
        &self.meta
    }

    pub fn coercer(&self) -> TypeCoercer<'_> {
        TypeCoercer::new(&self.models)
    }

    /// The model's collection, selected on first use.
    pub fn collection(&self) -> &Arc<dyn StoreCollection> {
        self.collection
            .get_or_init(|| self.driver.collection(self.meta.collection()))
    }

    /// Registers a class-level handler for every record of the model. Handlers run in
    /// registration order, before the record's own hook method.
    pub fn on<F>(&self, point: HookPoint, handler: F)
    where
        F: Fn(&mut M, bool) -> MapperResult<()> + Send + Sync + 'static,
    {
        self.hooks.add(point, Arc::new(handler));
    }

    /// Creates the model's declared indexes. Only the first successful call issues requests;
    /// every operation that reaches the store calls this first.
    pub async fn ensure_indexes(&self) -> MapperResult<()> {
        if self.indexes_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.index_lock.lock().await;
        if self.indexes_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        for index in self.meta.indexes() {
            let keys = index.key_document(&self.meta);
            debug!(
                model = self.meta.model(),
                collection = self.meta.collection(),
                keys = %keys,
                unique = index.options.unique,
                "creating index"
            );
            self.collection().create_index(keys, &index.options).await?;
        }

        self.indexes_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn ready(&self) -> MapperResult<&Arc<dyn StoreCollection>> {
        self.ensure_indexes().await?;
        Ok(self.collection())
    }

    /// A fresh, unsaved record with the schema's field defaults.
    pub fn instantiate(&self) -> M {
        let mut record = Record::new();
        self.apply_defaults(&mut record);
        M::from_record(record)
    }

    /// Builds a record from a stored document. The record is fetched, not new and clean.
    ///
    /// Columns without a declared field are ignored; declared fields missing from the document
    /// keep their schema default.
    pub fn hydrate(&self, document: Document) -> M {
        M::from_record(self.hydrate_record(document))
    }

    fn hydrate_record(&self, mut document: Document) -> Record {
        let coercer = self.coercer();
        let identifier = self.meta.identifier();
        let id = document
            .remove(ID_COLUMN)
            .map(|id| coercer.to_domain(id, identifier));

        let mut record = Record::hydrated(id);
        self.apply_defaults(&mut record);

        for (column, value) in document {
            if let Some(field) = self.meta.field_by_column(&column) {
                record.set_clean(field.name.clone(), coercer.to_domain(value, field));
            }
        }
        record
    }

    fn apply_defaults(&self, record: &mut Record) {
        for field in self.meta.fields() {
            if let Some(default) = &field.default {
                record.set_clean(field.name.clone(), default.clone());
            }
        }
    }

    /// A link to a saved record of this model.
    pub fn reference(&self, model: &M) -> Option<RecordRef> {
        model
            .record()
            .id()
            .filter(|id| !id.is_null())
            .map(|id| RecordRef::new(self.meta.model(), id.clone()))
    }

    /// Translates a record's fields into store writes.
    ///
    /// Fields are skipped when they are the identifier and `skip_identifier` is set, when the
    /// record is not new and the field is not dirty, or when the field is readonly. A field
    /// holding an atomic operation is reset to `Null` on the record once the whole payload is
    /// built; the operation is kept in [`WritePayload::consumed`] so a failed write can restore
    /// it.
    pub fn build_write_payload(
        &self,
        record: &mut Record,
        tag: Option<&str>,
        skip_identifier: bool,
        is_new: bool,
    ) -> MapperResult<WritePayload> {
        let coercer = self.coercer();
        let mut payload = WritePayload::new(tag);

        for field in self.meta.fields() {
            let is_identifier = self.meta.is_identifier(field);
            if skip_identifier && is_identifier {
                continue;
            }
            if !is_new && !record.is_dirty(&field.name) {
                continue;
            }
            if field.readonly {
                continue;
            }

            let value = if is_identifier {
                record.id()
            } else {
                record.get(&field.name)
            };

            match coercer.to_store(value.unwrap_or(&Value::Null), field)? {
                Coerced::Unset => payload.set_unset(&field.column),
                Coerced::Literal(value) => payload.set_literal(&field.column, value),
                Coerced::Atomic(op) => {
                    if is_new {
                        if let (Some(default), Some(domain)) = (op.default, op.domain_default) {
                            payload.set_literal(&field.column, default);
                            payload.atomic_defaults.push((field.name.clone(), domain));
                        }
                    } else {
                        payload.set_operation(op.operator, &field.column, op.value);
                    }
                    payload
                        .consumed
                        .push((field.name.clone(), value.cloned().unwrap_or(Value::Null)));
                }
            }
        }

        for (field, _) in &payload.consumed {
            record.clear_value(field);
        }
        Ok(payload)
    }

    /// Inserts a new record or writes the dirty fields of an existing one.
    ///
    /// After an update that used `$inc` or `$unset` the record is reloaded so it reflects the
    /// values computed by the store.
    ///
    /// # Errors
    ///
    /// Saving a removed record is an [`InvalidState`](MapperError::InvalidState) error. Hook
    /// and coercion errors abort the save before anything is written.
    pub async fn save(&self, model: &mut M, options: &WriteOptions) -> MapperResult<()> {
        if model.record().is_removed() {
            return Err(MapperError::InvalidState(format!(
                "cannot save a removed `{}` record",
                self.meta.model()
            )));
        }

        let is_new = model.record().is_new();
        self.hooks.dispatch(HookPoint::BeforeSave, model, is_new)?;

        if is_new {
            self.insert(model, options).await?;
        } else {
            self.update(model, options).await?;
        }

        self.hooks.dispatch(HookPoint::AfterSave, model, is_new)?;
        model.record_mut().mark_persisted();
        Ok(())
    }

    async fn insert(&self, model: &mut M, options: &WriteOptions) -> MapperResult<()> {
        let mut payload = self.build_write_payload(model.record_mut(), None, false, true)?;
        let defaults = std::mem::take(&mut payload.atomic_defaults);
        let consumed = std::mem::take(&mut payload.consumed);

        let written = match self.ready().await {
            Ok(collection) => collection.insert(payload.into_insert(), options).await,
            Err(err) => Err(err),
        };
        let id = match written {
            Ok(id) => id,
            Err(err) => {
                restore(model.record_mut(), consumed);
                return Err(err);
            }
        };
        debug!(
            model = self.meta.model(),
            collection = self.meta.collection(),
            id = %id,
            "inserted record"
        );

        let id = self.coercer().to_domain(id, self.meta.identifier());
        let record = model.record_mut();
        record.set_id(id);
        record.mark_inserted();
        for (field, value) in defaults {
            model.assign(&field, value);
        }
        Ok(())
    }

    async fn update(&self, model: &mut M, options: &WriteOptions) -> MapperResult<()> {
        let filter = self.identifier_filter(model.record())?;
        let mut payload = self.build_write_payload(model.record_mut(), Some("$set"), true, false)?;
        let consumed = std::mem::take(&mut payload.consumed);

        if payload.is_empty() {
            trace!(
                model = self.meta.model(),
                collection = self.meta.collection(),
                "no dirty fields, skipping update"
            );
            return Ok(());
        }

        let reload = payload.touches("$inc") || payload.touches("$unset");
        let update = payload.into_update();
        debug!(
            model = self.meta.model(),
            collection = self.meta.collection(),
            filter = %filter,
            update = %update,
            "updating record"
        );

        let written = match self.ready().await {
            Ok(collection) => collection.update(filter, update, options).await,
            Err(err) => Err(err),
        };
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(err) => {
                restore(model.record_mut(), consumed);
                return Err(err);
            }
        };
        trace!(matched = outcome.matched, modified = outcome.modified, "update applied");

        if reload {
            self.reload(model).await?;
        }
        Ok(())
    }

    /// Deletes a saved record and clears its identifier.
    ///
    /// A record without an identifier is left alone and the store is not contacted. The
    /// identifier is only cleared once the store accepted the delete; a driver error keeps it.
    ///
    /// # Returns
    ///
    /// Whether a stored document was deleted.
    pub async fn remove(&self, model: &mut M, options: &WriteOptions) -> MapperResult<bool> {
        if !model.record().has_id() {
            return Ok(false);
        }

        let filter = self.identifier_filter(model.record())?;
        self.hooks.dispatch(HookPoint::BeforeRemove, model, false)?;

        let deleted = self.ready().await?.delete(filter.clone(), options).await?;
        if deleted == 0 {
            warn!(
                model = self.meta.model(),
                collection = self.meta.collection(),
                filter = %filter,
                "remove matched no stored document"
            );
        } else {
            debug!(
                model = self.meta.model(),
                collection = self.meta.collection(),
                filter = %filter,
                "removed record"
            );
        }

        let record = model.record_mut();
        record.clear_id();
        record.mark_removed();

        self.hooks.dispatch(HookPoint::AfterRemove, model, false)?;
        Ok(deleted > 0)
    }

    /// Replaces the record's field values with the stored ones.
    ///
    /// Returns `false`, leaving the record untouched, when nothing is stored under its
    /// identifier.
    pub async fn reload(&self, model: &mut M) -> MapperResult<bool> {
        let filter = self.identifier_filter(model.record())?;
        trace!(model = self.meta.model(), filter = %filter, "reloading record");

        match self.ready().await?.find_one(filter, None).await? {
            Some(document) => {
                *model.record_mut() = self.hydrate_record(document);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Looks a record up by identifier. A missing document is `Ok(None)`.
    pub async fn find_by_id(&self, id: impl Into<Value>) -> MapperResult<Option<M>> {
        let id = self.store_identifier(&id.into())?;
        let mut filter = Document::new();
        filter.insert(ID_COLUMN, id);

        let document = self.ready().await?.find_one(filter, None).await?;
        Ok(document.map(|document| self.hydrate(document)))
    }

    /// Loads the record a reference points to.
    ///
    /// The reference must name this model or one of its subtypes; anything else is a
    /// [`Mapping`](MapperError::Mapping) error.
    pub async fn find_by_ref(&self, link: &RecordRef) -> MapperResult<Option<M>> {
        if !self.models.is_a(link.model(), self.meta.model()) {
            return Err(MapperError::Mapping(format!(
                "`{}` reference cannot be loaded as `{}`",
                link.model(),
                self.meta.model()
            )));
        }
        self.find_by_id(link.id().clone()).await
    }

    /// Runs a query, or matches every document when `query` is `None`.
    ///
    /// `fields` restricts the returned columns; an empty slice returns whole documents.
    pub async fn find_by_filter(
        self: &Arc<Self>,
        query: Option<&Query>,
        fields: &[&str],
    ) -> MapperResult<ResultCursor<M>> {
        let filter = self.translate_filter(query)?;
        let raw = self.ready().await?.find(filter, self.projection(fields)).await?;
        Ok(ResultCursor::new(raw, Arc::downgrade(self)))
    }

    /// Atomically updates the first matching document and returns a cursor over it, as it was
    /// before the update.
    pub async fn find_by_filter_and_modify(
        self: &Arc<Self>,
        query: Option<&Query>,
        update: Document,
        fields: &[&str],
    ) -> MapperResult<ResultCursor<M>> {
        let filter = self.translate_filter(query)?;
        let document = self
            .ready()
            .await?
            .find_and_modify(filter, update, self.projection(fields))
            .await?;
        Ok(ResultCursor::new(
            Box::new(SingleCursor::from(document)),
            Arc::downgrade(self),
        ))
    }

    pub async fn count(&self, query: Option<&Query>) -> MapperResult<u64> {
        let filter = self.translate_filter(query)?;
        self.ready().await?.count(filter).await
    }

    /// The distinct stored values of `field` among matching documents.
    pub async fn distinct(&self, query: Option<&Query>, field: &str) -> MapperResult<Vec<Value>> {
        let filter = self.translate_filter(query)?;
        let column = self.meta.column_for(field);
        let values = self.ready().await?.distinct(column, filter).await?;

        let coercer = self.coercer();
        Ok(match self.meta.field(field) {
            Some(descriptor) => values
                .into_iter()
                .map(|value| coercer.to_domain(value, descriptor))
                .collect(),
            None => values.into_iter().map(Value::from).collect(),
        })
    }

    /// Deletes every matching document, or the whole collection when `query` is `None`.
    pub async fn remove_by_filter(&self, query: Option<&Query>, options: &WriteOptions) -> MapperResult<u64> {
        let filter = self.translate_filter(query)?;
        debug!(
            model = self.meta.model(),
            collection = self.meta.collection(),
            filter = %filter,
            "removing by filter"
        );
        self.ready().await?.delete_many(filter, options).await
    }

    /// Maps a query's logical field names to columns and coerces identifier operands.
    pub fn translate_filter(&self, query: Option<&Query>) -> MapperResult<Document> {
        match query {
            Some(query) => self.translate_document(query.filter_document()),
            None => Ok(Document::new()),
        }
    }

    fn translate_document(&self, filter: &Document) -> MapperResult<Document> {
        let mut translated = Document::new();

        for (key, value) in filter {
            if key.starts_with('$') {
                translated.insert(key.clone(), self.translate_logical(value)?);
                continue;
            }

            let column = self.meta.column_for(key).to_string();
            let value = match self.meta.field(key) {
                Some(field) => self.translate_operand(value, field)?,
                None => value.clone(),
            };
            translated.insert(column, value);
        }

        Ok(translated)
    }

    fn translate_logical(&self, value: &Bson) -> MapperResult<Bson> {
        match value {
            Bson::Array(clauses) => clauses
                .iter()
                .map(|clause| match clause {
                    Bson::Document(clause) => self.translate_document(clause).map(Bson::Document),
                    other => Ok(other.clone()),
                })
                .collect::<MapperResult<Vec<_>>>()
                .map(Bson::Array),
            other => Ok(other.clone()),
        }
    }

    fn translate_operand(&self, value: &Bson, field: &FieldDescriptor) -> MapperResult<Bson> {
        let Some(key_type) = self.key_type(field) else {
            return Ok(value.clone());
        };

        match value {
            Bson::Document(operators) if operators.keys().all(|key| key.starts_with('$')) => {
                let mut translated = Document::new();
                for (operator, operand) in operators {
                    let operand = match (operator.as_str(), operand) {
                        ("$in" | "$nin" | "$all", Bson::Array(items)) => Bson::Array(
                            items
                                .iter()
                                .map(|item| self.coerce_key(item, &key_type))
                                .collect::<MapperResult<_>>()?,
                        ),
                        ("$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte", operand) => {
                            self.coerce_key(operand, &key_type)?
                        }
                        (_, operand) => operand.clone(),
                    };
                    translated.insert(operator.clone(), operand);
                }
                Ok(Bson::Document(translated))
            }
            other => self.coerce_key(other, &key_type),
        }
    }

    /// The identifier-like type whose string operands must be converted, if any.
    fn key_type(&self, field: &FieldDescriptor) -> Option<FieldType> {
        let key_type = match &field.field_type {
            FieldType::Reference(target) if target.mode == EmbedMode::ById => {
                self.models.get(&target.model)?.identifier().field_type.clone()
            }
            other => other.clone(),
        };
        matches!(key_type, FieldType::ObjectId | FieldType::Uuid).then_some(key_type)
    }

    fn coerce_key(&self, operand: &Bson, key_type: &FieldType) -> MapperResult<Bson> {
        match operand {
            Bson::String(text) => self.coercer().coerce(&Value::from(text.as_str()), key_type, false),
            other => Ok(other.clone()),
        }
    }

    fn store_identifier(&self, id: &Value) -> MapperResult<Bson> {
        self.coercer()
            .coerce(id, &self.meta.identifier().field_type, false)
    }

    fn identifier_filter(&self, record: &Record) -> MapperResult<Document> {
        let id = record.id().filter(|id| !id.is_null()).ok_or_else(|| {
            MapperError::InvalidState(format!("`{}` record has no identifier", self.meta.model()))
        })?;

        let mut filter = Document::new();
        filter.insert(ID_COLUMN, self.store_identifier(id)?);
        Ok(filter)
    }

    fn projection(&self, fields: &[&str]) -> Option<Document> {
        if fields.is_empty() {
            return None;
        }

        let mut projection = Document::new();
        for field in fields {
            projection.insert(self.meta.column_for(field), 1);
        }
        Some(projection)
    }
}

/// Puts atomic operations consumed by a failed write back onto the record.
fn restore(record: &mut Record, consumed: Vec<(String, Value)>) {
    for (field, value) in consumed {
        record.set(field, value);
    }
}
