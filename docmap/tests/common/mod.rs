#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docmap::{
    bson::{Bson, Document},
    chrono::Utc,
    memory::MemoryDriver,
    prelude::*,
};

#[derive(Debug)]
pub struct Log {
    record: Record,
    pub events: Vec<String>,
}

impl Model for Log {
    fn model_name() -> &'static str {
        "Log"
    }

    fn schema() -> ModelSchema {
        ModelSchema::builder("logs")
            .field(FieldDescriptor::new("name", FieldType::String))
            .field(FieldDescriptor::new("sort", FieldType::Int).default_value(500))
            .field(FieldDescriptor::new("age", FieldType::Int))
            .field(FieldDescriptor::new("hits", FieldType::Int))
            .field(FieldDescriptor::new("message", FieldType::String).column("msg"))
            .field(FieldDescriptor::new("created", FieldType::Date))
            .field(FieldDescriptor::new("touched", FieldType::Date).timestamp())
            .field(FieldDescriptor::new("origin", FieldType::String).readonly())
            .field(FieldDescriptor::new("tags", FieldType::array_of(FieldType::String)))
            .index(IndexSpec::new().field("name", "asc"))
            .build()
    }

    fn from_record(record: Record) -> Self {
        Self {
            record,
            events: Vec::new(),
        }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn assign(&mut self, field: &str, value: Value) {
        match (field, value) {
            ("message", Value::String(text)) => self.record.set(field, format!("#{text}")),
            (field, value) => self.record.set(field, value),
        }
    }

    fn before_save(&mut self, is_new: bool) -> MapperResult<()> {
        self.events.push(format!("model:before_save:{is_new}"));
        if is_new && self.record.get("created").is_none() {
            self.record.set("created", Utc::now());
        }
        Ok(())
    }

    fn after_save(&mut self, is_new: bool) -> MapperResult<()> {
        self.events.push(format!("model:after_save:{is_new}"));
        Ok(())
    }

    fn before_remove(&mut self) -> MapperResult<()> {
        self.events.push("model:before_remove".to_string());
        Ok(())
    }

    fn after_remove(&mut self) -> MapperResult<()> {
        self.events.push("model:after_remove".to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct Author {
    record: Record,
}

impl Model for Author {
    fn model_name() -> &'static str {
        "Author"
    }

    fn schema() -> ModelSchema {
        ModelSchema::builder("authors")
            .field(FieldDescriptor::new("name", FieldType::String))
            .field(FieldDescriptor::new("score", FieldType::Int))
            .index(IndexSpec::new().field("name", 1).unique())
            .build()
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

/// A subtype of [`Author`] kept in its own collection.
#[derive(Debug)]
pub struct Editor {
    record: Record,
}

impl Model for Editor {
    fn model_name() -> &'static str {
        "Editor"
    }

    fn schema() -> ModelSchema {
        ModelSchema::builder("editors")
            .field(FieldDescriptor::new("name", FieldType::String))
            .extends("Author")
            .build()
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

#[derive(Debug)]
pub struct Post {
    record: Record,
}

impl Model for Post {
    fn model_name() -> &'static str {
        "Post"
    }

    fn schema() -> ModelSchema {
        ModelSchema::builder("posts")
            .field(FieldDescriptor::new("title", FieldType::String))
            .field(FieldDescriptor::new(
                "author",
                FieldType::Reference(ReferenceDescriptor::to::<Author>(EmbedMode::ById)),
            ))
            .field(FieldDescriptor::new(
                "reviewer",
                FieldType::Reference(ReferenceDescriptor::to::<Author>(EmbedMode::Link)),
            ))
            .field(FieldDescriptor::new("views", FieldType::Long))
            .build()
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

/// A model whose connection is never opened.
#[derive(Debug)]
pub struct Archived {
    record: Record,
}

impl Model for Archived {
    fn model_name() -> &'static str {
        "Archived"
    }

    fn schema() -> ModelSchema {
        ModelSchema::builder("archive").build()
    }

    fn connection_name() -> &'static str {
        "archive"
    }

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn record(&self) -> &Record {
        &self.record
    }

    fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub operation: &'static str,
    pub collection: String,
    pub document: Option<Document>,
}

/// A memory driver that records every collection call.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    pub inner: MemoryDriver,
    pub calls: CallLog,
}

impl RecordingDriver {
    pub fn operations(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|call| call.operation).collect()
    }

    pub fn last(&self, operation: &str) -> Option<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|call| call.operation == operation)
            .cloned()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl StoreDriver for RecordingDriver {
    fn collection(&self, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(RecordingCollection {
            inner: self.inner.collection(name),
            calls: Arc::clone(&self.calls),
        })
    }
}

#[derive(Debug)]
struct RecordingCollection {
    inner: Arc<dyn StoreCollection>,
    calls: CallLog,
}

impl RecordingCollection {
    fn record(&self, operation: &'static str, document: Option<&Document>) {
        self.calls.lock().unwrap().push(Call {
            operation,
            collection: self.inner.name().to_string(),
            document: document.cloned(),
        });
    }
}

#[async_trait]
impl StoreCollection for RecordingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(&self, filter: Document, projection: Option<Document>) -> MapperResult<Option<Document>> {
        self.record("find_one", Some(&filter));
        self.inner.find_one(filter, projection).await
    }

    async fn find(&self, filter: Document, projection: Option<Document>) -> MapperResult<Box<dyn RawCursor>> {
        self.record("find", Some(&filter));
        self.inner.find(filter, projection).await
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        projection: Option<Document>,
    ) -> MapperResult<Option<Document>> {
        self.record("find_and_modify", Some(&update));
        self.inner.find_and_modify(filter, update, projection).await
    }

    async fn insert(&self, document: Document, options: &WriteOptions) -> MapperResult<Bson> {
        self.record("insert", Some(&document));
        self.inner.insert(document, options).await
    }

    async fn update(&self, filter: Document, update: Document, options: &WriteOptions) -> MapperResult<UpdateOutcome> {
        self.record("update", Some(&update));
        self.inner.update(filter, update, options).await
    }

    async fn delete(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64> {
        self.record("delete", Some(&filter));
        self.inner.delete(filter, options).await
    }

    async fn delete_many(&self, filter: Document, options: &WriteOptions) -> MapperResult<u64> {
        self.record("delete_many", Some(&filter));
        self.inner.delete_many(filter, options).await
    }

    async fn count(&self, filter: Document) -> MapperResult<u64> {
        self.record("count", Some(&filter));
        self.inner.count(filter).await
    }

    async fn distinct(&self, column: &str, filter: Document) -> MapperResult<Vec<Bson>> {
        self.record("distinct", Some(&filter));
        self.inner.distinct(column, filter).await
    }

    async fn create_index(&self, keys: Document, options: &IndexOptions) -> MapperResult<()> {
        self.record("create_index", Some(&keys));
        self.inner.create_index(keys, options).await
    }
}

pub async fn mapper() -> (Mapper, RecordingDriver) {
    let driver = RecordingDriver::default();
    let mapper = Mapper::with_driver(Arc::new(driver.clone())).await;
    (mapper, driver)
}

pub fn options() -> WriteOptions {
    WriteOptions::default()
}
