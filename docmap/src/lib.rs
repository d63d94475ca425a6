//! Main docmap crate providing a unified interface for mapping domain records to document stores.
//!
//! This crate is the primary entry point for users of the docmap framework. It re-exports the
//! core types from the sub-crates and provides access to the available store drivers.
//!
//! # Features
//!
//! - **Declarative schemas** - Typed fields, column renames, defaults, readonly and timestamp fields
//! - **Partial updates** - Only dirty fields are written back, atomic operations run on the server
//! - **References** - Links between models, stored by identifier or as `{$ref, $id}` documents
//! - **Flexible querying** - A chainable filter builder and lazily hydrated result cursors
//! - **Lifecycle hooks** - Per-model and per-service handlers around save and remove
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use docmap::{prelude::*, memory::MemoryDriver};
//!
//! #[derive(Debug)]
//! pub struct Log {
//!     record: Record,
//! }
//!
//! impl Model for Log {
//!     fn model_name() -> &'static str { "Log" }
//!
//!     fn schema() -> ModelSchema {
//!         ModelSchema::builder("logs")
//!             .field(FieldDescriptor::new("name", FieldType::String))
//!             .field(FieldDescriptor::new("hits", FieldType::Int).default_value(0))
//!             .index(IndexSpec::new().field("name", "asc"))
//!             .build()
//!     }
//!
//!     fn from_record(record: Record) -> Self { Self { record } }
//!     fn record(&self) -> &Record { &self.record }
//!     fn record_mut(&mut self) -> &mut Record { &mut self.record }
//! }
//!
//! #[tokio::main]
//! async fn main() -> MapperResult<()> {
//!     let mapper = Mapper::with_driver(Arc::new(MemoryDriver::new())).await;
//!     let logs = mapper.service::<Log>().await?;
//!
//!     // Insert a record
//!     let mut log = logs.instantiate();
//!     log.assign("name", "boot".into());
//!     logs.save(&mut log, &WriteOptions::default()).await?;
//!
//!     // Increment a counter on the server
//!     log.assign("hits", AtomicOperation::increment(1).into());
//!     logs.save(&mut log, &WriteOptions::default()).await?;
//!
//!     // Query
//!     let mut query = Query::new();
//!     query.filter("hits >=", 1)?;
//!     let found = logs.find_by_filter(Some(&query), &[]).await?.materialize_all().await?;
//!     println!("Found logs: {:?}", found);
//!
//!     mapper.shutdown().await
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB driver (requires `mongodb` feature)

pub mod prelude;

pub use docmap_core::{
    atomic, coerce, config, cursor, driver, error, hooks, index, mapper, model, payload, query, registry, schema,
    service, value,
};
pub use docmap_core::mapper::Mapper;

// Re-export BSON and chrono types for convenience
pub use bson;
pub use chrono;

/// In-memory driver implementations.
pub mod memory {
    pub use docmap_memory::{MemoryCollection, MemoryCursor, MemoryDriver, MemoryDriverBuilder, MemoryStoreError};
}

/// MongoDB driver implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmap_mongodb::{MongoCollection, MongoCursor, MongoDriver, MongoDriverBuilder};
}
