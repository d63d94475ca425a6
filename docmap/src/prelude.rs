//! Convenient re-exports of commonly used types from docmap.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - Models, records, schemas and values
//! - The mapper, record services and cursors
//! - Query construction and atomic operations
//! - Driver traits, configuration and error types

pub use docmap_core::{
    atomic::AtomicOperation,
    coerce::{Coerced, TypeCoercer},
    config::{ConnectionConfig, WriteAck, WriteOptions},
    cursor::ResultCursor,
    driver::{CursorOptions, DriverBuilder, RawCursor, StoreCollection, StoreDriver, UpdateOutcome},
    error::{MapperError, MapperResult},
    hooks::HookPoint,
    index::{IndexOptions, IndexSpec},
    mapper::Mapper,
    model::{Model, Record},
    query::{Query, SortDirection},
    registry::{ConnectionRegistry, MetadataRegistry},
    schema::{EmbedMode, FieldDescriptor, FieldType, ModelMeta, ModelSchema, ReferenceDescriptor},
    service::RecordService,
    value::{RecordRef, Value},
};
