//! Index declarations.
//!
//! Indexes are declared on the model schema and created once per model by
//! [`RecordService::ensure_indexes`](crate::service::RecordService::ensure_indexes).

use std::time::Duration;

use bson::{Bson, Document};

use crate::{config::WriteAck, schema::ModelMeta};

/// Options attached to an index declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub unique: bool,
    pub sparse: bool,
    /// Build the index without blocking other operations.
    pub background: bool,
    /// Documents expire this long after the indexed date.
    pub expire_after: Option<Duration>,
    /// Write-concern override for the index build.
    pub write_ack: Option<WriteAck>,
}

/// A declared index: ordered field/direction pairs plus options.
///
/// Directions are kept as declared (`"asc"`, `"desc"`, `1`, `-1`, `"text"`...) and normalized
/// when the index is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSpec {
    pub fields: Vec<(String, Bson)>,
    pub options: IndexOptions,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, direction: impl Into<Bson>) -> Self {
        self.fields.push((name.into(), direction.into()));
        self
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.options.sparse = true;
        self
    }

    pub fn background(mut self) -> Self {
        self.options.background = true;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.options.expire_after = Some(ttl);
        self
    }

    pub fn write_ack(mut self, ack: WriteAck) -> Self {
        self.options.write_ack = Some(ack);
        self
    }

    /// The key document sent to the store: logical names mapped to columns and directions
    /// normalized.
    pub fn key_document(&self, meta: &ModelMeta) -> Document {
        self.fields
            .iter()
            .map(|(name, direction)| (meta.column_for(name).to_string(), normalize_direction(direction)))
            .collect()
    }
}

/// Normalizes `asc`/`ASC` to `1` and `desc`/`DESC` to `-1`. Other tokens pass through unchanged.
pub fn normalize_direction(token: &Bson) -> Bson {
    match token {
        Bson::String(value) if value == "asc" || value == "ASC" => Bson::Int32(1),
        Bson::String(value) if value == "desc" || value == "DESC" => Bson::Int32(-1),
        other => other.clone(),
    }
}
