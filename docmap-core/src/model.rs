//! Mapped records and the domain-model contract.
//!
//! A [`Record`] is the mapper's view of a domain object: its identifier, the field values keyed by
//! logical name, and the bookkeeping that drives partial updates. Domain types wrap a record and
//! implement [`Model`] to describe themselves.
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! #[derive(Debug)]
//! pub struct Log {
//!     record: Record,
//! }
//!
//! impl Model for Log {
//!     fn model_name() -> &'static str {
//!         "Log"
//!     }
//!
//!     fn schema() -> ModelSchema {
//!         ModelSchema::builder("logs")
//!             .field(FieldDescriptor::new("name", FieldType::String))
//!             .build()
//!     }
//!
//!     fn from_record(record: Record) -> Self {
//!         Self { record }
//!     }
//!
//!     fn record(&self) -> &Record {
//!         &self.record
//!     }
//!
//!     fn record_mut(&mut self) -> &mut Record {
//!         &mut self.record
//!     }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::MapperResult,
    value::{RecordRef, Value},
};

/// The connection name used by models that do not pick one.
pub const DEFAULT_CONNECTION: &str = "default";

/// The in-memory state of a mapped domain object.
///
/// A record starts out new and unfetched. Saving it assigns an identifier, marks it fetched and
/// clears the dirty set. Removing it clears the identifier and is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: Option<Value>,
    values: BTreeMap<String, Value>,
    dirty: BTreeSet<String>,
    new: bool,
    fetched: bool,
    removed: bool,
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Record {
    pub fn new() -> Self {
        Self {
            id: None,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
            new: true,
            fetched: false,
            removed: false,
        }
    }

    /// The value of a field, `None` if it was never set.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Sets a field and marks it dirty, even if the value did not change.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        self.dirty.insert(field.clone());
        self.values.insert(field, value.into());
    }

    /// Sets a field without marking it dirty. Used when hydrating from the store.
    pub fn set_clean(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Resets a field to [`Value::Null`] without touching the dirty set.
    pub(crate) fn clear_value(&mut self, field: &str) {
        if let Some(value) = self.values.get_mut(field) {
            *value = Value::Null;
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn has_id(&self) -> bool {
        self.id.as_ref().is_some_and(|id| !id.is_null())
    }

    /// Sets the identifier. A new record stays new until it is saved, so this can preset the
    /// identifier of a record before its insert.
    pub fn set_id(&mut self, id: impl Into<Value>) {
        self.id = Some(id.into());
    }

    pub(crate) fn clear_id(&mut self) {
        self.id = None;
    }

    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Whether the record was hydrated from, or synchronized with, the store.
    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
        self.fetched = false;
    }

    pub fn is_dirty(&self, field: &str) -> bool {
        self.dirty.contains(field)
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Marks a record whose insert succeeded. Its dirty set is kept until the save completes.
    pub(crate) fn mark_inserted(&mut self) {
        self.new = false;
        self.fetched = true;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.dirty.clear();
        self.fetched = true;
        self.new = false;
    }

    /// Starts a record hydrated from the store with the given identifier.
    pub(crate) fn hydrated(id: Option<Value>) -> Self {
        Self {
            new: false,
            id,
            values: BTreeMap::new(),
            dirty: BTreeSet::new(),
            fetched: true,
            removed: false,
        }
    }
}

/// The contract a domain type implements to be mapped.
///
/// Only [`schema`](Model::schema) and the record accessors are required. Hooks default to no-ops;
/// an error returned by a hook aborts the surrounding save or remove.
pub trait Model: Send + Sync + Sized + 'static {
    /// The name used to register the model and to resolve references to it.
    fn model_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn schema() -> crate::schema::ModelSchema;

    /// The name of the connection the model's collection lives on.
    fn connection_name() -> &'static str {
        DEFAULT_CONNECTION
    }

    fn from_record(record: Record) -> Self;

    fn record(&self) -> &Record;

    fn record_mut(&mut self) -> &mut Record;

    /// The field setter. Hydration of atomic defaults after insert goes through it, so models can
    /// override it to react to assignments.
    fn assign(&mut self, field: &str, value: Value) {
        self.record_mut().set(field, value);
    }

    fn before_save(&mut self, _is_new: bool) -> MapperResult<()> {
        Ok(())
    }

    fn after_save(&mut self, _is_new: bool) -> MapperResult<()> {
        Ok(())
    }

    fn before_remove(&mut self) -> MapperResult<()> {
        Ok(())
    }

    fn after_remove(&mut self) -> MapperResult<()> {
        Ok(())
    }

    /// A link to this record, `None` until it has an identifier.
    fn link(&self) -> Option<RecordRef> {
        self.record()
            .id()
            .filter(|id| !id.is_null())
            .map(|id| RecordRef::new(Self::model_name(), id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_marks_dirty_even_for_equal_values() {
        let mut record = Record::new();
        record.set_clean("name", "a");
        record.set("name", "a");
        assert!(record.is_dirty("name"));
    }

    #[test]
    fn clean_writes_do_not_mark_dirty() {
        let mut record = Record::new();
        record.set_clean("name", "a");
        assert!(!record.is_dirty("name"));
        assert_eq!(record.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn persisting_clears_dirty_state() {
        let mut record = Record::new();
        record.set("name", "a");
        record.set_id(Value::from("abc"));
        record.mark_persisted();

        assert!(!record.is_new());
        assert!(record.is_fetched());
        assert_eq!(record.dirty_fields().count(), 0);
    }

    #[test]
    fn null_identifier_is_not_an_identifier() {
        let mut record = Record::new();
        assert!(!record.has_id());
        record.set_id(Value::Null);
        assert!(!record.has_id());
    }
}
