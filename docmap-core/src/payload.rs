//! Write payloads built from a record's fields.

use std::collections::BTreeMap;

use bson::{Bson, Document};

use crate::value::Value;

/// The store-side writes computed for one record.
///
/// Literal values, operator updates and unset columns are kept apart until the payload is turned
/// into an insert document or an update document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePayload {
    /// The operator literal values are nested under, `None` for a flat insert document.
    pub tag: Option<String>,
    /// Literal values by column.
    pub fields: Document,
    /// Atomic operations by operator, then by column.
    pub operations: BTreeMap<&'static str, Document>,
    /// Columns to remove from the stored document.
    pub unset: Document,
    /// Defaults of atomic operations on a new record, by logical field name. They are assigned
    /// back onto the record after its insert.
    pub atomic_defaults: Vec<(String, Value)>,
    /// Atomic operations taken off the record while building, by logical field name. They are
    /// put back if the write fails.
    pub consumed: Vec<(String, Value)>,
}

impl WritePayload {
    pub fn new(tag: Option<&str>) -> Self {
        Self {
            tag: tag.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.operations.is_empty() && self.unset.is_empty()
    }

    /// Whether the update uses `operator`, either as the literal tag or as an atomic operation.
    pub fn touches(&self, operator: &str) -> bool {
        match operator {
            "$unset" => !self.unset.is_empty(),
            op if self.tag.as_deref() == Some(op) && !self.fields.is_empty() => true,
            op => self.operations.contains_key(op),
        }
    }

    pub(crate) fn set_literal(&mut self, column: &str, value: Bson) {
        self.fields.insert(column, value);
    }

    pub(crate) fn set_operation(&mut self, operator: &'static str, column: &str, value: Bson) {
        self.operations
            .entry(operator)
            .or_default()
            .insert(column, value);
    }

    pub(crate) fn set_unset(&mut self, column: &str) {
        self.unset.insert(column, "");
    }

    /// The full document for an insert. Atomic operations and unset columns are dropped.
    pub fn into_insert(self) -> Document {
        self.fields
    }

    /// The operator-tagged document for a partial update.
    pub fn into_update(self) -> Document {
        let mut update = Document::new();

        if !self.fields.is_empty() {
            match self.tag {
                Some(tag) => {
                    update.insert(tag, self.fields);
                }
                None => {
                    for (column, value) in self.fields {
                        update.insert(column, value);
                    }
                }
            }
        }
        for (operator, columns) in self.operations {
            update.insert(operator, columns);
        }
        if !self.unset.is_empty() {
            update.insert("$unset", self.unset);
        }

        update
    }
}
