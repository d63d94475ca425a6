//! Domain-side values held by mapped records.
//!
//! A [`Value`] is what a record stores in memory. The store-native representation is always a
//! [`Bson`] value and is produced only by the [`TypeCoercer`](crate::coerce::TypeCoercer).

use std::collections::BTreeMap;

use bson::{Bson, spec::BinarySubtype};
use chrono::{DateTime, FixedOffset, Utc};

use crate::atomic::AtomicOperation;

/// A value stored in a domain record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value. Writing `Null` unsets the field in the store.
    Null,
    Bool(bool),
    /// Integer of any width; the declared field type picks the store width.
    Int(i64),
    Double(f64),
    String(String),
    /// A date-time that keeps the caller's offset.
    DateTime(DateTime<FixedOffset>),
    Binary(Vec<u8>),
    /// Executable code.
    Code(String),
    Array(Vec<Value>),
    Document(BTreeMap<String, Value>),
    /// A link to another mapped record.
    Reference(RecordRef),
    /// A deferred server-side mutation instead of a literal value.
    Atomic(AtomicOperation),
    /// A value already in its store-native representation.
    Raw(Bson),
}

impl Value {
    /// Wraps raw bytes as a binary value.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    /// Wraps source text as executable code.
    pub fn code(source: impl Into<String>) -> Self {
        Value::Code(source.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) | Value::Code(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::DateTime(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&RecordRef> {
        match self {
            Value::Reference(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_atomic(&self) -> Option<&AtomicOperation> {
        match self {
            Value::Atomic(op) => Some(op),
            _ => None,
        }
    }
}

/// Structural pass-through from the store representation.
///
/// Store dates and timestamps become [`Value::DateTime`], object ids become their hex string and
/// both integer widths become [`Value::Int`]. Anything without a domain counterpart stays
/// [`Value::Raw`].
impl From<Bson> for Value {
    fn from(bson: Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(value) => Value::Bool(value),
            Bson::Int32(value) => Value::Int(i64::from(value)),
            Bson::Int64(value) => Value::Int(value),
            Bson::Double(value) => Value::Double(value),
            Bson::String(value) => Value::String(value),
            Bson::DateTime(value) => match DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis()) {
                Some(datetime) => Value::DateTime(datetime.into()),
                None => Value::Raw(Bson::DateTime(value)),
            },
            Bson::Timestamp(value) => match DateTime::<Utc>::from_timestamp(i64::from(value.time), 0) {
                Some(datetime) => Value::DateTime(datetime.into()),
                None => Value::Raw(Bson::Timestamp(value)),
            },
            Bson::ObjectId(oid) => Value::String(oid.to_hex()),
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Generic => Value::Binary(binary.bytes),
            Bson::JavaScriptCode(code) => Value::Code(code),
            Bson::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Bson::Document(document) => Value::Document(
                document
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
            other => Value::Raw(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::DateTime(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value.into())
    }
}

impl From<AtomicOperation> for Value {
    fn from(op: AtomicOperation) -> Self {
        Value::Atomic(op)
    }
}

impl From<RecordRef> for Value {
    fn from(link: RecordRef) -> Self {
        Value::Reference(link)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// An unresolved link to a record of another mapped model.
///
/// Two links are equal when they point at the same model and identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRef {
    model: String,
    id: Box<Value>,
}

impl RecordRef {
    pub fn new(model: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            model: model.into(),
            id: Box::new(id.into()),
        }
    }

    /// The name of the referenced model.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The identifier of the referenced record.
    pub fn id(&self) -> &Value {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    #[test]
    fn integers_of_both_widths_lift_to_int() {
        assert_eq!(Value::from(Bson::Int32(7)), Value::Int(7));
        assert_eq!(Value::from(Bson::Int64(7)), Value::Int(7));
    }

    #[test]
    fn object_ids_lift_to_hex_strings() {
        let oid = ObjectId::new();
        assert_eq!(Value::from(Bson::ObjectId(oid)), Value::String(oid.to_hex()));
    }

    #[test]
    fn store_dates_lift_to_utc_datetimes() {
        let lifted = Value::from(Bson::DateTime(bson::DateTime::from_millis(86_400_000)));
        let expected = DateTime::<Utc>::from_timestamp(86_400, 0).unwrap();
        assert_eq!(lifted, Value::DateTime(expected.into()));
    }

    #[test]
    fn nested_documents_are_lifted_recursively() {
        let lifted = Value::from(Bson::Document(doc! { "tags": ["a", 1_i32] }));
        let Value::Document(map) = lifted else {
            panic!("expected a document");
        };
        assert_eq!(
            map.get("tags"),
            Some(&Value::Array(vec![Value::from("a"), Value::Int(1)]))
        );
    }

    #[test]
    fn values_without_a_domain_form_stay_raw() {
        let decimal = Bson::MinKey;
        assert_eq!(Value::from(decimal.clone()), Value::Raw(decimal));
    }
}
