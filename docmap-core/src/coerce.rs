//! Conversion between domain values and store-native values.
//!
//! [`TypeCoercer::to_store`] turns a record's [`Value`] into the [`Bson`] written for a field,
//! driven by the field's declared [`FieldType`]. [`TypeCoercer::to_domain`] is the reverse path
//! used when hydrating records from the store.
//!
//! Coercion is idempotent: a [`Value::Raw`] that is already in the target's native form is
//! returned as it is.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use bson::{Binary, Bson, Document, Timestamp, oid::ObjectId, spec::BinarySubtype};
use chrono::{DateTime, Utc};

use crate::{
    atomic::{AtomicOperation, ResolvedOperation},
    error::{MapperError, MapperResult},
    registry::MetadataRegistry,
    schema::{EmbedMode, FieldDescriptor, FieldType, ReferenceDescriptor},
    value::{RecordRef, Value},
};

/// The outcome of coercing one field for a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    /// The field has no value and should be removed from the stored document.
    Unset,
    Literal(Bson),
    /// A deferred server-side mutation to be placed under its operator.
    Atomic(ResolvedOperation),
}

/// Converts values for the fields of registered models.
///
/// The coercer borrows the metadata registry to resolve reference targets.
#[derive(Debug, Clone, Copy)]
pub struct TypeCoercer<'a> {
    models: &'a MetadataRegistry,
}

impl<'a> TypeCoercer<'a> {
    pub fn new(models: &'a MetadataRegistry) -> Self {
        Self { models }
    }

    /// Coerces a field value for writing.
    ///
    /// `Null` unsets the field, unless the field is a timestamp, which is stamped instead.
    /// Atomic operations are validated against the declared type and resolved into their
    /// operator form; an operation the type cannot hold fails with
    /// [`MapperError::TypeMismatch`].
    pub fn to_store(&self, value: &Value, field: &FieldDescriptor) -> MapperResult<Coerced> {
        match value {
            Value::Null if field.timestamp => Ok(Coerced::Literal(fresh_timestamp())),
            Value::Null => Ok(Coerced::Unset),
            Value::Atomic(op) => self.resolve_atomic(op, field).map(Coerced::Atomic),
            other => self
                .coerce(other, &field.field_type, field.timestamp)
                .map(Coerced::Literal),
        }
    }

    /// Coerces a value against a declared type.
    pub fn coerce(&self, value: &Value, field_type: &FieldType, timestamp: bool) -> MapperResult<Bson> {
        if let Value::Raw(raw) = value {
            return self.coerce_raw(raw, field_type, timestamp);
        }
        if let Value::Atomic(op) = value {
            return Err(MapperError::InvalidValue(format!(
                "`{}` atomic operation cannot be nested in a value",
                op.operator()
            )));
        }
        if value.is_null() {
            return Ok(if timestamp { fresh_timestamp() } else { Bson::Null });
        }

        match field_type {
            FieldType::String => stringify(value).map(Bson::String),
            FieldType::Int => {
                let number = integer(value)?;
                i32::try_from(number)
                    .map(Bson::Int32)
                    .map_err(|_| MapperError::InvalidValue(format!("{number} does not fit a 32-bit integer")))
            }
            FieldType::Long => integer(value).map(Bson::Int64),
            FieldType::Bool => Ok(Bson::Boolean(truthy(value))),
            FieldType::Double => floating(value).map(Bson::Double),
            FieldType::Blob => match value {
                Value::Binary(bytes) => Ok(binary(BinarySubtype::Generic, bytes.clone())),
                Value::String(text) => Ok(binary(BinarySubtype::Generic, text.as_bytes().to_vec())),
                other => Err(invalid(other, field_type)),
            },
            FieldType::Date if timestamp => Ok(fresh_timestamp()),
            FieldType::Date => date(value).map(Bson::DateTime),
            FieldType::ObjectId => match value {
                Value::String(hex) => ObjectId::parse_str(hex)
                    .map(Bson::ObjectId)
                    .map_err(|err| MapperError::InvalidValue(format!("`{hex}` is not an object id: {err}"))),
                other => Err(invalid(other, field_type)),
            },
            FieldType::Uuid => match value {
                Value::String(text) => uuid::Uuid::parse_str(text)
                    .map(|uuid| binary(BinarySubtype::Uuid, uuid.as_bytes().to_vec()))
                    .map_err(|err| MapperError::InvalidValue(format!("`{text}` is not a uuid: {err}"))),
                Value::Binary(bytes) if bytes.len() == 16 => Ok(binary(BinarySubtype::Uuid, bytes.clone())),
                other => Err(invalid(other, field_type)),
            },
            FieldType::Code => match value {
                Value::Code(source) | Value::String(source) => Ok(Bson::JavaScriptCode(source.clone())),
                other => Err(invalid(other, field_type)),
            },
            FieldType::Array => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.encode_untyped(item))
                    .collect::<MapperResult<Vec<_>>>()
                    .map(Bson::Array),
                Value::Document(_) => self.encode_untyped(value),
                scalar => Ok(Bson::Array(vec![self.encode_untyped(scalar)?])),
            },
            FieldType::ArrayOf(element) => {
                let items: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    Value::Document(entries) => entries.values().collect(),
                    scalar => vec![scalar],
                };
                items
                    .into_iter()
                    .map(|item| self.coerce(item, element, false))
                    .collect::<MapperResult<Vec<_>>>()
                    .map(Bson::Array)
            }
            FieldType::Reference(target) => self.reference(value, target),
            FieldType::Mixed => self.encode_untyped(value),
        }
    }

    /// Converts a stored value into its domain form for a field.
    ///
    /// Dates and timestamps become date-times and object ids become strings. Reference fields
    /// lift a stored identifier or link into an unresolved [`RecordRef`].
    pub fn to_domain(&self, value: Bson, field: &FieldDescriptor) -> Value {
        self.lift(value, &field.field_type)
    }

    fn lift(&self, value: Bson, field_type: &FieldType) -> Value {
        match (field_type, value) {
            (_, Bson::Null) => Value::Null,
            (FieldType::Reference(target), Bson::Document(link)) if is_link(&link) => {
                match link.get("$id").cloned() {
                    Some(id) => Value::Reference(RecordRef::new(target.model.clone(), self.lift_id(id, target))),
                    None => Value::from(Bson::Document(link)),
                }
            }
            (FieldType::Reference(_), value @ Bson::Document(_)) => Value::from(value),
            (FieldType::Reference(target), id) => {
                Value::Reference(RecordRef::new(target.model.clone(), self.lift_id(id, target)))
            }
            (FieldType::ArrayOf(element), Bson::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.lift(item, element))
                    .collect(),
            ),
            (FieldType::Uuid, Bson::Binary(bin)) if bin.subtype == BinarySubtype::Uuid => {
                match uuid::Uuid::from_slice(&bin.bytes) {
                    Ok(uuid) => Value::String(uuid.hyphenated().to_string()),
                    Err(_) => Value::Raw(Bson::Binary(bin)),
                }
            }
            (_, value) => Value::from(value),
        }
    }

    fn lift_id(&self, id: Bson, target: &ReferenceDescriptor) -> Value {
        match self.models.get(&target.model) {
            Some(meta) => self.lift(id, &meta.identifier().field_type),
            None => Value::from(id),
        }
    }

    fn coerce_raw(&self, raw: &Bson, field_type: &FieldType, timestamp: bool) -> MapperResult<Bson> {
        if is_native(raw, field_type) {
            return Ok(raw.clone());
        }

        match Value::from(raw.clone()) {
            Value::Raw(_) => Err(MapperError::InvalidValue(format!(
                "store value {raw} cannot be stored as `{field_type}`"
            ))),
            lifted => self.coerce(&lifted, field_type, timestamp),
        }
    }

    fn resolve_atomic(&self, op: &AtomicOperation, field: &FieldDescriptor) -> MapperResult<ResolvedOperation> {
        if !op.validate_type(&field.field_type) {
            return Err(MapperError::type_mismatch(op.operator(), &field.field_type));
        }

        let op = if op.needs_retyping() {
            op.retyped(&field.field_type, |value, element| self.coerce(value, element, false))?
        } else {
            op.clone()
        };

        let (value, default) = match &op {
            AtomicOperation::Increment(delta) => {
                let delta = self.coerce(&Value::Int(*delta), &field.field_type, false)?;
                (delta.clone(), Some(delta))
            }
            AtomicOperation::Rename(to) => (Bson::String(to.clone()), None),
            AtomicOperation::Push(value) => (self.encode_untyped(value)?, None),
            AtomicOperation::PushAll(values) => {
                let values = values
                    .iter()
                    .map(|value| self.encode_untyped(value))
                    .collect::<MapperResult<Vec<_>>>()?;
                let mut each = Document::new();
                each.insert("$each", values);
                (Bson::Document(each), None)
            }
        };

        Ok(ResolvedOperation {
            operator: op.operator(),
            value,
            default,
            domain_default: op.default_value(),
        })
    }

    fn reference(&self, value: &Value, target: &ReferenceDescriptor) -> MapperResult<Bson> {
        let link = match value {
            Value::Reference(link) if self.models.is_a(link.model(), &target.model) => link,
            other => return self.encode_untyped(other),
        };

        let meta = self.models.require(link.model())?;
        let id = self.coerce(link.id(), &meta.identifier().field_type, false)?;

        Ok(match target.mode {
            EmbedMode::ById => id,
            EmbedMode::Link => {
                let mut document = Document::new();
                document.insert("$ref", meta.collection());
                document.insert("$id", id);
                Bson::Document(document)
            }
        })
    }

    /// Encodes a value without a declared type.
    fn encode_untyped(&self, value: &Value) -> MapperResult<Bson> {
        Ok(match value {
            Value::Null => Bson::Null,
            Value::Bool(flag) => Bson::Boolean(*flag),
            Value::Int(number) => match i32::try_from(*number) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(*number),
            },
            Value::Double(number) => Bson::Double(*number),
            Value::String(text) => Bson::String(text.clone()),
            Value::DateTime(datetime) => Bson::DateTime(bson::DateTime::from_millis(datetime.timestamp_millis())),
            Value::Binary(bytes) => binary(BinarySubtype::Generic, bytes.clone()),
            Value::Code(source) => Bson::JavaScriptCode(source.clone()),
            Value::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| self.encode_untyped(item))
                    .collect::<MapperResult<_>>()?,
            ),
            Value::Document(entries) => {
                let mut document = Document::new();
                for (key, item) in entries {
                    document.insert(key.clone(), self.encode_untyped(item)?);
                }
                Bson::Document(document)
            }
            Value::Reference(link) => match self.models.get(link.model()) {
                Some(meta) => self.coerce(link.id(), &meta.identifier().field_type, false)?,
                None => self.encode_untyped(link.id())?,
            },
            Value::Atomic(op) => {
                return Err(MapperError::InvalidValue(format!(
                    "`{}` atomic operation cannot be nested in a value",
                    op.operator()
                )));
            }
            Value::Raw(raw) => raw.clone(),
        })
    }
}

static TIMESTAMP_INCREMENT: AtomicU32 = AtomicU32::new(1);

/// A store timestamp for the current second.
fn fresh_timestamp() -> Bson {
    let time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX))
        .unwrap_or_default();

    Bson::Timestamp(Timestamp {
        time,
        increment: TIMESTAMP_INCREMENT.fetch_add(1, Ordering::Relaxed),
    })
}

fn binary(subtype: BinarySubtype, bytes: Vec<u8>) -> Bson {
    Bson::Binary(Binary { subtype, bytes })
}

fn is_link(document: &Document) -> bool {
    document.contains_key("$ref") && document.contains_key("$id")
}

fn is_native(raw: &Bson, field_type: &FieldType) -> bool {
    match field_type {
        FieldType::String => matches!(raw, Bson::String(_)),
        FieldType::Int => matches!(raw, Bson::Int32(_)),
        FieldType::Long => matches!(raw, Bson::Int64(_)),
        FieldType::Bool => matches!(raw, Bson::Boolean(_)),
        FieldType::Double => matches!(raw, Bson::Double(_)),
        FieldType::Blob => matches!(raw, Bson::Binary(_)),
        FieldType::Date => matches!(raw, Bson::DateTime(_) | Bson::Timestamp(_)),
        FieldType::ObjectId => matches!(raw, Bson::ObjectId(_)),
        FieldType::Uuid => matches!(raw, Bson::Binary(bin) if bin.subtype == BinarySubtype::Uuid),
        FieldType::Code => matches!(raw, Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_)),
        FieldType::Array | FieldType::ArrayOf(_) => matches!(raw, Bson::Array(_)),
        FieldType::Reference(_) | FieldType::Mixed => true,
    }
}

fn invalid(value: &Value, field_type: &FieldType) -> MapperError {
    MapperError::InvalidValue(format!("{value:?} cannot be stored as `{field_type}`"))
}

fn stringify(value: &Value) -> MapperResult<String> {
    match value {
        Value::String(text) | Value::Code(text) => Ok(text.clone()),
        Value::Int(number) => Ok(number.to_string()),
        Value::Double(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::DateTime(datetime) => Ok(datetime.to_rfc3339()),
        other => Err(invalid(other, &FieldType::String)),
    }
}

fn integer(value: &Value) -> MapperResult<i64> {
    match value {
        Value::Int(number) => Ok(*number),
        Value::Bool(flag) => Ok(i64::from(*flag)),
        Value::Double(number) if number.is_finite() => Ok(number.trunc() as i64),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| MapperError::InvalidValue(format!("`{text}` is not an integer"))),
        other => Err(invalid(other, &FieldType::Long)),
    }
}

fn floating(value: &Value) -> MapperResult<f64> {
    match value {
        Value::Double(number) => Ok(*number),
        Value::Int(number) => Ok(*number as f64),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        Value::String(text) => text
            .trim()
            .parse()
            .map_err(|_| MapperError::InvalidValue(format!("`{text}` is not a number"))),
        other => Err(invalid(other, &FieldType::Double)),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Int(number) => *number != 0,
        Value::Double(number) => *number != 0.0,
        Value::String(text) => !(text.is_empty() || text == "0" || text.eq_ignore_ascii_case("false")),
        Value::Array(items) => !items.is_empty(),
        Value::Document(entries) => !entries.is_empty(),
        _ => true,
    }
}

/// Converts a date-time, or an epoch in seconds, to a store date.
fn date(value: &Value) -> MapperResult<bson::DateTime> {
    let millis = match value {
        Value::DateTime(datetime) => datetime.timestamp_millis(),
        Value::Int(seconds) => seconds.saturating_mul(1000),
        Value::Double(seconds) if seconds.is_finite() => (seconds * 1000.0) as i64,
        Value::String(text) => match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(datetime) => datetime.with_timezone(&Utc).timestamp_millis(),
            Err(_) => text
                .trim()
                .parse::<i64>()
                .map(|seconds| seconds.saturating_mul(1000))
                .map_err(|_| MapperError::InvalidValue(format!("`{text}` is not a date")))?,
        },
        other => return Err(invalid(other, &FieldType::Date)),
    };
    Ok(bson::DateTime::from_millis(millis))
}
