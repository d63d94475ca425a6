//! Atomic update operations.
//!
//! Assigning an [`AtomicOperation`] to a record field defers the mutation to the store: saving
//! an existing record emits `{ operator: { column: value } }` instead of a literal value. For a
//! new record the operation contributes its default value (if it has one) as the field's initial
//! literal.
//!
//! ```ignore
//! log.assign("hits", AtomicOperation::increment(1).into());
//! log.assign("tags", AtomicOperation::push("rust").into());
//! service.save(&mut log, &WriteOptions::default()).await?;
//! ```

use bson::Bson;

use crate::{error::MapperResult, schema::FieldType, value::Value};

/// A deferred server-side mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOperation {
    /// Adds a delta to an integer field.
    Increment(i64),
    /// Renames the field's column to the given name.
    Rename(String),
    /// Appends one value to an array field.
    Push(Box<Value>),
    /// Appends several values to an array field.
    PushAll(Vec<Value>),
}

impl AtomicOperation {
    pub fn increment(delta: i64) -> Self {
        AtomicOperation::Increment(delta)
    }

    pub fn rename(to: impl Into<String>) -> Self {
        AtomicOperation::Rename(to.into())
    }

    pub fn push(value: impl Into<Value>) -> Self {
        AtomicOperation::Push(Box::new(value.into()))
    }

    pub fn push_all<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        AtomicOperation::PushAll(values.into_iter().map(Into::into).collect())
    }

    /// The store update operator this operation resolves to.
    ///
    /// `PushAll` resolves to `$push` with an `$each` modifier.
    pub fn operator(&self) -> &'static str {
        match self {
            AtomicOperation::Increment(_) => "$inc",
            AtomicOperation::Rename(_) => "$rename",
            AtomicOperation::Push(_) | AtomicOperation::PushAll(_) => "$push",
        }
    }

    /// The carried value.
    pub fn value(&self) -> Value {
        match self {
            AtomicOperation::Increment(delta) => Value::Int(*delta),
            AtomicOperation::Rename(to) => Value::String(to.clone()),
            AtomicOperation::Push(value) => (**value).clone(),
            AtomicOperation::PushAll(values) => Value::Array(values.clone()),
        }
    }

    /// Whether the carried values must be coerced against the field's element type.
    pub fn needs_retyping(&self) -> bool {
        matches!(self, AtomicOperation::Push(_) | AtomicOperation::PushAll(_))
    }

    /// The literal a new record is initialized with instead of the pending operation.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            AtomicOperation::Increment(delta) => Some(Value::Int(*delta)),
            _ => None,
        }
    }

    /// Whether the operation can target a field of the declared type.
    pub fn validate_type(&self, field_type: &FieldType) -> bool {
        match self {
            AtomicOperation::Increment(_) => field_type.is_integer(),
            _ => true,
        }
    }

    /// Returns a new operation whose carried values are coerced against the element type of
    /// `field_type`; fields that are not typed arrays use an untyped pass-through.
    ///
    /// Coerced values are carried as [`Value::Raw`]. Operations that need no retyping are
    /// returned unchanged.
    pub fn retyped<F>(&self, field_type: &FieldType, coerce: F) -> MapperResult<Self>
    where
        F: Fn(&Value, &FieldType) -> MapperResult<Bson>,
    {
        let element = field_type.element_type().unwrap_or(&FieldType::Mixed);

        Ok(match self {
            AtomicOperation::Push(value) => {
                AtomicOperation::Push(Box::new(Value::Raw(coerce(value, element)?)))
            }
            AtomicOperation::PushAll(values) => AtomicOperation::PushAll(
                values
                    .iter()
                    .map(|value| coerce(value, element).map(Value::Raw))
                    .collect::<MapperResult<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }
}

/// An atomic operation resolved into its store form for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    pub operator: &'static str,
    /// The operand placed under the field's column.
    pub value: Bson,
    /// The literal used instead when the record is new.
    pub default: Option<Bson>,
    /// The domain form of [`default`](Self::default), written back onto the record after insert.
    pub domain_default: Option<Value>,
}
