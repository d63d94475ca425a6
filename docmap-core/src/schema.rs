//! Declarative model metadata.
//!
//! A model describes itself once through a [`ModelSchema`]; the schema is validated into an
//! immutable [`ModelMeta`] that is shared by every service, cursor and coercer touching the model.
//!
//! ```ignore
//! use docmap::schema::{FieldDescriptor, FieldType, ModelSchema};
//! use docmap::index::IndexSpec;
//!
//! let schema = ModelSchema::builder("logs")
//!     .field(FieldDescriptor::new("created", FieldType::Date))
//!     .field(FieldDescriptor::new("name", FieldType::String))
//!     .field(FieldDescriptor::new("sort", FieldType::Int).default_value(500))
//!     .index(IndexSpec::new().field("name", "asc"))
//!     .build();
//! ```

use std::{collections::HashSet, fmt, str::FromStr};

use crate::{
    error::{MapperError, MapperResult},
    index::IndexSpec,
    model::Model,
    value::Value,
};

/// The store column reserved for the identifier field.
pub const ID_COLUMN: &str = "_id";

/// How a reference to another record is embedded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// Only the referenced identifier is stored.
    ById,
    /// A link carrying the referenced collection name and identifier is stored.
    Link,
}

/// The target of a reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    pub model: String,
    pub mode: EmbedMode,
}

impl ReferenceDescriptor {
    pub fn new(model: impl Into<String>, mode: EmbedMode) -> Self {
        Self { model: model.into(), mode }
    }

    /// A reference to the mapped model `M`.
    pub fn to<M: Model>(mode: EmbedMode) -> Self {
        Self::new(M::model_name(), mode)
    }
}

/// The declared type of a mapped field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    Bool,
    Double,
    Blob,
    Date,
    ObjectId,
    Uuid,
    Code,
    /// An array without element typing.
    Array,
    /// A homogeneous array of the element type.
    ArrayOf(Box<FieldType>),
    Reference(ReferenceDescriptor),
    /// No coercion, values are stored as they are.
    Mixed,
}

impl FieldType {
    pub fn array_of(element: FieldType) -> Self {
        FieldType::ArrayOf(Box::new(element))
    }

    pub fn reference(model: impl Into<String>, mode: EmbedMode) -> Self {
        FieldType::Reference(ReferenceDescriptor::new(model, mode))
    }

    /// The element type of a typed array.
    pub fn element_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::ArrayOf(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Long)
    }

    /// The reference target of this type or of its array elements.
    pub fn reference_target(&self) -> Option<&ReferenceDescriptor> {
        match self {
            FieldType::Reference(target) => Some(target),
            FieldType::ArrayOf(element) => element.reference_target(),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Int => f.write_str("int"),
            FieldType::Long => f.write_str("long"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::Double => f.write_str("double"),
            FieldType::Blob => f.write_str("blob"),
            FieldType::Date => f.write_str("date"),
            FieldType::ObjectId => f.write_str("oid"),
            FieldType::Uuid => f.write_str("uuid"),
            FieldType::Code => f.write_str("code"),
            FieldType::Array => f.write_str("array"),
            FieldType::ArrayOf(element) => write!(f, "{element}[]"),
            FieldType::Reference(target) => f.write_str(&target.model),
            FieldType::Mixed => f.write_str("mixed"),
        }
    }
}

impl FromStr for FieldType {
    type Err = MapperError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let name = name.trim();

        if let Some(element) = name.strip_suffix("[]") {
            return Ok(FieldType::array_of(element.parse()?));
        }

        Ok(match name.trim_start_matches('\\') {
            "string" => FieldType::String,
            "int" | "integer" => FieldType::Int,
            "long" => FieldType::Long,
            "bool" | "boolean" => FieldType::Bool,
            "double" | "float" => FieldType::Double,
            "blob" => FieldType::Blob,
            "date" | "DateTime" | "MongoDate" => FieldType::Date,
            "oid" | "ObjectId" | "MongoId" => FieldType::ObjectId,
            "uuid" => FieldType::Uuid,
            "code" => FieldType::Code,
            "array" => FieldType::Array,
            "mixed" => FieldType::Mixed,
            other => return Err(MapperError::Mapping(format!("unknown field type `{other}`"))),
        })
    }
}

/// Static metadata of one mapped field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub readonly: bool,
    /// Whenever the field is written it is stamped with a fresh store timestamp.
    pub timestamp: bool,
    pub default: Option<Value>,
}

impl FieldDescriptor {
    /// A field stored under a column of the same name.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            field_type,
            readonly: false,
            timestamp: false,
            default: None,
        }
    }

    /// Stores the field under a different column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Never written by the mapper.
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn timestamp(mut self) -> Self {
        self.timestamp = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// The reference target of this field, if it holds references.
    pub fn reference(&self) -> Option<&ReferenceDescriptor> {
        self.field_type.reference_target()
    }
}

/// The declarative description of a model, as written by the model author.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    collection: String,
    identifier: Option<(String, FieldType)>,
    fields: Vec<FieldDescriptor>,
    indexes: Vec<IndexSpec>,
    parents: Vec<String>,
}

impl ModelSchema {
    pub fn builder(collection: impl Into<String>) -> ModelSchemaBuilder {
        ModelSchemaBuilder::new(collection)
    }
}

#[derive(Debug, Clone)]
pub struct ModelSchemaBuilder {
    schema: ModelSchema,
}

impl ModelSchemaBuilder {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            schema: ModelSchema {
                collection: collection.into(),
                identifier: None,
                fields: Vec::new(),
                indexes: Vec::new(),
                parents: Vec::new(),
            },
        }
    }

    /// Declares the identifier field. Its column is always [`ID_COLUMN`].
    pub fn id(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.schema.identifier = Some((name.into(), field_type));
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.schema.fields.push(field);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.schema.indexes.push(index);
        self
    }

    /// Declares the model a subtype of `parent`, so it is accepted by references to `parent`.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.schema.parents.push(parent.into());
        self
    }

    pub fn build(self) -> ModelSchema {
        self.schema
    }
}

/// Validated, immutable metadata of a mapped model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    model: String,
    collection: String,
    fields: Vec<FieldDescriptor>,
    identifier: usize,
    indexes: Vec<IndexSpec>,
    parents: Vec<String>,
}

impl ModelMeta {
    /// Validates a schema for the named model.
    ///
    /// The identifier comes first in the field list. A model without a declared identifier gets
    /// an implicit `id` object-id field.
    pub fn compile(model: impl Into<String>, schema: ModelSchema) -> MapperResult<Self> {
        let model = model.into();
        let (id_name, id_type) = schema
            .identifier
            .unwrap_or_else(|| ("id".to_string(), FieldType::ObjectId));

        let mut fields = Vec::with_capacity(schema.fields.len() + 1);
        fields.push(FieldDescriptor::new(id_name, id_type).column(ID_COLUMN));

        let mut names = HashSet::new();
        names.insert(fields[0].name.clone());

        for field in schema.fields {
            if field.column == ID_COLUMN {
                return Err(MapperError::Mapping(format!(
                    "field `{}` of `{model}` cannot use the reserved column `{ID_COLUMN}`",
                    field.name
                )));
            }
            if !names.insert(field.name.clone()) {
                return Err(MapperError::Mapping(format!(
                    "field `{}` is declared twice on `{model}`",
                    field.name
                )));
            }
            fields.push(field);
        }

        Ok(Self {
            model,
            collection: schema.collection,
            fields,
            identifier: 0,
            indexes: schema.indexes,
            parents: schema.parents,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// All fields in declaration order, identifier first.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn identifier(&self) -> &FieldDescriptor {
        &self.fields[self.identifier]
    }

    pub fn is_identifier(&self, field: &FieldDescriptor) -> bool {
        field.name == self.identifier().name
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// The descriptor stored under `column`.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.column == column)
    }

    /// Maps a logical field name to its column; unknown names are returned unchanged.
    pub fn column_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.field(name).map(|field| field.column.as_str()).unwrap_or(name)
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn parents(&self) -> &[String] {
        &self.parents
    }
}
