//! Filter construction.
//!
//! A [`Query`] accumulates field constraints into one filter document of the store's query
//! language. It is independent of any model or connection; field names are logical names and are
//! mapped to columns when the query is executed by a
//! [`RecordService`](crate::service::RecordService).
//!
//! # Query Building
//!
//! ```ignore
//! use docmap::query::Query;
//!
//! let mut query = Query::new();
//! query.eq("name", "boot").gte("sort", 10).like("message", "disk%");
//!
//! // the same constraints through the symbolic entry point
//! let mut query = Query::new();
//! query.filter_all([("name", Bson::from("boot")), ("sort >=", Bson::from(10))])?;
//! ```
//!
//! # Operators
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Existence: `exists`, `exists_value`
//! - Patterns: `pattern`, `not_pattern`, `like`, `not_like`
//! - Sets: `any_of`, `none_of`
//!
//! Equality replaces whatever was accumulated for a field; operator constraints on the same
//! field are merged into one operator document.

use bson::{Bson, Document};

use crate::error::{MapperError, MapperResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl From<SortDirection> for Bson {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => Bson::Int32(1),
            SortDirection::Desc => Bson::Int32(-1),
        }
    }
}

/// An accumulated filter.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Document,
}

impl Query {
    /// Creates an empty query, which matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Equality. Replaces any constraint accumulated for `field`.
    pub fn eq(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.filter.insert(field, value.into());
        self
    }

    pub fn ne(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push_operator(field, "$ne", value.into())
    }

    pub fn gt(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push_operator(field, "$gt", value.into())
    }

    pub fn gte(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push_operator(field, "$gte", value.into())
    }

    pub fn lt(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push_operator(field, "$lt", value.into())
    }

    pub fn lte(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        self.push_operator(field, "$lte", value.into())
    }

    /// Requires `field` to be present.
    pub fn exists(&mut self, field: &str) -> &mut Self {
        self.exists_value(field, true)
    }

    /// Requires `field` to be present, or absent when `present` is `false`.
    pub fn exists_value(&mut self, field: &str, present: bool) -> &mut Self {
        self.push_operator(field, "$exists", Bson::Boolean(present))
    }

    /// Matches `field` against a regular expression. A `/body/flags` form sets the options.
    pub fn pattern(&mut self, field: &str, pattern: &str) -> &mut Self {
        let regex = regex_document(pattern);
        self.filter.insert(field, regex);
        self
    }

    /// Excludes documents whose `field` matches the regular expression.
    pub fn not_pattern(&mut self, field: &str, pattern: &str) -> &mut Self {
        let regex = regex_document(pattern);
        self.push_operator(field, "$ne", Bson::Document(regex))
    }

    /// Matches a SQL-style wildcard expression. See [`like_pattern`].
    pub fn like(&mut self, field: &str, expr: &str) -> &mut Self {
        let pattern = format!("/{}/", like_pattern(expr));
        self.pattern(field, &pattern)
    }

    pub fn not_like(&mut self, field: &str, expr: &str) -> &mut Self {
        let pattern = format!("/{}/", like_pattern(expr));
        self.not_pattern(field, &pattern)
    }

    pub fn any_of<T: Into<Bson>>(&mut self, field: &str, values: impl IntoIterator<Item = T>) -> &mut Self {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.push_operator(field, "$in", Bson::Array(values))
    }

    pub fn none_of<T: Into<Bson>>(&mut self, field: &str, values: impl IntoIterator<Item = T>) -> &mut Self {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.push_operator(field, "$nin", Bson::Array(values))
    }

    /// Adds a constraint from a `"field"` or `"field operator"` expression.
    ///
    /// Recognized operators are `=`, `==`, `>`, `>=`, `<`, `<=`, `!=`, `<>` and the words
    /// `exists`, `pattern`, `like`, `in` and `nin`. A bare field name is an equality.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidValue`] for an unknown operator, or when a pattern operator
    /// is not given a string or a set operator is not given an array.
    pub fn filter(&mut self, expr: &str, value: impl Into<Bson>) -> MapperResult<&mut Self> {
        let value = value.into();
        let expr = expr.trim();
        let (field, operator) = match expr.split_once(char::is_whitespace) {
            Some((field, operator)) => (field, operator.trim()),
            None => (expr, ""),
        };

        match operator {
            "" | "=" | "==" => self.eq(field, value),
            ">" => self.gt(field, value),
            ">=" => self.gte(field, value),
            "<" => self.lt(field, value),
            "<=" => self.lte(field, value),
            "!=" | "<>" => self.ne(field, value),
            "exists" => self.exists_value(field, is_truthy(&value)),
            "pattern" => self.pattern(field, expect_str(operator, &value)?),
            "like" => self.like(field, expect_str(operator, &value)?),
            "in" | "nin" => {
                let Bson::Array(values) = value else {
                    return Err(MapperError::InvalidValue(format!(
                        "`{operator}` filter on `{field}` expects an array"
                    )));
                };
                let code = if operator == "in" { "$in" } else { "$nin" };
                self.push_operator(field, code, Bson::Array(values))
            }
            other => {
                return Err(MapperError::InvalidValue(format!(
                    "unknown filter operator `{other}` in `{expr}`"
                )));
            }
        };

        Ok(self)
    }

    /// Adds several `(expression, value)` constraints, see [`filter`](Self::filter).
    pub fn filter_all<K, V>(&mut self, constraints: impl IntoIterator<Item = (K, V)>) -> MapperResult<&mut Self>
    where
        K: AsRef<str>,
        V: Into<Bson>,
    {
        for (expr, value) in constraints {
            self.filter(expr.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Drops every accumulated constraint.
    pub fn clear(&mut self) -> &mut Self {
        self.filter.clear();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    /// The accumulated filter document.
    pub fn filter_document(&self) -> &Document {
        &self.filter
    }

    pub fn into_document(self) -> Document {
        self.filter
    }

    fn push_operator(&mut self, field: &str, operator: &str, value: Bson) -> &mut Self {
        match self.filter.get_mut(field) {
            Some(Bson::Document(operators)) if is_operator_document(operators) => {
                operators.insert(operator, value);
            }
            _ => {
                let mut operators = Document::new();
                operators.insert(operator, value);
                self.filter.insert(field, operators);
            }
        }
        self
    }
}

impl From<Query> for Document {
    fn from(query: Query) -> Self {
        query.filter
    }
}

/// Builds a regular expression from a SQL-style wildcard expression.
///
/// The literal text is escaped. A leading `%` anchors the pattern at the end and a trailing `%`
/// anchors it at the start. Only one wildcard on each side is recognized; any other `%` is
/// matched literally.
///
/// ```ignore
/// assert_eq!(like_pattern("%oo"), "oo$");
/// assert_eq!(like_pattern("a.b%"), "^a\\.b");
/// ```
pub fn like_pattern(expr: &str) -> String {
    let expr = expr.trim();
    let (leading, rest) = match expr.strip_prefix('%') {
        Some(rest) => (true, rest),
        None => (false, expr),
    };
    let (trailing, body) = match rest.strip_suffix('%') {
        Some(body) => (true, body),
        None => (false, rest),
    };

    let mut pattern = String::with_capacity(body.len() + 2);
    if trailing {
        pattern.push('^');
    }
    pattern.push_str(&regex::escape(body));
    if leading {
        pattern.push('$');
    }
    pattern
}

/// `{ $regex, $options }` for a plain or `/body/flags` pattern.
fn regex_document(pattern: &str) -> Document {
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) => (body, flags),
        None => (pattern, ""),
    };

    let mut regex = Document::new();
    regex.insert("$regex", body);
    regex.insert("$options", flags);
    regex
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null => false,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::String(text) => !(text.is_empty() || text == "0"),
        _ => true,
    }
}

fn expect_str<'v>(operator: &str, value: &'v Bson) -> MapperResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| MapperError::InvalidValue(format!("`{operator}` filter expects a string")))
}
