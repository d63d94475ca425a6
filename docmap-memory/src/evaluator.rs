//! Filter evaluation for in-memory documents.
//!
//! This module evaluates filter documents of the store's query language against BSON documents
//! and provides the value ordering used for sorting.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::{Regex, RegexBuilder};

use crate::error::{MemoryStoreError, MemoryStoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that integers of both widths and doubles compare with
/// each other.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// Timestamp value as (seconds, increment)
    Timestamp(u32, u32),
    /// String value
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values without a meaningful comparison
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Timestamp(value) => Comparable::Timestamp(value.time, value.increment),
            Bson::String(value) | Bson::JavaScriptCode(value) | Bson::Symbol(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// The cross-type sort rank of the value.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
            Comparable::Timestamp(..) => 9,
            Comparable::Other(_) => 10,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::Timestamp(a, x), Comparable::Timestamp(b, y)) => a == b && x == y,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    /// Orders values of the same kind; values of different kinds are not ordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::Timestamp(a, x), Comparable::Timestamp(b, y)) => (a, x).partial_cmp(&(b, y)),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A total order over optional values for sorting: missing and null first, then by kind, then
/// by value.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map_or(Comparable::Null, Comparable::from);
    let right = right.map_or(Comparable::Null, Comparable::from);

    left.rank()
        .cmp(&right.rank())
        .then_with(|| left.partial_cmp(&right).unwrap_or(Ordering::Equal))
}

/// Resolves a dotted path such as `"author.name"` inside a document.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Whether the document matches every clause of `filter`.
    pub fn evaluate(&self, filter: &Document) -> MemoryStoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(clauses(key, condition)?)?,
                "$or" => self.any(clauses(key, condition)?)?,
                "$nor" => !self.any(clauses(key, condition)?)?,
                operator if operator.starts_with('$') => {
                    return Err(MemoryStoreError::UnsupportedOperator(operator.to_string()));
                }
                path => self.matches_condition(lookup(self.document, path), condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the documents matching `filter`.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> MemoryStoreResult<Vec<Document>> {
        let mut matched = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }
        Ok(matched)
    }

    fn all(&self, filters: Vec<&Document>) -> MemoryStoreResult<bool> {
        for filter in filters {
            if !self.evaluate(filter)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn any(&self, filters: Vec<&Document>) -> MemoryStoreResult<bool> {
        for filter in filters {
            if self.evaluate(filter)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn matches_condition(&self, value: Option<&Bson>, condition: &Bson) -> MemoryStoreResult<bool> {
        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                matches_operators(value, operators)
            }
            operand => Ok(matches_eq(value, operand)),
        }
    }
}

fn clauses<'f>(operator: &str, condition: &'f Bson) -> MemoryStoreResult<Vec<&'f Document>> {
    let Bson::Array(items) = condition else {
        return Err(MemoryStoreError::InvalidFilter(format!("`{operator}` expects an array")));
    };

    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                MemoryStoreError::InvalidFilter(format!("`{operator}` clauses must be documents"))
            })
        })
        .collect()
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

fn matches_operators(value: Option<&Bson>, operators: &Document) -> MemoryStoreResult<bool> {
    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => matches_eq(value, operand),
            "$ne" => match operand {
                Bson::Document(regex) if regex.contains_key("$regex") => !matches_operators(value, regex)?,
                operand => !matches_eq(value, operand),
            },
            "$gt" => matches_order(value, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => matches_order(value, operand, |ordering| ordering != Ordering::Less),
            "$lt" => matches_order(value, operand, |ordering| ordering == Ordering::Less),
            "$lte" => matches_order(value, operand, |ordering| ordering != Ordering::Greater),
            "$exists" => value.is_some() == is_truthy(operand),
            "$in" => set_members(operator, operand)?
                .iter()
                .any(|member| matches_eq(value, member)),
            "$nin" => !set_members(operator, operand)?
                .iter()
                .any(|member| matches_eq(value, member)),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                matches_regex(value, &compile_regex(operand, options)?)
            }
            "$options" => true,
            "$not" => match operand {
                Bson::Document(inner) => !matches_operators(value, inner)?,
                _ => return Err(MemoryStoreError::InvalidFilter("`$not` expects a document".into())),
            },
            other => return Err(MemoryStoreError::UnsupportedOperator(other.to_string())),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality, also matching an element of an array value. A null operand matches a missing field.
fn matches_eq(value: Option<&Bson>, operand: &Bson) -> bool {
    let Some(value) = value else {
        return matches!(operand, Bson::Null);
    };

    let expected = Comparable::from(operand);
    if Comparable::from(value) == expected {
        return true;
    }

    match value {
        Bson::Array(items) => items.iter().any(|item| Comparable::from(item) == expected),
        _ => false,
    }
}

fn matches_order(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };

    let bound = Comparable::from(operand);
    let candidates: Vec<&Bson> = match value {
        Bson::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    candidates
        .into_iter()
        .any(|candidate| Comparable::from(candidate).partial_cmp(&bound).is_some_and(&accept))
}

fn matches_regex(value: Option<&Bson>, regex: &Regex) -> bool {
    match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    }
}

fn compile_regex(pattern: &Bson, options: &str) -> MemoryStoreResult<Regex> {
    let Bson::String(pattern) = pattern else {
        return Err(MemoryStoreError::InvalidFilter("`$regex` expects a string".into()));
    };

    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|err| MemoryStoreError::InvalidFilter(format!("invalid pattern `{pattern}`: {err}")))
}

fn set_members<'o>(operator: &str, operand: &'o Bson) -> MemoryStoreResult<&'o [Bson]> {
    match operand {
        Bson::Array(members) => Ok(members),
        _ => Err(MemoryStoreError::InvalidFilter(format!("`{operator}` expects an array"))),
    }
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Null => false,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: &Document, filter: Document) -> bool {
        DocumentEvaluator::new(document).evaluate(&filter).unwrap()
    }

    #[test]
    fn equality_and_comparisons() {
        let log = doc! { "name": "boot", "sort": 5, "tags": ["a", "b"] };

        assert!(matches(&log, doc! { "name": "boot" }));
        assert!(matches(&log, doc! { "sort": 5_i64 }));
        assert!(matches(&log, doc! { "sort": { "$gte": 5, "$lt": 6.5 } }));
        assert!(!matches(&log, doc! { "sort": { "$gt": 5 } }));
        assert!(matches(&log, doc! { "tags": "b" }));
        assert!(!matches(&log, doc! { "name": { "$ne": "boot" } }));
    }

    #[test]
    fn comparisons_do_not_cross_types() {
        let log = doc! { "sort": 5 };
        assert!(!matches(&log, doc! { "sort": { "$gt": "1" } }));
    }

    #[test]
    fn existence_and_null() {
        let log = doc! { "name": "boot" };
        assert!(matches(&log, doc! { "name": { "$exists": true } }));
        assert!(matches(&log, doc! { "age": { "$exists": false } }));
        assert!(matches(&log, doc! { "age": Bson::Null }));
    }

    #[test]
    fn regex_patterns_and_their_negation() {
        let log = doc! { "name": "Foobar" };
        assert!(matches(&log, doc! { "name": { "$regex": "^foo", "$options": "i" } }));
        assert!(!matches(&log, doc! { "name": { "$regex": "^foo", "$options": "" } }));
        assert!(matches(&log, doc! { "name": { "$ne": { "$regex": "baz$", "$options": "" } } }));
        assert!(!matches(&log, doc! { "name": { "$not": { "$regex": "bar$" } } }));
    }

    #[test]
    fn set_membership() {
        let log = doc! { "sort": 2 };
        assert!(matches(&log, doc! { "sort": { "$in": [1, 2, 3] } }));
        assert!(!matches(&log, doc! { "sort": { "$nin": [2] } }));
    }

    #[test]
    fn logical_operators() {
        let log = doc! { "sort": 2, "name": "boot" };
        assert!(matches(&log, doc! { "$or": [{ "sort": 1 }, { "name": "boot" }] }));
        assert!(!matches(&log, doc! { "$and": [{ "sort": 2 }, { "name": "halt" }] }));
        assert!(matches(&log, doc! { "$nor": [{ "sort": 1 }] }));
    }

    #[test]
    fn dotted_paths_reach_nested_values() {
        let post = doc! { "author": { "$ref": "authors", "$id": 7 } };
        assert!(matches(&post, doc! { "author.$id": 7 }));
    }

    #[test]
    fn unknown_operators_are_errors() {
        let log = doc! { "sort": 2 };
        assert!(DocumentEvaluator::new(&log).evaluate(&doc! { "sort": { "$near": 1 } }).is_err());
    }

    #[test]
    fn sorting_puts_missing_values_first() {
        let one = Bson::Int32(1);
        let text = Bson::from("a");
        assert_eq!(compare_values(None, Some(&one)), Ordering::Less);
        assert_eq!(compare_values(Some(&one), Some(&Bson::Double(0.5))), Ordering::Greater);
        assert_eq!(compare_values(Some(&one), Some(&text)), Ordering::Less);
    }
}
