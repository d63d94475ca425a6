//! Application of update documents to stored documents.

use bson::{Bson, Document};

use crate::error::{MemoryStoreError, MemoryStoreResult};

/// Applies `update` to `document` in place.
///
/// An update without operator keys replaces every column except `_id`. Otherwise each operator
/// (`$set`, `$unset`, `$inc`, `$rename`, `$push`, `$pushAll`) is applied in turn.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> MemoryStoreResult<()> {
    if !update.keys().any(|key| key.starts_with('$')) {
        let id = document.get("_id").cloned();
        document.clear();
        if let Some(id) = id {
            document.insert("_id", id);
        }
        for (key, value) in update {
            if key != "_id" {
                document.insert(key.clone(), value.clone());
            }
        }
        return Ok(());
    }

    for (operator, operand) in update {
        let Bson::Document(fields) = operand else {
            return Err(MemoryStoreError::InvalidUpdate(format!("`{operator}` expects a document")));
        };

        for (column, value) in fields {
            if column == "_id" {
                return Err(MemoryStoreError::InvalidUpdate("the `_id` column is immutable".into()));
            }

            match operator.as_str() {
                "$set" => {
                    document.insert(column.clone(), value.clone());
                }
                "$unset" => {
                    document.remove(column);
                }
                "$inc" => increment(document, column, value)?,
                "$rename" => {
                    let Bson::String(target) = value else {
                        return Err(MemoryStoreError::InvalidUpdate(format!(
                            "`$rename` of `{column}` expects a column name"
                        )));
                    };
                    if let Some(moved) = document.remove(column) {
                        document.insert(target.clone(), moved);
                    }
                }
                "$push" => match value {
                    Bson::Document(each) if each.contains_key("$each") => {
                        let Some(Bson::Array(items)) = each.get("$each") else {
                            return Err(MemoryStoreError::InvalidUpdate("`$each` expects an array".into()));
                        };
                        push(document, column, items.iter().cloned())?;
                    }
                    single => push(document, column, [single.clone()])?,
                },
                "$pushAll" => {
                    let Bson::Array(items) = value else {
                        return Err(MemoryStoreError::InvalidUpdate("`$pushAll` expects an array".into()));
                    };
                    push(document, column, items.iter().cloned())?;
                }
                other => return Err(MemoryStoreError::UnsupportedOperator(other.to_string())),
            }
        }
    }

    Ok(())
}

/// Adds `delta` to a numeric column, keeping the narrowest type that holds the result.
fn increment(document: &mut Document, column: &str, delta: &Bson) -> MemoryStoreResult<()> {
    let sum = match (document.get(column), delta) {
        (None | Some(Bson::Null), delta) => delta.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b))),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(i64::from(*a).wrapping_add(*b)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a.wrapping_add(i64::from(*b))),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a.wrapping_add(*b)),
        (Some(current), delta) => match (as_f64(current), as_f64(delta)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => {
                return Err(MemoryStoreError::InvalidUpdate(format!(
                    "cannot increment non-numeric column `{column}`"
                )));
            }
        },
    };

    if as_f64(&sum).is_none() {
        return Err(MemoryStoreError::InvalidUpdate(format!(
            "`$inc` of `{column}` expects a number"
        )));
    }

    document.insert(column, sum);
    Ok(())
}

fn push(document: &mut Document, column: &str, items: impl IntoIterator<Item = Bson>) -> MemoryStoreResult<()> {
    match document.get_mut(column) {
        Some(Bson::Array(existing)) => existing.extend(items),
        None => {
            document.insert(column, Bson::Array(items.into_iter().collect()));
        }
        Some(_) => {
            return Err(MemoryStoreError::InvalidUpdate(format!(
                "cannot push to non-array column `{column}`"
            )));
        }
    }
    Ok(())
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(number) => Some(f64::from(*number)),
        Bson::Int64(number) => Some(*number as f64),
        Bson::Double(number) => Some(*number),
        _ => None,
    }
}
