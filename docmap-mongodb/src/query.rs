//! Filter rewriting for the MongoDB query engine.
//!
//! Filters built by the mapper express a negated pattern as `{field: {$ne: pattern}}`, where the
//! pattern is a `{$regex, $options}` document. MongoDB compares `$ne` operands literally, so these
//! are rewritten to `$not` before a query is sent.

use bson::{Bson, Document};

pub(crate) fn rewrite_filter(filter: Document) -> Document {
    filter
        .into_iter()
        .map(|(key, value)| {
            let value = match (key.as_str(), value) {
                ("$and" | "$or" | "$nor", Bson::Array(clauses)) => Bson::Array(
                    clauses
                        .into_iter()
                        .map(|clause| match clause {
                            Bson::Document(clause) => Bson::Document(rewrite_filter(clause)),
                            other => other,
                        })
                        .collect(),
                ),
                (_, Bson::Document(operators)) => Bson::Document(rewrite_operators(operators)),
                (_, other) => other,
            };
            (key, value)
        })
        .collect()
}

fn rewrite_operators(operators: Document) -> Document {
    operators
        .into_iter()
        .map(|(operator, operand)| match (operator.as_str(), operand) {
            ("$ne", Bson::Document(pattern)) if pattern.contains_key("$regex") => {
                ("$not".to_string(), Bson::Document(pattern))
            }
            (_, operand) => (operator, operand),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn negated_patterns_become_not() {
        let filter = doc! {
            "name": { "$ne": { "$regex": "^foo", "$options": "i" } },
            "age": { "$ne": 3 },
        };
        assert_eq!(
            rewrite_filter(filter),
            doc! {
                "name": { "$not": { "$regex": "^foo", "$options": "i" } },
                "age": { "$ne": 3 },
            }
        );
    }

    #[test]
    fn logical_clauses_are_rewritten() {
        let filter = doc! { "$or": [{ "name": { "$ne": { "$regex": "x" } } }, { "sort": 1 }] };
        assert_eq!(
            rewrite_filter(filter),
            doc! { "$or": [{ "name": { "$not": { "$regex": "x" } } }, { "sort": 1 }] }
        );
    }
}
