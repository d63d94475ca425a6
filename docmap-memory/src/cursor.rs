//! Cursors over in-memory query results.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};
use docmap_core::{
    driver::{CursorOptions, RawCursor},
    error::MapperResult,
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values, lookup},
    store::CollectionState,
};

/// A lazily executed query over a [`MemoryCollection`](crate::MemoryCollection).
///
/// The scan runs on the first read, taking a snapshot of the matching documents, so later
/// writes to the collection are not observed until the cursor is rewound.
#[derive(Debug)]
pub struct MemoryCursor {
    state: Arc<CollectionState>,
    filter: Document,
    projection: Option<Document>,
    options: CursorOptions,
    buffer: Option<VecDeque<Document>>,
}

impl MemoryCursor {
    pub(crate) fn new(state: Arc<CollectionState>, filter: Document, projection: Option<Document>) -> Self {
        Self {
            state,
            filter,
            projection,
            options: CursorOptions::default(),
            buffer: None,
        }
    }

    async fn execute(&self) -> MapperResult<VecDeque<Document>> {
        let documents = self.state.documents.read().await;
        let mut matched = DocumentEvaluator::filter_documents(documents.iter(), &self.filter)?;
        drop(documents);

        if let Some(sort) = &self.options.sort {
            matched.sort_by(|left, right| {
                sort.iter()
                    .map(|(column, direction)| {
                        let ordering = compare_values(lookup(left, column), lookup(right, column));
                        if is_descending(direction) { ordering.reverse() } else { ordering }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let skip = self.options.skip.map_or(0, |skip| skip as usize);
        // A negative limit asks for a single batch of that size.
        let limit = match self.options.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|document| project(document, self.projection.as_ref()))
            .collect())
    }
}

#[async_trait]
impl RawCursor for MemoryCursor {
    fn options_mut(&mut self) -> &mut CursorOptions {
        &mut self.options
    }

    async fn next_document(&mut self) -> MapperResult<Option<Document>> {
        if self.buffer.is_none() {
            self.buffer = Some(self.execute().await?);
        }
        Ok(self.buffer.as_mut().and_then(VecDeque::pop_front))
    }

    async fn rewind(&mut self) -> MapperResult<()> {
        self.buffer = None;
        Ok(())
    }

    async fn count(&mut self) -> MapperResult<u64> {
        let documents = self.state.documents.read().await;
        let matched = DocumentEvaluator::filter_documents(documents.iter(), &self.filter)?;
        Ok(matched.len() as u64)
    }
}

fn is_descending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(value) => *value < 0,
        Bson::Int64(value) => *value < 0,
        Bson::Double(value) => *value < 0.0,
        Bson::String(value) => value.eq_ignore_ascii_case("desc"),
        _ => false,
    }
}

/// Applies an inclusion (`{column: 1}`) or exclusion (`{column: 0}`) projection. Inclusion keeps
/// `_id` unless it is excluded explicitly.
pub(crate) fn project(document: Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection.filter(|projection| !projection.is_empty()) else {
        return document;
    };

    let included = |value: &Bson| !matches!(value, Bson::Int32(0) | Bson::Int64(0) | Bson::Boolean(false));
    let inclusive = projection
        .iter()
        .any(|(column, value)| column != "_id" && included(value));

    if !inclusive {
        let mut projected = document;
        for (column, _) in projection {
            projected.remove(column);
        }
        return projected;
    }

    let keep_id = projection.get("_id").is_none_or(included);
    let mut projected = Document::new();
    for (column, value) in document {
        let listed = projection.get(&column).is_some_and(included);
        if listed || (column == "_id" && keep_id) {
            projected.insert(column, value);
        }
    }
    projected
}
