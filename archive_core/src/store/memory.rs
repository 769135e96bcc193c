// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{
    Conjunction, Document, DocumentStore, FieldFilter, Filter, FindOptions, IndexSpec, SortOrder,
    STORAGE_KEY_FIELD,
};
use crate::error::ArchiveError;

struct Collection {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    fn new() -> Self {
        Collection {
            docs: Vec::new(),
            indexes: Vec::new(),
        }
    }
}

struct Inner {
    collections: HashMap<String, Collection>,
}

/// Reference `DocumentStore` implementation. Exercises every invariant in the
/// specification without a network dependency, mirroring the role `MemoryStorage` plays
/// for `BlobStorage` in this repository's test suite.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Mutex<Inner>>,
    next_storage_key: Arc<AtomicU64>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        InMemoryDocumentStore {
            inner: Arc::new(Mutex::new(Inner {
                collections: HashMap::new(),
            })),
            next_storage_key: Arc::new(AtomicU64::new(1)),
        }
    }

    fn assign_storage_key(&self, mut doc: Document) -> Document {
        let key = self.next_storage_key.fetch_add(1, Ordering::SeqCst);
        doc.insert(STORAGE_KEY_FIELD.to_owned(), Value::from(key));
        doc
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

fn field_matches(doc: &Document, filter: &FieldFilter) -> bool {
    match filter {
        // Mirrors MongoDB's equality semantics against an array field: `{a: x}` matches a
        // document where `a` is an array containing `x`, not just `a == x`.
        FieldFilter::Eq(field, expected) => match doc.get(field) {
            Some(Value::Array(items)) => items.contains(expected),
            other => other == Some(expected),
        },
        FieldFilter::Gt(field, bound) => compare_numeric(doc.get(field), bound, |a, b| a > b),
        FieldFilter::Lt(field, bound) => compare_numeric(doc.get(field), bound, |a, b| a < b),
        FieldFilter::In(field, candidates) => match doc.get(field) {
            Some(actual) => candidates.contains(actual),
            None => false,
        },
        FieldFilter::Text(field, needle) => doc
            .get(field)
            .and_then(Value::as_str)
            .map(|actual| actual.contains(needle.as_str()))
            .unwrap_or(false),
    }
}

fn compare_numeric(actual: Option<&Value>, bound: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), bound.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn conjunction_matches(doc: &Document, conjunction: &Conjunction) -> bool {
    conjunction.0.iter().all(|f| field_matches(doc, f))
}

fn filter_matches(doc: &Document, filter: &Filter) -> bool {
    filter.0.is_empty() || filter.0.iter().any(|c| conjunction_matches(doc, c))
}

fn storage_key_of(doc: &Document) -> u64 {
    doc.get(STORAGE_KEY_FIELD)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock();
        let col = inner
            .collections
            .entry(collection.to_owned())
            .or_insert_with(Collection::new);
        if !col.indexes.iter().any(|i| i.fields == index.fields) {
            col.indexes.push(index);
        }
        Ok(())
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), ArchiveError> {
        let doc = self.assign_storage_key(doc);
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_owned())
            .or_insert_with(Collection::new)
            .docs
            .push(doc);
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<(), ArchiveError> {
        let docs: Vec<Document> = docs
            .into_iter()
            .map(|d| self.assign_storage_key(d))
            .collect();
        let mut inner = self.inner.lock();
        inner
            .collections
            .entry(collection.to_owned())
            .or_insert_with(Collection::new)
            .docs
            .extend(docs);
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Document>, ArchiveError> {
        let inner = self.inner.lock();
        let found = inner.collections.get(collection).and_then(|col| {
            col.docs
                .iter()
                .filter(|d| filter_matches(d, &filter))
                .min_by_key(|d| storage_key_of(d))
                .cloned()
        });
        Ok(found)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Filter,
        opts: FindOptions,
    ) -> Result<Vec<Document>, ArchiveError> {
        let inner = self.inner.lock();
        let mut matching: Vec<Document> = inner
            .collections
            .get(collection)
            .map(|col| {
                col.docs
                    .iter()
                    .filter(|d| filter_matches(d, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matching.sort_by_key(storage_key_of);
        if opts.order == SortOrder::Descending {
            matching.reverse();
        }
        matching.truncate(opts.limit);
        Ok(matching)
    }

    async fn ping(&self) -> Result<(), ArchiveError> {
        Ok(())
    }
}
