// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Abstraction over the document store that backs archive services.
//!
//! Archivers never depend on a specific wire protocol; they only depend on this trait.
//! Documents are opaque `serde_json` objects rather than a specific driver's native
//! document type, the same way `BlobStorage` deals only in `Digest`/`Bytes` rather than a
//! specific blob backend's native handle.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ArchiveError;

pub mod memory;

/// An opaque, backend-agnostic document. Archivers build these from their typed record
/// structs via `serde_json::to_value` and read them back the same way.
pub type Document = Map<String, Value>;

/// Reserved field name for the internal monotonic storage key used for cursor pagination.
/// Never set by callers; assigned by the store on insert.
pub const STORAGE_KEY_FIELD: &str = "_storage_key";

/// Applies a service's optional collection `prefix` to a base collection name, the way
/// `tlsmdb.Archiver.getCollection` prepends `opts.prefix + "_"` in the Go original.
pub fn prefixed_collection(prefix: Option<&str>, base: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}_{base}"),
        _ => base.to_owned(),
    }
}

/// A single field comparison. `Text` performs a substring match and is only meaningful
/// against fields covered by a `text: true` index (mirrors a MongoDB `$text` search).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldFilter {
    Eq(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    In(String, Vec<Value>),
    Text(String, String),
}

/// A conjunction ("AND") of field filters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conjunction(pub Vec<FieldFilter>);

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, filter: FieldFilter) -> Self {
        self.0.push(filter);
        self
    }
}

/// A disjunction ("OR") of conjunctions. An empty filter matches every document, matching
/// the DNS finder's "no filters supplied" behaviour.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter(pub Vec<Conjunction>);

impl Filter {
    pub fn matches_all() -> Self {
        Self::default()
    }

    pub fn of(conjunction: Conjunction) -> Self {
        Self(vec![conjunction])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Options controlling a `find` query's ordering and page size. Sorting is always by
/// `STORAGE_KEY_FIELD`, matching the cursor semantics in the specification: callers never
/// sort by an arbitrary field, only choose direction and page size.
#[derive(Clone, Debug)]
pub struct FindOptions {
    pub order: SortOrder,
    pub limit: usize,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            order: SortOrder::Ascending,
            limit: 100,
        }
    }
}

/// A requested secondary index. `text` indexes support `FieldFilter::Text`.
#[derive(Clone, Debug, Default)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub text: bool,
}

impl IndexSpec {
    pub fn on(fields: &[&str]) -> Self {
        IndexSpec {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            text: false,
        }
    }

    pub fn text_on(field: &str) -> Self {
        IndexSpec {
            fields: vec![field.to_string()],
            text: true,
        }
    }
}

/// Abstract document store supporting collections, indexes, bulk inserts, and filter
/// queries with sort/limit/cursor. Concrete drivers (e.g. a MongoDB-backed one) implement
/// this trait; this crate ships one reference implementation, [`memory::InMemoryDocumentStore`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a secondary index if it does not already exist. Idempotent.
    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> Result<(), ArchiveError>;

    /// Insert a single document, assigning it a fresh storage key.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<(), ArchiveError>;

    /// Insert a batch of documents as a single backend call, assigning each a fresh
    /// storage key in the order given.
    async fn insert_many(&self, collection: &str, docs: Vec<Document>)
        -> Result<(), ArchiveError>;

    /// Return the first document matching `filter`, in storage-key order.
    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Option<Document>, ArchiveError>;

    /// Return up to `opts.limit` documents matching `filter`, ordered by storage key.
    async fn find(
        &self,
        collection: &str,
        filter: Filter,
        opts: FindOptions,
    ) -> Result<Vec<Document>, ArchiveError>;

    /// Probe connectivity to the backing store.
    async fn ping(&self) -> Result<(), ArchiveError>;
}
