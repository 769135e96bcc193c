// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Buffered, size-triggered insert batcher. Mirrors `mongoutil.Bulk`'s contract: callers
//! `insert` documents under a lock; once the pending batch reaches `size` it is flushed
//! immediately, inline with the triggering call, with the lock held across the driver
//! call. `flush` drains whatever is pending unconditionally, for use by the periodic sync
//! loop and by shutdown, serialized against `insert` on the same lock.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ArchiveError;
use crate::store::{Document, DocumentStore};

struct Inner {
    pending: Vec<Document>,
}

/// A bulk writer bound to one collection of one backend. Any number of producers may call
/// `insert` concurrently; calls are serialized on an internal mutex, which is held across
/// the backend call during an inline flush so that `insert`/`flush` calls issue their
/// `insert_many` calls in the same order they acquired the lock.
pub struct BulkWriter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    size: usize,
    inner: Mutex<Inner>,
}

impl BulkWriter {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>, size: usize) -> Self {
        BulkWriter {
            store,
            collection: collection.into(),
            size: size.max(1),
            inner: Mutex::new(Inner {
                pending: Vec::new(),
            }),
        }
    }

    /// Appends `doc` to the pending batch. If the batch has reached `size`, it is flushed
    /// inline, under the same lock acquisition, before returning. A failing flush discards
    /// the batch that failed: the caller sees the backend error, and subsequent inserts
    /// start a fresh batch.
    pub async fn insert(&self, doc: Document) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        inner.pending.push(doc);
        if inner.pending.len() >= self.size {
            let batch = std::mem::take(&mut inner.pending);
            self.store.insert_many(&self.collection, batch).await?;
        }
        Ok(())
    }

    /// Flushes the current partial batch unconditionally, under the same lock `insert`
    /// uses. No-op if empty.
    pub async fn flush(&self) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock().await;
        if inner.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut inner.pending);
        self.store.insert_many(&self.collection, batch).await
    }

    #[cfg(test)]
    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::memory::InMemoryDocumentStore;
    use crate::store::{Filter, FindOptions};

    fn doc(name: &str) -> Document {
        json!({"name": name}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn flushes_automatically_once_size_is_reached() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let bulk = BulkWriter::new(store.clone(), "events", 3);

        bulk.insert(doc("a")).await.unwrap();
        bulk.insert(doc("b")).await.unwrap();
        assert_eq!(bulk.pending_len().await, 2);

        bulk.insert(doc("c")).await.unwrap();
        assert_eq!(bulk.pending_len().await, 0);

        let all = store
            .find("events", Filter::matches_all(), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn explicit_flush_drains_a_partial_batch() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let bulk = BulkWriter::new(store.clone(), "events", 100);

        bulk.insert(doc("a")).await.unwrap();
        bulk.insert(doc("b")).await.unwrap();
        bulk.flush().await.unwrap();

        assert_eq!(bulk.pending_len().await, 0);
        let all = store
            .find("events", Filter::matches_all(), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn flush_on_empty_batch_is_a_no_op() {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let bulk = BulkWriter::new(store, "events", 10);
        bulk.flush().await.unwrap();
        assert_eq!(bulk.pending_len().await, 0);
    }
}
