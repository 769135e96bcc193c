// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The TLS archiver (C8): batched connection inserts, digest-deduplicated certificate
//! upserts backed by a TTL cache, and batched raw-record inserts. Mirrors
//! `tlsmdb.Archiver` in the Go original: two independent bulk writers (`connections`,
//! `records`) plus a cache that makes certificate inserts idempotent on `digest` within
//! the cache window.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use ::digest::Digest as ContentDigest;
use bytes::Bytes;

use crate::backend::Backend;
use crate::bulk::BulkWriter;
use crate::error::ArchiveError;
use crate::service::{Api, ArchiveServiceFacade};
use crate::store::{prefixed_collection, Conjunction, FieldFilter, Filter, IndexSpec};
use crate::sync_loop::{SyncLoop, DEFAULT_SYNC_INTERVAL};

const CONNECTIONS_COLLECTION: &str = "connections";
const CERTIFICATES_COLLECTION: &str = "certificates";
const RECORDS_COLLECTION: &str = "records";

pub const DEFAULT_CONNS_BULK_SIZE: usize = 256;
pub const DEFAULT_RECORDS_BULK_SIZE: usize = 1024;
pub const DEFAULT_CACHE_CERTS_TTL: Duration = Duration::from_secs(30 * 60);

/// A single observed TLS connection, persisted one-per-document in `connections`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConnectionData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, rename = "clientEndpoint")]
    pub client_endpoint: String,
    #[serde(default, rename = "serverEndpoint")]
    pub server_endpoint: String,
    #[serde(default, rename = "serverName")]
    pub server_name: String,
    #[serde(default, rename = "tlsVersion")]
    pub tls_version: String,
    #[serde(default, rename = "cipherSuite")]
    pub cipher_suite: String,
    #[serde(default)]
    pub established: bool,
}

/// A certificate observed on a connection. `digest` is the content hash that write-once
/// deduplication keys on; `id` is the caller-supplied identifier that the first writer for
/// a given digest wins.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CertificateData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default, rename = "notBefore")]
    pub not_before: i64,
    #[serde(default, rename = "notAfter")]
    pub not_after: i64,
    #[serde(default)]
    pub raw: String,
}

/// An opaque raw handshake record, batched into `records` with no further processing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecordData {
    #[serde(default, rename = "connectionId")]
    pub connection_id: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: String,
}

pub struct TlsArchiver {
    id: String,
    class: String,
    backend: Backend,
    connections_collection: String,
    certificates_collection: String,
    records_collection: String,
    bulk_conns: Arc<BulkWriter>,
    bulk_records: Arc<BulkWriter>,
    cert_cache: moka::future::Cache<String, String>,
    started: AtomicBool,
    sync_loop: Mutex<Option<SyncLoop>>,
}

impl TlsArchiver {
    pub fn new(
        id: impl Into<String>,
        class: impl Into<String>,
        backend: Backend,
        conns_bulk_size: usize,
        records_bulk_size: usize,
        cache_ttl: Duration,
        prefix: Option<&str>,
    ) -> Self {
        let connections_collection = prefixed_collection(prefix, CONNECTIONS_COLLECTION);
        let certificates_collection = prefixed_collection(prefix, CERTIFICATES_COLLECTION);
        let records_collection = prefixed_collection(prefix, RECORDS_COLLECTION);
        let bulk_conns = Arc::new(BulkWriter::new(
            backend.store.clone(),
            connections_collection.clone(),
            conns_bulk_size,
        ));
        let bulk_records = Arc::new(BulkWriter::new(
            backend.store.clone(),
            records_collection.clone(),
            records_bulk_size,
        ));
        let cert_cache = moka::future::Cache::builder()
            .time_to_live(cache_ttl)
            .build();
        TlsArchiver {
            id: id.into(),
            class: class.into(),
            backend,
            connections_collection,
            certificates_collection,
            records_collection,
            bulk_conns,
            bulk_records,
            cert_cache,
            started: AtomicBool::new(false),
            sync_loop: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ArchiveError> {
        self.backend
            .store
            .ensure_index(&self.certificates_collection, IndexSpec::on(&["digest"]))
            .await?;

        let bulk_conns = self.bulk_conns.clone();
        let bulk_records = self.bulk_records.clone();
        let sync_loop = SyncLoop::spawn(DEFAULT_SYNC_INTERVAL, move || {
            let bulk_conns = bulk_conns.clone();
            let bulk_records = bulk_records.clone();
            async move {
                // The two bulks are flushed independently: a failure on one does not skip
                // the other, and each is logged on its own (mirrors `syncBulks` in the Go
                // original, which collects rather than short-circuits on error).
                if let Err(err) = bulk_conns.flush().await {
                    tracing::warn!(%err, "sync connections failed");
                }
                if let Err(err) = bulk_records.flush().await {
                    tracing::warn!(%err, "sync records failed");
                }
                Ok(())
            }
        });
        *self.sync_loop.lock() = Some(sync_loop);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), ArchiveError> {
        self.started.store(false, Ordering::SeqCst);
        if let Some(sync_loop) = self.sync_loop.lock().take() {
            sync_loop.shutdown().await;
        }
        let conns_result = self.bulk_conns.flush().await;
        let records_result = self.bulk_records.flush().await;
        conns_result.and(records_result)
    }

    pub async fn ping(&self) -> Result<(), ArchiveError> {
        self.backend.store.ping().await
    }

    fn require_started(&self) -> Result<(), ArchiveError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable(format!(
                "tls archiver {} is not started",
                self.id
            )));
        }
        Ok(())
    }

    /// Enqueues `conn` into the `connections` bulk writer. Returns the caller-supplied
    /// `id`; `Internal` on enqueue failure.
    pub async fn save_connection(&self, conn: ConnectionData) -> Result<String, ArchiveError> {
        self.require_started()?;
        let id = conn.id.clone();
        let doc = to_document(&conn)?;
        self.bulk_conns
            .insert(doc)
            .await
            .map_err(|err| ArchiveError::Internal(format!("enqueueing connection {id}: {err}")))?;
        Ok(id)
    }

    /// Deduplicates `cert` on `digest`: a cache hit or an existing database document both
    /// return the stored `id` without inserting. The lookup-or-insert is driven through
    /// `Cache::try_get_with`, which runs at most one initializer per key at a time — any
    /// other callers racing on the same digest await that single initializer's result
    /// instead of each independently checking the cache and the database, so two
    /// concurrent first-writers can never both decide they're first and both insert.
    pub async fn save_certificate(&self, mut cert: CertificateData) -> Result<String, ArchiveError> {
        self.require_started()?;

        // Callers that already know their certificate's content digest pass it through
        // unchanged; callers that only have the raw payload get one computed for them
        // here, so dedup still keys on content rather than on the raw bytes themselves.
        if cert.digest.is_empty() {
            let raw = Bytes::copy_from_slice(cert.raw.as_bytes());
            let content_digest = ContentDigest::of_bytes(&raw)
                .map_err(|err| ArchiveError::BadRequest(format!("hashing certificate: {err}")))?;
            cert.digest = content_digest.hex();
        }

        let digest = cert.digest.clone();
        let caller_id = cert.id.clone();
        let store = self.backend.store.clone();
        let collection = self.certificates_collection.clone();

        self.cert_cache
            .try_get_with(digest.clone(), async move {
                let filter = Filter::of(Conjunction::new().push(FieldFilter::Eq(
                    "digest".to_owned(),
                    Value::from(digest.as_str()),
                )));
                let existing = store.find_one(&collection, filter).await.map_err(|err| {
                    ArchiveError::Internal(format!("finding certificate digest {digest}: {err}"))
                })?;

                if let Some(existing_doc) = existing {
                    let existing_id = existing_doc
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    return Ok(existing_id);
                }

                // No cached entry, no database row: this initializer is the single
                // first-writer for this digest — `try_get_with` guarantees no other
                // initializer for the same key runs concurrently with this one.
                let doc = to_document(&cert)?;
                store.insert_one(&collection, doc).await.map_err(|err| {
                    ArchiveError::Internal(format!("inserting certificate {caller_id}: {err}"))
                })?;
                Ok(caller_id)
            })
            .await
            .map_err(|err: Arc<ArchiveError>| (*err).clone())
    }

    /// Enqueues `record` into the `records` bulk writer. Best-effort: no dedup, no read
    /// path, matching `StoreRecord` in the Go original.
    pub async fn store_record(&self, record: RecordData) -> Result<(), ArchiveError> {
        self.require_started()?;
        let doc = to_document(&record)?;
        self.bulk_records
            .insert(doc)
            .await
            .map_err(|err| ArchiveError::Internal(format!("enqueueing record: {err}")))
    }
}

fn to_document<T: Serialize>(value: &T) -> Result<Map<String, Value>, ArchiveError> {
    serde_json::to_value(value)
        .map_err(|err| ArchiveError::BadRequest(format!("converting document: {err}")))?
        .as_object()
        .cloned()
        .ok_or_else(|| ArchiveError::BadRequest("value did not serialize to an object".to_owned()))
}

impl ArchiveServiceFacade for TlsArchiver {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> &str {
        &self.class
    }

    fn implements(&self) -> HashSet<Api> {
        [Api::Tls].into_iter().collect()
    }
}
