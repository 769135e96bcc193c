// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The DNS archiver (C7): batched resolv inserts with derived `tld`/`tldPlusOne` fields, a
//! get-by-id read path, and a filtered, cursor-paginated list read path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Backend;
use crate::bulk::BulkWriter;
use crate::error::ArchiveError;
use crate::service::{Api, ArchiveServiceFacade};
use crate::store::{
    prefixed_collection, Conjunction, FieldFilter, Filter, FindOptions, IndexSpec, SortOrder,
    STORAGE_KEY_FIELD,
};
use crate::sync_loop::{SyncLoop, DEFAULT_SYNC_INTERVAL};
use crate::tld::TldClassifier;
use crate::uuid_gen::UuidGenerator;

const COLLECTION: &str = "resolvs";

pub const DEFAULT_RESOLVS_BULK_SIZE: usize = 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFlags {
    #[serde(default, rename = "do")]
    pub do_bit: bool,
    #[serde(default)]
    pub authenticated_data: bool,
    #[serde(default)]
    pub checking_disabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFlags {
    #[serde(default)]
    pub authenticated_data: bool,
}

/// A single resolved DNS query, as persisted. `tld`/`tld_plus_one` are always overwritten by
/// `save_resolv` from `name`; callers need not (and should not) set them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResolvData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default, rename = "serverIP")]
    pub server_ip: String,
    #[serde(default, rename = "clientIP")]
    pub client_ip: String,
    #[serde(default)]
    pub qid: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "isIPv6")]
    pub is_ipv6: bool,
    #[serde(default)]
    pub query_flags: QueryFlags,
    #[serde(default, rename = "returnCode")]
    pub return_code: i32,
    #[serde(default, rename = "resolvedIPs")]
    pub resolved_ips: Vec<String>,
    #[serde(default, rename = "resolvedCNAMEs")]
    pub resolved_cnames: Vec<String>,
    #[serde(default)]
    pub response_flags: ResponseFlags,
    #[serde(default)]
    pub tld: String,
    #[serde(default, rename = "tldPlusOne")]
    pub tld_plus_one: String,
}

/// One conjunction of the disjunctive filter accepted by `list_resolvs`. All present fields
/// AND together; pass several `ResolvsFilter`s to OR them.
#[derive(Clone, Debug, Default)]
pub struct ResolvsFilter {
    pub since: Option<i64>,
    pub to: Option<i64>,
    pub client: Option<String>,
    pub server: Option<String>,
    pub name: Option<String>,
    pub resolved_ip: Option<String>,
    pub resolved_cname: Option<String>,
    pub qid: Option<u16>,
    pub return_code: Option<i32>,
    pub tld: Option<String>,
    pub tld_plus_one: Option<String>,
}

impl ResolvsFilter {
    fn to_conjunction(&self) -> Conjunction {
        let mut conjunction = Conjunction::new();
        if let Some(since) = self.since {
            conjunction = conjunction.push(FieldFilter::Gt("timestamp".to_owned(), Value::from(since)));
        }
        if let Some(to) = self.to {
            conjunction = conjunction.push(FieldFilter::Lt("timestamp".to_owned(), Value::from(to)));
        }
        if let Some(client) = &self.client {
            conjunction = conjunction.push(FieldFilter::Eq("clientIP".to_owned(), Value::from(client.as_str())));
        }
        if let Some(server) = &self.server {
            conjunction = conjunction.push(FieldFilter::Eq("serverIP".to_owned(), Value::from(server.as_str())));
        }
        if let Some(name) = &self.name {
            conjunction = conjunction.push(FieldFilter::Eq("name".to_owned(), Value::from(name.as_str())));
        }
        if let Some(resolved_ip) = &self.resolved_ip {
            conjunction = conjunction.push(FieldFilter::Eq(
                "resolvedIPs".to_owned(),
                Value::from(resolved_ip.as_str()),
            ));
        }
        if let Some(resolved_cname) = &self.resolved_cname {
            conjunction = conjunction.push(FieldFilter::Eq(
                "resolvedCNAMEs".to_owned(),
                Value::from(resolved_cname.as_str()),
            ));
        }
        if let Some(qid) = self.qid {
            conjunction = conjunction.push(FieldFilter::Eq("qid".to_owned(), Value::from(qid)));
        }
        // "applied only when positive", per the filter semantics.
        if let Some(return_code) = self.return_code {
            if return_code > 0 {
                conjunction = conjunction.push(FieldFilter::Eq(
                    "returnCode".to_owned(),
                    Value::from(return_code),
                ));
            }
        }
        if let Some(tld) = &self.tld {
            conjunction = conjunction.push(FieldFilter::Eq("tld".to_owned(), Value::from(tld.as_str())));
        }
        if let Some(tld_plus_one) = &self.tld_plus_one {
            conjunction = conjunction.push(FieldFilter::Eq(
                "tldPlusOne".to_owned(),
                Value::from(tld_plus_one.as_str()),
            ));
        }
        conjunction
    }
}

pub struct DnsArchiver {
    id: String,
    class: String,
    backend: Backend,
    collection: String,
    bulk: Arc<BulkWriter>,
    uuid_gen: Arc<dyn UuidGenerator>,
    tld: TldClassifier,
    started: AtomicBool,
    sync_loop: Mutex<Option<SyncLoop>>,
}

impl DnsArchiver {
    pub fn new(
        id: impl Into<String>,
        class: impl Into<String>,
        backend: Backend,
        bulk_size: usize,
        uuid_gen: Arc<dyn UuidGenerator>,
        prefix: Option<&str>,
    ) -> Self {
        let collection = prefixed_collection(prefix, COLLECTION);
        let bulk = Arc::new(BulkWriter::new(backend.store.clone(), collection.clone(), bulk_size));
        DnsArchiver {
            id: id.into(),
            class: class.into(),
            backend,
            collection,
            bulk,
            uuid_gen,
            tld: TldClassifier::new(),
            started: AtomicBool::new(false),
            sync_loop: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ArchiveError> {
        for fields in [
            vec!["timestamp"],
            vec!["serverIP"],
            vec!["clientIP"],
            vec!["name"],
            vec!["resolvedIPs"],
            vec!["tldPlusOne"],
        ] {
            self.backend
                .store
                .ensure_index(&self.collection, IndexSpec::on(&fields))
                .await?;
        }

        let bulk = self.bulk.clone();
        let sync_loop = SyncLoop::spawn(DEFAULT_SYNC_INTERVAL, move || {
            let bulk = bulk.clone();
            async move { bulk.flush().await }
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
        self.bulk.flush().await
    }

    pub async fn ping(&self) -> Result<(), ArchiveError> {
        self.backend.store.ping().await
    }

    /// Enqueues `resolv` into the `resolvs` bulk writer, assigning a fresh `id` if absent
    /// and overwriting `tld`/`tld_plus_one` from `name`.
    pub async fn save_resolv(&self, mut resolv: ResolvData) -> Result<String, ArchiveError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable(format!(
                "dns archiver {} is not started",
                self.id
            )));
        }
        if resolv.id.is_empty() {
            resolv.id = self.uuid_gen.generate_uuid();
        }

        let parts = self.tld.classify(&resolv.name);
        resolv.tld = parts.tld;
        resolv.tld_plus_one = parts.tld_plus_one;

        let id = resolv.id.clone();
        let doc = serde_json::to_value(&resolv)
            .map_err(|err| ArchiveError::BadRequest(format!("converting resolv: {err}")))?;
        let doc = doc.as_object().cloned().ok_or_else(|| {
            ArchiveError::BadRequest("resolv did not serialize to an object".to_owned())
        })?;

        self.bulk
            .insert(doc)
            .await
            .map_err(|err| ArchiveError::Internal(format!("enqueueing resolv {id}: {err}")))?;
        Ok(id)
    }

    /// `id` empty or not found both resolve to `Ok(None)` rather than an error.
    pub async fn get_resolv(&self, id: &str) -> Result<Option<ResolvData>, ArchiveError> {
        if id.is_empty() {
            return Ok(None);
        }
        let filter = Filter::of(Conjunction::new().push(FieldFilter::Eq("id".to_owned(), Value::from(id))));
        let found = self.backend.store.find_one(&self.collection, filter).await?;
        found
            .map(|doc| {
                serde_json::from_value(Value::Object(doc))
                    .map_err(|err| ArchiveError::Internal(format!("decoding resolv: {err}")))
            })
            .transpose()
    }

    /// Returns up to `max_per_page` resolvs matching any of `filters`, ordered by internal
    /// storage key (descending when `reverse`), plus a cursor to resume from when the page
    /// was full.
    pub async fn list_resolvs(
        &self,
        filters: &[ResolvsFilter],
        reverse: bool,
        max_per_page: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<ResolvData>, Option<String>), ArchiveError> {
        let cursor_key: Option<u64> = cursor
            .filter(|c| !c.is_empty())
            .map(|c| {
                c.parse::<u64>()
                    .map_err(|err| ArchiveError::BadRequest(format!("invalid cursor {c}: {err}")))
            })
            .transpose()?;

        let mut conjunctions: Vec<Conjunction> = if filters.is_empty() {
            vec![Conjunction::new()]
        } else {
            filters.iter().map(ResolvsFilter::to_conjunction).collect()
        };

        if let Some(key) = cursor_key {
            let cursor_filter = if reverse {
                FieldFilter::Lt(STORAGE_KEY_FIELD.to_owned(), Value::from(key))
            } else {
                FieldFilter::Gt(STORAGE_KEY_FIELD.to_owned(), Value::from(key))
            };
            conjunctions = conjunctions
                .into_iter()
                .map(|c| c.push(cursor_filter.clone()))
                .collect();
        }

        let limit = if max_per_page == 0 { 100 } else { max_per_page };
        let order = if reverse {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        };

        let docs = self
            .backend
            .store
            .find(&self.collection, Filter(conjunctions), FindOptions { order, limit })
            .await?;

        let next_cursor = if docs.len() == limit {
            docs.last()
                .and_then(|d| d.get(STORAGE_KEY_FIELD))
                .and_then(Value::as_u64)
                .map(|key| key.to_string())
        } else {
            None
        };

        let records = docs
            .into_iter()
            .map(|doc| {
                serde_json::from_value(Value::Object(doc))
                    .map_err(|err| ArchiveError::Internal(format!("decoding resolv: {err}")))
            })
            .collect::<Result<Vec<ResolvData>, ArchiveError>>()?;

        Ok((records, next_cursor))
    }
}

impl ArchiveServiceFacade for DnsArchiver {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> &str {
        &self.class
    }

    fn implements(&self) -> HashSet<Api> {
        [Api::Dns].into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::memory::InMemoryDocumentStore;
    use crate::store::DocumentStore;
    use crate::uuid_gen::DefaultUuidGenerator;

    fn archiver() -> DnsArchiver {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let backend = Backend {
            id: "mem1".to_owned(),
            class: "memory".to_owned(),
            store,
        };
        DnsArchiver::new("dns1", "dns", backend, 100, Arc::new(DefaultUuidGenerator), None)
    }

    #[tokio::test]
    async fn save_resolv_assigns_id_and_derived_tld_fields() {
        let archiver = archiver();
        archiver.start().await.unwrap();

        let resolv = ResolvData {
            name: "www.example.co.uk".to_owned(),
            ..Default::default()
        };
        let id = archiver.save_resolv(resolv).await.unwrap();
        assert!(!id.is_empty());
        archiver.bulk.flush().await.unwrap();

        let found = archiver.get_resolv(&id).await.unwrap().unwrap();
        assert_eq!(found.tld, "co.uk");
        assert_eq!(found.tld_plus_one, "example.co.uk");

        archiver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn get_resolv_with_empty_id_is_not_found_not_error() {
        let archiver = archiver();
        archiver.start().await.unwrap();
        assert!(archiver.get_resolv("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_resolvs_paginates_with_a_cursor() {
        let archiver = archiver();
        archiver.start().await.unwrap();

        for i in 0..5 {
            let resolv = ResolvData {
                id: format!("r{i}"),
                name: "example.com".to_owned(),
                ..Default::default()
            };
            archiver.save_resolv(resolv).await.unwrap();
        }
        archiver.bulk.flush().await.unwrap();

        let (first_page, cursor) = archiver
            .list_resolvs(&[], false, 2, None)
            .await
            .unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].id, "r0");
        let cursor = cursor.expect("full page yields a cursor");

        let (second_page, _) = archiver
            .list_resolvs(&[], false, 2, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(second_page[0].id, "r2");

        archiver.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn save_resolv_before_start_is_unavailable() {
        let archiver = archiver();
        let resolv = ResolvData::default();
        assert!(matches!(
            archiver.save_resolv(resolv).await,
            Err(ArchiveError::Unavailable(_))
        ));
    }
}
