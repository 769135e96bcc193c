// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The event archiver (C6): the simplest of the three services. Event identity is
//! caller-owned and event volume is low, so writes go straight to the backend rather than
//! through a bulk writer, unlike the DNS and TLS archivers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::Backend;
use crate::error::ArchiveError;
use crate::service::{Api, ArchiveServiceFacade};
use crate::store::{prefixed_collection, Conjunction, FieldFilter, Filter, IndexSpec};

const COLLECTION: &str = "events";

/// A single archived event. `payload` carries whatever additional fields the caller
/// attached; it is stored alongside the named fields rather than nested, so that queries
/// against caller-supplied fields work the same way as queries against `code`/`level`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub code: String,
    pub level: String,
    pub created: i64,
    pub description: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

pub struct EventArchiver {
    id: String,
    class: String,
    backend: Backend,
    collection: String,
    started: AtomicBool,
}

impl EventArchiver {
    pub fn new(
        id: impl Into<String>,
        class: impl Into<String>,
        backend: Backend,
        prefix: Option<&str>,
    ) -> Self {
        EventArchiver {
            id: id.into(),
            class: class.into(),
            backend,
            collection: prefixed_collection(prefix, COLLECTION),
            started: AtomicBool::new(false),
        }
    }

    pub async fn start(&self) -> Result<(), ArchiveError> {
        self.backend
            .store
            .ensure_index(&self.collection, IndexSpec::on(&["created"]))
            .await?;
        self.backend
            .store
            .ensure_index(&self.collection, IndexSpec::on(&["code"]))
            .await?;
        self.backend
            .store
            .ensure_index(&self.collection, IndexSpec::on(&["level"]))
            .await?;
        self.backend
            .store
            .ensure_index(&self.collection, IndexSpec::text_on("description"))
            .await?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), ArchiveError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), ArchiveError> {
        self.backend.store.ping().await
    }

    /// Inserts `event` directly, without batching. Returns the caller-supplied `id`.
    pub async fn save_event(&self, event: EventRecord) -> Result<String, ArchiveError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable(format!(
                "event archiver {} is not started",
                self.id
            )));
        }
        let id = event.id.clone();
        let doc = serde_json::to_value(&event)
            .map_err(|err| ArchiveError::BadRequest(format!("converting event: {err}")))?;
        let doc = doc
            .as_object()
            .cloned()
            .ok_or_else(|| ArchiveError::BadRequest("event did not serialize to an object".to_owned()))?;

        self.backend
            .store
            .insert_one(&self.collection, doc)
            .await
            .map_err(|err| ArchiveError::Internal(format!("saving event {id}: {err}")))?;
        Ok(id)
    }

    /// Finds the first event whose `code` equals `code`.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<EventRecord>, ArchiveError> {
        let filter = Filter::of(
            Conjunction::new().push(FieldFilter::Eq("code".to_owned(), Value::from(code))),
        );
        let found = self.backend.store.find_one(&self.collection, filter).await?;
        found
            .map(|doc| {
                serde_json::from_value(Value::Object(doc))
                    .map_err(|err| ArchiveError::Internal(format!("decoding event: {err}")))
            })
            .transpose()
    }
}

impl ArchiveServiceFacade for EventArchiver {
    fn id(&self) -> &str {
        &self.id
    }

    fn class(&self) -> &str {
        &self.class
    }

    fn implements(&self) -> HashSet<Api> {
        [Api::Event].into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::memory::InMemoryDocumentStore;
    use crate::store::DocumentStore;

    fn archiver() -> EventArchiver {
        let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
        let backend = Backend {
            id: "mem1".to_owned(),
            class: "memory".to_owned(),
            store,
        };
        EventArchiver::new("events1", "event", backend, None)
    }

    #[tokio::test]
    async fn save_then_find_by_code_round_trips() {
        let archiver = archiver();
        archiver.start().await.unwrap();

        let mut payload = Map::new();
        payload.insert("source".to_owned(), Value::from("edge-1"));
        let event = EventRecord {
            id: "e1".to_owned(),
            code: "CERT_EXPIRED".to_owned(),
            level: "warn".to_owned(),
            created: 1_700_000_000,
            description: "certificate nearing expiry".to_owned(),
            payload,
        };
        let id = archiver.save_event(event).await.unwrap();
        assert_eq!(id, "e1");

        let found = archiver.find_by_code("CERT_EXPIRED").await.unwrap().unwrap();
        assert_eq!(found.id, "e1");
        assert_eq!(found.payload.get("source"), Some(&Value::from("edge-1")));
    }

    #[tokio::test]
    async fn save_event_before_start_is_unavailable() {
        let archiver = archiver();
        let event = EventRecord {
            id: "e1".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            archiver.save_event(event).await,
            Err(ArchiveError::Unavailable(_))
        ));
    }
}
