// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Maps backend `class` names to constructors and builds backends from their definitions,
//! mirroring `backend.Builder`/`backend.RegisterBuilder` in the Go original. Unlike the
//! teacher's closed `BlobStorageConfig` enum match, registration here is an explicit,
//! dynamic string-keyed map populated by the composition root at startup, matching the
//! registry shape the specification calls for.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::Definition;
use crate::error::ArchiveError;
use crate::lifecycle::LifecycleManager;
use crate::store::DocumentStore;

pub type BackendDefinition = Definition;

/// A live, named connection to a document store. Cloning a `Backend` clones the `Arc`, not
/// the underlying store: every service bound to this backend shares the same session.
#[derive(Clone)]
pub struct Backend {
    pub id: String,
    pub class: String,
    pub store: Arc<dyn DocumentStore>,
}

/// Constructs a `Backend` from its definition. Implementations may register their own
/// startup/shutdown/ping hooks with the supplied `LifecycleManager` (for example, a driver
/// that owns a network connection registers a shutdown hook that closes it).
pub type BackendCtor = Box<
    dyn Fn(&BackendDefinition, &mut LifecycleManager) -> Result<Backend, ArchiveError>
        + Send
        + Sync,
>;

/// Process-wide map from backend `class` to constructor. Populated once, explicitly, by
/// the composition root — this crate does not rely on `ctor`/`init`-time side effects.
#[derive(Default)]
pub struct BackendRegistry {
    ctors: HashMap<String, BackendCtor>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a constructor for `class`. A later registration for the same class
    /// replaces the earlier one.
    pub fn register(&mut self, class: impl Into<String>, ctor: BackendCtor) {
        self.ctors.insert(class.into(), ctor);
    }
}

/// Builds backends from their definitions and retains them by id for later lookup by the
/// service builder. Any per-backend construction error aborts the whole build.
pub struct BackendBuilder<'a> {
    registry: &'a BackendRegistry,
    lifecycle: &'a mut LifecycleManager,
    backends: HashMap<String, Backend>,
}

impl<'a> BackendBuilder<'a> {
    pub fn new(registry: &'a BackendRegistry, lifecycle: &'a mut LifecycleManager) -> Self {
        BackendBuilder {
            registry,
            lifecycle,
            backends: HashMap::new(),
        }
    }

    /// Builds a single backend from `def`. Disabled definitions are skipped. Fails on an
    /// empty or duplicate id, an unregistered class, or a constructor error.
    pub fn build(&mut self, def: &BackendDefinition) -> Result<(), ArchiveError> {
        if def.disabled {
            tracing::info!(id = %def.id, class = %def.class, "skipping disabled backend");
            return Ok(());
        }
        if def.id.is_empty() {
            return Err(ArchiveError::BadRequest(
                "backend definition is missing an id".to_owned(),
            ));
        }
        if self.backends.contains_key(&def.id) {
            return Err(ArchiveError::BadRequest(format!(
                "duplicate backend id {}",
                def.id
            )));
        }

        let ctor = self.registry.ctors.get(def.class.as_str()).ok_or_else(|| {
            ArchiveError::BadRequest(format!(
                "no backend registered for class {} (id {})",
                def.class, def.id
            ))
        })?;

        let backend = ctor(def, self.lifecycle)
            .map_err(|err| ArchiveError::Internal(format!("building backend {}: {err}", def.id)))?;

        tracing::info!(id = %backend.id, class = %backend.class, "built backend");
        self.backends.insert(def.id.clone(), backend);
        Ok(())
    }

    pub fn backend(&self, id: &str) -> Option<&Backend> {
        self.backends.get(id)
    }

    pub fn into_backends(self) -> HashMap<String, Backend> {
        self.backends
    }
}
