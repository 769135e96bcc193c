// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Maps service `class` names to constructors, resolves each service's backend reference,
//! and builds archive services bound to it — mirroring `service.Builder` in the Go
//! original, which additionally holds a `BackendFinder` to resolve `def.Backend`. Here the
//! finder is simply the map of already-built backends, since backends are always built in
//! an earlier phase than services.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::Backend;
use crate::definition::Definition;
use crate::error::ArchiveError;
use crate::lifecycle::LifecycleManager;

pub type ServiceDefinition = Definition;

/// One of the three archive APIs a service may implement. The RPC-registration layer
/// (external to this crate) picks the wire adapter for each service by checking which of
/// these it implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Api {
    Event,
    Dns,
    Tls,
}

/// Uniform descriptor exposed by every archive service variant, regardless of which APIs
/// it implements underneath.
pub trait ArchiveServiceFacade: Send + Sync {
    fn id(&self) -> &str;
    fn class(&self) -> &str;
    fn implements(&self) -> HashSet<Api>;
}

/// Constructs a service from its definition and resolved backend, registering its
/// startup/shutdown hooks (and, for batching services, its sync loop) with the supplied
/// `LifecycleManager`.
pub type ServiceCtor = Box<
    dyn Fn(
            &ServiceDefinition,
            &Backend,
            &mut LifecycleManager,
        ) -> Result<Arc<dyn ArchiveServiceFacade>, ArchiveError>
        + Send
        + Sync,
>;

/// Process-wide map from service `class` to constructor, populated explicitly by the
/// composition root.
#[derive(Default)]
pub struct ServiceRegistry {
    ctors: HashMap<String, ServiceCtor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, ctor: ServiceCtor) {
        self.ctors.insert(class.into(), ctor);
    }
}

/// Builds services from their definitions, resolving each one's `backend` reference
/// against the backends built in the earlier phase and verifying that backend's `class`
/// is one the core services can bind to.
pub struct ServiceBuilder<'a> {
    registry: &'a ServiceRegistry,
    backends: &'a HashMap<String, Backend>,
    compatible_backend_classes: &'a HashSet<String>,
    lifecycle: &'a mut LifecycleManager,
    services: HashMap<String, Arc<dyn ArchiveServiceFacade>>,
}

impl<'a> ServiceBuilder<'a> {
    /// `compatible_backend_classes` names the backend classes the core `event`/`dns`/`tls`
    /// services may bind to — currently, every document-store-backed class the
    /// composition root has registered (SPEC_FULL.md §4.2 step 3: "all core services
    /// require the document-store class").
    pub fn new(
        registry: &'a ServiceRegistry,
        backends: &'a HashMap<String, Backend>,
        compatible_backend_classes: &'a HashSet<String>,
        lifecycle: &'a mut LifecycleManager,
    ) -> Self {
        ServiceBuilder {
            registry,
            backends,
            compatible_backend_classes,
            lifecycle,
            services: HashMap::new(),
        }
    }

    pub fn build(&mut self, def: &ServiceDefinition) -> Result<(), ArchiveError> {
        if def.disabled {
            tracing::info!(id = %def.id, class = %def.class, "skipping disabled service");
            return Ok(());
        }
        if def.id.is_empty() {
            return Err(ArchiveError::BadRequest(
                "service definition is missing an id".to_owned(),
            ));
        }
        if self.services.contains_key(&def.id) {
            return Err(ArchiveError::BadRequest(format!(
                "duplicate service id {}",
                def.id
            )));
        }
        if def.backend.is_empty() {
            return Err(ArchiveError::BadRequest(format!(
                "service {} is missing a backend reference",
                def.id
            )));
        }

        let backend = self.backends.get(&def.backend).ok_or_else(|| {
            ArchiveError::BadRequest(format!(
                "service {} references unknown backend {}",
                def.id, def.backend
            ))
        })?;

        if !self.compatible_backend_classes.contains(&backend.class) {
            return Err(ArchiveError::BadRequest(format!(
                "service {} backend '{}' class '{}' not supported in service",
                def.id, def.backend, backend.class
            )));
        }

        let ctor = self.registry.ctors.get(def.class.as_str()).ok_or_else(|| {
            ArchiveError::BadRequest(format!(
                "no service registered for class {} (id {})",
                def.class, def.id
            ))
        })?;

        let service = ctor(def, backend, self.lifecycle)
            .map_err(|err| ArchiveError::Internal(format!("building service {}: {err}", def.id)))?;

        tracing::info!(id = %service.id(), class = %service.class(), "built service");
        self.services.insert(def.id.clone(), service);
        Ok(())
    }

    pub fn service(&self, id: &str) -> Option<&Arc<dyn ArchiveServiceFacade>> {
        self.services.get(id)
    }

    pub fn into_services(self) -> HashMap<String, Arc<dyn ArchiveServiceFacade>> {
        self.services
    }
}
