// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

use std::process::ExitCode;
use std::sync::Arc;

use archive_core::backend::{Backend, BackendBuilder, BackendRegistry};
use archive_core::definition::defs_from_paths;
use archive_core::lifecycle::LifecycleManager;
use archive_core::service::{Api, ArchiveServiceFacade, ServiceBuilder, ServiceRegistry};
use archive_core::services::dns::{DnsArchiver, DEFAULT_RESOLVS_BULK_SIZE};
use archive_core::services::event::EventArchiver;
use archive_core::services::tls::{
    TlsArchiver, DEFAULT_CACHE_CERTS_TTL, DEFAULT_CONNS_BULK_SIZE, DEFAULT_RECORDS_BULK_SIZE,
};
use archive_core::store::memory::InMemoryDocumentStore;
use archive_core::store::DocumentStore;
use archive_core::uuid_gen::DefaultUuidGenerator;
use clap::{Arg, ArgAction, Command};
use grpc_util::infra::setup_infra_endpoints;
use grpc_util::logging::setup_logging;
use grpc_util::sentry::setup_sentry;
use tokio::io::AsyncReadExt;

use crate::config::Config;

pub mod config;

/// Backend classes the core `event`/`dns`/`tls` services may bind to (SPEC_FULL.md §4.2
/// step 3). Every class here is document-store-backed; `register_backends` is the only
/// place new backend classes get added, so this list is kept next to it.
const DOCUMENT_STORE_BACKEND_CLASSES: &[&str] = &["memory"];

/// Installs the "memory" backend class: the only document-store driver this crate ships.
/// A real wire-protocol driver is out of scope; see [`archive_core::store`].
fn register_backends(registry: &mut BackendRegistry) {
    registry.register(
        "memory",
        Box::new(|def, lifecycle| {
            let store: Arc<dyn DocumentStore> = Arc::new(InMemoryDocumentStore::new());
            let ping_store = store.clone();
            lifecycle.on_ping(move || {
                let store = ping_store.clone();
                Box::pin(async move { store.ping().await })
            });
            Ok(Backend {
                id: def.id.clone(),
                class: def.class.clone(),
                store,
            })
        }),
    );
}

/// Installs the `event`, `dns`, and `tls` service classes, wiring each archiver's
/// start/shutdown/ping into the supplied `LifecycleManager`. Bulk sizes and the
/// certificate-cache TTL use the defaults carried over from the Go original; the
/// specification does not expose them as per-definition `opts`.
fn register_services(registry: &mut ServiceRegistry) {
    registry.register(
        "event",
        Box::new(|def, backend, lifecycle| {
            let archiver = Arc::new(EventArchiver::new(
                def.id.clone(),
                def.class.clone(),
                backend.clone(),
                def.opt_str("prefix"),
            ));
            let started = archiver.clone();
            lifecycle.on_startup(move || {
                let archiver = started.clone();
                Box::pin(async move { archiver.start().await })
            });
            let stopped = archiver.clone();
            lifecycle.on_shutdown(move || {
                let archiver = stopped.clone();
                Box::pin(async move { archiver.shutdown().await })
            });
            let pinged = archiver.clone();
            lifecycle.on_ping(move || {
                let archiver = pinged.clone();
                Box::pin(async move { archiver.ping().await })
            });
            Ok(archiver as Arc<dyn ArchiveServiceFacade>)
        }),
    );

    registry.register(
        "dns",
        Box::new(|def, backend, lifecycle| {
            let archiver = Arc::new(DnsArchiver::new(
                def.id.clone(),
                def.class.clone(),
                backend.clone(),
                DEFAULT_RESOLVS_BULK_SIZE,
                Arc::new(DefaultUuidGenerator),
                def.opt_str("prefix"),
            ));
            let started = archiver.clone();
            lifecycle.on_startup(move || {
                let archiver = started.clone();
                Box::pin(async move { archiver.start().await })
            });
            let stopped = archiver.clone();
            lifecycle.on_shutdown(move || {
                let archiver = stopped.clone();
                Box::pin(async move { archiver.shutdown().await })
            });
            let pinged = archiver.clone();
            lifecycle.on_ping(move || {
                let archiver = pinged.clone();
                Box::pin(async move { archiver.ping().await })
            });
            Ok(archiver as Arc<dyn ArchiveServiceFacade>)
        }),
    );

    registry.register(
        "tls",
        Box::new(|def, backend, lifecycle| {
            let archiver = Arc::new(TlsArchiver::new(
                def.id.clone(),
                def.class.clone(),
                backend.clone(),
                DEFAULT_CONNS_BULK_SIZE,
                DEFAULT_RECORDS_BULK_SIZE,
                DEFAULT_CACHE_CERTS_TTL,
                def.opt_str("prefix"),
            ));
            let started = archiver.clone();
            lifecycle.on_startup(move || {
                let archiver = started.clone();
                Box::pin(async move { archiver.start().await })
            });
            let stopped = archiver.clone();
            lifecycle.on_shutdown(move || {
                let archiver = stopped.clone();
                Box::pin(async move { archiver.shutdown().await })
            });
            let pinged = archiver.clone();
            lifecycle.on_ping(move || {
                let archiver = pinged.clone();
                Box::pin(async move { archiver.ping().await })
            });
            Ok(archiver as Arc<dyn ArchiveServiceFacade>)
        }),
    );
}

/// Validates that every enabled API's configured service id names a built service that
/// actually implements that API.
fn validate_api_toggles(
    config: &Config,
    services: &std::collections::HashMap<String, Arc<dyn ArchiveServiceFacade>>,
) -> Result<(), String> {
    let checks = [
        (&config.archive.api.event, Api::Event, "event"),
        (&config.archive.api.dns, Api::Dns, "dns"),
        (&config.archive.api.tls, Api::Tls, "tls"),
    ];
    for (toggle, api, name) in checks {
        if !toggle.enable {
            continue;
        }
        let service = services.get(&toggle.id).ok_or_else(|| {
            format!("archive.api.{name} is enabled but service id '{}' was not built", toggle.id)
        })?;
        if !service.implements().contains(&api) {
            return Err(format!(
                "archive.api.{name} names service '{}', which does not implement {name}",
                toggle.id
            ));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("archive_server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .required(true)
                .value_name("FILE"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check configuration and build backends/services, then exit without starting."),
        )
        .get_matches();

    let config_filename = matches.get_one::<String>("config").expect("required");
    let dry_run = matches.get_flag("dry-run");

    let mut file = match tokio::fs::File::open(config_filename).await {
        Ok(file) => file,
        Err(err) => {
            eprintln!("opening config file {config_filename}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let mut config_str = String::new();
    if let Err(err) = file.read_to_string(&mut config_str).await {
        eprintln!("reading config file {config_filename}: {err}");
        return ExitCode::FAILURE;
    }
    let config: Config = match config_str.parse() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        return ExitCode::FAILURE;
    }

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    setup_logging(config.infra.as_ref(), "archive_server");
    tracing::info!(listen_uri = %config.listen_uri, "archive_server config loaded");
    let _sentry_guard = setup_sentry(config.infra.as_ref(), "archive_server");

    let mut backend_registry = BackendRegistry::new();
    register_backends(&mut backend_registry);
    let mut service_registry = ServiceRegistry::new();
    register_services(&mut service_registry);

    let backend_defs = match defs_from_paths(&config.archive.backend.files, &config.archive.backend.dirs) {
        Ok(defs) => defs,
        Err(err) => {
            eprintln!("loading backend definitions: {err}");
            return ExitCode::FAILURE;
        }
    };
    let service_defs = match defs_from_paths(&config.archive.service.files, &config.archive.service.dirs) {
        Ok(defs) => defs,
        Err(err) => {
            eprintln!("loading service definitions: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut lifecycle = LifecycleManager::new();

    let backends = {
        let mut builder = BackendBuilder::new(&backend_registry, &mut lifecycle);
        for def in &backend_defs {
            if let Err(err) = builder.build(def) {
                eprintln!("building backend {}: {err}", def.id);
                return ExitCode::FAILURE;
            }
        }
        builder.into_backends()
    };

    let compatible_backend_classes: std::collections::HashSet<String> =
        DOCUMENT_STORE_BACKEND_CLASSES.iter().map(|s| s.to_string()).collect();
    let services = {
        let mut builder = ServiceBuilder::new(
            &service_registry,
            &backends,
            &compatible_backend_classes,
            &mut lifecycle,
        );
        for def in &service_defs {
            if let Err(err) = builder.build(def) {
                eprintln!("building service {}: {err}", def.id);
                return ExitCode::FAILURE;
            }
        }
        builder.into_services()
    };

    if let Err(err) = validate_api_toggles(&config, &services) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    if dry_run {
        println!("configuration seems ok");
        return ExitCode::SUCCESS;
    }

    if let Err(err) = lifecycle.start().await {
        tracing::error!(%err, "failed to start archivers");
        return ExitCode::FAILURE;
    }
    tracing::info!(backends = backends.len(), services = services.len(), "archivers started");

    // The RPC transport and wire schemas are out of scope for this crate (see
    // archive_core::service): `services` above is what an external adapter layer would
    // register per-API onto its own listener. This binary's main loop is therefore just the
    // shared infra endpoints plus the shutdown signal they expose.
    let mut shutdown_receiver = match setup_infra_endpoints(config.infra.unwrap_or_default(), || {}) {
        Ok(receiver) => receiver,
        Err(err) => {
            tracing::error!(%err, "failed to start infra endpoints");
            return ExitCode::FAILURE;
        }
    };
    while shutdown_receiver.changed().await.is_ok() {}

    tracing::info!("shutting down");
    if let Err(err) = lifecycle.shutdown().await {
        tracing::error!(%err, "errors during shutdown");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
