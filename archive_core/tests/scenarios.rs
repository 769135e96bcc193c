// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

//! End-to-end scenarios exercising the composition root (registries, builder, lifecycle)
//! and cross-cutting archiver behavior that no single unit test covers end to end.

use std::sync::Arc;

use archive_core::backend::{Backend, BackendBuilder, BackendDefinition, BackendRegistry};
use archive_core::lifecycle::LifecycleManager;
use archive_core::service::{Api, ServiceBuilder, ServiceDefinition, ServiceRegistry};
use archive_core::services::dns::{DnsArchiver, ResolvData};
use archive_core::services::tls::{CertificateData, TlsArchiver, DEFAULT_CACHE_CERTS_TTL};
use archive_core::store::memory::InMemoryDocumentStore;
use archive_core::store::{DocumentStore, Filter, FindOptions};
use archive_core::uuid_gen::DefaultUuidGenerator;

fn memory_backend() -> Backend {
    Backend {
        id: "mem1".to_owned(),
        class: "memory".to_owned(),
        store: Arc::new(InMemoryDocumentStore::new()),
    }
}

fn dns_archiver(backend: Backend) -> DnsArchiver {
    DnsArchiver::new(
        "dns1",
        "dns",
        backend,
        1024,
        Arc::new(DefaultUuidGenerator),
        None,
    )
}

#[tokio::test]
async fn pagination_across_250_resolvs_yields_three_pages() {
    let archiver = dns_archiver(memory_backend());
    archiver.start().await.unwrap();

    for i in 0..250 {
        let resolv = ResolvData {
            id: format!("r{i:03}"),
            client_ip: "10.0.0.1".to_owned(),
            name: "example.com".to_owned(),
            ..Default::default()
        };
        archiver.save_resolv(resolv).await.unwrap();
    }
    archiver.shutdown().await.unwrap();

    let filter = archive_core::services::dns::ResolvsFilter {
        client: Some("10.0.0.1".to_owned()),
        ..Default::default()
    };

    let (page1, cursor1) = archiver.list_resolvs(&[filter.clone()], false, 100, None).await.unwrap();
    assert_eq!(page1.len(), 100);
    let cursor1 = cursor1.expect("full page yields a cursor");

    let (page2, cursor2) = archiver
        .list_resolvs(&[filter.clone()], false, 100, Some(&cursor1))
        .await
        .unwrap();
    assert_eq!(page2.len(), 100);
    let cursor2 = cursor2.expect("full page yields a cursor");

    let (page3, cursor3) = archiver
        .list_resolvs(&[filter], false, 100, Some(&cursor2))
        .await
        .unwrap();
    assert_eq!(page3.len(), 50);
    assert!(cursor3.is_none());

    let mut seen: Vec<String> = page1
        .into_iter()
        .chain(page2)
        .chain(page3)
        .map(|r| r.id)
        .collect();
    seen.sort();
    let expected: Vec<String> = (0..250).map(|i| format!("r{i:03}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn reverse_order_first_page_starts_with_last_inserted() {
    let archiver = dns_archiver(memory_backend());
    archiver.start().await.unwrap();

    for i in 0..250 {
        let resolv = ResolvData {
            id: format!("r{i:03}"),
            client_ip: "10.0.0.1".to_owned(),
            ..Default::default()
        };
        archiver.save_resolv(resolv).await.unwrap();
    }
    archiver.shutdown().await.unwrap();

    let filter = archive_core::services::dns::ResolvsFilter {
        client: Some("10.0.0.1".to_owned()),
        ..Default::default()
    };
    let (page1, _) = archiver.list_resolvs(&[filter], true, 100, None).await.unwrap();
    assert_eq!(page1[0].id, "r249");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_certificate_saves_with_identical_digest_converge_on_one_id() {
    let backend = memory_backend();
    let store = backend.store.clone();
    let archiver = Arc::new(TlsArchiver::new(
        "tls1",
        "tls",
        backend,
        100,
        100,
        DEFAULT_CACHE_CERTS_TTL,
        None,
    ));
    archiver.start().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let archiver = archiver.clone();
        tasks.push(tokio::spawn(async move {
            archiver
                .save_certificate(CertificateData {
                    id: format!("cert-{i}"),
                    digest: "abc123".to_owned(),
                    ..Default::default()
                })
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    let first = ids[0].clone();
    assert!(ids.iter().all(|id| *id == first));

    let docs = store
        .find("certificates", Filter::matches_all(), FindOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn shutdown_drains_pending_resolvs_without_a_prior_tick() {
    let backend = memory_backend();
    let store = backend.store.clone();
    let archiver = dns_archiver(backend);
    archiver.start().await.unwrap();

    for i in 0..10 {
        let resolv = ResolvData {
            id: format!("r{i}"),
            ..Default::default()
        };
        archiver.save_resolv(resolv).await.unwrap();
    }
    archiver.shutdown().await.unwrap();

    let docs = store
        .find("resolvs", Filter::matches_all(), FindOptions { limit: 100, ..Default::default() })
        .await
        .unwrap();
    assert_eq!(docs.len(), 10);
}

#[tokio::test]
async fn disabled_backend_definition_is_skipped_by_the_builder() {
    let mut registry = BackendRegistry::new();
    registry.register(
        "memory",
        Box::new(|def, _lifecycle| {
            Ok(Backend {
                id: def.id.clone(),
                class: def.class.clone(),
                store: Arc::new(InMemoryDocumentStore::new()),
            })
        }),
    );
    let mut lifecycle = LifecycleManager::new();
    let mut builder = BackendBuilder::new(&registry, &mut lifecycle);

    let enabled = BackendDefinition {
        id: "mem-enabled".to_owned(),
        class: "memory".to_owned(),
        ..Default::default()
    };
    let disabled = BackendDefinition {
        id: "mem-disabled".to_owned(),
        class: "memory".to_owned(),
        disabled: true,
        ..Default::default()
    };

    builder.build(&enabled).unwrap();
    builder.build(&disabled).unwrap();

    let backends = builder.into_backends();
    assert!(backends.contains_key("mem-enabled"));
    assert!(!backends.contains_key("mem-disabled"));
}

#[tokio::test]
async fn composition_root_builds_a_dns_service_bound_to_its_backend() {
    let mut backend_registry = BackendRegistry::new();
    backend_registry.register(
        "memory",
        Box::new(|def, _lifecycle| {
            Ok(Backend {
                id: def.id.clone(),
                class: def.class.clone(),
                store: Arc::new(InMemoryDocumentStore::new()),
            })
        }),
    );

    let mut service_registry = ServiceRegistry::new();
    service_registry.register(
        "dns",
        Box::new(|def, backend, lifecycle| {
            let archiver = Arc::new(dns_archiver(backend.clone()));
            let started = archiver.clone();
            lifecycle.on_startup(move || {
                let archiver = started.clone();
                Box::pin(async move { archiver.start().await })
            });
            Ok(archiver as Arc<dyn archive_core::service::ArchiveServiceFacade>)
        }),
    );

    let mut lifecycle = LifecycleManager::new();

    let backend_def = BackendDefinition {
        id: "mem1".to_owned(),
        class: "memory".to_owned(),
        ..Default::default()
    };
    let backends = {
        let mut builder = BackendBuilder::new(&backend_registry, &mut lifecycle);
        builder.build(&backend_def).unwrap();
        builder.into_backends()
    };

    let service_def = ServiceDefinition {
        id: "dns1".to_owned(),
        class: "dns".to_owned(),
        backend: "mem1".to_owned(),
        ..Default::default()
    };
    let compatible_backend_classes: std::collections::HashSet<String> =
        ["memory".to_owned()].into_iter().collect();
    let services = {
        let mut builder = ServiceBuilder::new(
            &service_registry,
            &backends,
            &compatible_backend_classes,
            &mut lifecycle,
        );
        builder.build(&service_def).unwrap();
        builder.into_services()
    };

    lifecycle.start().await.unwrap();

    let service = services.get("dns1").unwrap();
    assert_eq!(service.id(), "dns1");
    assert!(service.implements().contains(&Api::Dns));

    lifecycle.shutdown().await.unwrap();
}
