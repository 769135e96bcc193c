// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Orders and runs startup/shutdown hooks contributed by backends and services as they are
//! built, mirroring the `Builder.Start`/`Builder.Shutdown` orchestration in the Go original:
//! startup aborts on the first error and runs hooks forward; shutdown runs every hook in
//! reverse order and accumulates all errors rather than stopping at the first.

use futures::future::BoxFuture;

use crate::error::ArchiveError;

type Hook = Box<dyn Fn() -> BoxFuture<'static, Result<(), ArchiveError>> + Send + Sync>;

/// Accumulates startup, shutdown, and ping hooks registered by backends and services as
/// they are built, then drives them as a single ordered unit.
#[derive(Default)]
pub struct LifecycleManager {
    startup: Vec<Hook>,
    shutdown: Vec<Hook>,
    ping: Vec<Hook>,
}

/// All the shutdown errors collected from a `Shutdown` run, none of which prevented a
/// later hook from also running.
#[derive(Debug)]
pub struct CompositeError {
    pub errors: Vec<ArchiveError>,
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{} error(s): {joined}", self.errors.len())
    }
}

impl std::error::Error for CompositeError {}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_startup<F>(&mut self, hook: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), ArchiveError>> + Send + Sync + 'static,
    {
        self.startup.push(Box::new(hook));
    }

    pub fn on_shutdown<F>(&mut self, hook: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), ArchiveError>> + Send + Sync + 'static,
    {
        self.shutdown.push(Box::new(hook));
    }

    pub fn on_ping<F>(&mut self, hook: F)
    where
        F: Fn() -> BoxFuture<'static, Result<(), ArchiveError>> + Send + Sync + 'static,
    {
        self.ping.push(Box::new(hook));
    }

    /// Runs startup hooks in registration order. The first error aborts the run; hooks
    /// registered after the failing one do not run. Not rolled back automatically.
    pub async fn start(&self) -> Result<(), ArchiveError> {
        for hook in &self.startup {
            hook().await?;
        }
        Ok(())
    }

    /// Runs shutdown hooks in reverse registration order. Every hook runs regardless of
    /// earlier failures; all errors are collected into one `CompositeError`.
    pub async fn shutdown(&self) -> Result<(), CompositeError> {
        let mut errors = Vec::new();
        for hook in self.shutdown.iter().rev() {
            if let Err(err) = hook().await {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CompositeError { errors })
        }
    }

    /// Probes every registered ping hook, collecting failures the same way `shutdown` does.
    pub async fn ping_all(&self) -> Result<(), CompositeError> {
        let mut errors = Vec::new();
        for hook in &self.ping {
            if let Err(err) = hook().await {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CompositeError { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn startup_runs_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut lifecycle = LifecycleManager::new();

        for i in 0..3 {
            let order = order.clone();
            lifecycle.on_startup(move || {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
            });
        }

        lifecycle.start().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn startup_aborts_on_first_error() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = LifecycleManager::new();

        {
            let ran = ran.clone();
            lifecycle.on_startup(move || {
                let ran = ran.clone();
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Err(ArchiveError::Internal("boom".to_owned()))
                })
            });
        }
        {
            let ran = ran.clone();
            lifecycle.on_startup(move || {
                let ran = ran.clone();
                Box::pin(async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
        }

        assert!(lifecycle.start().await.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_runs_all_hooks_in_reverse_order_even_on_failure() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut lifecycle = LifecycleManager::new();

        for i in 0..3 {
            let order = order.clone();
            lifecycle.on_shutdown(move || {
                let order = order.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(i);
                    if i == 1 {
                        Err(ArchiveError::Internal("partial failure".to_owned()))
                    } else {
                        Ok(())
                    }
                })
            });
        }

        let result = lifecycle.shutdown().await;
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().errors.len(), 1);
    }
}
