// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::str::FromStr;

use grpc_util::infra::{GrpcConfig, InfraConfig};
use serde::Deserialize;

/// A set of definition sources: explicit files plus directories to expand non-recursively
/// to their `*.json` members. Used identically for backend and service definitions.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct DefsConfig {
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl DefsConfig {
    fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}

/// One RPC API's enable toggle: `enable` gates whether the adapter layer registers it at
/// all, `id` names which built service answers it.
#[derive(Clone, Deserialize, Debug, Default)]
pub struct ApiToggle {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ArchiveApiConfig {
    #[serde(default)]
    pub event: ApiToggle,
    #[serde(default)]
    pub dns: ApiToggle,
    #[serde(default)]
    pub tls: ApiToggle,
}

impl ArchiveApiConfig {
    fn any_enabled(&self) -> bool {
        self.event.enable || self.dns.enable || self.tls.enable
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ArchiveConfig {
    pub backend: DefsConfig,
    pub service: DefsConfig,
    #[serde(default)]
    pub api: ArchiveApiConfig,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    /// URI the (externally wired) RPC listener binds to. This crate does not itself open a
    /// socket on it; it is carried through so the composition root can log/expose it to the
    /// out-of-scope RPC adapter layer.
    pub listen_uri: String,

    /// `tracing`/`RUST_LOG`-style filter directive, applied before `setup_logging` runs if
    /// `RUST_LOG` is not already set in the environment.
    pub log_level: String,

    /// Backend/service definitions and per-API enable toggles.
    pub archive: ArchiveConfig,

    /// Admin endpoints configuration (health, metrics, Sentry DSN).
    pub infra: Option<InfraConfig>,

    /// gRPC configuration, applied by the (out-of-scope) RPC adapter layer.
    pub grpc: Option<GrpcConfig>,
}

impl Config {
    /// Checks the mandatory surface described in the configuration surface: at least one
    /// backend source, at least one service source, and at least one enabled API.
    pub fn validate(&self) -> Result<(), String> {
        if self.archive.backend.is_empty() {
            return Err("archive.backend must name at least one dir or file".to_owned());
        }
        if self.archive.service.is_empty() {
            return Err("archive.service must name at least one dir or file".to_owned());
        }
        if !self.archive.api.any_enabled() {
            return Err("at least one of archive.api.{event,dns,tls} must be enabled".to_owned());
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = String;

    fn from_str(raw_config: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(raw_config).map_err(|e| format!("config parse error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let yaml = r#"
listen_uri: "0.0.0.0:7000"
log_level: "info"
archive:
  backend:
    files: ["backends.json"]
  service:
    files: ["services.json"]
  api:
    dns:
      enable: true
      id: dns1
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.listen_uri, "0.0.0.0:7000");
        assert!(config.archive.api.dns.enable);
        assert_eq!(config.archive.api.dns.id, "dns1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_config_with_no_enabled_api() {
        let yaml = r#"
listen_uri: "0.0.0.0:7000"
log_level: "info"
archive:
  backend:
    files: ["backends.json"]
  service:
    files: ["services.json"]
"#;
        let config = Config::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_config_with_no_backend_sources() {
        let yaml = r#"
listen_uri: "0.0.0.0:7000"
log_level: "info"
archive:
  backend: {}
  service:
    files: ["services.json"]
  api:
    event:
      enable: true
      id: events1
"#;
        let config = Config::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
