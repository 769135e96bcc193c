// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Loads backend and service definitions from JSON definition files, mirroring
//! `backend.DefsFromFile`/`service.DefsFromFile` in the Go original: a file is a JSON array
//! of homogeneous entries, directories are expanded (non-recursively) to their `*.json`
//! members, and `disabled` definitions are retained in the list rather than dropped, so the
//! builder can log what it skipped.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ArchiveError;

/// TLS material for a backend connection. Credential/TLS setup for RPC listeners is out of
/// scope for this crate; this type only threads the configuration through to a backend
/// constructor that may need it to dial its own document-store connection.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TlsConfig {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
}

/// A single backend or service definition, as loaded from a definition file. The same
/// shape serves both: `backend` is empty/unused for backend definitions, and `url`/`tls`
/// are typically empty/unused for service definitions.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Definition {
    pub id: String,
    pub class: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub opts: Map<String, Value>,
}

impl Definition {
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.opts.get(key).and_then(Value::as_str)
    }
}

/// Parses one definition file. The file must have a `.json` suffix and contain a JSON
/// array of definitions.
pub fn defs_from_file(path: &Path) -> Result<Vec<Definition>, ArchiveError> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return Err(ArchiveError::BadRequest(format!(
            "definition file {} must have a .json suffix",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|err| ArchiveError::Internal(format!("reading {}: {err}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|err| ArchiveError::BadRequest(format!("parsing {}: {err}", path.display())))
}

/// Expands a directory, non-recursively, to the `*.json` files directly within it.
fn expand_dir(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|err| ArchiveError::Internal(format!("reading directory {}: {err}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|err| ArchiveError::Internal(format!("listing {}: {err}", dir.display())))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Loads every definition reachable from the given explicit files and directories,
/// combining them into a single flat list. Definitions with `disabled=true` are retained;
/// callers (the builder) decide to skip them.
pub fn defs_from_paths(files: &[PathBuf], dirs: &[PathBuf]) -> Result<Vec<Definition>, ArchiveError> {
    let mut paths: Vec<PathBuf> = files.to_vec();
    for dir in dirs {
        paths.extend(expand_dir(dir)?);
    }

    let mut defs = Vec::new();
    for path in paths {
        defs.extend(defs_from_file(&path)?);
    }
    Ok(defs)
}
