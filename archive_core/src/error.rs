// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use tonic::Status;

/// Uniform error taxonomy shared by every archive service and by the backend/service
/// registries. Kept small and closed deliberately so that RPC handlers can map it
/// mechanically onto `tonic::Status` without per-service translation tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArchiveError {
    /// The service has not completed `Start`, or has already completed `Shutdown`.
    Unavailable(String),
    /// The caller's input failed validation or could not be converted into a storable
    /// record.
    BadRequest(String),
    /// A read found nothing matching the request. Most read paths prefer returning
    /// `Ok(None)`/`Ok((_, false))` over this variant; it exists for APIs where "not found"
    /// must be an error rather than a boolean flag.
    NotFound(String),
    /// The backing document store failed in a way the caller cannot repair.
    Internal(String),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            ArchiveError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ArchiveError::NotFound(msg) => write!(f, "not found: {msg}"),
            ArchiveError::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<String> for ArchiveError {
    fn from(msg: String) -> Self {
        ArchiveError::Internal(msg)
    }
}

impl From<ArchiveError> for String {
    fn from(err: ArchiveError) -> Self {
        format!("{err}")
    }
}

impl From<ArchiveError> for Status {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Unavailable(msg) => Status::unavailable(msg),
            ArchiveError::BadRequest(msg) => Status::invalid_argument(msg),
            ArchiveError::NotFound(msg) => Status::not_found(msg),
            ArchiveError::Internal(msg) => Status::internal(msg),
        }
    }
}
