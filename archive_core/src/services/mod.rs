// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The three archive service implementations bound to an abstract document-store backend.

pub mod dns;
pub mod event;
pub mod tls;
