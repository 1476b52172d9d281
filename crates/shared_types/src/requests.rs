// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// A unique per-request ID (the "activity id") that we send to the
/// device-management backend as an HTTP header. The backend echoes it in its
/// own logs, so quoting it in a support ticket lets both sides find the
/// same exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl FromStr for RequestId {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(String::from(s)))
    }
}

impl RequestId {
    pub const FIELD: &'static str = "client-request-id";

    pub fn new_unique() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new_unique_with_prefix(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
