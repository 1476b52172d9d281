// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

// Cache ages and credential expiry go through tokio's clock, so tests can
// pause and advance time instead of sleeping.
pub type Instant = tokio::time::Instant;

pub fn get_now() -> Instant {
    tokio::time::Instant::now()
}
