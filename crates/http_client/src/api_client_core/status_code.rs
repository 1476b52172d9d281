// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// If `api_client::error_for_status` sees the given HTTP status,
/// should the resulting error be flagged as retriable?
pub fn is_retriable(code: u16) -> bool {
    match code {
        // Too Many Requests: the directory throttles aggressively, backoff helps.
        429 => true,

        // Internal Server Error: generic, often intermittent.
        500 => true,

        // Bad Gateway / Service Unavailable / Gateway Timeout: the front door
        // is up but the thing behind it isn't, for now.
        502..=504 => true,

        // 400 (Bad Request), 401 (Unauthorized), 404 (Not Found) won't get
        // better by asking again.
        _ => false,
    }
}
