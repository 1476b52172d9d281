// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use shared_types::info_with_timestamp;
use tracing::debug;

use crate::config::TokenConfig;
use crate::error::{Result, ScepValidationError};
use crate::identity::IdentityProvider;
use crate::instant::{get_now, Instant};
use crate::retry_if::with_timeout;
use crate::single_flight::SingleFlightCache;

/// A bearer token together with the resource scope it was issued for.
///
/// The token text stays inside this crate; it only leaves as the
/// `Authorization` header of a dispatched request.
///
/// ```compile_fail
/// fn leak(credential: &scep_validation::token::Credential) -> &str {
///     &credential.token
/// }
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Instant,
    scope: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Instant, scope: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            scope: scope.into(),
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the credential is still good `margin` from now.
    pub fn is_valid_for(&self, margin: Duration) -> bool {
        get_now() + margin < self.expires_at
    }

    pub(crate) fn authorization_header(&self) -> (String, String) {
        ("Authorization".to_owned(), format!("Bearer {}", self.token))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Hands out cached bearer tokens, one per resource scope.
///
/// A cached credential is reused while it stays valid for at least
/// `expiry_margin`. When it doesn't (or was invalidated after the backend
/// rejected it) exactly one acquisition runs per scope, and every concurrent
/// caller for that scope gets its result. Failed acquisitions are not cached.
pub struct TokenProvider {
    identity: Arc<dyn IdentityProvider>,
    config: TokenConfig,
    credentials: SingleFlightCache<String, Credential, ScepValidationError>,
}

impl TokenProvider {
    pub fn new(identity: Arc<dyn IdentityProvider>, config: TokenConfig) -> Self {
        Self {
            identity,
            credentials: SingleFlightCache::new().with_flight_deadline(config.acquire_timeout),
            config,
        }
    }

    pub async fn get_token(&self, scope: &str) -> Result<Credential> {
        let margin = self.config.expiry_margin;
        let acquire_timeout = self.config.acquire_timeout;
        let identity = self.identity.clone();
        let owned_scope = scope.to_owned();

        self.credentials
            .get_or_populate(
                scope.to_owned(),
                |credential| credential.is_valid_for(margin),
                move || async move {
                    debug!("token: acquiring credential for {owned_scope}");
                    let acquired =
                        with_timeout(acquire_timeout, identity.acquire_token(&owned_scope)).await?;
                    let credential = Credential::new(
                        acquired.access_token,
                        get_now() + acquired.expires_in,
                        owned_scope.as_str(),
                    );
                    info_with_timestamp!(
                        "Acquired credential for {}, valid for {}s",
                        owned_scope,
                        acquired.expires_in.as_secs()
                    );
                    Ok(credential)
                },
            )
            .await
    }

    /// Drop the cached credential for `scope`; the next `get_token` acquires a new one.
    pub fn invalidate(&self, scope: &str) {
        if self.credentials.invalidate(&scope.to_owned()).is_some() {
            debug!("token: invalidated credential for {scope}");
        }
    }
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
