// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use http_client::api_client::{decode_json, error_for_status};
use http_client::BaseApiClient;

use crate::config::{AppSecret, ClientConfig};
use crate::error::{Result, ScepValidationError};

/// A bearer token fresh from the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct AcquiredToken {
    pub access_token: String,
    /// Lifetime as reported by the identity provider, counted from receipt.
    pub expires_in: Duration,
}

impl fmt::Debug for AcquiredToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquiredToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Issues bearer tokens for a resource scope. Implementations should map a
/// rejection of our credentials to `ScepValidationError::Authentication` and
/// leave retrying to the caller.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn acquire_token(&self, scope: &str) -> Result<AcquiredToken>;
}

/// Client-credentials grant against the tenant's v2.0 token endpoint.
pub struct ClientSecretProvider {
    api_client: BaseApiClient,
    token_url: String,
    app_id: String,
    app_key: AppSecret,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl ClientSecretProvider {
    pub fn new(api_client: BaseApiClient, config: &ClientConfig) -> Self {
        let authority = config.endpoints.authority.trim_end_matches('/');
        Self {
            api_client,
            token_url: format!("{authority}/{}/oauth2/v2.0/token", config.tenant),
            app_id: config.app_id.clone(),
            app_key: config.app_key.clone(),
        }
    }

    fn form_body(&self, scope: &str) -> Bytes {
        let scope = format!("{}/.default", scope.trim_end_matches('/'));
        form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.app_id)
            .append_pair("client_secret", self.app_key.expose())
            .append_pair("scope", &scope)
            .finish()
            .into()
    }
}

impl fmt::Debug for ClientSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretProvider")
            .field("token_url", &self.token_url)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl IdentityProvider for ClientSecretProvider {
    async fn acquire_token(&self, scope: &str) -> Result<AcquiredToken> {
        debug!("identity: requesting token for {scope} from {}", self.token_url);
        let response = self
            .api_client
            .post(
                &self.token_url,
                self.form_body(scope),
                "application/x-www-form-urlencoded",
                &[],
            )
            .await
            .map_err(|e| ScepValidationError::from_http("requesting token", e))?;

        if matches!(response.status, 400 | 401 | 403) {
            let reason = match serde_json::from_slice::<TokenErrorResponse>(&response.body) {
                Ok(TokenErrorResponse {
                    error,
                    error_description: Some(description),
                }) => format!("{error}: {description}"),
                Ok(TokenErrorResponse { error, .. }) => error,
                Err(_) => format!("identity provider answered {}", response.status),
            };
            return Err(ScepValidationError::Authentication {
                scope: scope.to_owned(),
                reason,
            });
        }

        let response = error_for_status(&self.token_url, response)
            .map_err(|e| ScepValidationError::from_http("requesting token", e))?;
        let token: TokenResponse = decode_json(&self.token_url, &response.body)
            .map_err(|e| ScepValidationError::from_http("reading token response", e))?;

        Ok(AcquiredToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }
}
