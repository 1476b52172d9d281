// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use shared_types::requests::RequestId;
use shared_types::{info_with_timestamp, warn_with_timestamp};
use tracing::debug;

use http_client::api_client::encode_json;
use http_client::{BaseApiClient, HttpResponse};

use crate::config::{ClientConfig, RetryConfig};
use crate::discovery::ServiceDiscoveryCache;
use crate::error::{Result, ScepValidationError};
use crate::identity::{ClientSecretProvider, IdentityProvider};
use crate::retry_if::{retry_policy, with_timeout};
use crate::token::TokenProvider;

/// One action to invoke on a discovered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Action path below the service endpoint, e.g. `ScepActions/validateRequest`.
    pub url_suffix: String,
    /// Sent as the `api-version` query parameter.
    pub api_version: String,
    /// JSON body.
    pub body: Bytes,
}

impl ServiceRequest {
    pub fn json<T: serde::Serialize>(
        url_suffix: impl Into<String>,
        api_version: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        let url_suffix = url_suffix.into();
        let body = encode_json(&url_suffix, payload)
            .map_err(|e| ScepValidationError::from_http("encoding request", e))?;
        Ok(Self {
            url_suffix,
            api_version: api_version.into(),
            body,
        })
    }
}

/// Per-call bookkeeping, alive for one `send`.
struct RequestContext<'a> {
    service_name: &'a str,
    request: &'a ServiceRequest,
    request_id: RequestId,
    attempts: AtomicU32,
    discovery_invalidated: AtomicBool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Resource whose tokens authorize service calls.
    pub service_resource: String,
    pub retry: RetryConfig,
    /// Upper bound on one POST to a service endpoint.
    pub request_timeout: Duration,
}

impl From<&ClientConfig> for DispatchConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            service_resource: config.endpoints.service_resource.clone(),
            retry: config.retry.clone(),
            request_timeout: config.request_timeout,
        }
    }
}

/// Sends a `ServiceRequest` to whichever endpoint discovery currently names
/// for a service, with a bearer token for the service resource.
///
/// Transport failures and timeouts are retried with backoff, re-resolving the
/// endpoint each time; the first of them in a call marks the discovery
/// document stale. A 401/403 gets one retry with a fresh token; that retry
/// draws on the same attempt budget as transport failures. Any other
/// non-2xx answer is returned as `ServiceError` without retrying.
///
/// Its token cache is not reachable from outside the crate:
///
/// ```compile_fail
/// fn tokens(client: &scep_validation::ScepValidationClient) {
///     let _ = &client.dispatcher().tokens;
/// }
/// ```
pub struct RequestDispatcher {
    api_client: BaseApiClient,
    discovery: Arc<ServiceDiscoveryCache>,
    tokens: Arc<TokenProvider>,
    config: DispatchConfig,
}

impl RequestDispatcher {
    pub fn new(
        api_client: BaseApiClient,
        discovery: Arc<ServiceDiscoveryCache>,
        tokens: Arc<TokenProvider>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            api_client,
            discovery,
            tokens,
            config,
        }
    }

    /// Wire up discovery and token caches for `config`, all sharing `api_client`.
    pub fn from_config(
        config: &ClientConfig,
        api_client: BaseApiClient,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let tokens = Arc::new(TokenProvider::new(identity, config.token.clone()));
        let discovery = Arc::new(ServiceDiscoveryCache::new(
            api_client.clone(),
            tokens.clone(),
            config.discovery_url(),
            config.endpoints.graph_resource.clone(),
            config.discovery.clone(),
        ));
        Ok(Self::new(api_client, discovery, tokens, config.into()))
    }

    /// Production wiring for `config`: a reqwest client bounded by
    /// `request_timeout` and a client-secret identity provider.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let api_client = BaseApiClient::new(Some(config.request_timeout))
            .map_err(|e| ScepValidationError::from_http("building http client", e))?;
        let identity = Arc::new(ClientSecretProvider::new(api_client.clone(), config));
        Self::from_config(config, api_client, identity)
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscoveryCache> {
        &self.discovery
    }

    pub async fn send(&self, service_name: &str, request: &ServiceRequest) -> Result<HttpResponse> {
        self.send_with_id(service_name, request, RequestId::new_unique())
            .await
    }

    /// Like `send`, with a caller-chosen `client-request-id`.
    pub async fn send_with_id(
        &self,
        service_name: &str,
        request: &ServiceRequest,
        request_id: RequestId,
    ) -> Result<HttpResponse> {
        let ctx = RequestContext {
            service_name,
            request,
            request_id,
            attempts: AtomicU32::new(0),
            discovery_invalidated: AtomicBool::new(false),
        };
        let mut refreshed_token = false;

        loop {
            let response = retry_policy(&self.remaining_retry(&ctx))
                .retry_if(
                    || self.attempt(&ctx),
                    |e: &ScepValidationError| {
                        info_with_timestamp!(
                            "{} {}: attempt {} failed: {}",
                            service_name,
                            ctx.request_id,
                            ctx.attempts.load(Ordering::SeqCst),
                            e
                        );
                        e.is_retriable()
                    },
                )
                .await?;

            match response.status {
                200..=299 => {
                    debug!(
                        "dispatch: {service_name} {} answered {} after {} attempt(s)",
                        ctx.request_id,
                        response.status,
                        ctx.attempts.load(Ordering::SeqCst)
                    );
                    return Ok(response);
                }
                401 | 403 => {
                    if refreshed_token {
                        return Err(ScepValidationError::Authentication {
                            scope: self.config.service_resource.clone(),
                            reason: format!(
                                "{service_name} answered {} after a token refresh",
                                response.status
                            ),
                        });
                    }
                    info_with_timestamp!(
                        "{} {}: answered {}, retrying with a fresh token",
                        service_name,
                        ctx.request_id,
                        response.status
                    );
                    self.tokens.invalidate(&self.config.service_resource);
                    refreshed_token = true;
                }
                status => {
                    return Err(ScepValidationError::ServiceError {
                        status,
                        body: response.body_text(),
                    });
                }
            }
        }
    }

    /// Retry settings for what is left of this call's attempts. A pass
    /// started after a token refresh always gets at least one.
    fn remaining_retry(&self, ctx: &RequestContext<'_>) -> RetryConfig {
        let used = ctx.attempts.load(Ordering::SeqCst);
        RetryConfig {
            max_attempts: self.config.retry.max_attempts.saturating_sub(used).max(1),
            ..self.config.retry.clone()
        }
    }

    async fn attempt(&self, ctx: &RequestContext<'_>) -> Result<HttpResponse> {
        ctx.attempts.fetch_add(1, Ordering::SeqCst);

        let endpoint = self.discovery.resolve(ctx.service_name).await?;
        let credential = self.tokens.get_token(&self.config.service_resource).await?;
        let url = endpoint.action_url(&ctx.request.url_suffix, &ctx.request.api_version);
        let headers = [
            credential.authorization_header(),
            (RequestId::FIELD.to_owned(), ctx.request_id.to_string()),
        ];
        debug!("dispatch: POST {url} ({})", ctx.request_id);

        let result = with_timeout(self.config.request_timeout, async {
            self.api_client
                .post(&url, ctx.request.body.clone(), "application/json", &headers)
                .await
                .map_err(|e| ScepValidationError::from_http(format!("posting to {url}"), e))
        })
        .await;

        if let Err(e) = &result {
            if e.is_retriable() && !ctx.discovery_invalidated.swap(true, Ordering::SeqCst) {
                warn_with_timestamp!(
                    "{} {}: endpoint {} unreachable, invalidating service discovery",
                    ctx.service_name,
                    ctx.request_id,
                    endpoint.uri
                );
                self.discovery.invalidate();
            }
        }
        result
    }
}

impl fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("discovery", &self.discovery)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
