// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use shared_types::{info_with_timestamp, warn_with_timestamp};
use tracing::debug;

use http_client::api_client::{decode_json, error_for_status};
use http_client::BaseApiClient;

use crate::config::DiscoveryConfig;
use crate::error::{Result, ScepValidationError};
use crate::instant::{get_now, Instant};
use crate::retry_if::with_timeout;
use crate::single_flight::SingleFlightCache;
use crate::stale_flag::StaleFlag;
use crate::token::TokenProvider;

/// One backend capability and where it currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub uri: String,
}

impl ServiceEndpoint {
    /// `{uri}/{suffix}?api-version={api_version}`
    pub fn action_url(&self, suffix: &str, api_version: &str) -> String {
        format!(
            "{}/{}?api-version={api_version}",
            self.uri.trim_end_matches('/'),
            suffix.trim_start_matches('/')
        )
    }
}

#[derive(Deserialize)]
struct ServiceEndpointsResponse {
    value: Vec<ServiceEndpointEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceEndpointEntry {
    provider_name: String,
    uri: String,
}

/// The set of service endpoints offered to this tenant, as of `fetched_at`.
#[derive(Debug)]
pub struct DiscoveryDocument {
    endpoints: Vec<ServiceEndpoint>,
    fetched_at: Instant,
    stale: StaleFlag,
}

impl DiscoveryDocument {
    /// Build a document from endpoints in the order the directory listed them.
    /// A name listed twice keeps its first entry.
    pub fn new(entries: impl IntoIterator<Item = ServiceEndpoint>) -> Self {
        let mut endpoints: Vec<ServiceEndpoint> = vec![];
        for entry in entries {
            if let Some(existing) = endpoints.iter().find(|e| e.name == entry.name) {
                warn_with_timestamp!(
                    "Discovery lists {} twice; keeping {} and ignoring {}",
                    entry.name,
                    existing.uri,
                    entry.uri
                );
                continue;
            }
            endpoints.push(entry);
        }
        Self {
            endpoints,
            fetched_at: get_now(),
            stale: StaleFlag::default(),
        }
    }

    fn parse(url: &str, body: &[u8]) -> Result<Self> {
        let response: ServiceEndpointsResponse = decode_json(url, body)
            .map_err(|e| ScepValidationError::from_http("reading service discovery", e))?;
        Ok(Self::new(response.value.into_iter().map(|entry| {
            ServiceEndpoint {
                name: entry.provider_name,
                uri: entry.uri,
            }
        })))
    }

    pub fn get(&self, service_name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints.iter().find(|e| e.name == service_name)
    }

    pub fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }

    pub fn age(&self) -> Duration {
        get_now().saturating_duration_since(self.fetched_at)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.is_stale()
    }

    /// Neither marked stale nor older than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !self.is_stale() && self.age() < ttl
    }
}

/// Resolves service names to endpoints through the tenant's directory.
///
/// One document is cached per discovery URL. It is re-fetched once its TTL
/// runs out, after `invalidate`, or when a lookup misses on a document that
/// is at least `miss_refresh_after` old. Concurrent callers that need a
/// fetch share a single one, and share its failure too.
pub struct ServiceDiscoveryCache {
    api_client: BaseApiClient,
    tokens: Arc<TokenProvider>,
    discovery_url: String,
    graph_resource: String,
    config: DiscoveryConfig,
    documents: SingleFlightCache<String, Arc<DiscoveryDocument>, ScepValidationError>,
}

impl ServiceDiscoveryCache {
    pub fn new(
        api_client: BaseApiClient,
        tokens: Arc<TokenProvider>,
        discovery_url: impl Into<String>,
        graph_resource: impl Into<String>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            api_client,
            tokens,
            discovery_url: discovery_url.into(),
            graph_resource: graph_resource.into(),
            documents: SingleFlightCache::new().with_flight_deadline(config.fetch_timeout),
            config,
        }
    }

    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// The current document, fetching one if there is none fresh.
    pub async fn document(&self) -> Result<Arc<DiscoveryDocument>> {
        let ttl = self.config.ttl;
        let fetch = Self::fetch(
            self.api_client.clone(),
            self.tokens.clone(),
            self.discovery_url.clone(),
            self.graph_resource.clone(),
            self.config.fetch_timeout,
        );
        self.documents
            .get_or_populate(
                self.discovery_url.clone(),
                |document| document.is_fresh(ttl),
                move || fetch,
            )
            .await
    }

    pub async fn resolve(&self, service_name: &str) -> Result<ServiceEndpoint> {
        let document = self.document().await?;
        if let Some(endpoint) = document.get(service_name) {
            return Ok(endpoint.clone());
        }

        if document.age() >= self.config.miss_refresh_after {
            debug!(
                "discovery: {service_name} missing from a {}s old document, refetching",
                document.age().as_secs()
            );
            document.stale.mark_stale();
            let document = self.document().await?;
            if let Some(endpoint) = document.get(service_name) {
                return Ok(endpoint.clone());
            }
        }

        Err(ScepValidationError::ServiceUnavailable {
            service: service_name.to_owned(),
        })
    }

    /// Mark the current document stale; the next lookup fetches a new one.
    pub fn invalidate(&self) {
        if let Some(document) = self.documents.peek(&self.discovery_url) {
            if !document.is_stale() {
                debug!("discovery: document for {} marked stale", self.discovery_url);
            }
            document.stale.mark_stale();
        }
    }

    async fn fetch(
        api_client: BaseApiClient,
        tokens: Arc<TokenProvider>,
        url: String,
        graph_resource: String,
        fetch_timeout: Duration,
    ) -> Result<Arc<DiscoveryDocument>> {
        with_timeout(fetch_timeout, async {
            let mut refreshed_token = false;
            loop {
                let credential = tokens.get_token(&graph_resource).await?;
                let response = api_client
                    .get(&url, &[credential.authorization_header()])
                    .await
                    .map_err(|e| ScepValidationError::from_http("fetching service discovery", e))?;

                if matches!(response.status, 401 | 403) {
                    tokens.invalidate(&graph_resource);
                    if refreshed_token {
                        return Err(ScepValidationError::Authentication {
                            scope: graph_resource.clone(),
                            reason: format!("directory answered {}", response.status),
                        });
                    }
                    debug!("discovery: directory answered {}, refreshing token", response.status);
                    refreshed_token = true;
                    continue;
                }

                let response = error_for_status(&url, response)
                    .map_err(|e| ScepValidationError::from_http("fetching service discovery", e))?;
                let document = DiscoveryDocument::parse(&url, &response.body)?;
                info_with_timestamp!(
                    "Fetched service discovery from {}: {} endpoints",
                    url,
                    document.endpoints().len()
                );
                return Ok(Arc::new(document));
            }
        })
        .await
    }
}

impl fmt::Debug for ServiceDiscoveryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDiscoveryCache")
            .field("discovery_url", &self.discovery_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, TokenConfig};
    use crate::test_utils::*;

    fn discovery_cache(backend: &MockBackend, identity: &Arc<MockIdentityProvider>) -> ServiceDiscoveryCache {
        let config: ClientConfig = test_config();
        let tokens = Arc::new(TokenProvider::new(identity.clone(), TokenConfig::default()));
        ServiceDiscoveryCache::new(
            backend.api_client(),
            tokens,
            config.discovery_url(),
            config.endpoints.graph_resource.clone(),
            config.discovery.clone(),
        )
    }

    #[test]
    fn action_url_joins_suffix_and_api_version() {
        let endpoint = ServiceEndpoint {
            name: "ScepRequestValidationFEService".into(),
            uri: "https://fef.example.com/Gateway/".into(),
        };
        assert_eq!(
            endpoint.action_url("/ScepActions/validateRequest", "2018-02-20"),
            "https://fef.example.com/Gateway/ScepActions/validateRequest?api-version=2018-02-20"
        );
    }

    #[tokio::test]
    async fn duplicate_names_keep_the_first_entry() {
        let document = DiscoveryDocument::new([
            ServiceEndpoint {
                name: "A".into(),
                uri: "https://first".into(),
            },
            ServiceEndpoint {
                name: "B".into(),
                uri: "https://b".into(),
            },
            ServiceEndpoint {
                name: "A".into(),
                uri: "https://second".into(),
            },
        ]);
        assert_eq!(document.endpoints().len(), 2);
        assert_eq!(document.get("A").unwrap().uri, "https://first");
    }

    #[tokio::test]
    async fn resolves_validation_service() {
        let backend = MockBackend::new();
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let endpoint = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap();
        assert_eq!(endpoint.uri, VALIDATION_SERVICE_URI);

        let requests = backend.discovery_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            format!("https://graph.windows.net/{TENANT}/servicePrincipalsByAppId/0000000a-0000-0000-c000-000000000000/serviceEndpoints?api-version=1.6")
        );
        assert_eq!(
            requests[0].header("authorization"),
            Some("Bearer token-for-https://graph.windows.net/#1")
        );
    }

    #[tokio::test]
    async fn missing_service_is_unavailable_without_refetch_of_young_document() {
        let backend = MockBackend::new().with_discovery(MockReply::ok(DISCOVERY_RESPONSE_WITHOUT_VALIDATION));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let err = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap_err();
        match err {
            ScepValidationError::ServiceUnavailable { service } => {
                assert_eq!(service, "ScepRequestValidationFEService")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(backend.discovery_fetches(), 1);

        // the connector is still there
        let endpoint = discovery.resolve("PkiConnectorFEService").await.unwrap();
        assert_eq!(endpoint.uri, PKI_CONNECTOR_URI);
        assert_eq!(backend.discovery_fetches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn miss_on_old_document_refetches_once() {
        let backend = MockBackend::new();
        backend.push_discovery(MockReply::ok(DISCOVERY_RESPONSE_WITHOUT_VALIDATION));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        discovery.resolve("PkiConnectorFEService").await.unwrap();
        tokio::time::advance(Duration::from_secs(6 * 60)).await;

        let endpoint = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap();
        assert_eq!(endpoint.uri, VALIDATION_SERVICE_URI);
        assert_eq!(backend.discovery_fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_refetch_within_ttl() {
        let backend = MockBackend::new();
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        for _ in 0..5 {
            discovery
                .resolve("ScepRequestValidationFEService")
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(10 * 60)).await;
        }
        assert_eq!(backend.discovery_fetches(), 1);

        // 50 minutes in; the hour runs out on the next step
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap();
        assert_eq!(backend.discovery_fetches(), 2);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let backend = MockBackend::new().with_discovery_delay(Duration::from_millis(50));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let results = futures::future::join_all(
            (0..10).map(|_| discovery.resolve("ScepRequestValidationFEService")),
        )
        .await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Ok(e) if e.uri == VALIDATION_SERVICE_URI)));
        assert_eq!(backend.discovery_fetches(), 1);
        assert_eq!(identity.acquisitions("https://graph.windows.net/"), 1);
    }

    #[tokio::test]
    async fn fetch_failure_reaches_every_waiter() {
        let backend = MockBackend::new()
            .with_discovery(MockReply::status(500, "directory down"))
            .with_discovery_delay(Duration::from_millis(20));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let results = futures::future::join_all(
            (0..4).map(|_| discovery.resolve("ScepRequestValidationFEService")),
        )
        .await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(ScepValidationError::Transport { .. }))));
        assert_eq!(backend.discovery_fetches(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let backend = MockBackend::new();
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let first = discovery.document().await.unwrap();
        discovery.invalidate();
        assert!(first.is_stale());

        let second = discovery.document().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_stale());
        assert_eq!(backend.discovery_fetches(), 2);
    }

    #[tokio::test]
    async fn rejected_directory_token_is_refreshed_once() {
        let backend = MockBackend::new();
        backend.push_discovery(MockReply::status(401, ""));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap();
        assert_eq!(identity.acquisitions("https://graph.windows.net/"), 2);

        let requests = backend.discovery_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].header("authorization"),
            Some("Bearer token-for-https://graph.windows.net/#2")
        );
    }

    #[tokio::test]
    async fn repeated_directory_rejection_is_an_authentication_error() {
        let backend = MockBackend::new().with_discovery(MockReply::status(403, ""));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let err = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap_err();
        assert!(matches!(err, ScepValidationError::Authentication { .. }), "{err}");
        assert_eq!(backend.discovery_fetches(), 2);
    }

    #[tokio::test]
    async fn unparseable_document_is_malformed() {
        let backend = MockBackend::new().with_discovery(MockReply::ok(r#"{"value": "nope"}"#));
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let err = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap_err();
        assert!(
            matches!(err, ScepValidationError::MalformedResponse { .. }),
            "{err}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_directory_times_out() {
        let backend = MockBackend::new().with_discovery(MockReply::Hang);
        let identity = Arc::new(MockIdentityProvider::new());
        let discovery = discovery_cache(&backend, &identity);

        let err = discovery
            .resolve("ScepRequestValidationFEService")
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
    }
}
