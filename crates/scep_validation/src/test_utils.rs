// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes for the identity provider, the directory and the service endpoints,
//! for use in this crate's tests and by downstream integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;

use http_client::test_utils::{header, ApiClientCoreMock};
use http_client::{BaseApiClient, HttpError, HttpResponse};

use crate::config::{ClientConfig, RetryConfig};
use crate::error::{Result, ScepValidationError};
use crate::identity::{AcquiredToken, IdentityProvider};

pub const TENANT: &str = "msidlab4.onmicrosoft.com";
pub const APP_ID: &str = "4bd4b4a2-3c4e-4d23-9a6e-3f6b3ce1a7d5";
pub const APP_KEY: &str = "not-a-real-key";
pub const PROVIDER_NAME_AND_VERSION: &str = "ContosoCA/1.0";

pub const GRAPH_HOST: &str = "graph.windows.net";
pub const VALIDATION_SERVICE_URI: &str = "https://fef.dmsua01.manage-dogfood.microsoft.com/RACerts/ScepRequestValidationFEService/Gateway/StatelessScepRequestValidationService";
pub const PKI_CONNECTOR_URI: &str = "https://fef.dmsua01.manage-dogfood.microsoft.com/RACerts/StatelessPkiConnectorService/Gateway/StatelessPkiConnectorService";

pub const DISCOVERY_RESPONSE: &str = r#"{
    "odata.metadata": "https://graph.windows.net/msidlab4.onmicrosoft.com/$metadata#serviceEndpoints",
    "value": [
        {
            "capability": "ScepRequestValidationFEService",
            "serviceId": "b3ff2a1f-15ac-4d37-9d2d-5d1e2a64a1f4",
            "providerName": "ScepRequestValidationFEService",
            "uri": "https://fef.dmsua01.manage-dogfood.microsoft.com/RACerts/ScepRequestValidationFEService/Gateway/StatelessScepRequestValidationService",
            "providerResourceId": "0000000a-0000-0000-c000-000000000000"
        },
        {
            "capability": "PkiConnectorFEService",
            "serviceId": "5b9a0b0e-8f7c-4a0e-b6c0-3f3a7d7cfc11",
            "providerName": "PkiConnectorFEService",
            "uri": "https://fef.dmsua01.manage-dogfood.microsoft.com/RACerts/StatelessPkiConnectorService/Gateway/StatelessPkiConnectorService",
            "providerResourceId": "0000000a-0000-0000-c000-000000000000"
        }
    ]
}"#;

/// A directory answer that only offers the PKI connector.
pub const DISCOVERY_RESPONSE_WITHOUT_VALIDATION: &str = r#"{"value": [
    {
        "providerName": "PkiConnectorFEService",
        "uri": "https://fef.dmsua01.manage-dogfood.microsoft.com/RACerts/StatelessPkiConnectorService/Gateway/StatelessPkiConnectorService"
    }
]}"#;

pub const VALID_SCEP_RESPONSE: &str = r#"{"code":"Success","errorDescription":""}"#;
pub const ERROR_SCEP_RESPONSE: &str = r#"{"code":"ChallengeDecodingError","errorDescription":""}"#;

/// A config pointing at the fakes, with retries quick enough for tests.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(TENANT, APP_ID, APP_KEY, PROVIDER_NAME_AND_VERSION);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        backoff_exponent: 2.0,
        jitter: false,
    };
    config.request_timeout = Duration::from_millis(200);
    config
}

#[derive(Default)]
struct IdentityState {
    acquisitions: HashMap<String, u32>,
    reject_next: Option<String>,
}

/// An identity provider that hands out numbered fake tokens and counts
/// acquisitions per scope.
pub struct MockIdentityProvider {
    state: Mutex<IdentityState>,
    delay: Duration,
    expires_in: Duration,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            delay: Duration::ZERO,
            expires_in: Duration::from_secs(3600),
        }
    }
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// The next acquisition is rejected with `reason`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.lock().reject_next = Some(reason.into());
    }

    pub fn acquisitions(&self, scope: &str) -> u32 {
        self.lock().acquisitions.get(scope).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn acquire_token(&self, scope: &str) -> Result<AcquiredToken> {
        let (n, rejection) = {
            let mut state = self.lock();
            let n = state.acquisitions.entry(scope.to_owned()).or_default();
            *n += 1;
            let n = *n;
            (n, state.reject_next.take())
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match rejection {
            Some(reason) => Err(ScepValidationError::Authentication {
                scope: scope.to_owned(),
                reason,
            }),
            None => Ok(AcquiredToken {
                access_token: format!("token-for-{scope}#{n}"),
                expires_in: self.expires_in,
            }),
        }
    }
}

/// How a fake endpoint answers one request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, String),
    /// Connection refused, or similar.
    TransportError,
    /// Never answers.
    Hang,
}

impl MockReply {
    pub fn ok(body: &str) -> Self {
        Self::Status(200, body.to_owned())
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Status(status, body.to_owned())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub body: Option<Bytes>,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    pub fn json(&self) -> serde_json::Value {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(serde_json::Value::Null)
    }
}

struct BackendState {
    discovery_queue: VecDeque<MockReply>,
    discovery_default: MockReply,
    discovery_delay: Duration,
    discovery_requests: Vec<RecordedRequest>,
    service_queue: VecDeque<MockReply>,
    service_default: MockReply,
    service_requests: Vec<RecordedRequest>,
}

/// Fake directory and service endpoints behind one `BaseApiClient`.
///
/// Requests to the directory host get discovery replies, everything else
/// gets service replies. Queued replies are used first, then the default.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                discovery_queue: VecDeque::new(),
                discovery_default: MockReply::ok(DISCOVERY_RESPONSE),
                discovery_delay: Duration::ZERO,
                discovery_requests: vec![],
                service_queue: VecDeque::new(),
                service_default: MockReply::ok(VALID_SCEP_RESPONSE),
                service_requests: vec![],
            })),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovery(self, reply: MockReply) -> Self {
        self.lock().discovery_default = reply;
        self
    }

    pub fn with_discovery_delay(self, delay: Duration) -> Self {
        self.lock().discovery_delay = delay;
        self
    }

    pub fn with_service(self, reply: MockReply) -> Self {
        self.lock().service_default = reply;
        self
    }

    pub fn push_discovery(&self, reply: MockReply) {
        self.lock().discovery_queue.push_back(reply);
    }

    pub fn push_service(&self, reply: MockReply) {
        self.lock().service_queue.push_back(reply);
    }

    pub fn discovery_fetches(&self) -> usize {
        self.lock().discovery_requests.len()
    }

    pub fn discovery_requests(&self) -> Vec<RecordedRequest> {
        self.lock().discovery_requests.clone()
    }

    pub fn service_requests(&self) -> Vec<RecordedRequest> {
        self.lock().service_requests.clone()
    }

    pub fn service_attempts(&self) -> usize {
        self.lock().service_requests.len()
    }

    pub fn api_client(&self) -> BaseApiClient {
        let backend = self.clone();
        ApiClientCoreMock::from(
            move |url: String,
                  body: Option<Bytes>,
                  content_type: String,
                  headers: Vec<(String, String)>| {
                let backend = backend.clone();
                async move {
                    let request = RecordedRequest {
                        url,
                        body,
                        content_type,
                        headers,
                    };
                    backend.answer(request).await
                }
                .boxed()
            },
        )
        .into()
    }

    async fn answer(&self, request: RecordedRequest) -> std::result::Result<HttpResponse, HttpError> {
        let url = request.url.clone();
        let (reply, delay) = {
            let mut state = self.lock();
            if url.contains(GRAPH_HOST) {
                state.discovery_requests.push(request);
                let reply = state
                    .discovery_queue
                    .pop_front()
                    .unwrap_or_else(|| state.discovery_default.clone());
                (reply, state.discovery_delay)
            } else {
                state.service_requests.push(request);
                let reply = state
                    .service_queue
                    .pop_front()
                    .unwrap_or_else(|| state.service_default.clone());
                (reply, Duration::ZERO)
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match reply {
            MockReply::Status(status, body) => Ok(HttpResponse::new(status, body)),
            MockReply::TransportError => Err(HttpError::RequestError {
                ctx: format!("requesting {url}"),
                status: None,
                retriable: true,
                source: "connection refused".into(),
            }),
            MockReply::Hang => futures::future::pending().await,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
