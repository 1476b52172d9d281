// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::api_client_core::{status_code, ApiClientCore, ApiClientCoreImpl, HttpResponse};
use crate::error::HttpError;

/// Helper for querying the directory, the identity provider and the
/// device-management services.
#[derive(Clone)]
pub struct BaseApiClient {
    // 99% of the time this is going to be ApiClientCoreImpl, but it's overrideable for mocking purposes
    core: Arc<dyn ApiClientCore + Send + Sync>,
}

impl<Core: ApiClientCore + Send + Sync + 'static> From<Core> for BaseApiClient {
    fn from(core: Core) -> Self {
        Self {
            core: Arc::new(core),
        }
    }
}

impl BaseApiClient {
    /// Construct a reqwest-backed client whose requests are each bounded by `timeout`.
    pub fn new(timeout: Option<Duration>) -> Result<Self, HttpError> {
        Ok(ApiClientCoreImpl::new(timeout)?.into())
    }

    /// Plain GET. The response is returned whatever its status.
    pub async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpError> {
        self.core.raw_request(url, None, "", headers).await
    }

    /// Plain POST. Bring your own content-type. The response is returned whatever its status.
    pub async fn post(
        &self,
        url: &str,
        body: Bytes,
        content_type: &'static str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpError> {
        self.core
            .raw_request(url, Some(body), content_type, headers)
            .await
    }
}

impl fmt::Debug for BaseApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseApiClient").finish_non_exhaustive()
    }
}

/// Turn a non-2xx response into a `RequestError`, flagged retriable according to
/// `status_code::is_retriable`.
pub fn error_for_status(url: &str, response: HttpResponse) -> Result<HttpResponse, HttpError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(HttpError::RequestError {
        ctx: format!("requesting {url}"),
        status: Some(response.status),
        retriable: status_code::is_retriable(response.status),
        source: response.body_text().into(),
    })
}

pub fn encode_json<I: serde::Serialize>(url: &str, payload: &I) -> Result<Bytes, HttpError> {
    serde_json::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| HttpError::EncodeError {
            encoding: format!("json payload for {url}"),
            source: Box::new(e),
        })
}

pub fn decode_json<O: serde::de::DeserializeOwned>(url: &str, bytes: &[u8]) -> Result<O, HttpError> {
    serde_json::from_slice(bytes).map_err(|e| {
        let error_text = format_serde_error_from_bytes(bytes.to_vec(), e);
        HttpError::DecodeError {
            decoding: format!("json from {url}"),
            source: error_text.into(),
        }
    })
}

fn format_serde_error_from_bytes(
    bytes: Vec<u8>,
    e: impl Into<format_serde_error::ErrorTypes>,
) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => format_serde_error::SerdeError::new(text, e).to_string(),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use serde::Deserialize;

    use super::*;
    use crate::test_utils::ApiClientCoreMock;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        pong: u32,
    }

    fn client_answering(status: u16, body: &'static str) -> BaseApiClient {
        ApiClientCoreMock::from(move |_url, _body, _content_type, _headers| {
            async move { Ok(HttpResponse::new(status, body)) }.boxed()
        })
        .into()
    }

    #[tokio::test]
    async fn get_returns_body_for_decoding() {
        let client = client_answering(200, r#"{"pong": 3}"#);
        let response = client.get("https://example.com/ping", &[]).await.unwrap();
        let response = error_for_status("https://example.com/ping", response).unwrap();
        let pong: Pong = decode_json("https://example.com/ping", &response.body).unwrap();
        assert_eq!(pong, Pong { pong: 3 });
    }

    #[tokio::test]
    async fn server_errors_are_flagged_retriable() {
        let client = client_answering(503, "try later");
        let response = client.get("https://example.com/ping", &[]).await.unwrap();
        assert_eq!(response.status, 503);
        let err = error_for_status("https://example.com/ping", response).unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retriable());
        assert!(err.to_string().contains("try later"));
    }

    #[test]
    fn bad_json_is_a_decode_error() {
        let err = decode_json::<Pong>("https://example.com/ping", b"{not json").unwrap_err();
        assert!(matches!(err, HttpError::DecodeError { .. }), "{err}");
    }

    #[tokio::test]
    async fn post_passes_body_and_headers_through() {
        let client: BaseApiClient =
            ApiClientCoreMock::from(|url: String, body: Option<Bytes>, content_type: String, headers: Vec<(String, String)>| {
                async move {
                    assert_eq!(url, "https://example.com/echo");
                    assert_eq!(content_type, "text/plain");
                    assert_eq!(
                        crate::test_utils::header(&headers, "X-Test"),
                        Some("yes")
                    );
                    Ok(HttpResponse::new(418, body.unwrap_or_default()))
                }
                .boxed()
            })
            .into();

        let response = client
            .post(
                "https://example.com/echo",
                Bytes::from_static(b"hello"),
                "text/plain",
                &[("x-test".into(), "yes".into())],
            )
            .await
            .unwrap();
        assert_eq!(response, HttpResponse::new(418, "hello"));
        assert!(!response.is_success());
    }
}
