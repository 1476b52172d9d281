// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod status_code;

#[path = "reqwest.rs"]
pub mod implementation;

use bytes::Bytes;

pub use self::implementation::ApiClientCore as ApiClientCoreImpl;
use crate::error::HttpError;

/// Status and body of a completed HTTP exchange. Non-2xx statuses are still
/// "completed": it's up to the caller to decide what a 401 or a 500 means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Lossy text view of the body, for error messages and logs.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait::async_trait]
pub trait ApiClientCore {
    /// Perform one request: a POST if `body` is present, otherwise a GET.
    /// Errors are reserved for exchanges that never produced a response.
    async fn raw_request(
        &self,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpError>;
}

#[async_trait::async_trait]
impl ApiClientCore for ApiClientCoreImpl {
    async fn raw_request(
        &self,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, HttpError> {
        self.raw_request(url, body, content_type, headers).await
    }
}

pub mod test_utils {
    use super::*;

    use std::pin::Pin;

    type ResultFuture = dyn futures::Future<Output = Result<HttpResponse, HttpError>> + Send;
    type Responder = dyn (Fn(String, Option<Bytes>, String, Vec<(String, String)>) -> Pin<Box<ResultFuture>>)
        + Send
        + Sync;

    /// Mock `ApiClientCore` that holds a closure that can respond to requests with fake responses, or errors.
    ///
    /// ```rust
    /// use futures::FutureExt;
    ///
    /// use http_client::{BaseApiClient, HttpError, HttpResponse};
    /// use http_client::test_utils::ApiClientCoreMock;
    ///
    /// let mock = ApiClientCoreMock::from(|url: String, _body, _content_type, _headers| {
    ///     // note the `async { ... }.boxed()`!
    ///     async move {
    ///         if url.contains("coffee") {
    ///             Err(HttpError::RequestError {
    ///                 ctx: url,
    ///                 status: None,
    ///                 retriable: true,
    ///                 source: "connection refused".into(),
    ///             })
    ///         } else {
    ///             Ok(HttpResponse::new(200, "\"earl grey, hot\""))
    ///         }
    ///     }.boxed()
    /// });
    /// let client = BaseApiClient::from(mock);
    ///
    /// // use the mocked client as desired
    /// let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    /// rt.block_on(async {
    ///     let tea = client.get("https://example.com/tea", &[]).await.unwrap();
    ///     assert_eq!(tea.body_text(), "\"earl grey, hot\"");
    ///     client.get("https://example.com/coffee", &[]).await.unwrap_err();
    /// });
    /// ```
    pub struct ApiClientCoreMock {
        responder: Box<Responder>,
    }

    #[async_trait::async_trait]
    impl ApiClientCore for ApiClientCoreMock {
        async fn raw_request(
            &self,
            url: &str,
            body: Option<Bytes>,
            content_type: &'static str,
            headers: &[(String, String)],
        ) -> Result<HttpResponse, HttpError> {
            (self.responder)(url.into(), body, content_type.into(), headers.into()).await
        }
    }

    impl<
            F: Fn(String, Option<Bytes>, String, Vec<(String, String)>) -> Pin<Box<ResultFuture>>
                + Send
                + Sync
                + 'static,
        > From<F> for ApiClientCoreMock
    {
        fn from(value: F) -> Self {
            Self {
                responder: Box::new(value),
            }
        }
    }

    /// Find a header by case-insensitive name in the list handed to a mock responder.
    pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
