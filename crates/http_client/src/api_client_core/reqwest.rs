// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::HttpResponse;
use crate::error::HttpError;

#[derive(Debug, Clone)]
pub struct ApiClientCore {
    client: reqwest::Client, // cheaply cloneable (Arc<...> internally), see docs
}

impl ApiClientCore {
    /// Construct a new ApiClientCore. `timeout` bounds each whole request
    /// (connect, send, and reading the body).
    pub fn new(timeout: Option<Duration>) -> Result<Self, HttpError> {
        let mut builder = reqwest::ClientBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HttpError::RequestError {
            ctx: "building http client".into(),
            status: None,
            retriable: false,
            source: Box::new(e),
        })?;
        Ok(Self { client })
    }

    /// Get or post a given body to a given url with a given content type, and optional extra headers.
    pub(crate) async fn raw_request(
        &self,
        url: &str,
        body: Option<Bytes>,
        content_type: &'static str,
        header_iter: &[(String, String)],
    ) -> Result<HttpResponse, HttpError> {
        let mut rb = match body {
            Some(b) => self
                .client
                .post(url)
                .body(b)
                .header(reqwest::header::CONTENT_TYPE, content_type),
            None => self.client.get(url),
        };

        for (key, value) in header_iter {
            rb = rb.header(key, value)
        }

        debug!("http_client: requesting {url}");

        let response = rb.send().await.map_err(|e| HttpError::RequestError {
            ctx: format!("requesting {url}"),
            status: None,
            retriable: true,
            source: Box::new(e),
        })?;

        let status = response.status().as_u16();
        debug!("http_client: response from {url:?}: {status}");

        let body = response.bytes().await.map_err(|e| HttpError::RequestError {
            ctx: format!("reading response body from {url}"),
            status: Some(status),
            retriable: true,
            source: Box::new(e),
        })?;

        Ok(HttpResponse { status, body })
    }
}
