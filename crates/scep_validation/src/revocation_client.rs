// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use http_client::api_client::decode_json;

use crate::classifier::{classify, ValidationOutcome};
use crate::config::{ClientConfig, PKI_CONNECTOR_SERVICE_NAME};
use crate::dispatcher::{RequestDispatcher, ServiceRequest};
use crate::error::{Result, ScepValidationError};

pub const PKI_CONNECTOR_API_VERSION: &str = "2019-05-05";
/// Most revocation requests the connector hands out per download.
pub const MAX_REVOCATION_REQUESTS: u32 = 500;

const CHECK_REVOCATION: &str = "CertificateAuthorityRequests/checkRevocation";
const DOWNLOAD_REVOCATION_REQUESTS: &str = "CertificateAuthorityRequests/downloadRevocationRequests";
const UPLOAD_REVOCATION_RESULTS: &str = "CertificateAuthorityRequests/uploadRevocationResults";

/// A certificate the backend wants revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationRequest {
    /// Opaque; echoed back in the matching `RevocationResult`.
    pub request_context: String,
    pub serial_number: String,
    pub issuer_name: String,
    pub ca_configuration: String,
}

/// Why a revocation didn't happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationErrorCode {
    None,
    NonRetryableError,
    RetryableError,
    CertificateNotFoundError,
    CaConfigurationError,
}

serde_plain::derive_fromstr_from_deserialize!(RevocationErrorCode);
serde_plain::derive_display_from_serialize!(RevocationErrorCode);

/// What the CA did with one `RevocationRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationResult {
    pub request_context: String,
    pub succeeded: bool,
    pub error_code: RevocationErrorCode,
    pub error_message: String,
}

impl RevocationResult {
    pub fn succeeded(request_context: impl Into<String>) -> Self {
        Self {
            request_context: request_context.into(),
            succeeded: true,
            error_code: RevocationErrorCode::None,
            error_message: String::new(),
        }
    }

    pub fn failed(
        request_context: impl Into<String>,
        error_code: RevocationErrorCode,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            request_context: request_context.into(),
            succeeded: false,
            error_code,
            error_message: error_message.into(),
        }
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    request: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRevocationBody<'a> {
    certificate_thumbprint: &'a str,
    caller_info: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequestsBody<'a> {
    max_requests: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    issuer_name: Option<&'a str>,
    caller_info: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResultsBody<'a> {
    results: &'a [RevocationResult],
    caller_info: &'a str,
}

#[derive(Deserialize)]
struct ValueResponse<T> {
    value: T,
}

/// Revocation traffic with the PKI connector service.
#[derive(Debug, Clone)]
pub struct RevocationClient {
    dispatcher: Arc<RequestDispatcher>,
    caller_info: String,
}

impl RevocationClient {
    /// Build over an existing dispatcher, sharing its caches with anyone else using it.
    pub fn new(dispatcher: Arc<RequestDispatcher>, caller_info: impl Into<String>) -> Self {
        Self {
            dispatcher,
            caller_info: caller_info.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let dispatcher = RequestDispatcher::from_client_config(config)?;
        Ok(Self::new(
            Arc::new(dispatcher),
            config.provider_name_and_version.clone(),
        ))
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    /// Whether the backend considers the certificate with this thumbprint revoked.
    pub async fn check_revocation(&self, certificate_thumbprint: &str) -> Result<ValidationOutcome> {
        if certificate_thumbprint.trim().is_empty() {
            return Err(ScepValidationError::invalid_argument(
                "certificate_thumbprint",
                "must not be empty",
            ));
        }
        let request = ServiceRequest::json(
            CHECK_REVOCATION,
            PKI_CONNECTOR_API_VERSION,
            &Envelope {
                request: CheckRevocationBody {
                    certificate_thumbprint,
                    caller_info: &self.caller_info,
                },
            },
        )?;
        let response = self
            .dispatcher
            .send(PKI_CONNECTOR_SERVICE_NAME, &request)
            .await?;
        classify(&response.body)
    }

    /// Fetch up to `max_requests` pending revocations, optionally only those
    /// for certificates issued by `issuer_name`.
    pub async fn download_revocation_requests(
        &self,
        max_requests: u32,
        issuer_name: Option<&str>,
    ) -> Result<Vec<RevocationRequest>> {
        if !(1..=MAX_REVOCATION_REQUESTS).contains(&max_requests) {
            return Err(ScepValidationError::invalid_argument(
                "max_requests",
                format!("{max_requests} is not in 1..={MAX_REVOCATION_REQUESTS}"),
            ));
        }
        let request = ServiceRequest::json(
            DOWNLOAD_REVOCATION_REQUESTS,
            PKI_CONNECTOR_API_VERSION,
            &Envelope {
                request: DownloadRequestsBody {
                    max_requests,
                    issuer_name,
                    caller_info: &self.caller_info,
                },
            },
        )?;
        let response = self
            .dispatcher
            .send(PKI_CONNECTOR_SERVICE_NAME, &request)
            .await?;
        let requests: ValueResponse<Vec<RevocationRequest>> =
            decode_json(DOWNLOAD_REVOCATION_REQUESTS, &response.body)
                .map_err(|e| ScepValidationError::from_http("reading revocation requests", e))?;
        Ok(requests.value)
    }

    /// Report what happened to downloaded revocation requests. Returns the
    /// backend's acknowledgement.
    pub async fn upload_revocation_results(&self, results: &[RevocationResult]) -> Result<bool> {
        if results.is_empty() {
            return Err(ScepValidationError::invalid_argument(
                "results",
                "must not be empty",
            ));
        }
        let request = ServiceRequest::json(
            UPLOAD_REVOCATION_RESULTS,
            PKI_CONNECTOR_API_VERSION,
            &Envelope {
                request: UploadResultsBody {
                    results,
                    caller_info: &self.caller_info,
                },
            },
        )?;
        let response = self
            .dispatcher
            .send(PKI_CONNECTOR_SERVICE_NAME, &request)
            .await?;
        let acknowledged: ValueResponse<bool> =
            decode_json(UPLOAD_REVOCATION_RESULTS, &response.body)
                .map_err(|e| ScepValidationError::from_http("reading upload acknowledgement", e))?;
        Ok(acknowledged.value)
    }
}
