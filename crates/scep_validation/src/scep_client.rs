// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use base64::prelude::{Engine, BASE64_STANDARD};
use serde::Serialize;
use time::OffsetDateTime;

use crate::classifier::{classify, ValidationOutcome};
use crate::config::{ClientConfig, SCEP_VALIDATION_SERVICE_NAME};
use crate::dispatcher::{RequestDispatcher, ServiceRequest};
use crate::error::{Result, ScepValidationError};

pub const SCEP_API_VERSION: &str = "2018-02-20";

const VALIDATE_REQUEST: &str = "ScepActions/validateRequest";
const SUCCESS_NOTIFICATION: &str = "ScepActions/successNotification";
const FAILURE_NOTIFICATION: &str = "ScepActions/failureNotification";

/// Tells the backend a certificate was issued for a validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessNotification {
    pub transaction_id: String,
    /// DER-encoded PKCS#10 request, as validated.
    pub certificate_request: Vec<u8>,
    pub certificate_thumbprint: String,
    pub certificate_serial_number: String,
    pub certificate_expiration: OffsetDateTime,
    pub issuing_certificate_authority: String,
    pub ca_configuration: String,
    pub certificate_authority: String,
}

#[derive(Serialize)]
struct Envelope<T> {
    request: T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidationRequestBody<'a> {
    transaction_id: &'a str,
    certificate_request: String,
    caller_info: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessNotificationBody<'a> {
    transaction_id: &'a str,
    certificate_request: String,
    certificate_thumbprint: &'a str,
    certificate_serial_number: &'a str,
    certificate_expiration_date_utc: String,
    issuing_certificate_authority: &'a str,
    ca_configuration: &'a str,
    certificate_authority: &'a str,
    caller_info: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureNotificationBody<'a> {
    transaction_id: &'a str,
    certificate_request: String,
    h_result: i64,
    error_description: &'a str,
    caller_info: &'a str,
}

/// Validates SCEP enrollment requests against the device-management backend
/// and reports what the CA did with them.
#[derive(Debug, Clone)]
pub struct ScepValidationClient {
    dispatcher: Arc<RequestDispatcher>,
    caller_info: String,
}

impl ScepValidationClient {
    /// Build over an existing dispatcher, sharing its caches with anyone else using it.
    pub fn new(dispatcher: Arc<RequestDispatcher>, caller_info: impl Into<String>) -> Self {
        Self {
            dispatcher,
            caller_info: caller_info.into(),
        }
    }

    /// Build a client with its own caches, talking to the real services.
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

    /// Ask the backend whether `certificate_request` (DER-encoded PKCS#10) may
    /// be issued under `transaction_id`.
    pub async fn validate_request(
        &self,
        transaction_id: &str,
        certificate_request: &[u8],
    ) -> Result<ValidationOutcome> {
        check_request(transaction_id, certificate_request)?;
        let request = ServiceRequest::json(
            VALIDATE_REQUEST,
            SCEP_API_VERSION,
            &Envelope {
                request: ValidationRequestBody {
                    transaction_id,
                    certificate_request: BASE64_STANDARD.encode(certificate_request),
                    caller_info: &self.caller_info,
                },
            },
        )?;
        self.call(request).await
    }

    pub async fn send_success_notification(
        &self,
        notification: &SuccessNotification,
    ) -> Result<ValidationOutcome> {
        check_request(
            &notification.transaction_id,
            &notification.certificate_request,
        )?;
        if notification.certificate_thumbprint.trim().is_empty() {
            return Err(ScepValidationError::invalid_argument(
                "certificate_thumbprint",
                "must not be empty",
            ));
        }
        let expiration = notification
            .certificate_expiration
            .to_offset(time::UtcOffset::UTC)
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| {
                ScepValidationError::invalid_argument("certificate_expiration", e.to_string())
            })?;

        let request = ServiceRequest::json(
            SUCCESS_NOTIFICATION,
            SCEP_API_VERSION,
            &Envelope {
                request: SuccessNotificationBody {
                    transaction_id: &notification.transaction_id,
                    certificate_request: BASE64_STANDARD.encode(&notification.certificate_request),
                    certificate_thumbprint: &notification.certificate_thumbprint,
                    certificate_serial_number: &notification.certificate_serial_number,
                    certificate_expiration_date_utc: expiration,
                    issuing_certificate_authority: &notification.issuing_certificate_authority,
                    ca_configuration: &notification.ca_configuration,
                    certificate_authority: &notification.certificate_authority,
                    caller_info: &self.caller_info,
                },
            },
        )?;
        self.call(request).await
    }

    /// Tell the backend the CA failed to issue a certificate; `hresult` is the
    /// CA's error code.
    pub async fn send_failure_notification(
        &self,
        transaction_id: &str,
        certificate_request: &[u8],
        hresult: i64,
        error_description: &str,
    ) -> Result<ValidationOutcome> {
        check_request(transaction_id, certificate_request)?;
        let request = ServiceRequest::json(
            FAILURE_NOTIFICATION,
            SCEP_API_VERSION,
            &Envelope {
                request: FailureNotificationBody {
                    transaction_id,
                    certificate_request: BASE64_STANDARD.encode(certificate_request),
                    h_result: hresult,
                    error_description,
                    caller_info: &self.caller_info,
                },
            },
        )?;
        self.call(request).await
    }

    async fn call(&self, request: ServiceRequest) -> Result<ValidationOutcome> {
        let response = self
            .dispatcher
            .send(SCEP_VALIDATION_SERVICE_NAME, &request)
            .await?;
        classify(&response.body)
    }
}

fn check_request(transaction_id: &str, certificate_request: &[u8]) -> Result<()> {
    if transaction_id.trim().is_empty() {
        return Err(ScepValidationError::invalid_argument(
            "transaction_id",
            "must not be empty",
        ));
    }
    if certificate_request.is_empty() {
        return Err(ScepValidationError::invalid_argument(
            "certificate_request",
            "must not be empty",
        ));
    }
    Ok(())
}
