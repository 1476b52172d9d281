// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::error::Elapsed;

use http_client::HttpError;

/// Everything that can go wrong between a caller handing us a request and us
/// handing back a `ValidationOutcome`.
///
/// A negative answer from the backend (an expired challenge, say) is *not* an
/// error: it arrives as `Ok(ValidationOutcome::Failure { .. })`.
///
/// This is `Clone` so a single failed discovery fetch or token acquisition can
/// be handed to every caller that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ScepValidationError {
    #[error("authentication failed for {scope}: {reason}")]
    Authentication { scope: String, reason: String },
    #[error("service {service:?} is not offered by service discovery for this tenant")]
    ServiceUnavailable { service: String },
    #[error("transport error while {ctx}: {source}")]
    Transport {
        ctx: String,
        source: Arc<HttpError>,
    },
    #[error("service answered {status}: {body}")]
    ServiceError { status: u16, body: String },
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },
    #[error("invalid {argument}: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ScepValidationError {
    /// Only failures that never reached a definitive answer are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_retriable(),
            Self::Authentication { .. } => false,
            Self::ServiceUnavailable { .. } => false,
            Self::ServiceError { .. } => false,
            Self::MalformedResponse { .. } => false,
            Self::InvalidArgument { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Classify an `HttpError` raised while doing `ctx`.
    pub fn from_http(ctx: impl Into<String>, error: HttpError) -> Self {
        match error {
            HttpError::RequestError { .. } => Self::Transport {
                ctx: ctx.into(),
                source: Arc::new(error),
            },
            HttpError::DecodeError { .. } => Self::MalformedResponse {
                reason: format!("{}: {error}", ctx.into()),
            },
            HttpError::EncodeError { .. } => Self::InvalidArgument {
                argument: "payload",
                reason: error.to_string(),
            },
        }
    }

    /// A deadline of `after` ran out before an answer arrived. Reported as a
    /// retriable transport failure; `is_timeout` tells it apart.
    pub(crate) fn timed_out(after: Duration, elapsed: Elapsed) -> Self {
        Self::Transport {
            ctx: format!("waiting {:.3}s for an answer", after.as_secs_f64()),
            source: Arc::new(HttpError::RequestError {
                ctx: "awaiting response".into(),
                status: None,
                retriable: true,
                source: Box::new(elapsed),
            }),
        }
    }

    /// Whether this is a transport failure caused by a deadline running out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport { source, .. } => match source.as_ref() {
                HttpError::RequestError { source, .. } => source.is::<Elapsed>(),
                _ => false,
            },
            _ => false,
        }
    }

    pub(crate) fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = ScepValidationError> = std::result::Result<T, E>;
