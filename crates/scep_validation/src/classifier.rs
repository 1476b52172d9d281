// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use http_client::api_client::decode_json;

use crate::error::{Result, ScepValidationError};

macro_rules! error_codes {
    ($($variant:ident),+ $(,)?) => {
        /// Result code reported by the validation and connector services.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum ErrorCode {
            $($variant,)+
            /// A code this library doesn't know. Never produced by `classify`,
            /// which reports such codes as malformed responses instead.
            Unrecognized(String),
        }

        impl ErrorCode {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                    Self::Unrecognized(code) => code,
                }
            }

            pub fn parse(code: &str) -> Self {
                match code {
                    $(stringify!($variant) => Self::$variant,)+
                    other => Self::Unrecognized(other.to_owned()),
                }
            }
        }
    };
}

error_codes!(
    Success,
    ChallengePasswordMissing,
    ChallengeSignatureMissing,
    ChallengeDecryptionError,
    ChallengeDecodingError,
    ChallengeDeserializationError,
    ChallengeExpired,
    ChallengeInvalidTimestamp,
    ChallengeIssuingCaMismatch,
    ChallengeAlreadyClaimed,
    ChallengeDoesNotMatchCA,
    ChallengeSubjectNameMismatch,
    ChallengeSubjectAltNameMismatch,
    ChallengeKeyUsageMismatch,
    ChallengeEnhancedKeyUsageMismatch,
    ChallengeKeyLengthMismatch,
    ChallengeVerificationError,
    ChallengeVerificationFailed,
    CertificateRequestDecodingFailed,
    BadCertificateRequestIdentifier,
    NotificationAlreadyReceived,
    ServiceUnavailable,
    UnknownError,
);

impl ErrorCode {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend's verdict on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success,
    Failure { code: ErrorCode, description: String },
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("Success"),
            Self::Failure { code, description } if description.is_empty() => write!(f, "{code}"),
            Self::Failure { code, description } => write!(f, "{code}: {description}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody {
    code: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Interpret the body of a 2xx answer to a validation, notification or
/// revocation check request.
pub fn classify(body: &[u8]) -> Result<ValidationOutcome> {
    let response: ResponseBody = decode_json("service response", body)
        .map_err(|e| ScepValidationError::from_http("classifying response", e))?;
    let description = response.error_description.unwrap_or_default();

    match ErrorCode::parse(&response.code) {
        ErrorCode::Success => Ok(ValidationOutcome::Success),
        ErrorCode::Unrecognized(code) => Err(ScepValidationError::MalformedResponse {
            reason: format!("unrecognized result code {code:?}"),
        }),
        code => Ok(ValidationOutcome::Failure { code, description }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ERROR_SCEP_RESPONSE, VALID_SCEP_RESPONSE};

    #[test]
    fn success_response() {
        assert_eq!(
            classify(VALID_SCEP_RESPONSE.as_bytes()).unwrap(),
            ValidationOutcome::Success
        );
    }

    #[test]
    fn failure_response_keeps_code_and_description() {
        assert_eq!(
            classify(ERROR_SCEP_RESPONSE.as_bytes()).unwrap(),
            ValidationOutcome::Failure {
                code: ErrorCode::ChallengeDecodingError,
                description: String::new(),
            }
        );

        let outcome = classify(
            br#"{"code":"ChallengeExpired","errorDescription":"Challenge expired at 2024-02-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            outcome.to_string(),
            "ChallengeExpired: Challenge expired at 2024-02-01T00:00:00Z"
        );
        assert!(!outcome.is_success());
    }

    #[test]
    fn missing_description_defaults_to_empty() {
        assert_eq!(
            classify(br#"{"code":"ChallengeAlreadyClaimed"}"#).unwrap(),
            ValidationOutcome::Failure {
                code: ErrorCode::ChallengeAlreadyClaimed,
                description: String::new(),
            }
        );
    }

    #[test]
    fn unknown_code_is_malformed_and_named() {
        let err = classify(br#"{"code":"ChallengeWasAFish","errorDescription":""}"#).unwrap_err();
        match err {
            ScepValidationError::MalformedResponse { reason } => {
                assert!(reason.contains("ChallengeWasAFish"), "{reason}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unparseable_body_is_malformed() {
        let bodies: [&[u8]; 3] = [b"<html>oops</html>", b"", br#"{"errorDescription":"no code"}"#];
        for body in bodies {
            let err = classify(body).unwrap_err();
            assert!(
                matches!(err, ScepValidationError::MalformedResponse { .. }),
                "{err}"
            );
            assert!(!err.is_retriable());
        }
    }

    #[test]
    fn codes_parse_and_print_by_name() {
        let code: ErrorCode = "ChallengeDoesNotMatchCA".parse().unwrap();
        assert_eq!(code, ErrorCode::ChallengeDoesNotMatchCA);
        assert_eq!(code.to_string(), "ChallengeDoesNotMatchCA");
        assert!(code.is_recognized());

        let code = ErrorCode::parse("challengeexpired");
        assert_eq!(code, ErrorCode::Unrecognized("challengeexpired".into()));
        assert!(!code.is_recognized());
    }
}
