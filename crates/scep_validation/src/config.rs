// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::time::Duration;

use crate::error::{Result, ScepValidationError};

/// Service discovery name of the SCEP request validation service.
pub const SCEP_VALIDATION_SERVICE_NAME: &str = "ScepRequestValidationFEService";
/// Service discovery name of the PKI connector service (revocation).
pub const PKI_CONNECTOR_SERVICE_NAME: &str = "PkiConnectorFEService";

/// Where the directory, the identity provider and the device-management
/// backend live. The defaults target the public cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Identity provider authority, with trailing slash.
    pub authority: String,
    /// Directory resource; tokens for it authorize the discovery call.
    pub graph_resource: String,
    /// Device-management resource; tokens for it authorize service calls.
    pub service_resource: String,
    /// Well-known application id of the device-management service principal.
    pub service_app_id: String,
    /// Overrides the discovery URL built from the fields above.
    pub discovery_url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            authority: "https://login.microsoftonline.com/".into(),
            graph_resource: "https://graph.windows.net/".into(),
            service_resource: "https://api.manage.microsoft.com/".into(),
            service_app_id: "0000000a-0000-0000-c000-000000000000".into(),
            discovery_url: None,
        }
    }
}

impl EndpointConfig {
    pub fn discovery_url(&self, tenant: &str) -> String {
        match &self.discovery_url {
            Some(url) => url.clone(),
            None => format!(
                "{}{tenant}/servicePrincipalsByAppId/{}/serviceEndpoints?api-version=1.6",
                with_trailing_slash(&self.graph_resource),
                self.service_app_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// How long a fetched discovery document is trusted.
    pub ttl: Duration,
    /// Upper bound on one discovery fetch, token acquisition included.
    pub fetch_timeout: Duration,
    /// A lookup miss re-fetches the document only if it is at least this old.
    pub miss_refresh_after: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(30),
            miss_refresh_after: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// A cached credential is only handed out if it stays valid at least this long.
    pub expiry_margin: Duration,
    /// Upper bound on one acquisition from the identity provider.
    pub acquire_timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_margin: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts for a request failing at the transport level, first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_exponent: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            backoff_exponent: 2.0,
            jitter: true,
        }
    }
}

/// Application secret. Only `expose` gives access to the text; `Debug` doesn't.
#[derive(Clone, PartialEq, Eq)]
pub struct AppSecret(String);

impl AppSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AppSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppSecret(<redacted>)")
    }
}

/// Everything needed to build the validation and revocation clients. Loading
/// these values (properties file, environment, flags) is the caller's business.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub tenant: String,
    pub app_id: String,
    pub app_key: AppSecret,
    /// Sent to the backend as "callerInfo" with every request.
    pub provider_name_and_version: String,
    pub endpoints: EndpointConfig,
    pub discovery: DiscoveryConfig,
    pub token: TokenConfig,
    pub retry: RetryConfig,
    /// Upper bound on one HTTP exchange with a service endpoint.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        tenant: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
        provider_name_and_version: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            app_id: app_id.into(),
            app_key: AppSecret::new(app_key),
            provider_name_and_version: provider_name_and_version.into(),
            endpoints: EndpointConfig::default(),
            discovery: DiscoveryConfig::default(),
            token: TokenConfig::default(),
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn discovery_url(&self) -> String {
        self.endpoints.discovery_url(&self.tenant)
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("tenant", self.tenant.as_str()),
            ("app_id", self.app_id.as_str()),
            ("app_key", self.app_key.expose()),
            (
                "provider_name_and_version",
                self.provider_name_and_version.as_str(),
            ),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ScepValidationError::Config(format!("{name} is empty")));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(ScepValidationError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.backoff_exponent < 1.0 {
            return Err(ScepValidationError::Config(
                "retry.backoff_exponent must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_owned()
    } else {
        format!("{url}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_discovery_url_targets_service_principal_endpoints() {
        let config = ClientConfig::new("contoso", "app", "key", "ca/1.0");
        assert_eq!(
            config.discovery_url(),
            "https://graph.windows.net/contoso/servicePrincipalsByAppId/0000000a-0000-0000-c000-000000000000/serviceEndpoints?api-version=1.6"
        );
    }

    #[test]
    fn discovery_url_override_wins() {
        let mut config = ClientConfig::new("contoso", "app", "key", "ca/1.0");
        config.endpoints.discovery_url = Some("http://localhost:8080/discovery".into());
        assert_eq!(config.discovery_url(), "http://localhost:8080/discovery");
    }

    #[test]
    fn graph_resource_without_slash_still_builds_a_url() {
        let endpoints = EndpointConfig {
            graph_resource: "https://graph.example.com".into(),
            ..Default::default()
        };
        assert!(endpoints
            .discovery_url("t")
            .starts_with("https://graph.example.com/t/servicePrincipalsByAppId/"));
    }

    #[test]
    fn empty_required_values_are_rejected() {
        let config = ClientConfig::new("contoso", "", "key", "ca/1.0");
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: app_id is empty");

        let config = ClientConfig::new("contoso", "app", "  ", "ca/1.0");
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut config = ClientConfig::new("contoso", "app", "key", "ca/1.0");
        config.validate().unwrap();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let config = ClientConfig::new("contoso", "app", "hunter2", "ca/1.0");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"), "{debug}");
        assert!(debug.contains("<redacted>"));
    }
}
