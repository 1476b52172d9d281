// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

use clap::{crate_version, ArgAction, Args, Parser, Subcommand};

use crate::config::{ClientConfig, DiscoveryConfig, RetryConfig};
use crate::revocation_client::MAX_REVOCATION_REQUESTS;

#[derive(Debug, Parser)]
#[clap(
    name = "scep-validate",
    about = "Validate SCEP enrollment requests and handle revocations against the device-management backend",
    version = crate_version!()
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        help = "Suppress non-error output and set the log level to WARN."
    )]
    pub quiet: bool,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Increase verbosity level, can be used multiple times."
    )]
    pub verbose: u8,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    #[command(flatten)]
    pub tuning: TuningArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct CredentialArgs {
    #[clap(long, help = "Directory tenant, e.g. contoso.onmicrosoft.com", env = "TENANT")]
    pub tenant: String,

    #[clap(long, help = "Application (client) id registered for the CA", env = "AAD_APP_ID")]
    pub app_id: String,

    #[clap(
        long,
        help = "Application secret",
        env = "AAD_APP_KEY",
        hide_env_values = true
    )]
    pub app_key: String,

    #[clap(
        long,
        help = "Caller info sent with every request, e.g. ContosoCA/1.0",
        env = "PROVIDER_NAME_AND_VERSION"
    )]
    pub provider_name_and_version: String,
}

#[derive(Args, Debug)]
pub struct TuningArgs {
    #[clap(
        long,
        action = ArgAction::Set,
        default_value = "1h",
        help = "How long a service discovery answer is trusted. Uses formatting from the `humantime` crate.",
        env = "SCEP_VALIDATION_DISCOVERY_TTL",
    )]
    pub discovery_ttl: humantime::Duration,

    #[clap(
        long,
        action = ArgAction::Set,
        default_value = "60s",
        help = "Upper bound on one request to a service endpoint. Uses formatting from the `humantime` crate.",
        env = "SCEP_VALIDATION_REQUEST_TIMEOUT",
    )]
    pub request_timeout: humantime::Duration,

    #[clap(
        long,
        action = ArgAction::Set,
        default_value = "3",
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Attempts per request when the endpoint can't be reached.",
        env = "SCEP_VALIDATION_MAX_ATTEMPTS",
    )]
    pub max_attempts: u32,

    #[clap(
        long,
        help = "Fetch service endpoints from this URL instead of the directory's.",
        env = "SCEP_VALIDATION_DISCOVERY_URL"
    )]
    pub discovery_url: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a DER-encoded certificate signing request.
    Validate {
        #[arg(long)]
        transaction_id: String,
        /// File holding the DER-encoded PKCS#10 request.
        csr: PathBuf,
    },
    /// Ask whether a certificate is revoked.
    CheckRevocation { thumbprint: String },
    /// Print pending revocation requests as JSON.
    DownloadRevocations {
        #[arg(
            long,
            default_value = "100",
            value_parser = clap::value_parser!(u32).range(1..=MAX_REVOCATION_REQUESTS as i64)
        )]
        max_requests: u32,
        #[arg(long)]
        issuer_name: Option<String>,
    },
}

impl Opts {
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(
            &self.credentials.tenant,
            &self.credentials.app_id,
            &self.credentials.app_key,
            &self.credentials.provider_name_and_version,
        );
        config.endpoints.discovery_url = self.tuning.discovery_url.clone();
        config.discovery = DiscoveryConfig {
            ttl: self.tuning.discovery_ttl.into(),
            ..DiscoveryConfig::default()
        };
        config.retry = RetryConfig {
            max_attempts: self.tuning.max_attempts,
            ..RetryConfig::default()
        };
        config.request_timeout = self.tuning.request_timeout.into();
        config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn builds_config_from_flags() {
        let opts = Opts::try_parse_from([
            "scep-validate",
            "--tenant",
            "contoso.onmicrosoft.com",
            "--app-id",
            "app",
            "--app-key",
            "key",
            "--provider-name-and-version",
            "ContosoCA/1.0",
            "--discovery-ttl",
            "15min",
            "--max-attempts",
            "5",
            "-vv",
            "check-revocation",
            "ABCDEF",
        ])
        .unwrap();

        assert_eq!(opts.verbose, 2);
        let config = opts.client_config();
        assert_eq!(config.tenant, "contoso.onmicrosoft.com");
        assert_eq!(config.discovery.ttl, Duration::from_secs(15 * 60));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(config.validate().is_ok());
        assert!(matches!(opts.command, Command::CheckRevocation { ref thumbprint } if thumbprint == "ABCDEF"));
    }

    #[test]
    fn rejects_out_of_range_download_size() {
        let result = Opts::try_parse_from([
            "scep-validate",
            "--tenant",
            "t",
            "--app-id",
            "a",
            "--app-key",
            "k",
            "--provider-name-and-version",
            "p",
            "download-revocations",
            "--max-requests",
            "501",
        ]);
        assert!(result.is_err());
    }
}
