// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::EnvFilter;

use scep_validation::opts::{Command, Opts};
use scep_validation::{RevocationClient, ScepValidationClient, ValidationOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let opts = Opts::parse();

    let level = match (opts.quiet, opts.verbose) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    let config = opts.client_config();
    let outcome = match &opts.command {
        Command::Validate {
            transaction_id,
            csr,
        } => {
            let certificate_request = std::fs::read(csr)
                .with_context(|| format!("reading certificate request from {}", csr.display()))?;
            let client = ScepValidationClient::from_config(&config)?;
            client
                .validate_request(transaction_id, &certificate_request)
                .await
                .context("validating request")?
        }
        Command::CheckRevocation { thumbprint } => {
            let client = RevocationClient::from_config(&config)?;
            client
                .check_revocation(thumbprint)
                .await
                .context("checking revocation")?
        }
        Command::DownloadRevocations {
            max_requests,
            issuer_name,
        } => {
            let client = RevocationClient::from_config(&config)?;
            let requests = client
                .download_revocation_requests(*max_requests, issuer_name.as_deref())
                .await
                .context("downloading revocation requests")?;
            println!("{}", serde_json::to_string_pretty(&requests)?);
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!("{outcome}");
    match outcome {
        ValidationOutcome::Success => Ok(ExitCode::SUCCESS),
        ValidationOutcome::Failure { code, description } => {
            error!("backend answered {code}: {description}");
            Ok(ExitCode::FAILURE)
        }
    }
}
