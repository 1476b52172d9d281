// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod classifier;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod instant;
pub mod opts;
pub mod retry_if;
pub mod revocation_client;
pub mod scep_client;
pub mod single_flight;
pub mod stale_flag;
pub mod test_utils;
pub mod token;

pub use classifier::{ErrorCode, ValidationOutcome};
pub use config::ClientConfig;
pub use error::ScepValidationError;
pub use revocation_client::{RevocationClient, RevocationRequest, RevocationResult};
pub use scep_client::{ScepValidationClient, SuccessNotification};
