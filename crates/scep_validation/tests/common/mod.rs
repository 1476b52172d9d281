// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;

use scep_validation::config::ClientConfig;
use scep_validation::dispatcher::RequestDispatcher;
use scep_validation::test_utils::{test_config, MockBackend, MockIdentityProvider};
use scep_validation::{RevocationClient, ScepValidationClient};

pub const SERVICE_SCOPE: &str = "https://api.manage.microsoft.com/";
pub const GRAPH_SCOPE: &str = "https://graph.windows.net/";

/// A fake CSR; the library only base64-encodes it.
pub const CSR: &[u8] = b"0\x82\x02\x9b0\x82\x01\x83\x02\x01\x000\x16";

pub struct Harness {
    pub backend: MockBackend,
    pub identity: Arc<MockIdentityProvider>,
    pub dispatcher: Arc<RequestDispatcher>,
}

impl Harness {
    pub fn new(backend: MockBackend) -> Self {
        Self::with_config(backend, test_config())
    }

    pub fn with_config(backend: MockBackend, config: ClientConfig) -> Self {
        let identity = Arc::new(MockIdentityProvider::new());
        let dispatcher =
            RequestDispatcher::from_config(&config, backend.api_client(), identity.clone())
                .expect("test config is valid");
        Self {
            backend,
            identity,
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn scep(&self) -> ScepValidationClient {
        ScepValidationClient::new(
            self.dispatcher.clone(),
            scep_validation::test_utils::PROVIDER_NAME_AND_VERSION,
        )
    }

    pub fn revocation(&self) -> RevocationClient {
        RevocationClient::new(
            self.dispatcher.clone(),
            scep_validation::test_utils::PROVIDER_NAME_AND_VERSION,
        )
    }
}
