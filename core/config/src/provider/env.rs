// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::env;

use super::ConfigProvider;
use super::ProviderError;

// Environment-based config provider
pub struct EnvConfigProvider;

impl ConfigProvider for EnvConfigProvider {
    fn load(&self, key: &str) -> Result<String, ProviderError> {
        env::var(key).map_err(|_| ProviderError::EnvNotFound(key.to_string()))
    }
}
