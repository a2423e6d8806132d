use std::{env, str::FromStr};

use getset::{CopyGetters, Getters};
use typed_builder::TypedBuilder;

use super::{
    AUTH_SERVICE_ENV_VAR, AUTH_URL_ENV_VAR, CONCURRENCY_ENV_VAR, DEFAULT_AUTH_SERVICE,
    DEFAULT_AUTH_URL, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_REGISTRY_URL,
    MAX_RETRIES_ENV_VAR, REGISTRY_URL_ENV_VAR,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Endpoints and network policy used by the registry client and the hydrator.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Getters, CopyGetters)]
pub struct RegistryConfig {
    /// The base URL of the token endpoint. `/token` is appended to it.
    #[builder(default = DEFAULT_AUTH_URL.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    auth_url: String,

    /// The base URL of the Registry HTTP API v2.
    #[builder(default = DEFAULT_REGISTRY_URL.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    registry_url: String,

    /// The service name sent to the token endpoint.
    #[builder(default = DEFAULT_AUTH_SERVICE.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    auth_service: String,

    /// How many times a transient HTTP failure is retried. Zero disables retries.
    #[builder(default = DEFAULT_MAX_RETRIES)]
    #[getset(get_copy = "pub with_prefix")]
    max_retries: u32,

    /// How many layer downloads may be in flight at once.
    #[builder(default = DEFAULT_DOWNLOAD_CONCURRENCY)]
    #[getset(get_copy = "pub with_prefix")]
    download_concurrency: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryConfig {
    /// Builds a configuration from the defaults, overridden by any `OCIHYDRATE_*` variables
    /// present in the environment.
    ///
    /// Numeric variables that fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var(AUTH_URL_ENV_VAR) {
            config.auth_url = url;
        }

        if let Ok(url) = env::var(REGISTRY_URL_ENV_VAR) {
            config.registry_url = url;
        }

        if let Ok(service) = env::var(AUTH_SERVICE_ENV_VAR) {
            config.auth_service = service;
        }

        if let Some(retries) = parse_env(MAX_RETRIES_ENV_VAR) {
            config.max_retries = retries;
        }

        if let Some(concurrency) = parse_env::<usize>(CONCURRENCY_ENV_VAR) {
            config.download_concurrency = concurrency.max(1);
        }

        config
    }

    /// Returns the URL of the token endpoint.
    pub fn token_url(&self) -> String {
        format!("{}/token", self.auth_url.trim_end_matches('/'))
    }

    /// Returns the URL of the manifest for `repository` at `reference`.
    pub fn manifest_url(&self, repository: &str, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url.trim_end_matches('/'),
            repository,
            reference
        )
    }

    /// Returns the URL of the blob with `digest` in `repository`.
    pub fn blob_url(&self, repository: &str, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.registry_url.trim_end_matches('/'),
            repository,
            digest
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let value = env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring {name}: {value:?} is not a valid number");
            None
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
