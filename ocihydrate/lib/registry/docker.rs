use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use getset::Getters;
use oci_spec::image::Digest;
use reqwest::{header::ACCEPT, Client};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    config::RegistryConfig,
    manifest::{LayerDescriptor, Manifest},
    registry::RegistryPull,
    utils::{self, ContentHasher},
    HydrateError, HydrateResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The manifest media types accepted from the registry, Docker v2 schema 2 first.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
                               application/vnd.oci.image.manifest.v1+json";

/// The action requested in the token scope.
const PULL_ACTION: &str = "pull";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// DockerRegistry is a client for one image in a registry speaking Docker's Registry HTTP API v2.
/// It handles token authentication, manifest retrieval and blob download.
///
/// [See Docker Registry API for more details on the API][Docker Registry API]
///
/// [Docker Registry API]: https://distribution.github.io/distribution/spec/api/#introduction
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerRegistry {
    /// The HTTP client used to make requests to the registry.
    client: ClientWithMiddleware,

    /// The endpoints and network policy in use.
    config: RegistryConfig,

    /// The repository being pulled, e.g. `cloudfoundry/windows2016fs`.
    repository: String,

    /// The tag being pulled.
    tag: String,
}

//--------------------------------------------------------------------------------------------------
// Types: Models
//--------------------------------------------------------------------------------------------------

/// Authentication material returned by the token endpoint.
///
/// Only the token is required. Registries that follow the OAuth2 flavour of the protocol return
/// it as `access_token` instead.
#[derive(Debug, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerAuthMaterial {
    /// The token used to authenticate requests to the registry.
    #[serde(default)]
    token: String,

    /// The OAuth2 access token.
    #[serde(default)]
    access_token: Option<String>,

    /// The lifetime of the token in seconds.
    #[serde(default)]
    expires_in: Option<u32>,

    /// The time the token was issued.
    #[serde(default)]
    issued_at: Option<DateTime<Utc>>,
}

/// Represents a response from the Docker registry, which could either be successful (`Ok`) or an error (`Error`).
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DockerRegistryResponse<T> {
    /// Represents a successful response from the Docker registry.
    Ok(T),

    /// Represents an error response from the Docker registry.
    Error(DockerRegistryResponseError),
}

/// Represents an error response from the Docker registry, including detailed error messages.
#[derive(Debug, Serialize, Deserialize, Error)]
#[error("docker registry error: {errors}")]
pub struct DockerRegistryResponseError {
    /// The errors returned by the Docker registry.
    errors: serde_json::Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRegistry {
    /// Creates a client for `repository` at `tag`.
    ///
    /// A retry middleware is installed only when the configuration asks for retries.
    pub fn new(
        config: RegistryConfig,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let client_builder = ClientBuilder::new(Client::new());
        let client = if config.get_max_retries() > 0 {
            let retry_policy =
                ExponentialBackoff::builder().build_with_max_retries(config.get_max_retries());
            client_builder
                .with(RetryTransientMiddleware::new_with_policy(retry_policy))
                .build()
        } else {
            client_builder.build()
        };

        Self {
            client,
            config,
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Requests a bearer token scoped to pulling `repository`.
    ///
    /// Tokens are short-lived, so a new one is requested for every registry call.
    pub async fn fetch_token(&self, repository: &str) -> HydrateResult<String> {
        let scope = format!("repository:{repository}:{PULL_ACTION}");
        let response = self
            .client
            .get(self.config.token_url())
            .query(&[
                ("service", self.config.get_auth_service().as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| HydrateError::Auth(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HydrateError::Auth(format!(
                "token endpoint returned {status}"
            )));
        }

        let material = response
            .json::<DockerAuthMaterial>()
            .await
            .map_err(|e| HydrateError::Auth(format!("malformed token response: {e}")))?;

        material.into_token()
    }

    /// Fetches the manifest of `repository` at `tag` using `token`.
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        tag: &str,
        token: &str,
    ) -> HydrateResult<Manifest> {
        let response = self
            .client
            .get(self.config.manifest_url(repository, tag))
            .bearer_auth(token)
            .header(ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await
            .map_err(|e| HydrateError::Manifest(format!("manifest request failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| HydrateError::Manifest(format!("failed to read manifest: {e}")))?;

        let manifest = match serde_json::from_slice::<DockerRegistryResponse<Manifest>>(&body) {
            Ok(DockerRegistryResponse::Ok(manifest)) if status.is_success() => manifest,
            Ok(DockerRegistryResponse::Error(err)) => {
                return Err(HydrateError::Manifest(err.to_string()))
            }
            Ok(DockerRegistryResponse::Ok(_)) => {
                return Err(HydrateError::Manifest(format!(
                    "registry returned {status}"
                )))
            }
            Err(e) if status.is_success() => {
                return Err(HydrateError::Manifest(format!(
                    "failed to decode manifest: {e}"
                )))
            }
            Err(_) => {
                return Err(HydrateError::Manifest(format!(
                    "registry returned {status}"
                )))
            }
        };

        manifest.validate()?;
        tracing::info!(
            "fetched manifest for {repository}:{tag} with {} layers",
            manifest.get_layers().len()
        );

        Ok(manifest)
    }

    /// Streams the blob with `digest` into `dest_dir` and returns the path of the stored blob.
    ///
    /// The blob is written to a `.partial` file while its hash is computed and only renamed to
    /// its final name, the encoded digest, once the hash matches.
    pub async fn fetch_layer(
        &self,
        repository: &str,
        digest: &Digest,
        token: &str,
        dest_dir: &Path,
    ) -> HydrateResult<PathBuf> {
        let download_path = dest_dir.join(digest.digest());
        let partial_path = utils::partial_path(&download_path);

        if let Err(e) = self
            .stream_blob(repository, digest, token, &partial_path)
            .await
        {
            if let Err(remove_err) = fs::remove_file(&partial_path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "failed to remove partial download {}: {remove_err}",
                        partial_path.display()
                    );
                }
            }
            return Err(e);
        }

        fs::rename(&partial_path, &download_path)
            .await
            .map_err(|e| HydrateError::layer_download(digest, e))?;

        Ok(download_path)
    }

    async fn stream_blob(
        &self,
        repository: &str,
        digest: &Digest,
        token: &str,
        partial_path: &Path,
    ) -> HydrateResult<()> {
        let mut hasher = ContentHasher::new(digest.algorithm())
            .map_err(|e| HydrateError::layer_download(digest, e))?;

        tracing::info!("fetching blob: {repository} {digest}");

        let response = self
            .client
            .get(self.config.blob_url(repository, &digest.to_string()))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| HydrateError::layer_download(digest, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HydrateError::layer_download(
                digest,
                format!("registry returned {status}"),
            ));
        }

        let mut file = fs::File::create(partial_path)
            .await
            .map_err(|e| HydrateError::layer_download(digest, e))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| HydrateError::layer_download(digest, e))?;
            hasher.update(&bytes);
            file.write_all(&bytes)
                .await
                .map_err(|e| HydrateError::layer_download(digest, e))?;
        }

        file.flush()
            .await
            .map_err(|e| HydrateError::layer_download(digest, e))?;

        let actual_hash = hasher.finalize_hex();
        if actual_hash != digest.digest() {
            return Err(HydrateError::layer_download(
                digest,
                format!(
                    "file hash {actual_hash} does not match expected hash {}",
                    digest.digest()
                ),
            ));
        }

        Ok(())
    }
}

impl DockerAuthMaterial {
    /// Returns the bearer token, falling back to the OAuth2 access token.
    pub fn into_token(self) -> HydrateResult<String> {
        if !self.token.is_empty() {
            return Ok(self.token);
        }

        match self.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(HydrateError::Auth(
                "token response did not contain a token".to_string(),
            )),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RegistryPull for DockerRegistry {
    async fn download_manifest(&self) -> HydrateResult<Manifest> {
        let token = self.fetch_token(&self.repository).await?;
        self.fetch_manifest(&self.repository, &self.tag, &token)
            .await
    }

    async fn download_layer(
        &self,
        layer: &LayerDescriptor,
        dest_dir: &Path,
    ) -> HydrateResult<PathBuf> {
        let token = self.fetch_token(&self.repository).await?;
        self.fetch_layer(&self.repository, layer.get_digest(), &token, dest_dir)
            .await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
