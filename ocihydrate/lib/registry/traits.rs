use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    manifest::{LayerDescriptor, Manifest},
    HydrateResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A source of one image's manifest and layer blobs.
///
/// Implementations are scoped to a single image (repository and tag) and handle their own
/// authentication.
#[async_trait]
pub trait RegistryPull: Send + Sync {
    /// Fetches and validates the image manifest.
    async fn download_manifest(&self) -> HydrateResult<Manifest>;

    /// Downloads the blob described by `layer` into `dest_dir` and returns its path.
    ///
    /// The blob is stored under the layer's encoded digest.
    async fn download_layer(
        &self,
        layer: &LayerDescriptor,
        dest_dir: &Path,
    ) -> HydrateResult<PathBuf>;
}
