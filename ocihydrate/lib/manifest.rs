//! Image manifests as pulled from a registry and stored inside a portable archive.
//!
//! Only the layer list is interpreted. Every other top-level field the registry returns is
//! kept verbatim so the manifest written into an archive matches what was pulled.

use std::{collections::HashSet, path::Path};

use getset::Getters;
use oci_spec::image::{Digest, MediaType};
use serde::{Deserialize, Serialize};

use crate::{HydrateError, HydrateResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image manifest: the ordered list of layers that make up an image, base layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Manifest {
    /// The layers of the image. Index 0 is the root of the filesystem.
    layers: Vec<LayerDescriptor>,

    /// Top-level fields that are carried along but not interpreted.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Describes a single layer blob of an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
#[getset(get = "pub with_prefix")]
pub struct LayerDescriptor {
    /// The content hash of the blob, e.g. `sha256:<hex>`.
    digest: Digest,

    /// The media type of the blob.
    #[serde(default = "default_layer_media_type")]
    media_type: MediaType,

    /// The size of the blob in bytes.
    #[serde(default)]
    size: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Manifest {
    /// Creates a manifest from a list of layers.
    pub fn new(layers: Vec<LayerDescriptor>) -> Self {
        Self {
            layers,
            extra: serde_json::Map::new(),
        }
    }

    /// Decodes a manifest from JSON bytes.
    pub fn from_slice(data: &[u8]) -> HydrateResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| HydrateError::Manifest(format!("failed to decode manifest: {e}")))
    }

    /// Reads and decodes the manifest stored at `path`.
    pub fn read_from(path: impl AsRef<Path>) -> HydrateResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| HydrateError::filesystem("read", path, e))?;
        Self::from_slice(&data)
    }

    /// Encodes the manifest as JSON.
    pub fn to_vec(&self) -> HydrateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks that the manifest has at least one layer and that no digest repeats.
    pub fn validate(&self) -> HydrateResult<()> {
        if self.layers.is_empty() {
            return Err(HydrateError::Manifest("manifest has no layers".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.layers.len());
        for layer in &self.layers {
            if !seen.insert(layer.digest.to_string()) {
                return Err(HydrateError::Manifest(format!(
                    "layer {} appears more than once",
                    layer.digest
                )));
            }
        }

        Ok(())
    }
}

impl LayerDescriptor {
    /// Creates a descriptor for a gzip compressed layer.
    pub fn new(digest: Digest, size: u64) -> Self {
        Self {
            digest,
            media_type: default_layer_media_type(),
            size,
        }
    }

    /// Returns the layer identifier: the encoded (hex) part of the digest.
    ///
    /// This is the name of the layer's blob inside a portable archive and of its directory in
    /// the layer store.
    pub fn id(&self) -> &str {
        self.digest.digest()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_layer_media_type() -> MediaType {
    MediaType::ImageLayerGzip
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
