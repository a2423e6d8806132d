use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an ocihydrate-related operation.
pub type HydrateResult<T> = Result<T, HydrateError>;

/// An error that occurred while pulling, packaging or materializing an image.
#[derive(pretty_error_debug::Debug, Error)]
pub enum HydrateError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Requesting a bearer token from the auth endpoint failed.
    #[error("registry auth error: {0}")]
    Auth(String),

    /// Fetching or decoding an image manifest failed.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Downloading a layer blob failed.
    #[error("layer download failed ({digest}): {reason}")]
    LayerDownload {
        /// The digest of the layer being downloaded.
        digest: String,

        /// What went wrong.
        reason: String,
    },

    /// A filesystem operation on the layer store failed.
    #[error("filesystem error: {op} {}: {source}", path.display())]
    Filesystem {
        /// The operation that failed.
        op: &'static str,

        /// The path the operation was applied to.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A layer blob or portable archive could not be decompressed or read as a tar stream.
    #[error("failed to decode {layer}: {source}")]
    StreamDecode {
        /// The layer id, or the path of the portable archive being unpacked.
        layer: String,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The storage writer failed to create, add, link, remove or close.
    #[error("storage backend error: {op} {}: {source}", path.display())]
    StorageBackend {
        /// The writer operation that failed.
        op: &'static str,

        /// The path the operation was applied to.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A layer was used before its extraction completed.
    #[error("layer is not fully extracted: {}", .0.display())]
    IncompleteLayer(PathBuf),

    /// The image name is not of the form `org/name`.
    #[error("invalid image name: {0}")]
    InvalidImageName(String),

    /// A digest uses a hash algorithm that cannot be verified.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking task failed to complete.
    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HydrateError {
    /// Creates a [`HydrateError::Filesystem`] for `op` on `path`.
    pub fn filesystem(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        HydrateError::Filesystem {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a [`HydrateError::StorageBackend`] for `op` on `path`.
    pub fn storage(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        HydrateError::StorageBackend {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a [`HydrateError::LayerDownload`] for the layer with `digest`.
    pub fn layer_download(digest: impl Display, reason: impl Display) -> Self {
        HydrateError::LayerDownload {
            digest: digest.to_string(),
            reason: reason.to_string(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
