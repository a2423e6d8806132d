use std::path::{Path, PathBuf};

use oci_spec::image::DigestAlgorithm;
use sha2::{Digest as _, Sha256, Sha384, Sha512};

use crate::{HydrateError, HydrateResult};

use super::PARTIAL_EXTENSION;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An incremental hasher for one of the digest algorithms a registry may use.
pub enum ContentHasher {
    /// SHA-256.
    Sha256(Sha256),

    /// SHA-384.
    Sha384(Sha384),

    /// SHA-512.
    Sha512(Sha512),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContentHasher {
    /// Creates a hasher for `algorithm`.
    pub fn new(algorithm: &DigestAlgorithm) -> HydrateResult<Self> {
        match algorithm {
            DigestAlgorithm::Sha256 => Ok(Self::Sha256(Sha256::new())),
            DigestAlgorithm::Sha384 => Ok(Self::Sha384(Sha384::new())),
            DigestAlgorithm::Sha512 => Ok(Self::Sha512(Sha512::new())),
            other => Err(HydrateError::UnsupportedDigestAlgorithm(other.to_string())),
        }
    }

    /// Feeds `data` into the hash.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Returns the lowercase hex encoding of the hash.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha384(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the sibling path used while `path` is still being written.
///
/// ## Examples
///
/// ```
/// use std::path::Path;
/// use ocihydrate::utils::partial_path;
///
/// assert_eq!(partial_path(Path::new("/tmp/out.tgz")), Path::new("/tmp/out.tgz.partial"));
/// ```
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_EXTENSION);
    PathBuf::from(name)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
