use std::{
    io,
    path::{Path, PathBuf},
};

use crate::{HydrateError, HydrateResult};

use super::FileInfo;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Creates writers that materialize one layer each.
pub trait StorageBackend {
    /// The writer type handed out for a layer.
    type Writer: LayerWriter;

    /// Opens a writer for layer `id` stacked on `parent_paths` (nearest first).
    fn create_writer(&self, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<Self::Writer>;
}

/// Receives the changes of a single layer, in tar stream order.
///
/// Paths are relative to the layer root and already normalized. After [`add`](Self::add) of a
/// regular file the file's payload is delivered through [`io::Write`].
pub trait LayerWriter: io::Write {
    /// Adds a file, directory, symlink or special file described by `info`.
    fn add(&mut self, path: &Path, info: &FileInfo) -> HydrateResult<()>;

    /// Adds `path` as a hard link to `target`, which may live in this layer or a parent.
    fn add_link(&mut self, path: &Path, target: &Path) -> HydrateResult<()>;

    /// Removes `path` from the composed view of this layer and its parents.
    fn remove(&mut self, path: &Path) -> HydrateResult<()>;

    /// Hides everything the parents hold under `dir`.
    fn make_opaque(&mut self, dir: &Path) -> HydrateResult<()> {
        Err(HydrateError::storage(
            "make_opaque",
            dir,
            io::Error::new(
                io::ErrorKind::Unsupported,
                "opaque directories are not supported by this backend",
            ),
        ))
    }

    /// Finishes the layer. Calling it more than once has no further effect.
    fn close(&mut self) -> HydrateResult<()>;
}
