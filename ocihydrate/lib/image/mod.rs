//! Turning a portable archive into extracted layers.
//!
//! [`extract_archive`] unpacks the archive into a scratch directory, reads its `manifest.json`
//! and hands the blobs to an [`Extractor`] backed by a [`LayerStore`] rooted at the output
//! directory.

mod extractor;

use std::path::{Path, PathBuf};

use crate::{
    archive,
    layer::LayerStore,
    manifest::Manifest,
    utils::{EXTRACT_TEMP_PREFIX, MANIFEST_FILENAME},
    HydrateError, HydrateResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use extractor::*;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts every layer of the portable archive at `archive` into `output_dir` and returns the
/// directory of the top layer.
///
/// Layers already extracted into `output_dir` by an earlier run are reused.
pub async fn extract_archive(
    archive: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
) -> HydrateResult<PathBuf> {
    let archive = archive.as_ref().to_path_buf();
    let output_dir = output_dir.as_ref().to_path_buf();

    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive, &output_dir)).await?
}

fn extract_archive_blocking(archive_path: &Path, output_dir: &Path) -> HydrateResult<PathBuf> {
    let scratch = tempfile::Builder::new()
        .prefix(EXTRACT_TEMP_PREFIX)
        .tempdir()
        .map_err(|e| HydrateError::filesystem("create_temp_dir", std::env::temp_dir(), e))?;

    tracing::info!("unpacking {}", archive_path.display());
    archive::unpack_tgz(archive_path, scratch.path())?;

    let manifest = Manifest::read_from(scratch.path().join(MANIFEST_FILENAME))?;

    std::fs::create_dir_all(output_dir)
        .map_err(|e| HydrateError::filesystem("mkdir", output_dir, e))?;

    let store = LayerStore::new(output_dir);
    Extractor::new(scratch.path(), output_dir, manifest, &store).extract()
}
