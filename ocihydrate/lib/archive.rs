//! The portable archive: a gzip compressed tarball holding one blob per layer, named by the
//! layer's encoded digest, plus `manifest.json`, all at the archive root.

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{utils, HydrateError, HydrateResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Packs a directory into a compressed archive file.
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    /// Writes the contents of `src_dir` into `out_file`, with entries at the archive root.
    async fn write_tgz(&self, src_dir: &Path, out_file: &Path) -> HydrateResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Writes `.tgz` archives with the `tar` and `flate2` crates.
///
/// The archive is first written next to its destination with a `.partial` extension and only
/// renamed into place once it is complete.
#[derive(Debug, Clone, Default)]
pub struct TgzArchiver {
    compression: Compression,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TgzArchiver {
    /// Creates an archiver using the default compression level.
    pub fn new() -> Self {
        Self::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ArchiveWriter for TgzArchiver {
    async fn write_tgz(&self, src_dir: &Path, out_file: &Path) -> HydrateResult<()> {
        let src_dir = src_dir.to_path_buf();
        let out_file = out_file.to_path_buf();
        let compression = self.compression;

        tokio::task::spawn_blocking(move || write_tgz_blocking(&src_dir, &out_file, compression))
            .await?
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Unpacks the `.tgz` at `archive` into `dest_dir`, which is created if missing.
///
/// This is blocking; async callers run it on `spawn_blocking`.
pub fn unpack_tgz(archive: &Path, dest_dir: &Path) -> HydrateResult<()> {
    std::fs::create_dir_all(dest_dir)
        .map_err(|e| HydrateError::filesystem("create_dir_all", dest_dir, e))?;

    let file = File::open(archive).map_err(|e| HydrateError::filesystem("open", archive, e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    tar.unpack(dest_dir)
        .map_err(|source| HydrateError::StreamDecode {
            layer: archive.display().to_string(),
            source,
        })?;

    tracing::debug!(
        "unpacked {} into {}",
        archive.display(),
        dest_dir.display()
    );

    Ok(())
}

fn write_tgz_blocking(src_dir: &Path, out_file: &Path, compression: Compression) -> HydrateResult<()> {
    let partial = utils::partial_path(out_file);

    if let Err(e) = write_archive(src_dir, &partial, compression) {
        if let Err(remove_err) = std::fs::remove_file(&partial) {
            if remove_err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    "failed to remove partial archive {}: {remove_err}",
                    partial.display()
                );
            }
        }
        return Err(e);
    }

    std::fs::rename(&partial, out_file)
        .map_err(|e| HydrateError::filesystem("rename", out_file, e))?;

    tracing::info!("wrote archive {}", out_file.display());
    Ok(())
}

fn write_archive(src_dir: &Path, archive_path: &Path, compression: Compression) -> HydrateResult<()> {
    let file =
        File::create(archive_path).map_err(|e| HydrateError::filesystem("create", archive_path, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(file), compression));
    builder.follow_symlinks(false);

    // Sorted so archives of identical inputs are identical
    let mut entries = std::fs::read_dir(src_dir)
        .map_err(|e| HydrateError::filesystem("read_dir", src_dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<PathBuf>, _>>()
        .map_err(|e| HydrateError::filesystem("read_dir", src_dir, e))?;
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };

        let result = if path.is_dir() {
            builder.append_dir_all(name, &path)
        } else {
            builder.append_path_with_name(&path, name)
        };
        result.map_err(|e| HydrateError::filesystem("append", &path, e))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| HydrateError::filesystem("write", archive_path, e))?;
    let writer = encoder
        .finish()
        .map_err(|e| HydrateError::filesystem("write", archive_path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| HydrateError::filesystem("write", archive_path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| HydrateError::filesystem("sync", archive_path, e))?;

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
