use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use getset::Getters;

use crate::{
    utils::{COMPLETE_MARKER_FILENAME, LAYERCHAIN_FILENAME},
    HydrateError, HydrateResult,
};

use super::{apply_diff, DirectoryBackend, LayerManager, LayerState, LayerWriter, StorageBackend};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Stores extracted layers as `<home>/<id>/`, each guarded by a `.complete` marker.
///
/// A layer directory holds the files written by the storage backend, `layerchain.json` listing
/// the parent layer paths (nearest first) when the layer has parents, and `.complete` containing
/// the layer id once extraction finished.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LayerStore<B = DirectoryBackend> {
    /// The directory holding one subdirectory per layer.
    home: PathBuf,

    /// The backend that writes layer contents.
    backend: B,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerStore<DirectoryBackend> {
    /// Creates a store under `home` that writes layers as plain directories.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            backend: DirectoryBackend::new(home.clone()),
            home,
        }
    }
}

impl<B: StorageBackend> LayerStore<B> {
    /// Creates a store under `home` writing layers through `backend`.
    pub fn with_backend(home: impl Into<PathBuf>, backend: B) -> Self {
        Self {
            home: home.into(),
            backend,
        }
    }

    /// Returns the directory of layer `id`.
    pub fn layer_path(&self, id: &str) -> PathBuf {
        self.home.join(id)
    }

    /// Reads the parent chain persisted for layer `id`. A layer without parents has none.
    pub fn read_chain(&self, id: &str) -> HydrateResult<Vec<PathBuf>> {
        read_chain(self.layer_path(id))
    }

    fn write_chain(&self, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<()> {
        let path = self.layer_path(id).join(LAYERCHAIN_FILENAME);
        let data = serde_json::to_vec(parent_paths)?;
        fs::write(&path, data).map_err(|e| HydrateError::filesystem("write", &path, e))
    }

    fn write_marker(&self, id: &str) -> HydrateResult<()> {
        let path = self.layer_path(id).join(COMPLETE_MARKER_FILENAME);
        let mut file = File::create(&path).map_err(|e| HydrateError::filesystem("create", &path, e))?;
        file.write_all(id.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| HydrateError::filesystem("write", &path, e))
    }

    fn apply_blob(&self, blob: &Path, id: &str, writer: &mut B::Writer) -> HydrateResult<u64> {
        let file = File::open(blob).map_err(|e| HydrateError::filesystem("open", blob, e))?;
        let mut reader = BufReader::new(file);

        let compressed = is_gzip(&mut reader).map_err(|source| HydrateError::StreamDecode {
            layer: id.to_string(),
            source,
        })?;

        if compressed {
            apply_diff(id, GzDecoder::new(reader), writer)
        } else {
            apply_diff(id, reader, writer)
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the parent chain persisted in the layer directory `layer_dir`.
///
/// A missing `layerchain.json` means the layer is a base layer.
pub fn read_chain(layer_dir: impl AsRef<Path>) -> HydrateResult<Vec<PathBuf>> {
    let path = layer_dir.as_ref().join(LAYERCHAIN_FILENAME);
    match fs::read(&path) {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(HydrateError::filesystem("read", &path, e)),
    }
}

/// Checks for the gzip magic without consuming it.
fn is_gzip<R: io::BufRead>(reader: &mut R) -> io::Result<bool> {
    let head = reader.fill_buf()?;
    Ok(head.len() >= GZIP_MAGIC.len() && head[..GZIP_MAGIC.len()] == GZIP_MAGIC)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<B: StorageBackend> LayerManager for LayerStore<B> {
    fn state(&self, id: &str) -> HydrateResult<LayerState> {
        let dir = self.layer_path(id);
        match fs::metadata(&dir) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LayerState::NotExist),
            Err(e) => return Err(HydrateError::filesystem("stat", &dir, e)),
        }

        let mut marker = Vec::new();
        let read = File::open(dir.join(COMPLETE_MARKER_FILENAME))
            .and_then(|mut f| f.read_to_end(&mut marker));

        match read {
            Ok(_) if marker == id.as_bytes() => Ok(LayerState::Valid),
            Ok(_) => {
                tracing::debug!("layer {id} has a mismatched completion marker");
                Ok(LayerState::Incomplete)
            }
            Err(_) => Ok(LayerState::Incomplete),
        }
    }

    fn delete(&self, id: &str) -> HydrateResult<()> {
        let dir = self.layer_path(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HydrateError::filesystem("remove", &dir, e)),
        }
    }

    fn extract(&self, blob: &Path, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<()> {
        let dir = self.layer_path(id);
        fs::create_dir_all(&dir).map_err(|e| HydrateError::filesystem("mkdir", &dir, e))?;

        let mut writer = self.backend.create_writer(id, parent_paths)?;

        // The writer is closed whatever the diff did, and the diff error wins
        let applied = self.apply_blob(blob, id, &mut writer);
        let closed = writer.close();
        let entries = applied?;
        closed?;

        if !parent_paths.is_empty() {
            self.write_chain(id, parent_paths)?;
        }

        self.write_marker(id)?;

        tracing::info!("extracted layer {id} ({entries} entries)");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
