//! Hydration: pulling an image from a registry and packaging it as a portable archive.

use std::path::{Path, PathBuf};

use futures::{stream, StreamExt, TryStreamExt};
use tempfile::TempDir;

use crate::{
    archive::{ArchiveWriter, TgzArchiver},
    config::{RegistryConfig, DEFAULT_DOWNLOAD_CONCURRENCY},
    registry::{DockerRegistry, ImageName, RegistryPull},
    utils::{HYDRATE_TEMP_PREFIX, MANIFEST_FILENAME},
    HydrateError, HydrateResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Downloads an image's manifest and layers and compresses them into a single archive.
pub struct Hydrator<R, A> {
    registry: R,
    archiver: A,
    output_file: PathBuf,
    temp_root: Option<PathBuf>,
    concurrency: usize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R, A> Hydrator<R, A>
where
    R: RegistryPull,
    A: ArchiveWriter,
{
    /// Creates a hydrator that writes the archive to `output_file`.
    pub fn new(registry: R, archiver: A, output_file: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            archiver,
            output_file: output_file.into(),
            temp_root: None,
            concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
        }
    }

    /// Places the temporary working directory under `dir` instead of the system temp dir.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    /// Sets how many layer downloads may run at once. Values below one are treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the path of the archive this hydrator writes.
    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Runs the hydration.
    ///
    /// The manifest is fetched once. If that fails nothing is downloaded. If any layer fails
    /// nothing is compressed. The working directory is removed on every exit path.
    pub async fn run(&self) -> HydrateResult<()> {
        let work_dir = self.make_work_dir()?;
        let work_path = work_dir.path();

        let manifest = self.registry.download_manifest().await?;
        tracing::info!("downloading {} layers", manifest.get_layers().len());

        let downloaded: Vec<PathBuf> = stream::iter(manifest.get_layers())
            .map(|layer| async move {
                let path = self.registry.download_layer(layer, work_path).await?;
                tracing::info!("downloaded layer {}", layer.get_digest());
                Ok::<_, HydrateError>(path)
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        tracing::debug!("downloaded {} layer blobs", downloaded.len());

        let manifest_path = work_path.join(MANIFEST_FILENAME);
        tokio::fs::write(&manifest_path, manifest.to_vec()?)
            .await
            .map_err(|e| HydrateError::filesystem("write", &manifest_path, e))?;

        self.archiver
            .write_tgz(work_path, &self.output_file)
            .await?;

        Ok(())
    }

    fn make_work_dir(&self) -> HydrateResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(HYDRATE_TEMP_PREFIX);

        let result = match &self.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };

        result.map_err(|e| {
            let root = self.temp_root.clone().unwrap_or_else(std::env::temp_dir);
            HydrateError::filesystem("create_temp_dir", root, e)
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Pulls `image` (`org/name`) at `tag` and writes `<output_dir>/<name>-<tag>.tgz`.
///
/// Returns the path of the written archive.
pub async fn hydrate(
    config: RegistryConfig,
    image: &str,
    tag: &str,
    output_dir: impl AsRef<Path>,
) -> HydrateResult<PathBuf> {
    let image: ImageName = image.parse()?;
    let output_dir = output_dir.as_ref();

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| HydrateError::filesystem("create_dir_all", output_dir, e))?;

    let output_file = output_dir.join(image.archive_file_name(tag));
    let concurrency = config.get_download_concurrency();
    let registry = DockerRegistry::new(config, image.repository(), tag);

    tracing::info!("hydrating {image}:{tag} into {}", output_file.display());

    Hydrator::new(registry, TgzArchiver::new(), &output_file)
        .with_concurrency(concurrency)
        .run()
        .await?;

    Ok(output_file)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
