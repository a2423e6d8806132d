use std::{
    collections::BTreeMap,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::{
    utils::{COMPLETE_MARKER_FILENAME, LAYERCHAIN_FILENAME, WHITEOUT_OPAQUE, WHITEOUT_PREFIX},
    HydrateError, HydrateResult,
};

use super::{diff::whiteout_target_name, read_chain, LayerManager, LayerState, LayerStore};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the composed filesystem of the layer at `top_layer_dir` into `dest_dir`.
///
/// The parent chain is read from the layer's `layerchain.json`. Layers are applied base first,
/// then the top layer:
/// - Regular whiteouts (`.wh.<name>`) remove `<name>` from what lower layers produced
/// - Opaque whiteouts (`.wh..wh..opq`) clear the directory before the layer's own entries land
/// - The store's own `.complete` and `layerchain.json` are not copied
///
/// Directory modes are applied once every layer has been copied. The top layer must be
/// [`LayerState::Valid`] in the store that holds it.
pub async fn compose(
    top_layer_dir: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
) -> HydrateResult<()> {
    let top_layer_dir = top_layer_dir.as_ref();
    let dest_dir = dest_dir.as_ref();

    ensure_valid(top_layer_dir)?;

    let mut layers = read_chain(top_layer_dir)?;
    layers.reverse();
    layers.push(top_layer_dir.to_path_buf());

    fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| HydrateError::filesystem("mkdir", dest_dir, e))?;

    let mut dir_modes = BTreeMap::new();
    for layer in &layers {
        tracing::info!("applying layer {}", layer.display());
        apply_layer(layer, dest_dir, &mut dir_modes).await?;
    }

    // Deepest first, so a read-only parent does not block its children
    for (path, mode) in dir_modes.into_iter().rev() {
        if let Err(e) = fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(HydrateError::filesystem("chmod", &path, e));
            }
        }
    }

    Ok(())
}

async fn apply_layer(
    layer_dir: &Path,
    dest_dir: &Path,
    dir_modes: &mut BTreeMap<PathBuf, u32>,
) -> HydrateResult<()> {
    let mut stack = vec![PathBuf::new()];

    while let Some(rel_dir) = stack.pop() {
        let source_dir = layer_dir.join(&rel_dir);
        let target_dir = dest_dir.join(&rel_dir);

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&source_dir)
            .await
            .map_err(|e| HydrateError::filesystem("read_dir", &source_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HydrateError::filesystem("read_dir", &source_dir, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        // Whiteouts first, they only affect what lower layers left behind
        if names.iter().any(|n| n == WHITEOUT_OPAQUE) {
            tracing::debug!("opaque directory: {}", target_dir.display());
            remove_entry(&target_dir).await?;
            make_writable_dir(&target_dir).await?;
        }

        for name in &names {
            if name == WHITEOUT_OPAQUE {
                continue;
            }
            if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                let hidden = whiteout_target_name(hidden)
                    .map_err(|e| HydrateError::filesystem("whiteout", source_dir.join(name), e))?;
                let target = target_dir.join(hidden);
                tracing::debug!("whiteout: {}", target.display());
                remove_entry(&target).await?;
                dir_modes.retain(|path, _| !path.starts_with(&target));
            }
        }

        for name in &names {
            if name.starts_with(WHITEOUT_PREFIX) {
                continue;
            }
            if rel_dir.as_os_str().is_empty()
                && (name == COMPLETE_MARKER_FILENAME || name == LAYERCHAIN_FILENAME)
            {
                continue;
            }

            let rel_path = rel_dir.join(name);
            let source = layer_dir.join(&rel_path);
            let target = dest_dir.join(&rel_path);

            let metadata = fs::symlink_metadata(&source)
                .await
                .map_err(|e| HydrateError::filesystem("stat", &source, e))?;
            let file_type = metadata.file_type();

            if file_type.is_dir() {
                if let Ok(existing) = fs::symlink_metadata(&target).await {
                    if !existing.is_dir() {
                        remove_entry(&target).await?;
                    }
                }
                make_writable_dir(&target).await?;
                dir_modes.insert(target, metadata.permissions().mode() & 0o7777);
                stack.push(rel_path);
            } else if file_type.is_symlink() {
                let link_target = fs::read_link(&source)
                    .await
                    .map_err(|e| HydrateError::filesystem("readlink", &source, e))?;
                remove_entry(&target).await?;
                tracing::debug!(
                    "creating symlink: {} -> {}",
                    target.display(),
                    link_target.display()
                );
                fs::symlink(&link_target, &target)
                    .await
                    .map_err(|e| HydrateError::filesystem("symlink", &target, e))?;
            } else if file_type.is_file() {
                remove_entry(&target).await?;
                tracing::debug!("copying file: {} -> {}", source.display(), target.display());
                fs::copy(&source, &target)
                    .await
                    .map_err(|e| HydrateError::filesystem("copy", &target, e))?;
            } else {
                tracing::warn!("skipping special file {}", source.display());
            }
        }
    }

    Ok(())
}

fn ensure_valid(layer_dir: &Path) -> HydrateResult<()> {
    let (Some(home), Some(id)) = (layer_dir.parent(), layer_dir.file_name()) else {
        return Err(HydrateError::IncompleteLayer(layer_dir.to_path_buf()));
    };

    match LayerStore::new(home).state(&id.to_string_lossy())? {
        LayerState::Valid => Ok(()),
        _ => Err(HydrateError::IncompleteLayer(layer_dir.to_path_buf())),
    }
}

/// Removes whatever is at `path`. A missing path is not an error.
async fn remove_entry(path: &Path) -> HydrateResult<()> {
    let result = match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };

    result.map_err(|e| HydrateError::filesystem("remove", path, e))
}

/// Creates `path` if needed and makes sure the owner can write into it until modes are applied.
async fn make_writable_dir(path: &Path) -> HydrateResult<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| HydrateError::filesystem("mkdir", path, e))?;

    let metadata = fs::metadata(path)
        .await
        .map_err(|e| HydrateError::filesystem("stat", path, e))?;
    let mode = metadata.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o700))
            .await
            .map_err(|e| HydrateError::filesystem("chmod", path, e))?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
