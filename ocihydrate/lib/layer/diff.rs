use std::{
    io::{self, Read, Write},
    path::{Component, Path, PathBuf},
};

use crate::{
    utils::{WHITEOUT_OPAQUE, WHITEOUT_PREFIX},
    HydrateError, HydrateResult,
};

use super::{FileInfo, LayerWriter};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Size of the scratch buffer used to move entry payloads into the writer.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Applies the tar stream `reader` of layer `layer_id` to `writer`.
///
/// Whiteout entries become [`LayerWriter::remove`] (or [`LayerWriter::make_opaque`] for the
/// opaque marker), hard links become [`LayerWriter::add_link`] and everything else is added with
/// its payload. Returns the number of entries applied.
///
/// The writer is not closed.
pub fn apply_diff<R, W>(layer_id: &str, reader: R, writer: &mut W) -> HydrateResult<u64>
where
    R: Read,
    W: LayerWriter + ?Sized,
{
    let decode_err = |source: io::Error| HydrateError::StreamDecode {
        layer: layer_id.to_string(),
        source,
    };

    let mut archive = tar::Archive::new(reader);
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut applied = 0;

    for entry in archive.entries().map_err(decode_err)? {
        let mut entry = entry.map_err(decode_err)?;
        let raw_path = entry.path().map_err(decode_err)?.into_owned();
        let Some(path) = normalize_entry_path(&raw_path).map_err(decode_err)? else {
            continue;
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = path.parent().unwrap_or(Path::new(""));

        if name == WHITEOUT_OPAQUE {
            tracing::debug!("opaque whiteout: {}", dir.display());
            writer.make_opaque(dir)?;
        } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            let hidden = whiteout_target_name(hidden).map_err(decode_err)?;
            let target = dir.join(hidden);
            tracing::debug!("whiteout: {}", target.display());
            writer.remove(&target)?;
        } else if entry.header().entry_type().is_hard_link() {
            let link_name = entry
                .link_name()
                .map_err(decode_err)?
                .ok_or_else(|| {
                    decode_err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("hard link {} has no target", path.display()),
                    ))
                })?
                .into_owned();
            let Some(target) = normalize_entry_path(&link_name).map_err(decode_err)? else {
                return Err(decode_err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("hard link {} points at the layer root", path.display()),
                )));
            };

            tracing::debug!("link: {} -> {}", path.display(), target.display());
            writer.add_link(&path, &target)?;
        } else {
            let Some(info) = FileInfo::from_entry(&mut entry).map_err(decode_err)? else {
                tracing::debug!(
                    "skipping {:?} entry {}",
                    entry.header().entry_type(),
                    path.display()
                );
                continue;
            };

            tracing::debug!("add: {}", path.display());
            writer.add(&path, &info)?;
            copy_payload(&mut entry, writer, &mut buffer, layer_id, &path)?;
        }

        applied += 1;
    }

    Ok(applied)
}

/// Strips leading `/` and `.` components from a tar entry path.
///
/// Returns `None` for the layer root itself and an error for paths that escape the root.
pub fn normalize_entry_path(path: &Path) -> io::Result<Option<PathBuf>> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entry path escapes the layer root: {}", path.display()),
                ));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

/// Checks the name left after stripping the whiteout prefix.
///
/// The hidden entry must be a sibling of the whiteout, so the name has to be a single normal
/// path component.
pub(crate) fn whiteout_target_name(hidden: &str) -> io::Result<&str> {
    if hidden.is_empty() || hidden == "." || hidden == ".." || hidden.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("whiteout {WHITEOUT_PREFIX}{hidden} does not name a sibling entry"),
        ));
    }

    Ok(hidden)
}

fn copy_payload<R, W>(
    entry: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
    layer_id: &str,
    path: &Path,
) -> HydrateResult<()>
where
    R: Read,
    W: LayerWriter + ?Sized,
{
    loop {
        let read = match entry.read(buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(HydrateError::StreamDecode {
                    layer: layer_id.to_string(),
                    source,
                })
            }
        };

        writer
            .write_all(&buffer[..read])
            .map_err(|e| HydrateError::storage("write", path, e))?;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
