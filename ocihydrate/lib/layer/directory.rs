use std::{
    fs::{self, File, OpenOptions, Permissions},
    io::{self, Write},
    os::unix::fs::{lchown, symlink, PermissionsExt},
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use getset::Getters;

use crate::{
    utils::{WHITEOUT_OPAQUE, WHITEOUT_PREFIX},
    HydrateError, HydrateResult,
};

use super::{FileInfo, FileKind, LayerWriter, StorageBackend};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Mode given to directories while the layer is being written. The real mode is applied on close.
const WORKING_DIR_MODE: u32 = 0o755;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A storage backend that materializes each layer as a plain directory tree under `home`.
///
/// Removals are recorded as OCI whiteout files so a layer directory together with its parent
/// chain describes the composed filesystem.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DirectoryBackend {
    /// The directory holding one subdirectory per layer.
    home: PathBuf,
}

/// Writes one layer into `<home>/<id>/`.
#[derive(Debug)]
pub struct DirectoryLayerWriter {
    root: PathBuf,
    parents: Vec<PathBuf>,
    current: Option<OpenFile>,
    deferred_dirs: Vec<DeferredDir>,
    privileged: bool,
    closed: bool,
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    path: PathBuf,
    modified: SystemTime,
}

#[derive(Debug)]
struct DeferredDir {
    path: PathBuf,
    mode: u32,
    modified: Option<SystemTime>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DirectoryBackend {
    /// Creates a backend storing layers under `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }
}

impl DirectoryLayerWriter {
    /// Creates a writer for the layer directory `root`, stacked on `parents` (nearest first).
    ///
    /// `root` must already exist.
    pub fn new(root: impl Into<PathBuf>, parents: &[PathBuf]) -> Self {
        Self {
            root: root.into(),
            parents: parents.to_vec(),
            current: None,
            deferred_dirs: Vec::new(),
            privileged: nix::unistd::geteuid().is_root(),
            closed: false,
        }
    }

    /// Returns the layer directory this writer fills.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self, op: &'static str, path: &Path) -> HydrateResult<()> {
        if self.closed {
            return Err(HydrateError::storage(
                op,
                path,
                io::Error::new(io::ErrorKind::Other, "writer is closed"),
            ));
        }
        Ok(())
    }

    /// Flushes, syncs and timestamps the file currently receiving data.
    fn finish_current(&mut self) -> HydrateResult<()> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };

        open.file
            .sync_all()
            .map_err(|e| HydrateError::storage("sync", &open.path, e))?;
        if let Err(e) = open.file.set_modified(open.modified) {
            tracing::warn!("failed to set mtime on {}: {e}", open.path.display());
        }

        Ok(())
    }

    /// Creates the missing ancestors of `rel` inside the layer.
    ///
    /// A directory created implicitly takes the mode of the same directory in the nearest parent
    /// layer that has it, so it does not mask that mode in the composed view.
    fn ensure_dirs(&mut self, rel: &Path) -> HydrateResult<()> {
        let mut current = PathBuf::new();
        for component in rel.components() {
            current.push(component);
            let target = self.root.join(&current);

            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => remove_path(&target)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(HydrateError::storage("stat", &target, e)),
            }

            fs::create_dir(&target).map_err(|e| HydrateError::storage("mkdir", &target, e))?;

            let inherited = self
                .parents
                .iter()
                .find_map(|parent| fs::symlink_metadata(parent.join(&current)).ok())
                .filter(|meta| meta.is_dir());
            let mode = inherited
                .as_ref()
                .map(|meta| meta.permissions().mode() & 0o7777)
                .unwrap_or(WORKING_DIR_MODE);
            let modified = inherited.and_then(|meta| meta.modified().ok());

            self.deferred_dirs.push(DeferredDir {
                path: target,
                mode,
                modified,
            });
        }

        Ok(())
    }

    fn ensure_parent(&mut self, rel: &Path) -> HydrateResult<()> {
        match rel.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.ensure_dirs(parent),
            _ => Ok(()),
        }
    }

    fn add_directory(&mut self, target: PathBuf, info: &FileInfo) -> HydrateResult<()> {
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                remove_path(&target)?;
                fs::create_dir(&target).map_err(|e| HydrateError::storage("mkdir", &target, e))?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&target).map_err(|e| HydrateError::storage("mkdir", &target, e))?;
            }
            Err(e) => return Err(HydrateError::storage("stat", &target, e)),
        }

        self.apply_ownership(&target, info);
        apply_xattrs(&target, info);

        // A directory listed twice keeps the last header
        self.deferred_dirs.retain(|d| d.path != target);
        self.deferred_dirs.push(DeferredDir {
            path: target,
            mode: info.get_mode(),
            modified: Some(info.modified()),
        });

        Ok(())
    }

    fn add_regular(&mut self, target: PathBuf, info: &FileInfo) -> HydrateResult<()> {
        remove_path(&target)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .map_err(|e| HydrateError::storage("create", &target, e))?;
        file.set_permissions(Permissions::from_mode(info.get_mode()))
            .map_err(|e| HydrateError::storage("chmod", &target, e))?;

        self.apply_ownership(&target, info);
        apply_xattrs(&target, info);

        self.current = Some(OpenFile {
            file,
            path: target,
            modified: info.modified(),
        });

        Ok(())
    }

    fn add_symlink(&mut self, target: PathBuf, info: &FileInfo) -> HydrateResult<()> {
        let Some(link_target) = info.get_link_target() else {
            return Err(HydrateError::storage(
                "symlink",
                &target,
                io::Error::new(io::ErrorKind::InvalidData, "symlink has no target"),
            ));
        };

        remove_path(&target)?;
        symlink(link_target, &target).map_err(|e| HydrateError::storage("symlink", &target, e))?;
        self.apply_ownership(&target, info);

        Ok(())
    }

    /// Applies ownership when running as root. Unprivileged extraction keeps the current user.
    fn apply_ownership(&self, target: &Path, info: &FileInfo) {
        if !self.privileged {
            return;
        }

        let (Ok(uid), Ok(gid)) = (
            u32::try_from(info.get_uid()),
            u32::try_from(info.get_gid()),
        ) else {
            tracing::warn!("owner of {} is out of range", target.display());
            return;
        };

        if let Err(e) = lchown(target, Some(uid), Some(gid)) {
            tracing::warn!("failed to chown {}: {e}", target.display());
        }
    }

    /// Finds `rel` in the nearest parent layer that holds it.
    fn find_in_parents(&self, rel: &Path) -> HydrateResult<Option<PathBuf>> {
        for parent in &self.parents {
            if let Some(found) = lookup_no_follow(parent, rel)? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Removes whatever is at `path`, if anything.
fn remove_path(path: &Path) -> HydrateResult<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };

    result.map_err(|e| HydrateError::storage("remove", path, e))
}

/// Looks up `rel` under `root` without following symlinks on the way.
///
/// The last component may itself be a symlink. Any symlink before it is an error, since the
/// entry it leads to may live outside `root`.
fn lookup_no_follow(root: &Path, rel: &Path) -> HydrateResult<Option<PathBuf>> {
    let mut current = root.to_path_buf();
    let mut components = rel.components().peekable();

    while let Some(component) = components.next() {
        let Component::Normal(part) = component else {
            return Err(HydrateError::storage(
                "lookup",
                root.join(rel),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "path is not relative to the layer root",
                ),
            ));
        };
        current.push(part);

        let meta = match fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HydrateError::storage("stat", &current, e)),
        };

        if components.peek().is_none() {
            return Ok(Some(current));
        }

        if meta.file_type().is_symlink() {
            return Err(HydrateError::storage(
                "lookup",
                root.join(rel),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is a symlink", current.display()),
                ),
            ));
        }

        if !meta.is_dir() {
            return Ok(None);
        }
    }

    Ok(None)
}

fn apply_xattrs(target: &Path, info: &FileInfo) {
    for (name, value) in info.get_xattrs() {
        if let Err(e) = xattr::set(target, name, value) {
            tracing::warn!("failed to set xattr {name} on {}: {e}", target.display());
        }
    }
}

fn create_marker(path: &Path) -> HydrateResult<()> {
    File::create(path)
        .map(drop)
        .map_err(|e| HydrateError::storage("create", path, e))
}

fn copy_from_parent(source: &Path, target: &Path) -> HydrateResult<()> {
    let meta =
        fs::symlink_metadata(source).map_err(|e| HydrateError::storage("stat", source, e))?;

    if meta.file_type().is_symlink() {
        let link_target =
            fs::read_link(source).map_err(|e| HydrateError::storage("readlink", source, e))?;
        return symlink(link_target, target)
            .map_err(|e| HydrateError::storage("symlink", target, e));
    }

    fs::copy(source, target).map_err(|e| HydrateError::storage("copy", target, e))?;
    if let Ok(modified) = meta.modified() {
        let result = File::options()
            .write(true)
            .open(target)
            .and_then(|f| f.set_modified(modified));
        if let Err(e) = result {
            tracing::debug!("failed to copy mtime to {}: {e}", target.display());
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl StorageBackend for DirectoryBackend {
    type Writer = DirectoryLayerWriter;

    fn create_writer(&self, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<Self::Writer> {
        let root = self.home.join(id);
        fs::create_dir_all(&root).map_err(|e| HydrateError::storage("mkdir", &root, e))?;
        Ok(DirectoryLayerWriter::new(root, parent_paths))
    }
}

impl LayerWriter for DirectoryLayerWriter {
    fn add(&mut self, path: &Path, info: &FileInfo) -> HydrateResult<()> {
        self.ensure_open("add", path)?;
        self.finish_current()?;
        self.ensure_parent(path)?;

        let target = self.root.join(path);
        match info.get_kind() {
            FileKind::Directory => self.add_directory(target, info),
            FileKind::Regular => self.add_regular(target, info),
            FileKind::Symlink => self.add_symlink(target, info),
            kind @ (FileKind::CharDevice | FileKind::BlockDevice | FileKind::Fifo) => {
                tracing::warn!("skipping {kind:?} {}", path.display());
                Ok(())
            }
        }
    }

    fn add_link(&mut self, path: &Path, target: &Path) -> HydrateResult<()> {
        self.ensure_open("add_link", path)?;
        self.finish_current()?;
        self.ensure_parent(path)?;

        let link = self.root.join(path);
        remove_path(&link)?;

        if let Some(local) = lookup_no_follow(&self.root, target)? {
            return fs::hard_link(&local, &link)
                .map_err(|e| HydrateError::storage("link", &link, e));
        }

        match self.find_in_parents(target)? {
            Some(source) => {
                tracing::debug!(
                    "link target {} resolved from parent {}",
                    target.display(),
                    source.display()
                );
                copy_from_parent(&source, &link)
            }
            None => Err(HydrateError::storage(
                "add_link",
                &link,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("link target {} not found", target.display()),
                ),
            )),
        }
    }

    fn remove(&mut self, path: &Path) -> HydrateResult<()> {
        self.ensure_open("remove", path)?;
        self.finish_current()?;
        self.ensure_parent(path)?;

        let target = self.root.join(path);
        remove_path(&target)?;
        self.deferred_dirs.retain(|d| !d.path.starts_with(&target));

        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let mut marker_name = std::ffi::OsString::from(WHITEOUT_PREFIX);
        marker_name.push(name);

        create_marker(&target.with_file_name(marker_name))
    }

    fn make_opaque(&mut self, dir: &Path) -> HydrateResult<()> {
        self.ensure_open("make_opaque", dir)?;
        self.finish_current()?;
        self.ensure_dirs(dir)?;

        create_marker(&self.root.join(dir).join(WHITEOUT_OPAQUE))
    }

    fn close(&mut self) -> HydrateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish_current()?;

        // Children before parents, so setting an mtime is not undone by later changes
        for dir in self.deferred_dirs.drain(..).rev() {
            if let Some(modified) = dir.modified {
                let result = File::open(&dir.path).and_then(|f| f.set_modified(modified));
                if let Err(e) = result {
                    tracing::debug!("failed to set mtime on {}: {e}", dir.path.display());
                }
            }

            match fs::set_permissions(&dir.path, Permissions::from_mode(dir.mode)) {
                Ok(()) => {}
                // Replaced by a later entry
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(HydrateError::storage("chmod", &dir.path, e)),
            }
        }

        Ok(())
    }
}

impl Write for DirectoryLayerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some(open) => open.file.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "no regular file is open for writing",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(open) => open.file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for DirectoryLayerWriter {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!("failed to close layer {}: {e}", self.root.display());
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use tempfile::TempDir;

    use super::*;

    #[test_log::test]
    fn test_directory_writer_materializes_entries() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let backend = DirectoryBackend::new(home.path());
        let mut writer = backend.create_writer("l1", &[])?;

        writer.add(
            Path::new("bin"),
            &FileInfo::new(FileKind::Directory, 0o750).with_mtime(1_600_000_000),
        )?;
        writer.add(
            Path::new("bin/tool"),
            &FileInfo::new(FileKind::Regular, 0o755)
                .with_size(5)
                .with_mtime(1_600_000_000),
        )?;
        writer.write_all(b"hello")?;
        writer.add(
            Path::new("bin/alias"),
            &FileInfo::new(FileKind::Symlink, 0o777).with_link_target("tool"),
        )?;
        writer.add_link(Path::new("bin/tool2"), Path::new("bin/tool"))?;
        writer.add(Path::new("dev/null"), &FileInfo::new(FileKind::CharDevice, 0o666))?;
        writer.close()?;
        writer.close()?;

        let root = home.path().join("l1");
        assert_eq!(fs::read(root.join("bin/tool"))?, b"hello");
        assert_eq!(fs::read_link(root.join("bin/alias"))?, PathBuf::from("tool"));

        let tool = fs::metadata(root.join("bin/tool"))?;
        let tool2 = fs::metadata(root.join("bin/tool2"))?;
        assert_eq!(tool.ino(), tool2.ino());
        assert_eq!(tool.permissions().mode() & 0o7777, 0o755);
        assert_eq!(tool.mtime(), 1_600_000_000);

        let bin = fs::metadata(root.join("bin"))?;
        assert_eq!(bin.permissions().mode() & 0o7777, 0o750);
        assert_eq!(bin.mtime(), 1_600_000_000);

        assert!(!root.join("dev/null").exists());

        Ok(())
    }

    #[test_log::test]
    fn test_directory_writer_remove_records_whiteout() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let backend = DirectoryBackend::new(home.path());
        let mut writer = backend.create_writer("l1", &[])?;

        writer.add(
            Path::new("etc/passwd"),
            &FileInfo::new(FileKind::Regular, 0o644),
        )?;
        writer.remove(Path::new("etc/passwd"))?;
        writer.remove(Path::new("opt/app"))?;
        writer.make_opaque(Path::new("var/cache"))?;
        writer.close()?;

        let root = home.path().join("l1");
        assert!(!root.join("etc/passwd").exists());
        assert!(root.join("etc/.wh.passwd").exists());
        assert!(root.join("opt/.wh.app").exists());
        assert!(root.join("var/cache/.wh..wh..opq").exists());

        Ok(())
    }

    #[test_log::test]
    fn test_directory_writer_link_resolves_through_parents() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let parent = home.path().join("base");
        fs::create_dir_all(parent.join("usr/lib"))?;
        fs::set_permissions(parent.join("usr"), Permissions::from_mode(0o711))?;
        fs::write(parent.join("usr/lib/libc.so"), b"libc")?;

        let backend = DirectoryBackend::new(home.path());
        let mut writer = backend.create_writer("top", &[parent.clone()])?;
        writer.add_link(Path::new("usr/lib/libc.so.6"), Path::new("usr/lib/libc.so"))?;

        let missing = writer.add_link(Path::new("usr/lib/nope"), Path::new("usr/lib/absent"));
        assert!(matches!(missing, Err(HydrateError::StorageBackend { .. })));
        writer.close()?;

        let root = home.path().join("top");
        assert_eq!(fs::read(root.join("usr/lib/libc.so.6"))?, b"libc");

        // Implicit directories take their mode from the parent layer
        let usr = fs::metadata(root.join("usr"))?;
        assert_eq!(usr.permissions().mode() & 0o7777, 0o711);

        Ok(())
    }

    #[test_log::test]
    fn test_directory_writer_link_does_not_follow_symlinks() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let host = TempDir::new()?;
        fs::write(host.path().join("secret"), b"host secret")?;

        let parent = home.path().join("base");
        fs::create_dir_all(&parent)?;
        symlink(host.path(), parent.join("lib"))?;

        let backend = DirectoryBackend::new(home.path());
        let mut writer = backend.create_writer("top", &[parent])?;
        writer.add(
            Path::new("evil"),
            &FileInfo::new(FileKind::Symlink, 0o777).with_link_target(host.path()),
        )?;

        let local = writer.add_link(Path::new("stolen"), Path::new("evil/secret"));
        assert!(matches!(local, Err(HydrateError::StorageBackend { .. })));

        let inherited = writer.add_link(Path::new("copied"), Path::new("lib/secret"));
        assert!(matches!(inherited, Err(HydrateError::StorageBackend { .. })));
        writer.close()?;

        let root = home.path().join("top");
        assert!(fs::symlink_metadata(root.join("stolen")).is_err());
        assert!(fs::symlink_metadata(root.join("copied")).is_err());
        assert_eq!(fs::read(host.path().join("secret"))?, b"host secret");

        // A link to the symlink itself stays inside the layer
        let mut writer = backend.create_writer("links", &[])?;
        writer.add(
            Path::new("alias"),
            &FileInfo::new(FileKind::Symlink, 0o777).with_link_target("target"),
        )?;
        writer.add_link(Path::new("alias2"), Path::new("alias"))?;
        writer.close()?;
        assert_eq!(
            fs::read_link(home.path().join("links/alias2"))?,
            PathBuf::from("target")
        );

        Ok(())
    }

    #[test_log::test]
    fn test_directory_writer_rejects_use_after_close() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let mut writer = DirectoryBackend::new(home.path()).create_writer("l1", &[])?;
        writer.close()?;

        let result = writer.add(Path::new("x"), &FileInfo::new(FileKind::Regular, 0o644));
        assert!(matches!(result, Err(HydrateError::StorageBackend { .. })));

        Ok(())
    }
}
