use std::{
    io::{self, Read},
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use getset::{CopyGetters, Getters};
use tar::EntryType;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The PAX record prefix under which extended attributes are stored.
const PAX_XATTR_PREFIX: &str = "SCHILY.xattr.";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of filesystem object a tar entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file. Its contents follow the header.
    Regular,

    /// A directory.
    Directory,

    /// A symbolic link.
    Symlink,

    /// A character device.
    CharDevice,

    /// A block device.
    BlockDevice,

    /// A named pipe.
    Fifo,
}

/// The header information of a tar entry that a storage writer needs to materialize it.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct FileInfo {
    /// What kind of object this is.
    #[getset(get_copy = "pub with_prefix")]
    kind: FileKind,

    /// Permission bits, including setuid, setgid and sticky.
    #[getset(get_copy = "pub with_prefix")]
    mode: u32,

    /// Owner user id.
    #[getset(get_copy = "pub with_prefix")]
    uid: u64,

    /// Owner group id.
    #[getset(get_copy = "pub with_prefix")]
    gid: u64,

    /// Size of the payload in bytes. Zero for anything but regular files.
    #[getset(get_copy = "pub with_prefix")]
    size: u64,

    /// Modification time in seconds since the epoch.
    #[getset(get_copy = "pub with_prefix")]
    mtime: u64,

    /// The target of a symbolic link.
    #[getset(get = "pub with_prefix")]
    link_target: Option<PathBuf>,

    /// Extended attributes carried in PAX headers.
    #[getset(get = "pub with_prefix")]
    xattrs: Vec<(String, Vec<u8>)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FileInfo {
    /// Creates the info for an object of `kind` with `mode`, owned by root, with no payload.
    pub fn new(kind: FileKind, mode: u32) -> Self {
        Self {
            kind,
            mode,
            uid: 0,
            gid: 0,
            size: 0,
            mtime: 0,
            link_target: None,
            xattrs: Vec::new(),
        }
    }

    /// Sets the payload size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Sets the modification time.
    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Sets the symbolic link target.
    pub fn with_link_target(mut self, target: impl Into<PathBuf>) -> Self {
        self.link_target = Some(target.into());
        self
    }

    /// Reads the info from the header of `entry`.
    ///
    /// Returns `Ok(None)` for entry types a layer cannot contain, like PAX global headers.
    /// Hard links are not described by a `FileInfo`; they go through
    /// [`LayerWriter::add_link`](super::LayerWriter::add_link).
    pub fn from_entry<R: Read>(entry: &mut tar::Entry<'_, R>) -> io::Result<Option<Self>> {
        let header = entry.header();
        let kind = match header.entry_type() {
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => FileKind::Regular,
            EntryType::Directory => FileKind::Directory,
            EntryType::Symlink => FileKind::Symlink,
            EntryType::Char => FileKind::CharDevice,
            EntryType::Block => FileKind::BlockDevice,
            EntryType::Fifo => FileKind::Fifo,
            _ => return Ok(None),
        };

        let mut info = Self {
            kind,
            mode: header.mode()? & 0o7777,
            uid: header.uid()?,
            gid: header.gid()?,
            size: if kind == FileKind::Regular {
                header.size()?
            } else {
                0
            },
            mtime: header.mtime()?,
            link_target: None,
            xattrs: Vec::new(),
        };

        if kind == FileKind::Symlink {
            info.link_target = entry.link_name()?.map(|p| p.into_owned());
        }

        if let Some(extensions) = entry.pax_extensions()? {
            for extension in extensions {
                let extension = extension?;
                let Ok(key) = extension.key() else {
                    continue;
                };
                if let Some(name) = key.strip_prefix(PAX_XATTR_PREFIX) {
                    info.xattrs
                        .push((name.to_string(), extension.value_bytes().to_vec()));
                }
            }
        }

        Ok(Some(info))
    }

    /// Returns the modification time as a [`SystemTime`].
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.mtime)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
