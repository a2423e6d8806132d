//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The filename of the image manifest inside a portable archive.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// The filename of the completion marker inside a layer directory.
pub const COMPLETE_MARKER_FILENAME: &str = ".complete";

/// The filename of the persisted parent chain inside a layer directory.
pub const LAYERCHAIN_FILENAME: &str = "layerchain.json";

/// The prefix marking a tar entry (or stored file) as a whiteout.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The name of the opaque whiteout marker, which hides all parent content of its directory.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// The extension given to files that are still being written.
pub const PARTIAL_EXTENSION: &str = "partial";

/// The prefix of the temporary working directory used while hydrating.
pub const HYDRATE_TEMP_PREFIX: &str = "hydrate";

/// The prefix of the temporary directory a portable archive is unpacked into.
pub const EXTRACT_TEMP_PREFIX: &str = "hcslayers";
