use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::HydrateResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The on-disk state of a layer in the store.
///
/// A layer only becomes [`Valid`](LayerState::Valid) once its completion marker has been written
/// with the layer id, which is the last step of an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerState {
    /// There is no directory for the layer.
    NotExist,

    /// The directory exists but the layer was not fully extracted.
    Incomplete,

    /// The layer was fully extracted.
    Valid,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Manages layers materialized on disk, keyed by layer id.
///
/// These operations are blocking. Async callers run them on `spawn_blocking`.
pub trait LayerManager {
    /// Reports the state of the layer with `id`.
    fn state(&self, id: &str) -> HydrateResult<LayerState>;

    /// Removes everything stored for the layer with `id`. Removing a missing layer is not an error.
    fn delete(&self, id: &str) -> HydrateResult<()>;

    /// Materializes the layer blob at `blob` as layer `id` on top of `parent_paths`, which lists
    /// the paths of already extracted ancestor layers, nearest first.
    fn extract(&self, blob: &Path, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerState::NotExist => write!(f, "not-exist"),
            LayerState::Incomplete => write!(f, "incomplete"),
            LayerState::Valid => write!(f, "valid"),
        }
    }
}
