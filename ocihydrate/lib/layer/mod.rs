//! The layer store: extracted layers on disk, their lifecycle, and the writers that fill them.
//!
//! Every layer lives in its own directory named by its id. A layer is [`LayerState::Valid`] only
//! once its `.complete` marker holds the id, so an interrupted extraction is always detected and
//! redone. Layer contents are produced by applying the layer's tar stream ([`apply_diff`]) to a
//! [`LayerWriter`] handed out by a [`StorageBackend`].

mod compose;
mod diff;
mod directory;
mod info;
mod state;
mod store;
mod writer;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use compose::*;
pub use diff::*;
pub use directory::*;
pub use info::*;
pub use state::*;
pub use store::*;
pub use writer::*;
