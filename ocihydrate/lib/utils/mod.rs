//! Utility functions and types.

mod file;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use file::*;
pub use path::*;
