//! Configuration for talking to a registry and for hydration runs.
//!
//! Every setting has a compiled-in default (the `DEFAULT_*` constants) that can be overridden through
//! environment variables prefixed with `OCIHYDRATE_`, and finally through command line flags.

mod defaults;
mod registry;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use registry::*;
