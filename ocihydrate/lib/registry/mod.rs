//! Registry client: bearer-token authentication, manifest fetch and blob download against a
//! Docker Registry HTTP API v2.
//!
//! Only the pieces of the distribution protocol needed to hydrate an image are implemented:
//! a token request, a manifest GET and one blob GET per layer.

mod docker;
mod name;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use name::*;
pub use traits::*;
