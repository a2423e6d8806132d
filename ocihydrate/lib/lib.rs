//! `ocihydrate` pulls container images from a registry into portable archives and extracts
//! those archives into an on-disk layer store.
//!
//! # Overview
//!
//! The crate covers two halves of moving an image to a machine without registry access:
//! - **Hydrate**: authenticate against a Docker Registry HTTP API v2, fetch the image manifest,
//!   download every layer blob and package everything as a single `.tgz`
//! - **Extract**: unpack a portable archive and materialize each layer, base first, into its
//!   own directory, recording the parent chain and a completion marker per layer
//!
//! Extraction is resumable. A layer directory whose `.complete` marker is missing or wrong is
//! deleted and extracted again, while complete layers are reused.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use ocihydrate::{config::RegistryConfig, hydrator, image};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Pull cloudfoundry/windows2016fs:latest into ./images/windows2016fs-latest.tgz
//!     let archive = hydrator::hydrate(
//!         RegistryConfig::from_env(),
//!         "cloudfoundry/windows2016fs",
//!         "latest",
//!         "images",
//!     )
//!     .await?;
//!
//!     // Materialize its layers under ./layers and get the top layer's directory
//!     let top = image::extract_archive(&archive, "layers").await?;
//!     println!("{}", top.display());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`archive`] - Portable archive packing and unpacking
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Registry endpoints and network policy
//! - [`hydrator`] - Image download and packaging
//! - [`image`] - Archive extraction into a layer store
//! - [`layer`] - Layer store, tar diff application and storage writers
//! - [`manifest`] - Image manifest model
//! - [`registry`] - Registry client
//! - [`utils`] - Common constants and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod archive;
pub mod cli;
pub mod config;
pub mod hydrator;
pub mod image;
pub mod layer;
pub mod manifest;
pub mod registry;
pub mod utils;

pub use error::*;
