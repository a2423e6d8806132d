use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_IMAGE_TAG;

use super::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// ocihydrate - Pull images into portable archives and extract them into layer stores
#[derive(Debug, Parser)]
#[command(name = "ocihydrate", author, about, version, styles=styles::styles())]
pub struct HydrateArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: HydrateSubcommand,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum HydrateSubcommand {
    /// Download an image from the registry into a portable archive
    #[command(name = "hydrate")]
    Hydrate {
        /// Image to download, in the form org/name
        #[arg(short, long)]
        image: String,

        /// Tag of the image
        #[arg(short, long, default_value = DEFAULT_IMAGE_TAG)]
        tag: String,

        /// Directory the archive is written to
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,

        /// Number of layers downloaded at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Number of times a transient registry failure is retried
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Extract a portable archive into a layer store and print the top layer path
    #[command(name = "extract")]
    Extract {
        /// The portable archive to extract
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// The layer store directory
        #[arg(value_name = "OUTPUT_DIR")]
        output_dir: PathBuf,
    },

    /// Build the composed filesystem of an extracted layer
    #[command(name = "compose")]
    Compose {
        /// The extracted layer, usually the top layer printed by extract
        #[arg(value_name = "LAYER_DIR")]
        layer_dir: PathBuf,

        /// Where the composed filesystem is written
        #[arg(value_name = "DEST")]
        dest: PathBuf,
    },
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_args_are_consistent() {
        HydrateArgs::command().debug_assert();
    }

    #[test]
    fn test_cli_args_hydrate_defaults() -> anyhow::Result<()> {
        let args = HydrateArgs::try_parse_from([
            "ocihydrate",
            "hydrate",
            "--image",
            "cloudfoundry/windows2016fs",
        ])?;

        match args.subcommand {
            HydrateSubcommand::Hydrate {
                image,
                tag,
                output_dir,
                concurrency,
                max_retries,
            } => {
                assert_eq!(image, "cloudfoundry/windows2016fs");
                assert_eq!(tag, "latest");
                assert_eq!(output_dir, PathBuf::from("."));
                assert_eq!(concurrency, None);
                assert_eq!(max_retries, None);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_cli_args_extract_requires_both_paths() {
        assert!(HydrateArgs::try_parse_from(["ocihydrate", "extract", "image.tgz"]).is_err());
        assert!(HydrateArgs::try_parse_from(["ocihydrate", "extract", "image.tgz", "out"]).is_ok());
    }
}
