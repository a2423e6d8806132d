mod handlers;

use clap::Parser;
use ocihydrate::{
    cli::{AnsiStyles, HydrateArgs, HydrateSubcommand},
    HydrateResult,
};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = HydrateArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args.subcommand).await {
        eprintln!("{} {e}", "error:".error());
        tracing::debug!("{e:?}");
        std::process::exit(1);
    }
}

async fn run(subcommand: HydrateSubcommand) -> HydrateResult<()> {
    match subcommand {
        HydrateSubcommand::Hydrate {
            image,
            tag,
            output_dir,
            concurrency,
            max_retries,
        } => {
            handlers::hydrate_subcommand(image, tag, output_dir, concurrency, max_retries).await?;
        }
        HydrateSubcommand::Extract {
            archive,
            output_dir,
        } => {
            handlers::extract_subcommand(archive, output_dir).await?;
        }
        HydrateSubcommand::Compose { layer_dir, dest } => {
            handlers::compose_subcommand(layer_dir, dest).await?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Logs go to stderr so stdout only carries command output.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
