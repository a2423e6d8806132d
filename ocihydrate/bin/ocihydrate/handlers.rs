use std::path::PathBuf;

use ocihydrate::{cli::AnsiStyles, config::RegistryConfig, hydrator, image, layer, HydrateResult};

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

pub async fn hydrate_subcommand(
    image: String,
    tag: String,
    output_dir: PathBuf,
    concurrency: Option<usize>,
    max_retries: Option<u32>,
) -> HydrateResult<()> {
    let env_config = RegistryConfig::from_env();
    let config = RegistryConfig::builder()
        .auth_url(env_config.get_auth_url().clone())
        .registry_url(env_config.get_registry_url().clone())
        .auth_service(env_config.get_auth_service().clone())
        .max_retries(max_retries.unwrap_or(env_config.get_max_retries()))
        .download_concurrency(
            concurrency
                .unwrap_or(env_config.get_download_concurrency())
                .max(1),
        )
        .build();

    let archive = hydrator::hydrate(config, &image, &tag, &output_dir).await?;
    eprintln!("{} {}", "hydrated".valid(), archive.display().to_string().literal());
    println!("{}", archive.display());

    Ok(())
}

pub async fn extract_subcommand(archive: PathBuf, output_dir: PathBuf) -> HydrateResult<()> {
    let top = image::extract_archive(&archive, &output_dir).await?;
    println!("{}", top.display());

    Ok(())
}

pub async fn compose_subcommand(layer_dir: PathBuf, dest: PathBuf) -> HydrateResult<()> {
    layer::compose(&layer_dir, &dest).await?;
    eprintln!("{} {}", "composed".valid(), dest.display().to_string().literal());

    Ok(())
}
