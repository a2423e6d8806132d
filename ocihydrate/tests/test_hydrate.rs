mod mock;

use std::fs;

use mock::{Layer, MockRegistry};
use ocihydrate::{
    hydrator,
    image,
    layer::{self, LayerManager, LayerState, LayerStore},
    manifest::Manifest,
    utils::{self, MANIFEST_FILENAME},
    HydrateError,
};
use tempfile::TempDir;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_hydrate_then_extract_round_trip() -> anyhow::Result<()> {
    let registry = MockRegistry::start().await?;
    let base = Layer::build(|b| {
        mock::append_dir(b, "etc/", 0o755)?;
        mock::append_file(b, "etc/hosts", b"127.0.0.1 localhost")?;
        mock::append_file(b, "etc/passwd", b"root:x:0:0")
    })?;
    let top = Layer::build(|b| {
        mock::append_file(b, "etc/.wh.passwd", b"")?;
        mock::append_file(b, "app/main", b"binary")
    })?;
    registry
        .state
        .add_image("cloudfoundry/windows2016fs", "2019", &[&base, &top]);

    let out = TempDir::new()?;
    let archive = hydrator::hydrate(
        registry.config(),
        "cloudfoundry/windows2016fs",
        "2019",
        out.path().join("images"),
    )
    .await?;

    assert_eq!(archive, out.path().join("images/windows2016fs-2019.tgz"));
    assert!(archive.exists());
    assert!(!utils::partial_path(&archive).exists());

    // The archive holds one blob per layer plus the manifest
    let unpacked = out.path().join("unpacked");
    ocihydrate::archive::unpack_tgz(&archive, &unpacked)?;
    let manifest = Manifest::read_from(unpacked.join(MANIFEST_FILENAME))?;
    assert_eq!(manifest.get_layers().len(), 2);
    assert_eq!(fs::read(unpacked.join(base.id()))?, base.data);
    assert_eq!(fs::read(unpacked.join(top.id()))?, top.data);

    let layers = out.path().join("layers");
    let top_path = image::extract_archive(&archive, &layers).await?;
    assert_eq!(top_path, layers.join(top.id()));

    let store = LayerStore::new(&layers);
    assert_eq!(store.state(base.id())?, LayerState::Valid);
    assert_eq!(store.state(top.id())?, LayerState::Valid);

    let rootfs = out.path().join("rootfs");
    layer::compose(&top_path, &rootfs).await?;
    assert_eq!(fs::read(rootfs.join("etc/hosts"))?, b"127.0.0.1 localhost");
    assert_eq!(fs::read(rootfs.join("app/main"))?, b"binary");
    assert!(!rootfs.join("etc/passwd").exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_hydrate_layer_failure_writes_no_archive() -> anyhow::Result<()> {
    let registry = MockRegistry::start().await?;
    let base = Layer::build(|b| mock::append_file(b, "a", b"a"))?;
    let top = Layer::build(|b| mock::append_file(b, "b", b"b"))?;
    registry.state.add_image("testorg/app", "latest", &[&base, &top]);
    registry.state.remove_blob(&top.digest);

    let out = TempDir::new()?;
    let result = hydrator::hydrate(registry.config(), "testorg/app", "latest", out.path()).await;

    assert!(matches!(result, Err(HydrateError::LayerDownload { .. })));
    assert!(!out.path().join("app-latest.tgz").exists());
    assert!(!utils::partial_path(&out.path().join("app-latest.tgz")).exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_hydrate_missing_manifest_downloads_nothing() -> anyhow::Result<()> {
    let registry = MockRegistry::start().await?;

    let out = TempDir::new()?;
    let result = hydrator::hydrate(registry.config(), "testorg/ghost", "latest", out.path()).await;

    assert!(matches!(result, Err(HydrateError::Manifest(_))));
    assert_eq!(registry.state.blob_requests(), 0);
    assert!(!out.path().join("ghost-latest.tgz").exists());

    Ok(())
}
