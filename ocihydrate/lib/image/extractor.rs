use std::path::PathBuf;

use getset::Getters;

use crate::{
    layer::{LayerManager, LayerState},
    manifest::Manifest,
    HydrateError, HydrateResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Materializes every layer of an image through a [`LayerManager`], base layer first.
///
/// Layers that are already valid are kept, incomplete ones are deleted and extracted again, so
/// running the extractor twice over the same output directory does no extra work the second time.
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Extractor<'a, M> {
    /// The directory holding the layer blobs, named by layer id.
    blob_dir: PathBuf,

    /// The directory the layer manager stores layers in.
    output_dir: PathBuf,

    /// The image manifest.
    manifest: Manifest,

    /// The layer manager doing the work.
    manager: &'a M,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a, M: LayerManager> Extractor<'a, M> {
    /// Creates an extractor for the image described by `manifest`.
    pub fn new(
        blob_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        manifest: Manifest,
        manager: &'a M,
    ) -> Self {
        Self {
            blob_dir: blob_dir.into(),
            output_dir: output_dir.into(),
            manifest,
            manager,
        }
    }

    /// Extracts all layers and returns the directory of the top layer.
    pub fn extract(&self) -> HydrateResult<PathBuf> {
        self.manifest.validate()?;

        let layers = self.manifest.get_layers();
        let mut parent_paths: Vec<PathBuf> = Vec::with_capacity(layers.len());

        for (index, layer) in layers.iter().enumerate() {
            let id = layer.id();
            let layer_path = self.layer_path(id);

            match self.manager.state(id)? {
                LayerState::Valid => {
                    tracing::info!("layer {}/{} {id} already extracted", index + 1, layers.len());
                }
                LayerState::Incomplete => {
                    tracing::info!(
                        "layer {}/{} {id} is incomplete, extracting again",
                        index + 1,
                        layers.len()
                    );
                    self.manager.delete(id)?;
                    self.extract_layer(id, &parent_paths)?;
                }
                LayerState::NotExist => {
                    tracing::info!("extracting layer {}/{} {id}", index + 1, layers.len());
                    self.extract_layer(id, &parent_paths)?;
                }
            }

            parent_paths.insert(0, layer_path);
        }

        parent_paths
            .into_iter()
            .next()
            .ok_or_else(|| HydrateError::Manifest("manifest has no layers".to_string()))
    }

    /// Returns the directory layer `id` is stored in.
    pub fn layer_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(id)
    }

    /// Returns the blob of layer `id`.
    pub fn blob_path(&self, id: &str) -> PathBuf {
        self.blob_dir.join(id)
    }

    fn extract_layer(&self, id: &str, parent_paths: &[PathBuf]) -> HydrateResult<()> {
        self.manager.extract(&self.blob_path(id), id, parent_paths)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path, str::FromStr, sync::Mutex};

    use oci_spec::image::Digest;

    use crate::manifest::LayerDescriptor;

    use super::*;

    #[test_log::test]
    fn test_extractor_fresh_store_builds_chain() -> anyhow::Result<()> {
        let manager = helper::FakeManager::default();
        let manifest = helper::manifest(&['a', 'b', 'c']);

        let top = Extractor::new("/blobs", "/out", manifest, &manager).extract()?;

        let (a, b, c) = (helper::hex('a'), helper::hex('b'), helper::hex('c'));
        assert_eq!(top, PathBuf::from(format!("/out/{c}")));

        let extracted = manager.extracted.lock().unwrap();
        assert_eq!(
            *extracted,
            vec![
                (PathBuf::from(format!("/blobs/{a}")), a.clone(), vec![]),
                (
                    PathBuf::from(format!("/blobs/{b}")),
                    b.clone(),
                    vec![PathBuf::from(format!("/out/{a}"))]
                ),
                (
                    PathBuf::from(format!("/blobs/{c}")),
                    c.clone(),
                    vec![
                        PathBuf::from(format!("/out/{b}")),
                        PathBuf::from(format!("/out/{a}"))
                    ]
                ),
            ]
        );
        assert!(manager.deleted.lock().unwrap().is_empty());

        Ok(())
    }

    #[test_log::test]
    fn test_extractor_skips_valid_layers() -> anyhow::Result<()> {
        let manager = helper::FakeManager::with_states(&[('b', LayerState::Valid)]);
        let manifest = helper::manifest(&['a', 'b', 'c']);

        let top = Extractor::new("/blobs", "/out", manifest, &manager).extract()?;
        assert_eq!(top, PathBuf::from(format!("/out/{}", helper::hex('c'))));

        let extracted = manager.extracted.lock().unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(extracted[0].1, helper::hex('a'));
        assert_eq!(extracted[1].1, helper::hex('c'));
        // A skipped layer still joins the chain
        assert_eq!(
            extracted[1].2,
            vec![
                PathBuf::from(format!("/out/{}", helper::hex('b'))),
                PathBuf::from(format!("/out/{}", helper::hex('a')))
            ]
        );
        assert!(manager.deleted.lock().unwrap().is_empty());

        Ok(())
    }

    #[test_log::test]
    fn test_extractor_redoes_incomplete_layers() -> anyhow::Result<()> {
        let manager = helper::FakeManager::with_states(&[('b', LayerState::Incomplete)]);
        let manifest = helper::manifest(&['a', 'b', 'c']);

        Extractor::new("/blobs", "/out", manifest, &manager).extract()?;

        assert_eq!(*manager.deleted.lock().unwrap(), vec![helper::hex('b')]);
        assert_eq!(manager.extracted.lock().unwrap().len(), 3);

        Ok(())
    }

    #[test_log::test]
    fn test_extractor_stops_at_first_failure() -> anyhow::Result<()> {
        let manager = helper::FakeManager::default().failing_on('b');
        let manifest = helper::manifest(&['a', 'b', 'c']);

        let result = Extractor::new("/blobs", "/out", manifest, &manager).extract();
        assert!(matches!(result, Err(HydrateError::StreamDecode { .. })));

        let extracted = manager.extracted.lock().unwrap();
        assert_eq!(extracted.len(), 2);
        assert!(extracted.iter().all(|(_, id, _)| id != &helper::hex('c')));

        Ok(())
    }

    #[test_log::test]
    fn test_extractor_rejects_empty_manifest() {
        let manager = helper::FakeManager::default();
        let result = Extractor::new("/blobs", "/out", Manifest::new(vec![]), &manager).extract();

        assert!(matches!(result, Err(HydrateError::Manifest(_))));
        assert!(manager.extracted.lock().unwrap().is_empty());
    }

    mod helper {
        use super::*;

        pub fn hex(c: char) -> String {
            c.to_string().repeat(64)
        }

        pub fn manifest(ids: &[char]) -> Manifest {
            let layers = ids
                .iter()
                .map(|c| {
                    let digest = Digest::from_str(&format!("sha256:{}", hex(*c)))
                        .expect("valid digest");
                    LayerDescriptor::new(digest, 0)
                })
                .collect();
            Manifest::new(layers)
        }

        #[derive(Default)]
        pub struct FakeManager {
            states: HashMap<String, LayerState>,
            fail_on: Option<String>,
            pub extracted: Mutex<Vec<(PathBuf, String, Vec<PathBuf>)>>,
            pub deleted: Mutex<Vec<String>>,
        }

        impl FakeManager {
            pub fn with_states(states: &[(char, LayerState)]) -> Self {
                Self {
                    states: states.iter().map(|(c, s)| (hex(*c), *s)).collect(),
                    ..Default::default()
                }
            }

            pub fn failing_on(mut self, c: char) -> Self {
                self.fail_on = Some(hex(c));
                self
            }
        }

        impl LayerManager for FakeManager {
            fn state(&self, id: &str) -> HydrateResult<LayerState> {
                Ok(self
                    .states
                    .get(id)
                    .copied()
                    .unwrap_or(LayerState::NotExist))
            }

            fn delete(&self, id: &str) -> HydrateResult<()> {
                self.deleted.lock().unwrap().push(id.to_string());
                Ok(())
            }

            fn extract(
                &self,
                blob: &Path,
                id: &str,
                parent_paths: &[PathBuf],
            ) -> HydrateResult<()> {
                self.extracted.lock().unwrap().push((
                    blob.to_path_buf(),
                    id.to_string(),
                    parent_paths.to_vec(),
                ));

                if self.fail_on.as_deref() == Some(id) {
                    return Err(HydrateError::StreamDecode {
                        layer: id.to_string(),
                        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad tar"),
                    });
                }

                Ok(())
            }
        }
    }
}
