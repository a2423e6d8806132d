//! An in-process registry speaking just enough of the Docker Registry HTTP API v2 for the
//! hydrate path, plus helpers to build layer blobs.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use ocihydrate::config::RegistryConfig;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub const TOKEN: &str = "mock-token";

pub const AUTH_SERVICE: &str = "registry.test";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A running mock registry.
pub struct MockRegistry {
    pub addr: SocketAddr,
    pub state: MockState,
}

#[derive(Clone, Default)]
pub struct MockState {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    manifests: HashMap<String, Value>,
    blobs: HashMap<String, Vec<u8>>,
    reject_token: bool,
    requests: Vec<String>,
}

/// A gzip compressed layer and its digest.
pub struct Layer {
    pub digest: String,
    pub data: Vec<u8>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockRegistry {
    pub async fn start() -> anyhow::Result<Self> {
        let state = MockState::default();
        let app = Router::new()
            .route("/token", get(token_handler))
            .route("/v2/{org}/{name}/manifests/{reference}", get(manifest_handler))
            .route("/v2/{org}/{name}/blobs/{digest}", get(blob_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state })
    }

    pub fn config(&self) -> RegistryConfig {
        RegistryConfig::builder()
            .auth_url(format!("http://{}", self.addr))
            .registry_url(format!("http://{}", self.addr))
            .auth_service(AUTH_SERVICE)
            .build()
    }
}

impl MockState {
    /// Publishes an image whose manifest lists `layers` in order.
    pub fn add_image(&self, repository: &str, tag: &str, layers: &[&Layer]) {
        let mut inner = self.inner.lock().unwrap();
        let descriptors: Vec<Value> = layers
            .iter()
            .map(|layer| {
                json!({
                    "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                    "size": layer.data.len(),
                    "digest": layer.digest,
                })
            })
            .collect();

        inner.manifests.insert(
            format!("{repository}:{tag}"),
            json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                "config": {
                    "mediaType": "application/vnd.docker.container.image.v1+json",
                    "size": 2,
                    "digest": format!("sha256:{}", "0".repeat(64)),
                },
                "layers": descriptors,
            }),
        );

        for layer in layers {
            inner.blobs.insert(layer.digest.clone(), layer.data.clone());
        }
    }

    /// Serves `data` for `digest`, whatever its real hash is.
    pub fn set_blob(&self, digest: &str, data: Vec<u8>) {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .insert(digest.to_string(), data);
    }

    pub fn remove_blob(&self, digest: &str) {
        self.inner.lock().unwrap().blobs.remove(digest);
    }

    pub fn reject_token(&self) {
        self.inner.lock().unwrap().reject_token = true;
    }

    pub fn requests(&self) -> Vec<String> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn blob_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with("blob "))
            .count()
    }

    fn record(&self, request: String) {
        self.inner.lock().unwrap().requests.push(request);
    }
}

impl Layer {
    /// Builds a gzip compressed tar layer.
    pub fn build(
        f: impl FnOnce(&mut tar::Builder<Vec<u8>>) -> io::Result<()>,
    ) -> anyhow::Result<Self> {
        let mut builder = tar::Builder::new(Vec::new());
        f(&mut builder)?;
        let tar = builder.into_inner()?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        io::Write::write_all(&mut encoder, &tar)?;
        let data = encoder.finish()?;

        Ok(Self {
            digest: format!("sha256:{}", hex::encode(Sha256::digest(&data))),
            data,
        })
    }

    /// The layer id: the hex part of the digest.
    pub fn id(&self) -> &str {
        self.digest.trim_start_matches("sha256:")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Tar Helpers
//--------------------------------------------------------------------------------------------------

pub fn append_dir(b: &mut tar::Builder<Vec<u8>>, path: &str, mode: u32) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(mode);
    header.set_size(0);
    b.append_data(&mut header, path, io::empty())
}

pub fn append_file(b: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8]) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_mtime(1_600_000_000);
    header.set_size(data.len() as u64);
    b.append_data(&mut header, path, data)
}

pub fn append_hardlink(b: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Link);
    header.set_size(0);
    b.append_link(&mut header, path, target)
}

pub fn append_symlink(b: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) -> io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_mode(0o777);
    header.set_size(0);
    b.append_link(&mut header, path, target)
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

async fn token_handler(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let scope = params.get("scope").cloned().unwrap_or_default();
    state.record(format!("token {scope}"));

    let rejected = state.inner.lock().unwrap().reject_token;
    if rejected || params.get("service").map(String::as_str) != Some(AUTH_SERVICE) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"details": "denied"}))).into_response();
    }

    Json(json!({
        "token": TOKEN,
        "access_token": TOKEN,
        "expires_in": 300,
        "issued_at": "2024-01-01T00:00:00Z",
    }))
    .into_response()
}

async fn manifest_handler(
    State(state): State<MockState>,
    Path((org, name, reference)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    state.record(format!("manifest {org}/{name}:{reference}"));
    if !authorized(&headers) {
        return unauthorized();
    }

    let manifest = state
        .inner
        .lock()
        .unwrap()
        .manifests
        .get(&format!("{org}/{name}:{reference}"))
        .cloned();

    match manifest {
        Some(manifest) => Json(manifest).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"errors": [{"code": "MANIFEST_UNKNOWN", "message": "manifest unknown"}]})),
        )
            .into_response(),
    }
}

async fn blob_handler(
    State(state): State<MockState>,
    Path((org, name, digest)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    state.record(format!("blob {org}/{name} {digest}"));
    if !authorized(&headers) {
        return unauthorized();
    }

    let blob = state.inner.lock().unwrap().blobs.get(&digest).cloned();
    match blob {
        Some(data) => data.into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"errors": [{"code": "BLOB_UNKNOWN", "message": "blob unknown"}]})),
        )
            .into_response(),
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"errors": [{"code": "UNAUTHORIZED", "message": "authentication required"}]})),
    )
        .into_response()
}
