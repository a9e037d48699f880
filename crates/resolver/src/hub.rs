use crate::error::{ResolverError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const HUB_ENDPOINT_ENV: &str = "GENIE_HUB_ENDPOINT";
pub const HUB_TOKEN_ENV: &str = "HF_TOKEN";

/// File-snapshot download by repository id.
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Materialize every file of `repo_id` at `revision` locally and return the
    /// snapshot directory.
    async fn snapshot(&self, repo_id: &str, revision: &str) -> Result<PathBuf>;
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    /// Commit the requested revision points at.
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    siblings: Vec<RepoSibling>,
}

#[derive(Debug, Deserialize)]
struct RepoSibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    lfs: Option<LfsInfo>,
}

#[derive(Debug, Deserialize)]
struct LfsInfo {
    sha256: String,
    #[serde(default)]
    size: Option<u64>,
}

impl RepoSibling {
    fn expected_size(&self) -> Option<u64> {
        self.lfs.as_ref().and_then(|lfs| lfs.size).or(self.size)
    }

    fn expected_sha256(&self) -> String {
        self.lfs
            .as_ref()
            .map(|lfs| lfs.sha256.trim().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Hugging Face compatible hub with a snapshot cache laid out as
/// `models--{owner}--{name}/snapshots/{commit}`. When the listing carries no
/// commit, the revision name keys the directory instead.
#[derive(Debug, Clone)]
pub struct HuggingFaceHub {
    client: Client,
    endpoint: String,
    token: Option<String>,
    cache_dir: PathBuf,
}

impl HuggingFaceHub {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder().build()?;
        let endpoint = std::env::var(HUB_ENDPOINT_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HUB_ENDPOINT.to_string());
        let token = std::env::var(HUB_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty());
        Ok(Self {
            client,
            endpoint,
            token,
            cache_dir: cache_dir.into(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn base(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    fn info_url(&self, repo_id: &str, revision: &str) -> String {
        format!(
            "{}/api/models/{repo_id}/revision/{revision}?blobs=true",
            self.base()
        )
    }

    fn file_url(&self, repo_id: &str, revision: &str, filename: &str) -> String {
        format!("{}/{repo_id}/resolve/{revision}/{filename}", self.base())
    }

    pub fn snapshot_dir(&self, repo_id: &str, revision: &str) -> PathBuf {
        self.cache_dir
            .join(format!("models--{}", repo_id.replace('/', "--")))
            .join("snapshots")
            .join(revision)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ModelHub for HuggingFaceHub {
    async fn snapshot(&self, repo_id: &str, revision: &str) -> Result<PathBuf> {
        let info_url = self.info_url(repo_id, revision);
        let info: RepoInfo = self
            .get(&info_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if info.siblings.is_empty() {
            return Err(ResolverError::Hub(format!(
                "repository {repo_id}@{revision} lists no files"
            )));
        }

        let commit = info
            .sha
            .as_deref()
            .map(str::trim)
            .filter(|sha| !sha.is_empty() && validate_relative_repo_path(Path::new(sha)).is_ok());
        let pinned = commit.unwrap_or(revision);
        let snapshot_dir = self.snapshot_dir(repo_id, pinned);
        std::fs::create_dir_all(&snapshot_dir)?;

        let mut fetched = 0usize;
        for sibling in &info.siblings {
            let local_path = safe_join_repo_path(&snapshot_dir, &sibling.rfilename)?;
            if is_cached(&local_path, sibling, commit.is_some())? {
                log::debug!("Hub cache hit: {}", local_path.display());
                continue;
            }

            if let Some(parent) = local_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let url = self.file_url(repo_id, pinned, &sibling.rfilename);
            let tmp_path = temp_path_for(&local_path);
            download_with_sha256(self, &url, &tmp_path, &sibling.expected_sha256()).await?;
            if let Err(err) = std::fs::rename(&tmp_path, &local_path) {
                std::fs::remove_file(&tmp_path).ok();
                return Err(err.into());
            }
            fetched += 1;
        }

        log::info!(
            "Snapshot of {repo_id}@{pinned}: {fetched} downloaded, {} cached ({})",
            info.siblings.len() - fetched,
            snapshot_dir.display()
        );
        Ok(snapshot_dir)
    }
}

/// A local copy is reused only if it provably matches the listing. Plain
/// files carry no hash, so they are trusted only inside a commit-keyed
/// directory, where content cannot change under the same name.
fn is_cached(path: &Path, sibling: &RepoSibling, commit_keyed: bool) -> Result<bool> {
    let Ok(meta) = std::fs::metadata(path) else {
        return Ok(false);
    };
    let Some(size) = sibling.expected_size() else {
        return Ok(false);
    };
    if meta.len() != size {
        return Ok(false);
    }
    let expected = sibling.expected_sha256();
    if !expected.is_empty() {
        return Ok(file_sha256(path)? == expected);
    }
    Ok(commit_keyed)
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(to_lower_hex(&hasher.finalize()))
}

fn validate_relative_repo_path(path: &Path) -> std::result::Result<(), &'static str> {
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err("path must be relative");
            }
            Component::ParentDir => {
                return Err("path must not contain '..'");
            }
            Component::CurDir => {}
            Component::Normal(_) => {
                has_component = true;
            }
        }
    }

    if !has_component {
        return Err("path is empty");
    }

    Ok(())
}

pub(crate) fn safe_join_repo_path(base: &Path, file: &str) -> Result<PathBuf> {
    let rel = Path::new(file);
    validate_relative_repo_path(rel)
        .map_err(|err| ResolverError::Hub(format!("invalid repository file '{file}': {err}")))?;
    Ok(base.join(rel))
}

/// Stream `url` into `dest`. On any failure `dest` is removed.
async fn download_with_sha256(
    hub: &HuggingFaceHub,
    url: &str,
    dest: &Path,
    expected: &str,
) -> Result<()> {
    let result = stream_to_file(hub, url, dest, expected).await;
    if result.is_err() {
        std::fs::remove_file(dest).ok();
    }
    result
}

async fn stream_to_file(
    hub: &HuggingFaceHub,
    url: &str,
    dest: &Path,
    expected: &str,
) -> Result<()> {
    let mut response = hub.get(url).send().await?.error_for_status()?;

    let mut file = std::fs::File::create(dest)?;
    let mut hasher = Sha256::new();

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk)?;
        hasher.update(&chunk);
    }
    file.flush()?;

    if !expected.is_empty() {
        let actual = to_lower_hex(&hasher.finalize());
        if actual != expected {
            return Err(ResolverError::Hub(format!(
                "SHA256 mismatch for {}: expected {expected} actual {actual}",
                dest.display()
            )));
        }
    }

    Ok(())
}

fn to_lower_hex(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(LUT[(byte >> 4) as usize] as char);
        out.push(LUT[(byte & 0x0f) as usize] as char);
    }
    out
}

fn temp_path_for(path: &Path) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    PathBuf::from(format!("{}.{}.download", path.display(), ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as UrlPath;
    use axum::routing::get;
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    const WEIGHTS: &[u8] = b"pretend these are weights";

    #[test]
    fn safe_join_repo_path_rejects_traversal_and_absolute_paths() {
        let base = Path::new("snapshots");

        assert!(safe_join_repo_path(base, "../escape").is_err());
        assert!(safe_join_repo_path(base, "nested/../../escape").is_err());
        assert!(safe_join_repo_path(base, "").is_err());

        #[cfg(unix)]
        assert!(safe_join_repo_path(base, "/etc/passwd").is_err());
    }

    #[test]
    fn snapshot_dir_flattens_repo_id() {
        let hub = HuggingFaceHub::new("/cache/hub").unwrap();
        assert_eq!(
            hub.snapshot_dir("stanford-oval/yelp-tunein", "main"),
            PathBuf::from("/cache/hub/models--stanford-oval--yelp-tunein/snapshots/main")
        );
    }

    async fn serve_fake_hub(downloads: Arc<AtomicUsize>, weights_sha: String) -> String {
        let app = Router::new()
            .route(
                "/api/models/:owner/:name/revision/:rev",
                get(move || {
                    let weights_sha = weights_sha.clone();
                    async move {
                        Json(json!({
                            "sha": "0123abcd",
                            "siblings": [
                                { "rfilename": "config.json", "size": 2 },
                                {
                                    "rfilename": "pytorch_model.bin",
                                    "size": 134,
                                    "lfs": { "sha256": weights_sha, "size": WEIGHTS.len() }
                                }
                            ]
                        }))
                    }
                }),
            )
            .route(
                "/:owner/:name/resolve/:rev/*file",
                get(
                    move |UrlPath((_owner, _name, _rev, file)): UrlPath<(
                        String,
                        String,
                        String,
                        String,
                    )>| {
                        let downloads = Arc::clone(&downloads);
                        async move {
                            downloads.fetch_add(1, Ordering::SeqCst);
                            if file == "config.json" {
                                b"{}".to_vec()
                            } else {
                                WEIGHTS.to_vec()
                            }
                        }
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn snapshot_downloads_once_then_reuses_cache() {
        let downloads = Arc::new(AtomicUsize::new(0));
        let sha = to_lower_hex(&Sha256::digest(WEIGHTS));
        let endpoint = serve_fake_hub(Arc::clone(&downloads), sha).await;

        let cache = tempdir().unwrap();
        let hub = HuggingFaceHub::new(cache.path())
            .unwrap()
            .with_endpoint(endpoint);

        let dir = hub.snapshot("org/model", "main").await.unwrap();
        assert_eq!(dir, hub.snapshot_dir("org/model", "0123abcd"));
        assert_eq!(std::fs::read(dir.join("config.json")).unwrap(), b"{}");
        assert_eq!(std::fs::read(dir.join("pytorch_model.bin")).unwrap(), WEIGHTS);
        assert_eq!(downloads.load(Ordering::SeqCst), 2);

        let again = hub.snapshot("org/model", "main").await.unwrap();
        assert_eq!(again, dir);
        assert_eq!(downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn snapshot_rejects_checksum_mismatch() {
        let downloads = Arc::new(AtomicUsize::new(0));
        let endpoint = serve_fake_hub(downloads, "00".repeat(32)).await;

        let cache = tempdir().unwrap();
        let hub = HuggingFaceHub::new(cache.path())
            .unwrap()
            .with_endpoint(endpoint);

        let err = hub.snapshot("org/model", "main").await.unwrap_err();
        assert!(err.to_string().contains("SHA256 mismatch"), "{err}");
        let dir = hub.snapshot_dir("org/model", "0123abcd");
        assert!(!dir.join("pytorch_model.bin").exists());
        let leftovers: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".download"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    /// Hub whose `main` has no commit id and whose files change content
    /// between listings without changing size.
    async fn serve_moving_hub(generation: Arc<AtomicUsize>) -> String {
        let weights = move |generation: usize| format!("weights-v{generation}").into_bytes();
        let listing_generation = Arc::clone(&generation);
        let app = Router::new()
            .route(
                "/api/models/:owner/:name/revision/:rev",
                get(move || {
                    let generation = listing_generation.load(Ordering::SeqCst);
                    let body = weights(generation);
                    async move {
                        Json(json!({
                            "siblings": [
                                { "rfilename": "config.json", "size": 7 },
                                {
                                    "rfilename": "best.pth",
                                    "size": body.len(),
                                    "lfs": {
                                        "sha256": to_lower_hex(&Sha256::digest(&body)),
                                        "size": body.len()
                                    }
                                }
                            ]
                        }))
                    }
                }),
            )
            .route(
                "/:owner/:name/resolve/:rev/*file",
                get(
                    move |UrlPath((_owner, _name, _rev, file)): UrlPath<(
                        String,
                        String,
                        String,
                        String,
                    )>| {
                        let generation = generation.load(Ordering::SeqCst);
                        async move {
                            if file == "config.json" {
                                format!("{{\"a\":{generation}}}").into_bytes()
                            } else {
                                weights(generation)
                            }
                        }
                    },
                ),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn same_size_upstream_changes_are_refetched() {
        let generation = Arc::new(AtomicUsize::new(1));
        let endpoint = serve_moving_hub(Arc::clone(&generation)).await;

        let cache = tempdir().unwrap();
        let hub = HuggingFaceHub::new(cache.path())
            .unwrap()
            .with_endpoint(endpoint);

        let dir = hub.snapshot("org/m", "main").await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("config.json")).unwrap(), r#"{"a":1}"#);
        assert_eq!(std::fs::read(dir.join("best.pth")).unwrap(), b"weights-v1");

        generation.store(2, Ordering::SeqCst);
        let dir = hub.snapshot("org/m", "main").await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("config.json")).unwrap(), r#"{"a":2}"#);
        assert_eq!(std::fs::read(dir.join("best.pth")).unwrap(), b"weights-v2");
    }

    #[tokio::test]
    async fn interrupted_download_leaves_no_temp_file() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.ok();
        });

        let cache = tempdir().unwrap();
        let hub = HuggingFaceHub::new(cache.path()).unwrap();
        let dest = temp_path_for(&cache.path().join("best.pth"));
        let result =
            download_with_sha256(&hub, &format!("http://{addr}/best.pth"), &dest, "").await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
