use crate::error::{ResolverError, Result};
use crate::hub::ModelHub;
use crate::port_binding::PortBinding;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Marker file that makes a directory a usable NLU model.
pub const MODEL_MARKER_FILE: &str = "config.json";

/// A model reachable by a short name and fetched from the hub on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownModel {
    pub alias: &'static str,
    pub repo_id: &'static str,
    pub revision: &'static str,
    /// Directory name under the models cache.
    pub cache_name: &'static str,
}

pub const KNOWN_MODELS: &[KnownModel] = &[KnownModel {
    alias: "yelp",
    repo_id: "stanford-oval/yelp-tunein",
    revision: "main",
    cache_name: "yelp-tunein",
}];

/// Case-insensitive lookup; an identifier matches when it mentions the alias.
pub fn known_model(identifier: &str) -> Option<&'static KnownModel> {
    let lower = identifier.to_ascii_lowercase();
    KNOWN_MODELS.iter().find(|model| lower.contains(model.alias))
}

fn is_server_address(identifier: &str) -> bool {
    identifier.contains("http") || identifier.contains("localhost")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedResource {
    Path(PathBuf),
    Url(String),
}

impl ResolvedResource {
    /// Form accepted by `--nlu-server`: a URL or a plain path.
    pub fn as_locator(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }

    /// Form accepted by `--nlu-model`: always `file://`-prefixed.
    pub fn as_file_locator(&self) -> String {
        let locator = self.as_locator();
        if locator.starts_with("file://") {
            locator
        } else {
            format!("file://{locator}")
        }
    }

    pub fn require_url(&self) -> Result<&str> {
        match self {
            Self::Url(url) => Ok(url),
            Self::Path(path) => Err(ResolverError::FilePathNotAllowed(
                path.display().to_string(),
            )),
        }
    }

    pub fn require_path(&self) -> Result<&Path> {
        match self {
            Self::Path(path) => Ok(path),
            Self::Url(url) => Err(ResolverError::ServerAddressNotAllowed(url.clone())),
        }
    }
}

impl fmt::Display for ResolvedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_locator())
    }
}

/// Maps a model identifier to a path or server locator, downloading named
/// models into the local cache when needed.
#[derive(Clone)]
pub struct ModelResolver {
    hub: Arc<dyn ModelHub>,
    models_dir: PathBuf,
    port_binding: PortBinding,
}

impl ModelResolver {
    pub fn new(hub: Arc<dyn ModelHub>, models_dir: impl Into<PathBuf>, port_binding: PortBinding) -> Self {
        Self {
            hub,
            models_dir: models_dir.into(),
            port_binding,
        }
    }

    pub async fn resolve(&self, identifier: &str, force_refresh: bool) -> Result<ResolvedResource> {
        if identifier.contains("localhost") {
            return Ok(ResolvedResource::Url(self.port_binding.localhost_locator()));
        }

        if identifier.contains("http") {
            return Ok(ResolvedResource::Url(identifier.to_string()));
        }

        let candidate = Path::new(identifier);
        if candidate.join(MODEL_MARKER_FILE).exists() {
            return Ok(ResolvedResource::Path(candidate.to_path_buf()));
        }

        if let Some(model) = known_model(identifier) {
            return self
                .fetch_known(model, force_refresh)
                .await
                .map(ResolvedResource::Path);
        }

        Err(ResolverError::UnsupportedModel(identifier.to_string()))
    }

    /// Like [`resolve`](Self::resolve) for callers that need files on disk,
    /// such as the shared NLU server.
    pub async fn resolve_model_file(
        &self,
        identifier: &str,
        force_refresh: bool,
    ) -> Result<ResolvedResource> {
        if is_server_address(identifier) {
            return Err(ResolverError::ServerAddressNotAllowed(identifier.to_string()));
        }
        self.resolve(identifier, force_refresh).await
    }

    /// Server locator for callers that talk to an engine already running.
    /// Model names and directories are refused rather than downloaded.
    pub async fn resolve_server(&self, identifier: &str) -> Result<String> {
        let resolved = if is_server_address(identifier) {
            self.resolve(identifier, false).await?
        } else {
            ResolvedResource::Path(PathBuf::from(identifier))
        };
        resolved.require_url().map(str::to_string)
    }

    pub fn cache_dir_for(&self, model: &KnownModel) -> PathBuf {
        self.models_dir.join(model.cache_name)
    }

    async fn fetch_known(&self, model: &KnownModel, force_refresh: bool) -> Result<PathBuf> {
        let dest = self.cache_dir_for(model);
        if dest.join(MODEL_MARKER_FILE).exists() && !force_refresh {
            log::debug!("Using cached model {} at {}", model.alias, dest.display());
            return Ok(dest);
        }

        log::info!(
            "Fetching model {} ({}@{})",
            model.alias,
            model.repo_id,
            model.revision
        );
        let snapshot = self.hub.snapshot(model.repo_id, model.revision).await?;
        if force_refresh && dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        std::fs::create_dir_all(&dest)?;
        let copied = copy_dir_contents(&snapshot, &dest)?;
        log::info!("Copied {copied} files into {}", dest.display());
        Ok(dest)
    }
}

/// Copy every file under `src` into `dst`, following symlinks.
fn copy_dir_contents(src: &Path, dst: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if std::fs::metadata(&from)?.is_dir() {
            std::fs::create_dir_all(&to)?;
            copied += copy_dir_contents(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}
