use crate::error::Result;
use crate::tools::ToolRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MANIFEST_REPO_URL: &str = "https://github.com/stanford-oval/thingpedia-common-devices.git";
pub const MANIFEST_REPO_DIR: &str = "thingpedia-common-devices";
pub const MANIFEST_BRANCH: &str = "wip/geniescript";
pub const MANIFEST_SUBDIR: &str = "geniescript";
pub const MANIFEST_BUILD_TARGET: &str = "geniescript_install_2";

/// Maps a manifest (Thingpedia directory) name to a directory on disk,
/// cloning and building the shared device repository when needed.
#[derive(Clone)]
pub struct ManifestResolver {
    runner: Arc<dyn ToolRunner>,
    manifests_dir: PathBuf,
}

impl ManifestResolver {
    pub fn new(runner: Arc<dyn ToolRunner>, manifests_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            manifests_dir: manifests_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.manifests_dir.join(MANIFEST_REPO_DIR)
    }

    /// Directory returned for any name that is not an existing path.
    pub fn default_manifest_dir(&self) -> PathBuf {
        self.repo_dir().join(MANIFEST_SUBDIR)
    }

    pub async fn resolve(&self, name: &str, force_update: bool) -> Result<PathBuf> {
        if !name.is_empty() && Path::new(name).exists() {
            return Ok(PathBuf::from(name));
        }

        let dest = self.default_manifest_dir();
        if !dest.exists() {
            log::info!(
                "Manifest '{name}' not found locally; fetching {MANIFEST_REPO_URL} ({MANIFEST_BRANCH})"
            );
            self.fetch().await?;
            self.build().await?;
        } else if force_update {
            log::info!("Updating manifests in {}", self.repo_dir().display());
            self.update().await?;
            self.build().await?;
        } else {
            log::debug!("Using cached manifests at {}", dest.display());
        }

        Ok(dest)
    }

    async fn fetch(&self) -> Result<()> {
        let repo = self.repo_dir();
        if repo.join(".git").exists() {
            // A previous clone stopped before the build produced the subdirectory.
            return self.update().await;
        }
        std::fs::create_dir_all(&self.manifests_dir)?;
        self.runner
            .run("git", &["clone", MANIFEST_REPO_URL], &self.manifests_dir)
            .await?;
        self.runner
            .run("git", &["checkout", MANIFEST_BRANCH], &repo)
            .await
    }

    async fn update(&self) -> Result<()> {
        let repo = self.repo_dir();
        self.runner
            .run("git", &["checkout", MANIFEST_BRANCH], &repo)
            .await?;
        self.runner.run("git", &["pull"], &repo).await
    }

    async fn build(&self) -> Result<()> {
        self.runner
            .run("make", &[MANIFEST_BUILD_TARGET], &self.repo_dir())
            .await
    }
}
