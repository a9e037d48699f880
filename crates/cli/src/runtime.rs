use anyhow::{Context, Result};
use genie_launcher::{
    launch, EngineCommand, EngineProcess, LaunchOptions, ToolkitInstaller, ToolkitPin,
};
use genie_resolver::{
    GeniePaths, HuggingFaceHub, ManifestResolver, ModelResolver, PortBinding, ResolvedResource,
    SystemToolRunner, ToolRunner,
};
use genie_session::Session;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LOG_FILE_NAME: &str = "log.log";
pub const READY_TIMEOUT_ENV: &str = "GENIE_READY_TIMEOUT_MS";
pub const HTTP_TIMEOUT_ENV: &str = "GENIE_HTTP_TIMEOUT_MS";

/// Settings shared by every subcommand, after flags and environment are merged.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub paths: GeniePaths,
    pub ready_timeout: Option<Duration>,
    pub http_timeout: Option<Duration>,
}

impl RuntimeConfig {
    pub fn resolve(
        home: Option<PathBuf>,
        ready_timeout_ms: Option<u64>,
        http_timeout_ms: Option<u64>,
    ) -> Result<Self> {
        Ok(Self {
            paths: GeniePaths::from_env(home),
            ready_timeout: duration_from(ready_timeout_ms, READY_TIMEOUT_ENV)?,
            http_timeout: duration_from(http_timeout_ms, HTTP_TIMEOUT_ENV)?,
        })
    }
}

fn duration_from(flag: Option<u64>, var: &str) -> Result<Option<Duration>> {
    let millis = match flag {
        Some(ms) => Some(ms),
        None => match std::env::var(var) {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{var} must be a number of milliseconds, got {raw:?}"))?,
            ),
            _ => None,
        },
    };
    Ok(millis.filter(|ms| *ms > 0).map(Duration::from_millis))
}

/// Where the engine for a session gets its models and manifests.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub server: String,
    pub manifest: String,
    pub log_file_name: String,
    pub force_update_model: bool,
    pub force_update_manifest: bool,
}

/// Resolvers, installer and launch settings wired to one set of paths.
pub struct Runtime {
    config: RuntimeConfig,
    models: ModelResolver,
    manifests: ManifestResolver,
    installer: ToolkitInstaller,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let runner: Arc<dyn ToolRunner> = Arc::new(SystemToolRunner);
        let hub = HuggingFaceHub::new(&config.paths.hub_cache_dir)
            .context("Failed to set up the model hub client")?;
        let models = ModelResolver::new(
            Arc::new(hub),
            &config.paths.models_dir,
            PortBinding::new(&config.paths.port_file),
        );
        let manifests = ManifestResolver::new(Arc::clone(&runner), &config.paths.manifests_dir);
        let pin = ToolkitPin::packaged().context("Packaged toolkit pin is invalid")?;
        let installer = ToolkitInstaller::new(&config.paths, runner, pin);
        Ok(Self {
            config,
            models,
            manifests,
            installer,
        })
    }

    pub fn paths(&self) -> &GeniePaths {
        &self.config.paths
    }

    pub fn installer(&self) -> &ToolkitInstaller {
        &self.installer
    }

    pub fn port_binding(&self) -> PortBinding {
        PortBinding::new(&self.config.paths.port_file)
    }

    pub async fn resolve_model(&self, id: &str, force: bool) -> Result<ResolvedResource> {
        let resolved = self
            .models
            .resolve(id, force)
            .await
            .with_context(|| format!("Failed to resolve model '{id}'"))?;
        Ok(match resolved {
            ResolvedResource::Path(path) => ResolvedResource::Path(absolute(&path)?),
            url => url,
        })
    }

    pub async fn resolve_manifest(&self, name: &str, force: bool) -> Result<PathBuf> {
        let dir = self
            .manifests
            .resolve(name, force)
            .await
            .with_context(|| format!("Failed to resolve manifest '{name}'"))?;
        absolute(&dir)
    }

    pub async fn ensure_toolkit(&self, force: bool) -> Result<bool> {
        self.installer
            .ensure_installed(force)
            .await
            .context("Failed to install the Genie toolkit")
    }

    /// Start the shared NLU server and register its port.
    pub async fn start_server(
        &self,
        model: &str,
        manifest: &str,
        force_update_model: bool,
        force_update_manifest: bool,
    ) -> Result<EngineProcess> {
        let model = self
            .models
            .resolve_model_file(model, force_update_model)
            .await
            .with_context(|| format!("Cannot serve model '{model}'"))?;
        let model_dir = absolute(model.require_path()?)?;
        let manifest = self.resolve_manifest(manifest, force_update_manifest).await?;
        self.ensure_toolkit(false).await?;

        let command = EngineCommand::server(
            &ResolvedResource::Path(model_dir).as_file_locator(),
            &manifest,
        )
        .in_dir(self.paths().tool_dir());
        let options = LaunchOptions {
            ready_timeout: self.config.ready_timeout,
            port_binding: Some(self.port_binding()),
            output_level: log::Level::Info,
        };
        Ok(launch(&command, &options).await?)
    }

    /// Connect to a dialogue engine that is already running elsewhere.
    pub async fn attach_session(&self, target: &str) -> Result<Session> {
        let url = self
            .models
            .resolve_server(target)
            .await
            .with_context(|| format!("Cannot attach to '{target}'"))?;
        log::info!("Attaching to engine at {url}");
        self.session_for(&url)
    }

    fn session_for(&self, base_url: &str) -> Result<Session> {
        Ok(match self.config.http_timeout {
            Some(timeout) => Session::with_timeout(base_url, timeout)?,
            None => Session::new(base_url)?,
        })
    }

    /// Start a dialogue engine and connect a session to it.
    pub async fn start_session(&self, spec: &SessionSpec) -> Result<(EngineProcess, Session)> {
        let server = self
            .resolve_model(&spec.server, spec.force_update_model)
            .await?;
        let manifest = self
            .resolve_manifest(&spec.manifest, spec.force_update_manifest)
            .await?;
        self.ensure_toolkit(false).await?;

        let command =
            EngineCommand::contextual_genie(&server.as_locator(), &manifest, &spec.log_file_name)
                .in_dir(self.paths().tool_dir());
        let options = LaunchOptions {
            ready_timeout: self.config.ready_timeout,
            ..LaunchOptions::default()
        };
        let engine = launch(&command, &options).await?;

        let session = self.session_for(&engine.base_url())?;
        Ok((engine, session))
    }
}

/// The engine runs from the toolkit directory, so relative paths must be
/// fixed before they are handed to it.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Path does not exist: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_means_unbounded() {
        assert_eq!(duration_from(Some(0), "GENIE_TEST_UNUSED").unwrap(), None);
        assert_eq!(
            duration_from(Some(1500), "GENIE_TEST_UNUSED").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(duration_from(None, "GENIE_TEST_UNSET_TIMEOUT").unwrap(), None);
    }

    #[test]
    fn absolute_rejects_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(absolute(dir.path()).unwrap().is_absolute());
        assert!(absolute(&dir.path().join("missing")).is_err());
    }
}
