use std::path::PathBuf;

pub const HOME_ENV: &str = "GENIE_HOME";
pub const INSTALL_DIR_ENV: &str = "GENIE_INSTALL_DIR";
pub const MODEL_DIR_ENV: &str = "GENIE_MODEL_DIR";
pub const MANIFEST_DIR_ENV: &str = "GENIE_MANIFEST_DIR";
pub const PORT_FILE_ENV: &str = "GENIE_PORT_FILE";

const PORT_FILE_NAME: &str = "_local_port_binding.txt";
const TOOLKIT_PACKAGE: &str = "genie-toolkit";

/// Every on-disk location the shim touches.
///
/// Built once (from the environment or an explicit home) and handed to the
/// resolvers and launcher; nothing reads these locations from globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeniePaths {
    pub home: PathBuf,
    /// npm prefix where the engine package is installed.
    pub install_dir: PathBuf,
    /// Cache of named models copied out of hub snapshots.
    pub models_dir: PathBuf,
    /// Parent of the cloned manifest repository.
    pub manifests_dir: PathBuf,
    pub hub_cache_dir: PathBuf,
    /// Holds the decimal port of the shared NLU server.
    pub port_file: PathBuf,
}

impl GeniePaths {
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            install_dir: home.join("toolkit"),
            models_dir: home.join("models"),
            manifests_dir: home.clone(),
            hub_cache_dir: home.join("hub"),
            port_file: home.join(PORT_FILE_NAME),
            home,
        }
    }

    /// Resolve from `GENIE_HOME` (default `~/.cache/genie-toolkit`) plus
    /// per-location overrides. An explicit `home` wins over the environment.
    pub fn from_env(home: Option<PathBuf>) -> Self {
        let home = home
            .or_else(|| path_from_env(HOME_ENV))
            .unwrap_or_else(default_home);
        let mut paths = Self::under(home);
        if let Some(dir) = path_from_env(INSTALL_DIR_ENV) {
            paths.install_dir = dir;
        }
        if let Some(dir) = path_from_env(MODEL_DIR_ENV) {
            paths.models_dir = dir;
        }
        if let Some(dir) = path_from_env(MANIFEST_DIR_ENV) {
            paths.manifests_dir = dir;
        }
        if let Some(file) = path_from_env(PORT_FILE_ENV) {
            paths.port_file = file;
        }
        paths
    }

    pub fn toolkit_dir(&self) -> PathBuf {
        self.install_dir.join("node_modules").join(TOOLKIT_PACKAGE)
    }

    pub fn toolkit_dist_dir(&self) -> PathBuf {
        self.toolkit_dir().join("dist")
    }

    /// Working directory of every engine child process.
    pub fn tool_dir(&self) -> PathBuf {
        self.toolkit_dist_dir().join("tool")
    }
}

fn path_from_env(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn default_home() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("genie-toolkit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn layout_is_rooted_at_home() {
        let paths = GeniePaths::under("/tmp/genie");
        assert_eq!(paths.models_dir, PathBuf::from("/tmp/genie/models"));
        assert_eq!(
            paths.port_file,
            PathBuf::from("/tmp/genie/_local_port_binding.txt")
        );
        assert_eq!(
            paths.tool_dir(),
            PathBuf::from("/tmp/genie/toolkit/node_modules/genie-toolkit/dist/tool")
        );
        assert_eq!(paths.hub_cache_dir, PathBuf::from("/tmp/genie/hub"));
    }

    #[test]
    fn explicit_home_wins() {
        let paths = GeniePaths::from_env(Some(PathBuf::from("/srv/genie")));
        assert_eq!(paths.home, PathBuf::from("/srv/genie"));
    }
}
