use crate::error::{ResolverError, Result};
use genie_protocol::{loopback_locator, DEFAULT_NLU_PORT};
use std::path::{Path, PathBuf};

/// Well-known file holding the decimal port of the shared NLU server.
///
/// There is no locking: if two servers start concurrently the last writer wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    path: PathBuf,
}

impl PortBinding {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<u16> {
        let raw = std::fs::read_to_string(&self.path)?;
        let value = raw.trim();
        value
            .parse::<u16>()
            .map_err(|_| ResolverError::InvalidPortBinding {
                path: self.path.clone(),
                value: value.to_string(),
            })
    }

    pub fn write(&self, port: u16) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension(format!("{}.tmp", std::process::id()));
        std::fs::write(&tmp, port.to_string())?;
        std::fs::rename(&tmp, &self.path)?;
        log::debug!("Recorded port {port} in {}", self.path.display());
        Ok(())
    }

    /// Remove the file, but only while it still names `port`.
    pub fn release(&self, port: u16) -> Result<bool> {
        match self.read() {
            Ok(current) if current == port => {
                std::fs::remove_file(&self.path)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Locator of the shared server, falling back to the engine's default port.
    pub fn localhost_locator(&self) -> String {
        match self.read() {
            Ok(port) => loopback_locator(port),
            Err(err) => {
                log::debug!(
                    "No usable port binding at {} ({err}); assuming port {DEFAULT_NLU_PORT}",
                    self.path.display()
                );
                loopback_locator(DEFAULT_NLU_PORT)
            }
        }
    }
}
