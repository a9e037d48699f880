//! Keeps the installed engine package in line with the version this build
//! was tested against.
//!
//! The expected version is a TOML descriptor compiled into the binary; the
//! installed version is a small record written next to `node_modules` after
//! every successful install. The record carries the commit npm actually
//! resolved, taken from `package-lock.json` or the installed `package.json`.
//! Comparing the two is a plain file read.

use crate::error::{LaunchError, Result};
use genie_resolver::{GeniePaths, ToolRunner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PIN_RECORD_FILE: &str = ".genie-toolkit.pin";
const PACKAGED_PIN: &str = include_str!("../toolkit-pin.toml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitPin {
    pub package: String,
    /// Installable package spec, e.g. `github:owner/repo#<ref>`.
    pub source: String,
    /// Git commit of the package. In the packaged descriptor this is the
    /// required commit; in an install record it is what npm resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl ToolkitPin {
    /// The pin this build ships with.
    pub fn packaged() -> Result<Self> {
        Self::parse(PACKAGED_PIN)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let pin: Self = toml::from_str(text).map_err(|e| LaunchError::InvalidPin(e.to_string()))?;
        if pin.git_ref().is_none() {
            return Err(LaunchError::InvalidPin(format!(
                "source `{}` has no `#<ref>` suffix",
                pin.source
            )));
        }
        Ok(pin)
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.source
            .rsplit_once('#')
            .map(|(_, r)| r.trim())
            .filter(|r| !r.is_empty())
    }

    /// The commit an install must be at: the `commit` field, or a `#<ref>`
    /// that is itself a commit hash. `None` means the pin follows a branch.
    pub fn expected_commit(&self) -> Option<&str> {
        self.commit
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or_else(|| self.git_ref().filter(|r| looks_like_commit(r)))
    }

    /// Branch pins compare the ref name. Commit pins compare against the
    /// commit recorded at install time.
    pub fn matches(&self, installed: &ToolkitPin) -> bool {
        if self.package != installed.package {
            return false;
        }
        match self.expected_commit() {
            Some(want) => installed
                .commit
                .as_deref()
                .is_some_and(|have| same_commit(want, have)),
            None => self.git_ref() == installed.git_ref(),
        }
    }
}

fn looks_like_commit(r: &str) -> bool {
    (7..=40).contains(&r.len()) && r.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Abbreviated hashes match the full hash they prefix.
fn same_commit(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_ascii_lowercase(), b.trim().to_ascii_lowercase());
    let shorter = a.len().min(b.len());
    shorter >= 7 && a[..shorter] == b[..shorter]
}

fn commit_suffix(spec: &str) -> Option<String> {
    spec.rsplit_once('#')
        .map(|(_, r)| r.trim())
        .filter(|r| looks_like_commit(r))
        .map(str::to_ascii_lowercase)
}

/// Commit npm installed for `package` under `install_dir`, if npm left a
/// trace of it.
pub fn installed_commit(install_dir: &Path, package: &str) -> Option<String> {
    let lock = read_json(&install_dir.join("package-lock.json"));
    let from_lock = lock.as_ref().and_then(|lock| {
        lock.pointer(&format!("/packages/node_modules~1{package}/resolved"))
            .or_else(|| lock.pointer(&format!("/dependencies/{package}/version")))
            .and_then(serde_json::Value::as_str)
            .and_then(commit_suffix)
    });
    from_lock.or_else(|| {
        let manifest = read_json(
            &install_dir
                .join("node_modules")
                .join(package)
                .join("package.json"),
        )?;
        manifest
            .get("gitHead")
            .and_then(serde_json::Value::as_str)
            .filter(|head| looks_like_commit(head))
            .map(str::to_ascii_lowercase)
            .or_else(|| {
                manifest
                    .get("_resolved")
                    .and_then(serde_json::Value::as_str)
                    .and_then(commit_suffix)
            })
    })
}

fn read_json(path: &Path) -> Option<serde_json::Value> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Current,
    /// No toolkit `dist` directory, or no pin record.
    Missing,
    Stale { installed: String },
    Unreadable(String),
}

impl InstallStatus {
    pub fn needs_install(&self) -> bool {
        !matches!(self, Self::Current)
    }
}

pub struct ToolkitInstaller {
    install_dir: PathBuf,
    dist_dir: PathBuf,
    runner: Arc<dyn ToolRunner>,
    pin: ToolkitPin,
}

impl ToolkitInstaller {
    pub fn new(paths: &GeniePaths, runner: Arc<dyn ToolRunner>, pin: ToolkitPin) -> Self {
        Self {
            install_dir: paths.install_dir.clone(),
            dist_dir: paths.toolkit_dist_dir(),
            runner,
            pin,
        }
    }

    pub fn pin(&self) -> &ToolkitPin {
        &self.pin
    }

    pub fn record_path(&self) -> PathBuf {
        self.install_dir.join(PIN_RECORD_FILE)
    }

    pub fn check(&self) -> InstallStatus {
        if !self.dist_dir.is_dir() {
            return InstallStatus::Missing;
        }
        let record = self.record_path();
        let text = match std::fs::read_to_string(&record) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return InstallStatus::Missing
            }
            Err(err) => return InstallStatus::Unreadable(err.to_string()),
        };
        match toml::from_str::<ToolkitPin>(&text) {
            Ok(installed) if self.pin.matches(&installed) => InstallStatus::Current,
            Ok(installed) => InstallStatus::Stale {
                installed: match installed.commit {
                    Some(commit) => format!("{} ({commit})", installed.source),
                    None => installed.source,
                },
            },
            Err(err) => InstallStatus::Unreadable(err.to_string()),
        }
    }

    /// Install the pinned toolkit unless the record already matches.
    /// Returns whether an install ran.
    pub async fn ensure_installed(&self, force: bool) -> Result<bool> {
        let status = self.check();
        match &status {
            InstallStatus::Current if !force => {
                log::debug!("Toolkit {} is current", self.pin.source);
                return Ok(false);
            }
            InstallStatus::Current => {}
            InstallStatus::Missing => log::debug!("Toolkit not installed in {}", self.install_dir.display()),
            InstallStatus::Stale { installed } => {
                log::debug!("Installed toolkit {installed} differs from {}", self.pin.source)
            }
            InstallStatus::Unreadable(reason) => {
                log::debug!("Could not read toolkit pin record: {reason}")
            }
        }

        self.install().await?;
        Ok(true)
    }

    async fn install(&self) -> Result<()> {
        log::info!("Installing {} into {}", self.pin.source, self.install_dir.display());
        std::fs::create_dir_all(&self.install_dir)?;
        self.runner
            .run("npm", &["install", &self.pin.source], &self.install_dir)
            .await?;

        let resolved = installed_commit(&self.install_dir, &self.pin.package);
        if resolved.is_none() {
            log::warn!("npm did not report which commit of {} it installed", self.pin.package);
        }
        let record = ToolkitPin {
            commit: resolved.or_else(|| self.pin.expected_commit().map(str::to_string)),
            ..self.pin.clone()
        };
        write_record(&self.record_path(), &record)
    }
}

fn write_record(path: &Path, pin: &ToolkitPin) -> Result<()> {
    let text = toml::to_string(pin).map_err(|e| LaunchError::InvalidPin(e.to_string()))?;
    std::fs::write(path, text)?;
    Ok(())
}
