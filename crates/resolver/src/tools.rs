use crate::error::{ResolverError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Runs external build and version-control tools (`git`, `make`, `npm`).
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<()>;
}

/// Runs tools as child processes with inherited stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<()> {
        let command = render_command(program, args);
        log::info!("Running `{command}` in {}", cwd.display());
        let status = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(ResolverError::ToolFailed {
                command,
                cwd: cwd.to_path_buf(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

pub fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
