use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

pub const NODE_PROGRAM: &str = "node";
pub const NODE_PROGRAM_ENV: &str = "GENIE_NODE";
pub const ENGINE_ENTRY_POINT: &str = "genie.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Dialogue agent answering queries for one session.
    ContextualGenie,
    /// Shared NLU server other sessions address as "localhost".
    Server,
}

impl EngineMode {
    pub const fn subcommand(self) -> &'static str {
        match self {
            Self::ContextualGenie => "contextual-genie",
            Self::Server => "server",
        }
    }
}

/// Command line of one engine child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    program: String,
    mode: EngineMode,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl EngineCommand {
    pub fn contextual_genie(nlu_server: &str, manifest_dir: &Path, log_file_name: &str) -> Self {
        Self::new(
            EngineMode::ContextualGenie,
            vec![
                "--nlu-server".into(),
                nlu_server.into(),
                "--thingpedia-dir".into(),
                manifest_dir.display().to_string(),
                "--log-file-name".into(),
                log_file_name.into(),
            ],
        )
    }

    /// `nlu_model` must already be a `file://` locator.
    pub fn server(nlu_model: &str, manifest_dir: &Path) -> Self {
        Self::new(
            EngineMode::Server,
            vec![
                "--nlu-model".into(),
                nlu_model.into(),
                "--thingpedia".into(),
                manifest_dir.display().to_string(),
                "--random-port".into(),
            ],
        )
    }

    fn new(mode: EngineMode, args: Vec<String>) -> Self {
        let program = std::env::var(NODE_PROGRAM_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| NODE_PROGRAM.to_string());
        Self {
            program,
            mode,
            args,
            cwd: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Pin the working directory (the installed toolkit's `dist/tool`).
    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Arguments after the program name.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        args.push(ENGINE_ENTRY_POINT.to_string());
        args.push(self.mode.subcommand().to_string());
        args.extend(self.args.iter().cloned());
        args
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.args());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args().join(" "))
    }
}
