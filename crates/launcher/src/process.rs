use crate::command::EngineCommand;
use crate::error::{LaunchError, Result};
use crate::readiness::{discover_port, ENGINE_LOG_TARGET};
use genie_protocol::{loopback_base_url, loopback_locator};
use genie_resolver::PortBinding;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

const OUTPUT_FLUSH_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Give up waiting for the port announcement after this long. `None` waits forever.
    pub ready_timeout: Option<Duration>,
    /// Record the discovered port here for later "localhost" resolution.
    pub port_binding: Option<PortBinding>,
    /// Level at which engine output after readiness is relayed to the log.
    pub output_level: log::Level,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            ready_timeout: None,
            port_binding: None,
            output_level: log::Level::Debug,
        }
    }
}

/// A running engine child whose port is known.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    port: u16,
    port_binding: Option<PortBinding>,
    output_task: Option<JoinHandle<()>>,
}

/// Spawn `command` and wait for it to announce its port.
pub async fn launch(command: &EngineCommand, options: &LaunchOptions) -> Result<EngineProcess> {
    log::info!("Starting engine: {command}");
    if let Some(cwd) = command.cwd() {
        log::debug!("Engine working directory: {}", cwd.display());
    }
    launch_command(command.to_command(), &command.to_string(), options).await
}

/// Lower-level [`launch`] for an arbitrary command line.
pub async fn launch_command(
    mut command: Command,
    label: &str,
    options: &LaunchOptions,
) -> Result<EngineProcess> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
        command: label.to_string(),
        source,
    })?;
    let stdout = child.stdout.take().ok_or(LaunchError::MissingStdout)?;
    let mut reader = BufReader::new(stdout);

    let port = match discover_port(&mut reader, options.ready_timeout).await {
        Ok(Some(port)) => port,
        Ok(None) => {
            let status = match child.wait().await {
                Ok(status) => status.to_string(),
                Err(err) => format!("status unavailable: {err}"),
            };
            return Err(LaunchError::ExitedBeforeReady { status });
        }
        Err(err) => {
            if let Err(kill_err) = child.kill().await {
                log::warn!("Failed to stop engine after readiness error: {kill_err}");
            }
            return Err(err);
        }
    };
    log::info!("Engine ready on port {port}");

    if let Some(binding) = &options.port_binding {
        binding.write(port)?;
        log::info!("Registered port {port} in {}", binding.path().display());
    }

    let output_task = tokio::spawn(relay_output(reader, options.output_level));

    Ok(EngineProcess {
        child,
        port,
        port_binding: options.port_binding.clone(),
        output_task: Some(output_task),
    })
}

async fn relay_output(mut reader: BufReader<ChildStdout>, level: log::Level) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                log::log!(target: ENGINE_LOG_TARGET, level, "{}", text.trim_end_matches(['\r', '\n']));
            }
            Err(err) => {
                log::debug!("Engine stdout closed: {err}");
                break;
            }
        }
    }
}

impl EngineProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for session calls (`http://127.0.0.1:<port>/`).
    pub fn base_url(&self) -> String {
        loopback_base_url(self.port)
    }

    /// Server locator without trailing slash, as passed to `--nlu-server`.
    pub fn locator(&self) -> String {
        loopback_locator(self.port)
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking exit check.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the child to exit on its own, then flush its remaining output.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.finish_output().await;
        Ok(status)
    }

    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        self.finish_output().await;
        Ok(())
    }

    /// Give the child `grace` to exit (e.g. after a `quit` call), then kill it.
    /// Returns the exit status when it left on its own.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                self.finish_output().await;
                Ok(Some(status))
            }
            Err(_) => {
                log::warn!(
                    "Engine on port {} still running after {grace:?}; killing it",
                    self.port
                );
                self.kill().await?;
                Ok(None)
            }
        }
    }

    /// Remove the port-binding file if it still names this process.
    pub fn release_port_binding(&self) -> Result<bool> {
        match &self.port_binding {
            Some(binding) => Ok(binding.release(self.port)?),
            None => Ok(false),
        }
    }

    /// Descendants of the engine may keep its stdout open, so the relay gets
    /// a bounded window to drain before it is aborted.
    async fn finish_output(&mut self) {
        if let Some(mut task) = self.output_task.take() {
            match tokio::time::timeout(OUTPUT_FLUSH_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::debug!("Engine output relay ended abnormally: {err}"),
                Err(_) => task.abort(),
            }
        }
    }
}
