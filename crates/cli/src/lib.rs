use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use genie_launcher::EngineProcess;
use genie_protocol::is_success;
use genie_session::{QueryOptions, Session};
use runtime::{Runtime, RuntimeConfig, SessionSpec, DEFAULT_LOG_FILE_NAME};
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

mod chat;
mod runtime;

/// How long an engine gets to exit after `quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_secs(5);

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "genie")]
#[command(about = "Run the Genie dialogue engine and talk to it", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Data directory for the toolkit, models and manifests (overrides GENIE_HOME)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Give up if the engine has not announced its port after this many ms
    /// (env: GENIE_READY_TIMEOUT_MS; 0 waits forever)
    #[arg(long, global = true)]
    ready_timeout_ms: Option<u64>,

    /// Timeout for each HTTP call to the engine (env: GENIE_HTTP_TIMEOUT_MS)
    #[arg(long, global = true)]
    http_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the shared NLU server and register its port for "localhost" sessions
    Serve(ServeArgs),

    /// Start a session, ask one question, print the reply as JSON
    Query(QueryArgs),

    /// Interactive session on stdin
    Chat(ChatArgs),

    /// Print what a model or manifest identifier resolves to
    Resolve(ResolveArgs),

    /// Install (or reinstall) the pinned Genie toolkit
    Install(InstallArgs),

    /// Show the port registered by the shared NLU server
    Port(PortArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Model directory (containing config.json) or known model name
    #[arg(long, default_value = "yelp")]
    model: String,

    /// Thingpedia directory; "None" uses the default device repository
    #[arg(long, default_value = "None")]
    manifest: String,

    #[arg(long)]
    force_update_model: bool,

    #[arg(long)]
    force_update_manifest: bool,
}

#[derive(Args, Clone)]
struct SessionArgs {
    /// NLU server: "localhost", a URL, a model directory or a known model name
    #[arg(long, default_value = "localhost")]
    server: String,

    /// Thingpedia directory; "None" uses the default device repository
    #[arg(long, default_value = "None")]
    manifest: String,

    /// Engine log file name
    #[arg(long, default_value = DEFAULT_LOG_FILE_NAME)]
    log_file_name: String,

    #[arg(long)]
    force_update_model: bool,

    #[arg(long)]
    force_update_manifest: bool,

    /// Talk to an engine that is already running at this URL instead of starting one
    #[arg(long)]
    attach: Option<String>,
}

impl SessionArgs {
    fn spec(&self) -> SessionSpec {
        SessionSpec {
            server: self.server.clone(),
            manifest: self.manifest.clone(),
            log_file_name: self.log_file_name.clone(),
            force_update_model: self.force_update_model,
            force_update_manifest: self.force_update_manifest,
        }
    }
}

#[derive(Args, Clone, Default)]
struct QueryConfigArgs {
    /// Number of results the engine returns per query
    #[arg(long)]
    num_results: Option<u32>,

    /// Filter the engine should ignore (repeatable)
    #[arg(long = "neglect-filter")]
    neglect_filters: Vec<String>,

    /// Projection the engine should ignore (repeatable)
    #[arg(long = "neglect-projection")]
    neglect_projections: Vec<String>,

    /// Treat each sentence as a direct statement of dialogue state
    /// (`--direct-sentence-state` alone means true)
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    direct_sentence_state: Option<bool>,
}

impl QueryConfigArgs {
    fn options(&self) -> QueryOptions {
        QueryOptions {
            num_results: self.num_results,
            neglect_filters: non_empty(&self.neglect_filters),
            neglect_projections: non_empty(&self.neglect_projections),
            direct_sentence_state: self.direct_sentence_state,
            ..QueryOptions::default()
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

#[derive(Args)]
struct QueryArgs {
    /// Natural-language request
    text: String,

    #[command(flatten)]
    session: SessionArgs,

    #[command(flatten)]
    config: QueryConfigArgs,

    /// Dialogue state to continue from
    #[arg(long, conflicts_with = "use_existing_state")]
    dialog_state: Option<String>,

    /// Extra JSON passed alongside the query
    #[arg(long, conflicts_with = "use_existing_state")]
    aux: Option<String>,

    /// Let the engine continue from its own state (GET query)
    #[arg(long)]
    use_existing_state: bool,

    /// Pretty-print JSON response
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,

    #[command(flatten)]
    config: QueryConfigArgs,
}

#[derive(Args)]
struct ResolveArgs {
    #[command(subcommand)]
    target: ResolveTarget,
}

#[derive(Subcommand)]
enum ResolveTarget {
    /// Resolve a model identifier to a path or server locator
    Model {
        id: String,

        /// Download again even if cached
        #[arg(long)]
        force: bool,
    },
    /// Resolve a manifest name to a directory, fetching the default repository if needed
    Manifest {
        #[arg(default_value = "None")]
        name: String,

        /// Pull and rebuild the cached repository
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct InstallArgs {
    /// Reinstall even if the pinned version is already present
    #[arg(long)]
    force: bool,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PortArgs {
    /// Output JSON
    #[arg(long)]
    json: bool,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = RuntimeConfig::resolve(cli.home, cli.ready_timeout_ms, cli.http_timeout_ms)?;
    log::debug!("Genie home: {}", config.paths.home.display());
    let runtime = Runtime::new(config)?;

    match cli.command {
        Commands::Serve(args) => run_serve(&runtime, args).await?,
        Commands::Query(args) => run_query(&runtime, args).await?,
        Commands::Chat(args) => run_chat(&runtime, args).await?,
        Commands::Resolve(args) => run_resolve(&runtime, args).await?,
        Commands::Install(args) => run_install(&runtime, args).await?,
        Commands::Port(args) => run_port(&runtime, args)?,
    }

    Ok(())
}

async fn run_serve(runtime: &Runtime, args: ServeArgs) -> Result<()> {
    let mut engine = runtime
        .start_server(
            &args.model,
            &args.manifest,
            args.force_update_model,
            args.force_update_manifest,
        )
        .await?;
    eprintln!(
        "NLU server listening on {} (sessions can use --server localhost)",
        engine.locator()
    );

    let exited = tokio::select! {
        status = engine.wait() => Some(status),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            None
        }
    };
    let outcome = match exited {
        Some(status) => status.map(|s| log::info!("NLU server exited: {s}")),
        None => {
            log::info!("Stopping NLU server");
            engine.kill().await
        }
    };
    if engine.release_port_binding()? {
        log::debug!("Removed {}", runtime.port_binding().path().display());
    }
    Ok(outcome?)
}

async fn run_query(runtime: &Runtime, args: QueryArgs) -> Result<()> {
    let aux = args
        .aux
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--aux must be valid JSON")?;
    let options = QueryOptions {
        use_existing_state: args.use_existing_state,
        dialog_state: args.dialog_state.clone(),
        aux,
        ..args.config.options()
    };

    let (mut engine, mut session) = open_session(runtime, &args.session).await?;
    let reply = session.query(&args.text, options).await;
    close_session(engine.as_mut(), &mut session).await;
    let reply = reply.context("Query failed")?;

    let text = if args.pretty {
        serde_json::to_string_pretty(&reply)?
    } else {
        serde_json::to_string(&reply)?
    };
    print_stdout(&text)
}

async fn run_chat(runtime: &Runtime, args: ChatArgs) -> Result<()> {
    let options = QueryOptions {
        use_existing_state: true,
        ..args.config.options()
    };
    let (mut engine, mut session) = open_session(runtime, &args.session).await?;
    let outcome = chat::run(&mut session, &options).await;
    close_session(engine.as_mut(), &mut session).await;
    outcome
}

/// Attached sessions have no engine of their own.
async fn open_session(
    runtime: &Runtime,
    args: &SessionArgs,
) -> Result<(Option<EngineProcess>, Session)> {
    match &args.attach {
        Some(target) => Ok((None, runtime.attach_session(target).await?)),
        None => {
            let (engine, session) = runtime.start_session(&args.spec()).await?;
            Ok((Some(engine), session))
        }
    }
}

/// Ask an engine we started to quit, then make sure it is gone.
async fn close_session(engine: Option<&mut EngineProcess>, session: &mut Session) {
    let Some(engine) = engine else {
        return;
    };
    match session.quit().await {
        Ok(reply) if is_success(&reply) => log::debug!("Engine acknowledged quit"),
        Ok(reply) => log::warn!("Unexpected reply to quit: {reply}"),
        Err(err) => log::warn!("Failed to send quit: {err}"),
    }
    if let Err(err) = engine.shutdown(QUIT_GRACE).await {
        log::warn!("Failed to stop engine: {err}");
    }
}

async fn run_resolve(runtime: &Runtime, args: ResolveArgs) -> Result<()> {
    match args.target {
        ResolveTarget::Model { id, force } => {
            let resolved = runtime.resolve_model(&id, force).await?;
            print_stdout(&resolved.as_locator())
        }
        ResolveTarget::Manifest { name, force } => {
            let dir = runtime.resolve_manifest(&name, force).await?;
            print_stdout(&dir.display().to_string())
        }
    }
}

async fn run_install(runtime: &Runtime, args: InstallArgs) -> Result<()> {
    let installed = runtime.ensure_toolkit(args.force).await?;
    let installer = runtime.installer();
    if args.json {
        let report = json!({
            "installed": installed,
            "source": installer.pin().source,
            "commit": installer.pin().expected_commit(),
            "install_dir": runtime.paths().install_dir,
            "record": installer.record_path(),
        });
        print_stdout(&serde_json::to_string_pretty(&report)?)?;
    } else if installed {
        eprintln!("Installed {}", installer.pin().source);
    } else {
        eprintln!("Toolkit is up to date ({})", installer.pin().source);
    }
    Ok(())
}

fn run_port(runtime: &Runtime, args: PortArgs) -> Result<()> {
    let binding = runtime.port_binding();
    let port = match binding.read() {
        Ok(port) => Some(port),
        Err(err) => {
            log::debug!("No registered port: {err}");
            None
        }
    };
    let url = binding.localhost_locator();
    if args.json {
        let report = json!({
            "port_file": binding.path(),
            "port": port,
            "url": url,
        });
        print_stdout(&serde_json::to_string_pretty(&report)?)?;
    } else {
        if port.is_none() {
            eprintln!(
                "No NLU server registered in {}; using the default port",
                binding.path().display()
            );
        }
        print_stdout(&url)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_config(args: &[&str]) -> QueryOptions {
        let argv = ["genie", "query", "hello"].iter().chain(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Query(query) => query.config.options(),
            _ => unreachable!("parsed a query"),
        }
    }

    #[test]
    fn direct_sentence_state_can_be_switched_either_way() {
        assert_eq!(query_config(&[]).direct_sentence_state, None);
        assert_eq!(
            query_config(&["--direct-sentence-state"]).direct_sentence_state,
            Some(true)
        );
        assert_eq!(
            query_config(&["--direct-sentence-state", "false"]).direct_sentence_state,
            Some(false)
        );
        assert_eq!(
            query_config(&["--direct-sentence-state=true"]).direct_sentence_state,
            Some(true)
        );
    }
}
