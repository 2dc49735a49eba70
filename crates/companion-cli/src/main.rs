//! OpenList Companion - console front-end for the companion supervisor.
//!
//! `run` opens an interactive console that owns the server for as long as it
//! is open. The other subcommands are one-shot operations that do not leave a
//! server behind.

mod console;
mod notifier;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use companion_core::{LivenessProbe, Supervisor, SupervisorConfig, TracingNotifier};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "openlist-companion")]
#[command(about = "Supervisor for a local OpenList/alist server")]
struct Args {
    /// Enable debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    debug: bool,

    /// JSON config file; missing keys take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory searched for a co-located server executable
    #[arg(long, global = true)]
    app_dir: Option<PathBuf>,

    /// Directory holding the hidden settings files
    #[arg(long, global = true)]
    settings_dir: Option<PathBuf>,

    /// File name of the server executable
    #[arg(long, global = true)]
    executable_name: Option<String>,

    /// Port probed for liveness
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the interactive console (default)
    Run {
        /// Do not start the server when the console opens
        #[arg(long)]
        no_start: bool,
    },
    /// Print what the supervisor knows as JSON
    Status,
    /// Kill every running server process
    Stop,
    /// Remember the server executable location
    SetPath { executable: PathBuf },
    /// Archive the server's data directory
    Export { destination: PathBuf },
}

fn init_logging(debug: bool) {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact();

    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => {
            let log_level = if debug { Level::DEBUG } else { Level::INFO };
            builder.with_max_level(log_level).init()
        }
    }
}

fn load_config(args: &Args) -> Result<SupervisorConfig> {
    let mut config = match &args.config {
        Some(path) => SupervisorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SupervisorConfig::default(),
    };

    if let Some(app_dir) = &args.app_dir {
        config.app_dir = app_dir.clone();
    }
    if let Some(settings_dir) = &args.settings_dir {
        config.settings_dir = settings_dir.clone();
    }
    if let Some(name) = &args.executable_name {
        config.executable_name = name.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = load_config(&args)?;
    info!("App directory: {}", config.app_dir.display());

    match args.command.unwrap_or(Command::Run { no_start: false }) {
        Command::Run { no_start } => {
            let supervisor = Supervisor::new(config, notifier::ConsoleNotifier::new())?;
            console::run(supervisor, !no_start).await?;
        }
        Command::Status => {
            let probe = LivenessProbe::new(&config);
            let supervisor = Supervisor::new(config, TracingNotifier)?;
            let mut status = supervisor.status();
            status.reachable = Some(probe.check().await);
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Stop => {
            let mut supervisor = Supervisor::new(config, TracingNotifier)?;
            if supervisor.executable().is_none() {
                bail!("no server executable found; use `set-path` first");
            }
            let killed = supervisor.stop_service()?;
            println!("Stopped {killed} process(es)");
        }
        Command::SetPath { executable } => {
            let mut supervisor = Supervisor::new(config, TracingNotifier)?;
            let path = supervisor.set_executable_path(&executable)?;
            println!("{}", path.display());
        }
        Command::Export { destination } => {
            let supervisor = Supervisor::new(config, TracingNotifier)?;
            match supervisor.export_backup(&destination)? {
                Some(summary) => println!(
                    "Exported {} file(s) to {}",
                    summary.files,
                    summary.archive.display()
                ),
                None => bail!("no server executable found; use `set-path` first"),
            }
        }
    }

    Ok(())
}
