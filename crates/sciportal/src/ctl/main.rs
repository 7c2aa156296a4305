//! sciportalctl - command line client for the science portal session service
//!
//! Lists, launches, watches and deletes interactive sessions through the
//! session coordinator, printing lifecycle events as they happen.

use std::future::Future;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{LevelFilter, debug};

use sciportal::client::{PortalClient, ServiceError, SessionApi};
use sciportal::config::{self, PortalConfig};
use sciportal::events::PortalEvent;
use sciportal::launch::{LaunchForm, LaunchOverrides, SessionTypeCatalog};
use sciportal::session::{PollOutcome, Session, SessionCoordinator};

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        if let Some(service) = err.downcast_ref::<ServiceError>() {
            let _ = writeln!(io::stderr(), "{}", service.user_message());
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Config {
        command: ConfigCommand::Init { force },
    } = &cli.command
    {
        return handle_config_init(cli.common.config.clone(), *force);
    }

    let config = config::load(cli.common.config.as_deref())?;
    init_logging(&cli.common, &config)?;
    debug!("loaded configuration: {config:#?}");

    let client = PortalClient::with_timeout(
        config.service.urls(),
        &config.service.credentials(),
        config.service.timeout(),
    )
    .context("building session service client")?;
    let api: Arc<dyn SessionApi> = Arc::new(client);
    let coordinator = SessionCoordinator::new(api, config.polling.to_polling_config());
    let json = cli.common.json;

    match cli.command {
        Command::Sessions { command } => handle_sessions(&coordinator, command, json).await,
        Command::Launch(args) => handle_launch(&coordinator, &config, args, json).await,
        Command::Images { session_type } => handle_images(&coordinator, &session_type, json).await,
        Command::Context => handle_context(&coordinator, json).await,
        Command::Types => handle_types(&config, json).await,
        Command::Config { .. } => Ok(()),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sciportalctl",
    author,
    version,
    about = "Manage interactive science portal sessions."
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Configuration file (default: ~/.config/sciportal/config.toml)
    #[arg(long, global = true, env = "SCIPORTAL_CONFIG")]
    config: Option<PathBuf>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Shorthand for -v
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Inspect and manage sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Launch a new session and watch it start
    Launch(LaunchArgs),

    /// List container images for a session type
    Images {
        /// Session type, e.g. notebook
        session_type: String,
    },

    /// Show the server's core and memory choices
    Context,

    /// List launchable session types
    Types,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    /// List sessions once
    List,
    /// Load sessions and keep polling until none is transitioning
    Watch,
    /// Delete a session
    Delete {
        /// Session ID
        id: String,
    },
    /// Print the connect URL of a running session
    Connect {
        /// Session ID
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
struct LaunchArgs {
    /// Session type (default: the catalog default)
    #[arg(long = "type", short = 't')]
    session_type: Option<String>,

    /// Session name (default: type followed by a counter)
    #[arg(long, short)]
    name: Option<String>,

    /// Container image (default: first image for the type)
    #[arg(long, short)]
    image: Option<String>,

    /// Number of cores
    #[arg(long)]
    cores: Option<u32>,

    /// Memory in GB
    #[arg(long)]
    ram: Option<u32>,
}

fn init_logging(common: &CommonOpts, config: &PortalConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match common.verbose.max(u8::from(common.debug)) {
        0 => config
            .logging
            .level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid logging.level {:?}", config.logging.level))?,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let directive = level.to_string().to_lowercase();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sciportal={directive},sciportalctl={directive}")));

    // Logs go to stderr so stdout stays machine-readable.
    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(io::stderr().is_terminal()),
            )
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();

    Ok(())
}

fn handle_config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    config::write_default_config(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn handle_sessions(
    coordinator: &SessionCoordinator,
    command: SessionsCommand,
    json: bool,
) -> Result<()> {
    match command {
        SessionsCommand::List => {
            let sessions = coordinator
                .endpoints_ready()
                .await
                .context("loading session list")?;
            print_sessions(&sessions, json)?;
        }
        SessionsCommand::Watch => {
            watch(coordinator, json, |c| async move {
                c.endpoints_ready()
                    .await
                    .map(drop)
                    .context("loading session list")
            })
            .await?;
        }
        SessionsCommand::Delete { id } => {
            watch(coordinator, json, |c| async move {
                c.delete_session(&id)
                    .await
                    .with_context(|| format!("deleting session {id}"))
            })
            .await?;
        }
        SessionsCommand::Connect { id } => {
            coordinator
                .endpoints_ready()
                .await
                .context("loading session list")?;
            let url = coordinator.connect_target(&id)?;
            if json {
                println!("{}", serde_json::json!({ "id": id, "connect_url": url }));
            } else {
                println!("{url}");
            }
        }
    }
    Ok(())
}

async fn handle_launch(
    coordinator: &SessionCoordinator,
    config: &PortalConfig,
    args: LaunchArgs,
    json: bool,
) -> Result<()> {
    coordinator
        .endpoints_ready()
        .await
        .context("loading session list")?;

    let mut form = LaunchForm::new(coordinator.clone(), config.catalog.source());
    let mut defaults = form.open().await.context("opening launch form")?;
    if let Some(session_type) = args.session_type.as_deref() {
        defaults = form
            .select_type(session_type)
            .await
            .with_context(|| format!("selecting session type {session_type}"))?;
    }
    debug!("launch defaults: {defaults:#?}");

    let overrides = LaunchOverrides {
        name: args.name,
        image: args.image,
        cores: args.cores,
        ram: args.ram,
    };
    watch(coordinator, json, |_| async move {
        form.submit(&overrides)
            .await
            .map(drop)
            .context("submitting session request")
    })
    .await
}

async fn handle_images(coordinator: &SessionCoordinator, session_type: &str, json: bool) -> Result<()> {
    let images = coordinator
        .api()
        .list_container_images(session_type)
        .await
        .with_context(|| format!("listing images for {session_type}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&images)?);
    } else {
        for image in images {
            println!("{}", image.id);
        }
    }
    Ok(())
}

async fn handle_context(coordinator: &SessionCoordinator, json: bool) -> Result<()> {
    let context = coordinator
        .api()
        .get_context_resources()
        .await
        .context("reading context resources")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else {
        println!("Cores: {:?} (default {})", context.available_cores, context.default_cores);
        println!("RAM:   {:?} GB (default {} GB)", context.available_ram, context.default_ram);
    }
    Ok(())
}

async fn handle_types(config: &PortalConfig, json: bool) -> Result<()> {
    let catalog = match &config.catalog.type_map_path {
        Some(path) => SessionTypeCatalog::load(Path::new(path)).await?,
        None => SessionTypeCatalog::builtin()?,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
    } else {
        for name in catalog.type_names() {
            let marker = if name == catalog.default { " (default)" } else { "" };
            let fields = catalog.field_visibility(name);
            println!("{name}{marker}: {:?}", fields.visible);
        }
    }
    Ok(())
}

/// Run `action` and print lifecycle events until the coordinator is idle.
///
/// Fails when `action` failed, or when the last load or the polling run
/// failed.
async fn watch<F, Fut>(coordinator: &SessionCoordinator, json: bool, action: F) -> Result<()>
where
    F: FnOnce(SessionCoordinator) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut events = coordinator.events().subscribe_channel();
    let result = action(coordinator.clone()).await;

    let mut failure: Option<ServiceError> = None;
    let idle = coordinator.wait_idle();
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => {
                note_failure(&event, &mut failure);
                print_event(&event, json)?;
            }
            _ = &mut idle => break,
            _ = tokio::signal::ctrl_c() => {
                coordinator.cancel_polling();
                eprintln!("Interrupted, polling cancelled");
                break;
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        note_failure(&event, &mut failure);
        print_event(&event, json)?;
    }

    result?;
    match failure {
        Some(error) => Err(error.into()),
        None => Ok(()),
    }
}

fn note_failure(event: &PortalEvent, failure: &mut Option<ServiceError>) {
    match event {
        PortalEvent::LoadSessionListError { error }
        | PortalEvent::PollingFinished {
            outcome: PollOutcome::Failed { error },
        } => *failure = Some(error.clone()),
        PortalEvent::LoadSessionListDone { .. } => *failure = None,
        _ => {}
    }
}

fn print_event(event: &PortalEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        PortalEvent::LoadSessionListDone { sessions } => print_sessions(sessions, false)?,
        PortalEvent::LoadSessionListError { error } => {
            eprintln!("Failed to load sessions: {}", error.user_message())
        }
        PortalEvent::SessionRequestOk { name, session_type } => {
            println!("Requested {session_type} session {name}")
        }
        PortalEvent::SessionDeleteOk { session_id } => println!("Deleted session {session_id}"),
        PortalEvent::PollingContinue { sessions } => {
            let summary: Vec<String> = sessions
                .iter()
                .map(|s| format!("{}={}", s.name, s.status))
                .collect();
            println!("... {}", summary.join(" "));
        }
        PortalEvent::PollingFinished { outcome } => match outcome {
            PollOutcome::Stable => println!("All sessions settled"),
            PollOutcome::Failed { error } => {
                eprintln!("Polling stopped: {}", error.user_message())
            }
            PollOutcome::Cancelled => println!("Polling cancelled"),
        },
    }
    Ok(())
}

fn print_sessions(sessions: &[Session], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sessions)?);
        return Ok(());
    }
    println!("{:<12} {:<20} {:<12} {:<12} {}", "ID", "NAME", "TYPE", "STATUS", "CONNECT");
    println!("{}", "-".repeat(80));
    for session in sessions {
        let connect = if session.is_usable() {
            session.connect_url.as_deref().unwrap_or("-")
        } else {
            "-"
        };
        println!(
            "{:<12} {:<20} {:<12} {:<12} {}",
            session.id,
            session.name,
            session.session_type,
            session.status.as_str(),
            connect
        );
    }
    Ok(())
}
