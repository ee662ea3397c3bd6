use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use config::{Config, Environment, File, FileFormat};
use log::{LevelFilter, debug, info};
use serde::Deserialize;
use tokio::net::TcpListener;

use quill::api::{self, AppState};
use quill::auth::{AuthConfig, AuthState};
use quill::db::Database;
use quill::model::{MockProvider, ModelProvider, OpenAiProvider, OpenAiProviderConfig};
use quill::storage::ChatRepository;
use quill::tools::ToolSet;

const APP_NAME: &str = "quill";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(common: CommonOpts, cmd: ServeCommand) -> Result<()> {
    handle_serve(&common, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common)?;

    match cli.command {
        Command::Serve(cmd) => async_main(cli.common, cmd),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Quill - AI assistant chat server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "QUILL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress all logging.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the API server.
    Serve(ServeCommand),
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Address to listen on (overrides config).
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Database file path (overrides config).
    #[arg(long)]
    database: Option<PathBuf>,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    server: ServerSettings,
    #[serde(default)]
    database: DatabaseSettings,
    #[serde(default)]
    auth: AuthConfig,
    #[serde(default)]
    model: ModelSettings,
    #[serde(default)]
    uploads: UploadSettings,
    #[serde(default)]
    search: SearchSettings,
    #[serde(default)]
    weather: WeatherSettings,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    listen: Option<SocketAddr>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelSettings {
    /// "openai" (any OpenAI-compatible endpoint) or "mock".
    provider: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    default_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadSettings {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchSettings {
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WeatherSettings {
    base_url: Option<String>,
}

fn load_settings(common: &CommonOpts) -> Result<Settings> {
    let config_path = common.config.clone().or_else(|| {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    });

    let mut builder = Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(
            File::from(path).format(FileFormat::Toml).required(false),
        );
    }
    builder = builder.add_source(Environment::with_prefix("QUILL").separator("__"));

    builder
        .build()
        .context("loading configuration")?
        .try_deserialize()
        .context("parsing configuration")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

// ============================================================================
// Logging
// ============================================================================

fn init_logging(common: &CommonOpts) -> Result<()> {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return Ok(());
    }

    let level = match effective_log_level(common) {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("quill={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color = !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(effective_log_level(common));
    builder.try_init().ok();

    Ok(())
}

fn effective_log_level(common: &CommonOpts) -> LevelFilter {
    if common.debug {
        LevelFilter::Debug
    } else {
        match common.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

// ============================================================================
// Serve
// ============================================================================

async fn handle_serve(common: &CommonOpts, cmd: ServeCommand) -> Result<()> {
    let settings = load_settings(common)?;
    debug!("resolved settings: {:?}", settings);

    let database_path = cmd
        .database
        .or(settings.database.path)
        .unwrap_or_else(|| data_dir().join("quill.db"));
    let uploads_dir = settings
        .uploads
        .dir
        .unwrap_or_else(|| data_dir().join("uploads"));
    let listen = cmd
        .listen
        .or(settings.server.listen)
        .unwrap_or_else(|| "127.0.0.1:8080".parse().expect("valid default address"));

    let db = Database::new(&database_path).await?;
    let store = ChatRepository::new(db.pool().clone());

    let default_model = settings
        .model
        .default_model
        .unwrap_or_else(|| "gpt-4o-mini".to_string());
    let model: Arc<dyn ModelProvider> = match settings.model.provider.as_deref() {
        Some("mock") => {
            info!("using the mock model provider");
            Arc::new(MockProvider::canned())
        }
        _ => {
            let mut config = OpenAiProviderConfig {
                api_key: settings.model.api_key,
                ..Default::default()
            };
            if let Some(base_url) = settings.model.base_url {
                config.base_url = base_url;
            }
            Arc::new(OpenAiProvider::new(config))
        }
    };

    let tools = ToolSet::builtin(settings.search.endpoint, settings.weather.base_url);
    let auth = AuthState::new(settings.auth);

    let state = AppState::new(store, model, tools, auth, default_model, uploads_dir);
    let router = api::create_router(state);

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding to {listen}"))?;
    info!("listening on http://{listen}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving API")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        debug!("failed to install ctrl-c handler: {err}");
        return;
    }
    info!("shutdown signal received");
}
