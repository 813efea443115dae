//! clipdeck - command line front end for the clipdeck cross-posting backend.
//!
//! Logs in, keeps the session token fresh, and drives clip generation and
//! uploads through the backend API.

mod commands;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipdeck_core::auth::open_token_store;
use clipdeck_core::{ApiClient, Config, SessionManager};

#[derive(Parser)]
#[command(name = "clipdeck")]
#[command(about = "Cross-post clips to your social media accounts", version)]
struct Cli {
    /// Backend base URL (overrides config and CLIPDECK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Log in and store the session token
    Login {
        /// Username (defaults to CLIPDECK_USERNAME or the last used username)
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Remove the stored session token
    Logout,
    /// Show the session state and token lifetime
    Status,
    /// Renew the session token now
    Refresh,
    /// Keep the session alive, refreshing the token before it expires
    Watch,
    #[command(flatten)]
    Api(ApiCommand),
}

/// Commands that need a logged-in session
#[derive(Subcommand)]
pub(crate) enum ApiCommand {
    /// List platforms
    Platforms {
        /// Also list each platform's accounts
        #[arg(long)]
        accounts: bool,
    },
    /// Manage a platform's accounts
    #[command(subcommand)]
    Account(AccountCommand),
    /// Toggle auto-upload for a platform
    Toggle { platform: String },
    /// Generate clips for an account from a URL or a local video
    Generate {
        platform: String,
        account: String,
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        url: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Keep the source aspect ratio instead of cropping to 9:16
        #[arg(long)]
        no_mobile: bool,
        /// Wait for the task to finish
        #[arg(long)]
        wait: bool,
    },
    /// Upload generated clips for an account
    Upload {
        platform: String,
        account: String,
        #[arg(long)]
        wait: bool,
    },
    /// Show a background task's status
    Task {
        task_id: String,
        #[arg(long)]
        wait: bool,
    },
    /// Show or replace the backend's application configuration
    #[command(subcommand)]
    BackendConfig(BackendConfigCommand),
    /// Send a raw authenticated request and print the JSON response
    Request {
        /// HTTP method
        method: String,
        /// Path relative to the API base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum AccountCommand {
    /// List a platform's accounts
    List { platform: String },
    /// Add an account and authenticate it with the platform
    Add {
        platform: String,
        name: String,
        #[command(flatten)]
        fields: AccountFields,
        /// Create the account with auto-upload disabled
        #[arg(long)]
        inactive: bool,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Change an account's settings
    Update {
        platform: String,
        name: String,
        #[command(flatten)]
        fields: AccountFields,
        /// Enable or disable auto-upload
        #[arg(long)]
        active: Option<bool>,
    },
    /// Delete an account and its clip folder
    Delete { platform: String, name: String },
    /// Re-run platform authentication for an account
    Reauth {
        platform: String,
        name: String,
        /// Ignore the stored credentials and use only the ones given here
        #[arg(long)]
        replace_credentials: bool,
        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

#[derive(Args)]
pub(crate) struct AccountFields {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub category_id: Option<String>,
    /// Clip length in seconds
    #[arg(long)]
    pub clip_duration: Option<u32>,
}

#[derive(Args)]
pub(crate) struct CredentialArgs {
    /// Platform credential as name=value, e.g. client_key=... (repeatable)
    #[arg(long = "credential", value_name = "NAME=VALUE")]
    pub credentials: Vec<String>,
    /// YouTube OAuth client secrets JSON file
    #[arg(long)]
    pub client_secrets: Option<PathBuf>,
}

#[derive(Subcommand)]
pub(crate) enum BackendConfigCommand {
    /// Print the configuration as JSON
    Show,
    /// Replace the configuration with the contents of a JSON file
    Save { file: PathBuf },
}

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "clipdeck.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if let Some(url) = cli.api_url.clone() {
        config.api_url = Some(url);
    }

    let _log_guard = init_tracing(cli.verbose, config.log_dir.as_deref());
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(api_url = config.api_url(), "clipdeck starting");

    let cache_dir = config.cache_dir()?;
    let store = open_token_store(config.token_store, cache_dir);
    let api = ApiClient::new(config.api_url())?;
    let session = SessionManager::new(api, store, config.session_settings());

    commands::run(cli.command, &session, &mut config).await
}
