//! CLI entry point for sqlds.
//!
//! The `sqlds` binary exposes the session and CRUD operations of
//! `sqlds-store` as subcommands. Results are printed to stdout as JSON;
//! logs go to stderr.

mod config;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlds_store::{
    DataSystem, DeleteRequest, InsertRequest, SelectRequest, SessionInfo, StoreLocation,
    UpdateRequest,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::StoreConfig;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// sqlds: sessions and generic CRUD over an embedded SQLite store.
#[derive(Parser)]
#[command(
    name = "sqlds",
    version,
    about = "sqlds: sessions and generic CRUD over SQLite",
    long_about = "Opens (or creates) a SQLite store, bootstraps the user/group/permission \
                  schema on first use, and runs one session or CRUD operation per call."
)]
struct Cli {
    /// Config file with a [store] section.
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Store name (":memory:" for a throwaway store).
    #[arg(long, global = true, env = "SQLDS_DB_NAME")]
    db: Option<String>,

    /// Path template; "$filename" is replaced by the store name.
    #[arg(long, global = true, env = "SQLDS_LOCATOR")]
    locator: Option<String>,

    /// Default log filter, used when RUST_LOG is not set.
    #[arg(long, global = true, env = "SQLDS_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and seed the auth schema if it does not exist yet.
    Init,

    /// Open a session for NAME and print its token.
    Login { name: String, password: String },

    /// Close the session holding TOKEN.
    Logout { token: String },

    /// Replace TOKEN with a fresh one.
    Refresh { token: String },

    /// Create a user account.
    Register { name: String, password: String },

    /// Delete the user owning TOKEN with all of its sessions.
    Deregister { token: String },

    /// Show the session and permissions behind TOKEN.
    Whoami { token: String },

    /// Print every table with its columns and foreign keys.
    Schema,

    /// Run a select request, e.g. '{"table":"users","where":[["age",">",26]]}'.
    Select { request: String },

    /// Run an insert request, e.g. '{"table":"users","item":{"name":"Alice"}}'.
    Insert { request: String },

    /// Run an update request, e.g. '{"table":"users","values":{"age":26}}'.
    Update { request: String },

    /// Run a delete request, e.g. '{"table":"users","where":[["id","=",1]]}'.
    Delete { request: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let store_config = config::load(&cli.config)?;
    init_tracing(log_level(&cli, &store_config));

    let system = open_system(&cli, &store_config);
    debug!(name = system.db.name(), location = ?system.db.location(), "store selected");

    if let StoreLocation::File(path) = system.db.location()
        && let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }

    run(&system, cli.command).await
}

/// Initialize the tracing subscriber on stderr, honouring `RUST_LOG`.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Command-line (or `SQLDS_LOG`) level wins over the config file.
fn log_level<'a>(cli: &'a Cli, config: &'a StoreConfig) -> &'a str {
    cli.log_level.as_deref().unwrap_or(&config.log_level)
}

/// Command-line values win over the config file.
fn open_system(cli: &Cli, config: &StoreConfig) -> DataSystem {
    let name = cli.db.clone().unwrap_or_else(|| config.name.clone());
    let locator = cli.locator.as_deref().unwrap_or(&config.locator);
    DataSystem::with_options(name, locator, config.rest_options())
}

async fn run(system: &DataSystem, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            let outcome = system.auth.init().await.context("bootstrap failed")?;
            print_json(&serde_json::json!({ "bootstrap": outcome }))
        }
        Commands::Login { name, password } => {
            print_json(&system.auth.open_session(&name, &password).await?)
        }
        Commands::Logout { token } => {
            system.auth.close_session(&token).await?;
            print_json(&serde_json::json!({ "closed": true }))
        }
        Commands::Refresh { token } => print_json(&system.auth.refresh_session(&token).await?),
        Commands::Register { name, password } => {
            system.auth.register_user(&name, &password).await?;
            print_json(&serde_json::json!({ "registered": name }))
        }
        Commands::Deregister { token } => {
            system.auth.deregister_user(&token).await?;
            print_json(&serde_json::json!({ "deregistered": true }))
        }
        Commands::Whoami { token } => {
            let session = system
                .auth
                .validate_session(&token)
                .await?
                .context("no live session for this token")?;
            let permissions = system.auth.permissions(&token).await?;
            print_json(&Whoami {
                session,
                permissions,
            })
        }
        Commands::Schema => print_json(&system.rest.get_schema().await?),
        Commands::Select { request } => {
            let request: SelectRequest = parse_request(&request)?;
            print_json(&system.rest.select(request).await?)
        }
        Commands::Insert { request } => {
            let request: InsertRequest = parse_request(&request)?;
            print_json(&system.rest.insert(request).await?)
        }
        Commands::Update { request } => {
            let request: UpdateRequest = parse_request(&request)?;
            print_json(&system.rest.update(request).await?)
        }
        Commands::Delete { request } => {
            let request: DeleteRequest = parse_request(&request)?;
            print_json(&system.rest.delete(request).await?)
        }
    }
}

#[derive(Serialize)]
struct Whoami {
    #[serde(flatten)]
    session: SessionInfo,
    permissions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a JSON request; `-` reads it from stdin.
fn parse_request<T: DeserializeOwned>(arg: &str) -> Result<T> {
    let raw = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read request from stdin")?;
        buf
    } else {
        arg.to_string()
    };
    serde_json::from_str(&raw).context("request is not valid JSON for this command")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{json}");
    Ok(())
}
