// Entrypoint for the `driveup` CLI.
// - Keeps `main` small: parse arguments, load configuration and hand each
//   command to the library.
// - Returns `anyhow::Result` so failures print with their context.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use driveup::account::TokenCache;
use driveup::api::GraphClient;
use driveup::cancel::{install_interrupt_handler, CancellationToken};
use driveup::config::{normalize_chunk_size, Config};
use driveup::engine::{UploadOptions, UploadOutcome, Uploader};
use driveup::retry::{Retrier, ThreadSleeper};
use driveup::state::StateStore;
use driveup::ui::{self, TerminalProgress};

#[derive(Parser)]
#[command(name = "driveup", version, about = "Resumable uploads to OneDrive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage cached accounts
    #[command(alias = "ac")]
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Upload a file, resuming a previous attempt when one is cached
    #[command(alias = "up")]
    Upload {
        /// Local file to upload
        #[arg(short, long)]
        file: PathBuf,
        /// Remote directory, e.g. /backups/2024
        #[arg(short = 'o', long = "remote")]
        remote_dir: String,
        /// Account username, defaults to the first cached account
        #[arg(short, long)]
        user: Option<String>,
        /// Chunk size in MiB, a multiple of 5 up to 60
        #[arg(long)]
        chunk_size: Option<u64>,
    },
    /// List uploads that can be resumed
    Pending {
        /// Drop the cached upload whose fingerprint starts with this prefix
        #[arg(long, value_name = "FINGERPRINT")]
        discard: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountAction {
    /// Show cached accounts
    List {
        /// Show every account field
        #[arg(long)]
        all: bool,
    },
    /// Add an account from an access token
    Add,
    /// Remove cached accounts
    Remove,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("driveup=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Account { action } => {
            let mut cache = TokenCache::load(&config.token_cache);
            match action {
                AccountAction::List { all } => ui::list_accounts(&cache, all),
                AccountAction::Add => ui::add_account(&mut cache)?,
                AccountAction::Remove => ui::remove_accounts(&mut cache)?,
            }
        }
        Commands::Upload {
            file,
            remote_dir,
            user,
            chunk_size,
        } => {
            if let Some(mb) = chunk_size {
                config.chunk_size_mb = normalize_chunk_size(mb);
            }
            upload(&config, &file, &remote_dir, user.as_deref())?;
        }
        Commands::Pending { discard } => {
            let store = StateStore::open(&config.cache_dir)?;
            match discard {
                Some(prefix) => ui::discard_pending(&store, &prefix)?,
                None => ui::list_pending(&store)?,
            }
        }
    }
    Ok(())
}

fn upload(config: &Config, file: &Path, remote_dir: &str, user: Option<&str>) -> Result<()> {
    let cache = TokenCache::load(&config.token_cache);
    let client = GraphClient::new(&config.graph_url, config.timeout)?;
    let store = StateStore::open(&config.cache_dir)
        .with_context(|| format!("cannot use cache directory {}", config.cache_dir.display()))?;

    let cancel = CancellationToken::new();
    install_interrupt_handler(cancel.clone(), || {
        eprintln!(
            "{}",
            "Stopping after the current chunk, press Ctrl-C again to quit now.".yellow()
        );
    })
    .context("failed to install Ctrl-C handler")?;

    let mut uploader = Uploader::new(
        &client,
        &cache,
        &cache,
        store,
        Retrier::new(config.retry.clone(), Box::new(ThreadSleeper)),
        UploadOptions::from(config),
        cancel,
    )
    .with_observer(Box::new(TerminalProgress::new()));

    let outcome = uploader
        .upload(file, remote_dir, user)
        .with_context(|| format!("upload of {} failed", file.display()))?;
    if let UploadOutcome::Stopped(record) = outcome {
        println!(
            "Upload of {} stopped at {}, run the same command again to resume.",
            record.filename,
            driveup::format::percent(record.bytes_finished, record.total_size)
        );
    }
    Ok(())
}
