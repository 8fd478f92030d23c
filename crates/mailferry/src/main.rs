//! mailferry - one-way IMAP mailbox synchronizer.
//!
//! Reads a YAML configuration section, connects to the source and
//! destination servers, and converges the destination toward the source.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mailferry_core::{
    Account, Catalog, ConfigFile, Copier, CopyOptions, ExcludeList, Settings, SyncScope,
    Verbosity,
};
use mailferry_imap::{PoolOptions, SessionOptions, SessionPool, TlsOptions};

/// One-way IMAP mailbox synchronizer.
#[derive(Debug, Parser)]
#[command(name = "mailferry", version, about, disable_help_subcommand = true)]
struct Cli {
    /// Configuration section to run.
    #[arg(default_value = "default")]
    section: String,

    /// Configuration file path.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Catalog database path.
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Scan both sides but change nothing.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Log verbosity: fatal, error, warn, info, debug, or imap.
    #[arg(long, value_name = "LEVEL")]
    verbosity: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be up yet; stderr directly.
            eprintln!("mailferry: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    init_logging(settings.verbosity);

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(anyhow!("failed to install rustls crypto provider"));
    }

    tokio::runtime::Runtime::new()
        .context("failed to start async runtime")?
        .block_on(sync(cli, settings))
}

/// Resolves config file + section + CLI overrides into final settings.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = ConfigFile::load(&config_path)
        .with_context(|| format!("cannot load config {}", config_path.display()))?;
    let mut settings = config
        .resolve(&cli.section)
        .with_context(|| format!("config section '{}'", cli.section))?;

    // CLI flags outrank both the named section and 'default'.
    if cli.dry_run {
        settings.dry_run = true;
    }
    if let Some(level) = &cli.verbosity {
        settings.verbosity = level
            .parse::<Verbosity>()
            .map_err(|e| anyhow!("{e}"))?;
    }
    Ok(settings)
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailferry")
        .join("config.yml")
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailferry")
        .join("catalog.db")
}

fn init_logging(verbosity: Verbosity) {
    let filter = match verbosity {
        Verbosity::Fatal | Verbosity::Error => "error",
        Verbosity::Warn => "warn",
        Verbosity::Info => "info",
        Verbosity::Debug => "debug",
        // Full wire traces, including the imap.wire target.
        Verbosity::Imap => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

async fn sync(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let database = cli.database.clone().unwrap_or_else(default_database_path);
    if let Some(parent) = database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let catalog = Arc::new(
        Catalog::open(&database.to_string_lossy())
            .await
            .with_context(|| format!("cannot open catalog {}", database.display()))?,
    );

    let tls = TlsOptions {
        verify: settings.ssl_verify,
        ca_bundle: settings.ssl_certs.clone(),
    };
    let session_options = SessionOptions {
        tls,
        max_retries: settings.max_retries,
        dry_run: settings.dry_run,
        create_mailbox: settings.create_folder,
        read_only: false,
    };

    let source_pool = Arc::new(SessionPool::new(
        settings.from.clone(),
        session_options.clone(),
        PoolOptions::default(),
    ));
    let dest_pool = Arc::new(SessionPool::new(
        settings.to.clone(),
        session_options,
        PoolOptions::default(),
    ));

    let source = Account::open(Arc::clone(&source_pool), Arc::clone(&catalog)).await?;
    let destination = Account::open(Arc::clone(&dest_pool), Arc::clone(&catalog)).await?;

    let mut exclude = ExcludeList::compile(&settings.exclude)?;
    if let Some(path) = &settings.exclude_file {
        exclude
            .load_file(path)
            .with_context(|| format!("cannot load exclude file {}", path.display()))?;
    }

    // A destination URI with a mailbox path flattens everything into it.
    let to_folder = settings
        .to
        .mailbox
        .clone()
        .or_else(|| settings.to_folder.clone());
    let options = CopyOptions {
        recursive: settings.recurse,
        create_folders: settings.create_folder,
        subscribed_only: false,
        delete: settings.delete,
        expunge: settings.expunge,
        sync_flags: settings.sync_flags,
        dry_run: settings.dry_run,
        fast_scan: settings.fast_scan,
        to_folder,
    };

    // A mailbox on the source URI narrows the scope like from-folder.
    let scope = match &settings.from.mailbox {
        Some(folder) => SyncScope::Folder(folder.clone()),
        None => settings.scope.clone(),
    };

    if settings.dry_run {
        info!("dry run: no changes will be made");
    }
    let copier = Copier::new(source, destination, options, exclude, cancel.clone());
    let result = copier.copy_all(&scope).await;

    source_pool.disconnect().await;
    dest_pool.disconnect().await;

    if let Err(e) = catalog.prune_stale_accounts().await {
        warn!(error = %e, "post-run account pruning failed");
    }

    result?;
    if cancel.is_cancelled() {
        return Err(anyhow!("interrupted"));
    }
    Ok(())
}

/// Aborts cleanly on INT, QUIT, and TERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        let Ok(mut int) = signal(SignalKind::interrupt()) else { return };
        let Ok(mut quit) = signal(SignalKind::quit()) else { return };
        let Ok(mut term) = signal(SignalKind::terminate()) else { return };
        let name = tokio::select! {
            _ = int.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
            _ = term.recv() => "SIGTERM",
        };
        warn!("Interrupted ({name})");
        cancel.cancel();
    });

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted (SIGINT)");
            cancel.cancel();
        }
    });
}
