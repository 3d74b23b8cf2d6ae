//! `filecache`: scan storages into the metadata cache and repair home
//! storage identifiers.

mod app;
mod commands;
mod error;
mod logging;
mod mounts;

use crate::app::App;
use crate::commands::{ScanArgs, SelectionArgs};
use crate::error::{ErrorKind, Result};
use crate::logging::Verbosity;
use crate::mounts::MountListPresenter;
use clap::{Parser, Subcommand};
use exn::ResultExt;
use filecache_config::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "filecache")]
#[command(about = "Metadata cache for mounted storages")]
#[command(version)]
struct Cli {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, short, global = true, env = "FILECACHE_CONFIG")]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Errors only
    #[arg(long, short, global = true)]
    quiet: bool,
    #[arg(long, global = true)]
    no_color: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan one storage, or part of it, into the cache
    Scan(ScanArgs),
    /// Bring storages to a fully scanned state, resuming incomplete folders
    BackgroundScan(SelectionArgs),
    /// Merge legacy home storage identifiers into home::<user> (runs once)
    RepairStorageIds {
        /// Run again even if a previous run completed
        #[arg(long)]
        force: bool,
    },
    /// List known storages and their availability
    Storages {
        #[arg(long)]
        json: bool,
    },
    /// List configured mounts
    Mounts {
        #[arg(long)]
        json: bool,
        /// Show passwords, secrets and tokens
        #[arg(long)]
        show_secrets: bool,
        /// Don't truncate long values
        #[arg(long)]
        full: bool,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Commands::Mounts { json, show_secrets, full } => {
            commands::mounts(&config, MountListPresenter { show_secrets, full }, json)
        },
        Commands::Scan(args) => with_app(config, async |app| commands::scan(app, args).await).await,
        Commands::BackgroundScan(selection) => {
            with_app(config, async |app| commands::background_scan(app, selection.into()).await).await
        },
        Commands::RepairStorageIds { force } => {
            with_app(config, async |app| commands::repair_storage_ids(app, force).await).await
        },
        Commands::Storages { json } => with_app(config, async |app| commands::storages(app, json).await).await,
    }
}

/// Open the cache for a command and close it again however the command ends.
async fn with_app<T>(config: Config, command: impl AsyncFnOnce(&App) -> Result<T>) -> Result<T> {
    let app = App::open(config).await?;
    let result = command(&app).await;
    app.db.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet), cli.no_color);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            if err.is_retryable() {
                eprintln!("Storages that were busy or unreachable are picked up again by the next run.");
            }
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_needs_exactly_one_target() {
        assert!(Cli::try_parse_from(["filecache", "scan"]).is_err());
        assert!(Cli::try_parse_from(["filecache", "scan", "--user", "a", "--mount", "b"]).is_err());
        let cli = Cli::try_parse_from(["filecache", "scan", "--mount", "archive", "docs", "--mode", "shallow", "--reuse", "size"])
            .unwrap();
        let Commands::Scan(args) = cli.command else { panic!("expected scan") };
        assert_eq!(args.target.mount.as_deref(), Some("archive"));
        assert_eq!(args.path, Some(PathBuf::from("docs")));
        assert_eq!(args.reuse, Some(filecache_scanner::ReuseFlags::SIZE));
    }

    #[tokio::test]
    async fn test_only_cache_commands_open_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db").join("cache.db");
        let config_path = dir.path().join("config.toml");
        let contents = format!(
            "data_directory = {:?}\n\n[database]\npath = {:?}\n",
            dir.path().join("data").display().to_string(),
            db_path.display().to_string(),
        );
        std::fs::write(&config_path, contents).unwrap();
        let config = config_path.to_str().unwrap();

        run(Cli::try_parse_from(["filecache", "--config", config, "mounts", "--json"]).unwrap()).await.unwrap();
        assert!(!db_path.exists());

        run(Cli::try_parse_from(["filecache", "--config", config, "storages", "--json"]).unwrap()).await.unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_unknown_reuse_flag_rejected() {
        assert!(Cli::try_parse_from(["filecache", "scan", "--user", "a", "--reuse", "colour"]).is_err());
    }
}
