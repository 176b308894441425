use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage::SqliteStore;

pub mod commands;

use self::commands::{AddArgs, CalendarArgs, ClearArgs, RemoveArgs, SummaryArgs};

pub const LOG_FILE: &str = "weightlog.log";

#[derive(Parser, Debug)]
#[command(
    name = "weightlog",
    version,
    about = "Keyboard-first body-weight log with a month calendar"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over WEIGHTLOG_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over WEIGHTLOG_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive calendar (default)
    Tui,
    /// Record a weight for a day
    Add(AddArgs),
    /// Print a month grid with recorded weights
    Calendar(CalendarArgs),
    /// List a month's records in date order
    Summary(SummaryArgs),
    /// Delete one record by id
    Remove(RemoveArgs),
    /// Delete every record
    Clear(ClearArgs),
}

enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    let log_file = paths.log_dir.join(LOG_FILE);
    let target = match command {
        Commands::Tui => LogTarget::File(&log_file),
        _ => LogTarget::Stderr,
    };
    init_tracing(&cli.log_level, target)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let config = Arc::new(loader.load_or_init()?);
    let store = Arc::new(SqliteStore::from_options(&config.storage));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("weightlog-store")
        .build()
        .context("starting async runtime")?;

    match command {
        Commands::Tui => commands::run_tui(config, store, &runtime),
        Commands::Add(args) => runtime.block_on(commands::add_weight(&config, store.as_ref(), args)),
        Commands::Calendar(args) => runtime.block_on(commands::show_calendar(&config, store, args)),
        Commands::Summary(args) => runtime.block_on(commands::show_summary(store, args)),
        Commands::Remove(args) => runtime.block_on(commands::remove_record(store.as_ref(), args)),
        Commands::Clear(args) => runtime.block_on(commands::clear_records(store.as_ref(), args)),
    }
}

fn init_tracing(level: &str, target: LogTarget<'_>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match target {
            LogTarget::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}
