//! CLI entry point for `mailfetch`.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};

use mailfetch::config::{self, Config};
use mailfetch::parser::mime;
use mailfetch::pipeline::fetch_window;
use mailfetch::reply::extract_latest;
use mailfetch::source::MboxSource;
use mailfetch::store::seen::SeenStore;
use mailfetch::window::TimeWindow;

/// Normalize mail into JSON records and never deliver the same message twice.
#[derive(Parser)]
#[command(name = "mailfetch", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Return messages that arrived in a time window and were not returned before
    Fetch {
        /// Window start, RFC 3339 (inclusive)
        #[arg(long)]
        since: DateTime<Utc>,
        /// Window end, RFC 3339 (inclusive)
        #[arg(long)]
        until: DateTime<Utc>,
        /// MBOX file to read (defaults to [source].mbox)
        #[arg(long, value_name = "FILE")]
        mbox: Option<PathBuf>,
        /// State file (defaults to [state].path)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
    },
    /// Decode one message file and print its record
    Parse {
        path: PathBuf,
        /// Arrival timestamp, RFC 3339 (defaults to the file's modification time)
        #[arg(long)]
        received_at: Option<DateTime<Utc>>,
    },
    /// Read a body from stdin and print the latest reply without quoted history
    Latest,
    /// Print the number of delivered message identities
    Seen {
        /// State file (defaults to [state].path)
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the configuration file
        #[arg(long)]
        write: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Fetch {
            since,
            until,
            mbox,
            state,
        } => cmd_fetch(&config, since, until, mbox, state),
        Commands::Parse { path, received_at } => cmd_parse(&path, received_at),
        Commands::Latest => cmd_latest(),
        Commands::Seen { state } => cmd_seen(&config, state),
        Commands::Config { write } => cmd_config(&config, write),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailfetch.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_store(config: &Config, state: Option<PathBuf>) -> anyhow::Result<SeenStore> {
    let mut state_config = config.state.clone();
    if let Some(path) = state {
        state_config.path = path;
    }
    SeenStore::from_config(&state_config)
        .with_context(|| format!("Cannot open state file {}", state_config.path.display()))
}

fn cmd_fetch(
    config: &Config,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    mbox: Option<PathBuf>,
    state: Option<PathBuf>,
) -> anyhow::Result<()> {
    let window = TimeWindow::new(since, until)?;
    let mbox = mbox
        .or_else(|| config.source.mbox.clone())
        .context("No MBOX file: pass --mbox or set [source].mbox in the config")?;

    let mut store = open_store(config, state)?;
    let mut source = MboxSource::open(&mbox)?;
    let response = fetch_window(&mut source, &mut store, &window)?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_parse(path: &Path, received_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let raw = std::fs::read(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let received_at = match received_at {
        Some(ts) => ts,
        None => DateTime::<Utc>::from(std::fs::metadata(path)?.modified()?),
    };

    let email = mime::decode(&raw, received_at)?;
    println!("{}", serde_json::to_string_pretty(&email)?);
    Ok(())
}

fn cmd_latest() -> anyhow::Result<()> {
    let mut body = String::new();
    std::io::stdin().read_to_string(&mut body)?;
    println!("{}", extract_latest(&body));
    Ok(())
}

fn cmd_seen(config: &Config, state: Option<PathBuf>) -> anyhow::Result<()> {
    let store = open_store(config, state)?;
    println!("{}", store.len());
    Ok(())
}

fn cmd_config(config: &Config, write: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if write {
        config::save_config(config)?;
        if let Some(path) = config::config_file_path() {
            eprintln!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailfetch", &mut std::io::stdout());
    Ok(())
}
