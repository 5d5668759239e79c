use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use btsmarthub2_exporter::{
    archive::Archive,
    config::{self, Config},
    extract::{extract, PollResult},
    metrics::Recorder,
    poller::{self, Poller},
    server,
};

#[derive(Parser)]
#[command(name = "btsmarthub2-exporter")]
#[command(about = "Export BT Smart Hub 2 broadband statistics as Prometheus metrics")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the hub continuously and serve metrics
    Run {
        /// IP address or hostname of the hub
        #[arg(long)]
        address: Option<String>,

        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,

        /// Request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Port to serve metrics on
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Directory to archive raw responses to
        #[arg(long)]
        datastore: Option<PathBuf>,
    },

    /// Parse a saved status page and print the result
    Parse {
        /// File containing the XML body
        file: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// HTTP status code to attribute to the body
        #[arg(long, default_value = "200")]
        status_code: u16,
    },

    /// Fetch the status page once and save it to a file
    Fetch {
        /// Output file path
        #[arg(short, long, default_value = "wan_conn.xml")]
        output: PathBuf,
    },

    /// Write a config file with the default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            address,
            interval,
            timeout_ms,
            metrics_port,
            datastore,
        } => {
            let mut cfg = Config::load(config_file)?;
            if let Some(address) = address {
                cfg.router.address = address;
            }
            if let Some(interval) = interval {
                cfg.router.interval_secs = interval;
            }
            if let Some(timeout_ms) = timeout_ms {
                cfg.router.timeout_ms = timeout_ms;
            }
            if let Some(port) = metrics_port {
                cfg.metrics.port = port;
            }
            if datastore.is_some() {
                cfg.datastore = datastore;
            }
            cmd_run(cfg).await
        }
        Commands::Parse {
            file,
            json,
            status_code,
        } => cmd_parse(&file, json, status_code),
        Commands::Fetch { output } => cmd_fetch(config_file, &output),
        Commands::InitConfig { force } => cmd_init_config(config_file, force),
        Commands::ShowConfig => cmd_show_config(config_file),
    }
}

async fn cmd_run(cfg: Config) -> Result<()> {
    if cfg.router.interval_secs == 0 {
        bail!("Polling interval must be at least one second");
    }

    let archive = match &cfg.datastore {
        Some(dir) => {
            let archive = Archive::open(dir)?;
            info!("Archiving responses to {}", archive.dir().display());
            Some(archive)
        }
        None => None,
    };

    let recorder = Arc::new(Recorder::new().context("Failed to register metrics")?);
    let poller = Poller::new(&cfg.router, archive)?;

    let server_config = server::ServerConfig {
        listen: cfg.metrics.listen.clone(),
        port: cfg.metrics.port,
        metrics_path: cfg.metrics.path.clone(),
        poll_url: poller.url().to_string(),
    };

    tokio::select! {
        result = server::run_server(server_config, recorder.clone()) => result,
        _ = poller.run(recorder, cfg.router.interval()) => Ok(()),
    }
}

fn cmd_parse(file: &Path, json: bool, status_code: u16) -> Result<()> {
    let body = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let started = Instant::now();
    let result = extract(&body, status_code);
    let elapsed = started.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        display_result(&result);
        println!("Parsed in:        {:?}", elapsed);
    }

    if !result.is_good() {
        bail!("{} did not yield a good poll ({:?})", file.display(), result.state);
    }

    Ok(())
}

fn cmd_fetch(config_file: Option<&Path>, output: &Path) -> Result<()> {
    let cfg = Config::load(config_file)?;

    println!("Fetching {} ...", cfg.router.poll_url());
    let status = poller::fetch_to_file(&cfg.router, output)?;
    println!("HTTP {}, saved to {}", status, output.display());

    Ok(())
}

fn cmd_init_config(config_file: Option<&Path>, force: bool) -> Result<()> {
    let path = match config_file {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default().save(&path)?;
    println!("Wrote default config to {}", path.display());

    Ok(())
}

fn cmd_show_config(config_file: Option<&Path>) -> Result<()> {
    let path = match config_file {
        Some(p) => p.to_path_buf(),
        None => config::config_path()?,
    };
    println!("Config file: {}", path.display());
    if !path.exists() {
        println!("(not found, using defaults)");
    }
    println!();

    let cfg = Config::load(Some(&path))?;
    print!("{}", toml::to_string_pretty(&cfg).context("Failed to serialize config")?);

    Ok(())
}

fn display_result(result: &PollResult) {
    println!("State:            {:?}", result.state);
    println!("Connectivity:     {:?}", result.connectivity);
    if let Some(ref medium) = result.medium {
        println!("Medium:           {}", medium);
    }
    println!("Connection up:    {}s", result.connection_uptime_seconds);
    println!("System up:        {}s", result.system_uptime_seconds);
    println!(
        "Rate up/down:     {} / {} bps",
        result.upload_rate_bps, result.download_rate_bps
    );
    println!(
        "Bytes up/down:    {} / {}",
        result.upload_bytes_total, result.download_bytes_total
    );

    if !result.errors.is_empty() {
        println!();
        println!("{:<12} {:<22} {}", "KIND", "FIELD", "MESSAGE");
        println!("{}", "-".repeat(60));
        for error in &result.errors {
            let field = error.field().map(|f| f.node_name()).unwrap_or("-");
            println!("{:<12} {:<22} {}", error.kind().as_str(), field, error);
        }
    }
}
