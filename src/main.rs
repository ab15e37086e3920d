//! Binary entrypoint for the simulator.
//!
//! ```text
//! simjector [SCRIPT...] [-t TELEMETRY_SCRIPT] [-n NAME] [-central HOST:PORT]
//!           [-d DEBUG_FILE] [-v|-vv] [--config PATH]
//! ```
//!
//! Positional arguments are command scripts; `-t` names a
//! legacy telemetry-only script read in the same format. Exit code 0 on
//! clean shutdown (Ctrl-C triggers `Scheduler::stop()`); exit code 2 on a
//! config or script load failure.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};

use simjector::config::Config;
use simjector::relay::LineRelay;
use simjector::sim::{Scheduler, ScriptReader};

#[derive(Parser)]
#[command(name = "simjector")]
#[command(about = "Stand-alone command/telemetry simulator for exercising autonomous executives")]
#[command(version)]
struct Cli {
    /// Command script file(s)
    scripts: Vec<String>,

    /// Legacy telemetry-only script file
    #[arg(short = 't', long = "telemetry")]
    telemetry: Option<String>,

    /// Agent name passed to the CommRelay
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Central host:port for the reference transport
    #[arg(long = "central")]
    central: Option<String>,

    /// Debug config file (reserved for future use; accepted for CLI parity)
    #[arg(short = 'd', long = "debug")]
    debug: Option<String>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config).await.unwrap_or_default();
    init_logging(&config, cli.verbose);

    info!("Starting simjector v{}", env!("CARGO_PKG_VERSION"));

    let mut reader = ScriptReader::new();
    if let Err(e) = load_scripts(&mut reader, &cli).await {
        error!("Failed to load scripts: {e}");
        std::process::exit(2);
    }
    let (managers, agenda) = reader.into_parts();

    let name = cli.name.unwrap_or(config.simulator.name.clone());
    let central = cli.central.unwrap_or(config.simulator.central.clone());
    info!("Agent \"{name}\" connecting to central at {central}");

    let scheduler = Scheduler::new(managers, agenda, Arc::new(DiscardRelay));
    if let Err(e) = scheduler.start().await {
        error!("Failed to start scheduler: {e}");
        std::process::exit(2);
    }

    match LineRelay::connect(&central, scheduler.clone()).await {
        Ok((_relay, reader_task)) => {
            tokio::select! {
                _ = reader_task => {
                    info!("Transport connection closed");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                }
            }
        }
        Err(e) => {
            error!("Failed to connect to central at {central}: {e}");
            scheduler.stop().await;
            std::process::exit(2);
        }
    }

    scheduler.stop().await;
    Ok(())
}

/// A `CommRelay` that drops everything; used only until the real `LineRelay`
/// takes over, since `Scheduler::new` needs a relay up front and `LineRelay`
/// needs a running `Scheduler` to construct its read loop around.
struct DiscardRelay;

#[async_trait::async_trait]
impl simjector::sim::CommRelay for DiscardRelay {
    async fn send_response(&self, _msg: simjector::sim::ResponseMessage) {}
}

async fn load_scripts(reader: &mut ScriptReader, cli: &Cli) -> anyhow::Result<()> {
    for path in &cli.scripts {
        let file = std::fs::File::open(path)?;
        reader
            .read_script(std::io::BufReader::new(file), path, false)
            .await?;
    }
    if let Some(path) = &cli.telemetry {
        let file = std::fs::File::open(path)?;
        reader
            .read_script(std::io::BufReader::new(file), path, true)
            .await?;
    }
    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    if let Some(ref file) = config.logging.file {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(file) {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }

    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
