use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdcmux::lifecycle::signals;
use mdcmux::{config, dummy, fetch, Proxy};

#[derive(Parser)]
#[command(name = "mdcmux")]
#[command(about = "Policy-enforcing reverse proxy for Haas MDC connections", long_about = None)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MDC proxy
    Start {
        /// Configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run a dummy MDC host for testing
    Dummy {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:5051")]
        bind: String,
    },
    /// Fetch a range of macro variables as CSV
    Fetch {
        /// The hostname:port to connect to
        #[arg(long)]
        host: String,

        /// The path to write the results to; defaults to stdout if unset
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// The first macro variable number to fetch
        #[arg(short, long)]
        start: i64,

        /// The last macro variable number to fetch; defaults to start if unset
        #[arg(short, long)]
        end: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mdcmux=debug"
    } else {
        "mdcmux=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cancel = CancellationToken::new();
    signals::spawn_signal_handler(cancel.clone());

    match cli.command {
        Commands::Start { config } => {
            let cfg = config::watcher::watch(config, cancel.clone())?;
            let proxy = Proxy::new(cfg);
            proxy.run(cancel).await?;
        }
        Commands::Dummy { bind } => {
            let server = dummy::Server::spawn(cancel.clone(), &bind).await?;
            cancel.cancelled().await;
            drop(server);
        }
        Commands::Fetch {
            host,
            out,
            start,
            end,
        } => {
            if start == 0 {
                return Err("no starting macro variable number specified".into());
            }
            let end = end.unwrap_or(start);
            if end < start {
                return Err("end variable number must not be less than start".into());
            }
            fetch::run(&cancel, &host, out.as_deref(), start, end).await?;
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
