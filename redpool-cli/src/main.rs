use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;
mod pools;

use commands::{CliError, Target};
use pools::PoolSpec;

#[derive(Parser, Debug)]
#[command(name = "redpool", version)]
#[command(about = "Role-aware Redis pools from the command line")]
struct Cli {
    /// Pool as NAME=ROLE or NAME=HOST:PORT:ROLE (repeatable)
    #[arg(long = "pool", global = true)]
    pools: Vec<PoolSpec>,

    /// Connection URI overriding REDPOOL_HOST/REDPOOL_PORT
    #[arg(long, env = "REDPOOL_URI", global = true)]
    uri: Option<String>,

    /// Logical database index
    #[arg(long, global = true)]
    database: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// PING every pool and print a health report
    Ping,
    /// Publish a message through the dispatch workers
    Publish {
        channel: String,
        message: String,
    },
    /// Print messages from one or more channels as JSON lines
    Subscribe {
        #[arg(required = true)]
        channels: Vec<String>,
        /// Treat channels as glob patterns (PSUBSCRIBE)
        #[arg(long)]
        patterns: bool,
        /// Stop after this long, e.g. "30s" (default: until Ctrl-C)
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
    /// Read a key from a READ_ONLY pool
    Get { key: String },
    /// Write a key to a WRITABLE pool
    Set {
        key: String,
        value: String,
        /// Expire after this long, e.g. "10m"
        #[arg(long, value_parser = humantime::parse_duration)]
        ttl: Option<Duration>,
    },
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let target = Target {
        pools: cli.pools,
        uri: cli.uri,
        database: cli.database,
    };
    let database = target.connect()?;

    let result = match cli.command {
        Commands::Ping => commands::ping(&database).await,
        Commands::Publish { channel, message } => {
            commands::publish(&database, channel, message).await
        }
        Commands::Subscribe {
            channels,
            patterns,
            duration,
        } => commands::subscribe(&database, channels, patterns, duration).await,
        Commands::Get { key } => commands::get(&database, key).await,
        Commands::Set { key, value, ttl } => commands::set(&database, key, value, ttl).await,
    };

    database.cleanup();
    result
}

#[tokio::main]
async fn main() {
    // Initialize JSON logging once.
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}
