//! tenant-proxy - single-writer access to per-tenant SQLite databases
//!
//! Serves the HTTP API that application instances use to read and write
//! tenant databases on shared storage.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tenant_proxy::storage::StoragePaths;
use tenant_proxy::{Config, TenantId};

#[derive(Parser)]
#[command(name = "tenant-proxy")]
#[command(about = "Single-writer database mediator for per-tenant SQLite files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Optional TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,

        /// Override the tenant data directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Validate configuration and print the effective settings
    Check {
        /// Optional TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the database path a tenant id resolves to
    Path {
        /// Tenant identifier
        tenant: String,

        /// Optional TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("tenant_proxy={level},tower_http={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            data_dir,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(addr) = listen {
                config.server.listen = addr;
            }
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            config.validate()?;

            init_tracing(&config.logging.level);
            tracing::info!(
                listen = %config.server.listen,
                data_dir = %config.storage.data_dir.display(),
                max_queue_depth = config.queue.max_depth,
                "Loaded configuration"
            );

            tenant_proxy::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            let config = Config::load(config.as_deref())?;
            println!("Configuration OK");
            println!("  listen:          {}", config.server.listen);
            println!("  data dir:        {}", config.storage.data_dir.display());
            println!("  database file:   {}", config.storage.file_name);
            println!("  busy timeout:    {}ms", config.storage.busy_timeout_ms);
            println!("  synchronous:     {}", config.storage.synchronous);
            println!("  max queue depth: {}", config.queue.max_depth);
            match config.queue.max_wait_ms {
                Some(ms) => println!("  max queue wait:  {}ms", ms),
                None => println!("  max queue wait:  unlimited"),
            }
            Ok(())
        }

        Commands::Path { tenant, config } => {
            let config = Config::load(config.as_deref())?;
            let tenant = TenantId::parse(&tenant)?;
            let paths = StoragePaths::new(&config.storage.data_dir, config.storage.file_name);
            println!("{}", paths.resolve(&tenant).display());
            Ok(())
        }
    }
}
