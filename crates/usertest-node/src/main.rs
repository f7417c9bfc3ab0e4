use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usertest_node::config::{NodeConfig, StorageBackend};
use usertest_node::{logging, UserTestNode};

const DEFAULT_CONFIG_FILE: &str = "usertest-config.toml";

#[derive(Parser)]
#[command(name = "usertest")]
#[command(about = "UserTest wallet and escrow ledger", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Start {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP API
        #[arg(short, long)]
        port: Option<u16>,

        /// Postgres connection string; selects the postgres store
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Write a default configuration file
    Init {
        /// Output directory for configuration
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Settle every matured hold once and exit
    Settle,

    /// Issue a bearer token for local testing
    Token {
        /// User id to put in the token subject
        user_id: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            NodeConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => NodeConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (ignore if it doesn't)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Priority order: CLI args > ENV vars > Config file > Defaults
    let mut config = load_config(cli.config.as_deref())?;

    if let Err(e) = logging::init_logging(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        let log_level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| format!("usertest={}", log_level)),
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command {
        Commands::Start {
            host,
            port,
            database_url,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(url) = database_url {
                config.storage.backend = StorageBackend::Postgres;
                config.storage.database_url = Some(url);
            }

            info!(
                version = env!("CARGO_PKG_VERSION"),
                host = %config.server.host,
                port = config.server.port,
                storage = ?config.storage.backend,
                platform_fee_percent = config.ledger.platform_fee_percent,
                "🚀 Starting ledger node"
            );

            let node = Arc::new(UserTestNode::new(config).await?);
            info!("✅ Node initialized successfully");
            node.run().await
        }

        Commands::Init { output } => {
            std::fs::create_dir_all(&output)?;
            let path = output.join(DEFAULT_CONFIG_FILE);
            if path.exists() {
                bail!("{} already exists", path.display());
            }

            NodeConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "⚙️ Configuration written");
            Ok(())
        }

        Commands::Settle => {
            let node = UserTestNode::new(config).await?;
            let settled = node.settle_all().await?;
            info!(entries = settled, "✅ Settlement finished");
            Ok(())
        }

        Commands::Token { user_id } => {
            if config.auth.jwt_secret.is_empty() {
                bail!("set auth.jwt_secret or JWT_SECRET so the server accepts the token");
            }
            let auth = usertest_node::AuthConfig::from_settings(&config.auth);
            let token = auth
                .create_token(&user_id)
                .map_err(|e| anyhow::anyhow!("failed to create token: {:?}", e))?;
            println!("{}", token);
            Ok(())
        }
    }
}
