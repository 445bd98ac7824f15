// node/src/main.rs
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bpf-node")]
#[command(about = "Sandboxed contract execution node", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,

        /// Override data directory
        #[arg(short, long)]
        data_dir: Option<String>,
    },

    /// Initialize a new node
    Init {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,
    },

    /// Print a stored contract and its storage
    Inspect {
        /// Contract address (hex)
        #[arg(short, long)]
        address: String,

        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,

        /// Configuration file path
        #[arg(short, long, default_value = "./config.toml")]
        config: String,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Show database statistics
    Stats,

    /// Compact database
    Compact,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},hyper=warn,h2=warn", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Start { config, data_dir } => {
            start_node(&config, data_dir).await?;
        }
        Commands::Init { data_dir } => {
            init_node(&data_dir)?;
        }
        Commands::Inspect { address, config } => {
            inspect_contract(&config, &address)?;
        }
        Commands::Db { command, config } => {
            handle_db_command(&config, command)?;
        }
    }

    Ok(())
}

async fn start_node(config_path: &str, data_dir_override: Option<String>) -> anyhow::Result<()> {
    use node::{Node, NodeConfig};
    use std::sync::Arc;

    tracing::info!("Loading configuration from {}", config_path);
    let mut config = NodeConfig::from_file(config_path)?;

    if let Some(data_dir) = data_dir_override {
        config.data_dir = data_dir;
    }

    tracing::info!("Starting node with data directory: {}", config.data_dir);

    let node = Arc::new(Node::new(config)?);
    node.clone().start().await?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    node.stop().await?;
    tracing::info!("Node stopped gracefully");

    Ok(())
}

fn init_node(data_dir: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing node at {}", data_dir);

    // Create directories
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(format!("{}/db", data_dir))?;

    // Create default config
    let config = node::NodeConfig {
        data_dir: data_dir.to_string(),
        ..Default::default()
    };
    config.to_file(&format!("{}/config.toml", data_dir))?;

    tracing::info!("Node initialized successfully at {}", data_dir);
    tracing::info!("Edit {}/config.toml to configure your node", data_dir);

    Ok(())
}

fn open_database(config_path: &str) -> anyhow::Result<storage::Database> {
    let config = node::NodeConfig::from_file(config_path)?;
    Ok(storage::Database::open(config.database_config())?)
}

fn inspect_contract(config_path: &str, address: &str) -> anyhow::Result<()> {
    let address = blockchain_crypto::Address::from_hex(address)?;
    let database = open_database(config_path)?;

    let contract = database
        .get_contract(&address)?
        .ok_or_else(|| anyhow::anyhow!("Contract {} not found", address))?;
    let storage = database.load_contract_storage(&address)?;

    let info = rpc::ContractInfo::new(&contract, &storage);
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn handle_db_command(config_path: &str, command: DbCommands) -> anyhow::Result<()> {
    let database = open_database(config_path)?;

    match command {
        DbCommands::Stats => {
            let stats = database.stats()?;
            tracing::info!("Database statistics:");
            tracing::info!("  Latest block:  {}", stats.latest_block);
            tracing::info!("  Contracts:     {}", stats.total_contracts);
            tracing::info!("  Storage slots: {}", stats.total_storage_slots);
            tracing::info!("  Receipts:      {}", stats.total_receipts);
        }
        DbCommands::Compact => {
            database.compact()?;
        }
    }

    Ok(())
}
