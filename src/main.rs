//! WolfPaxos - Single-Value Paxos with Leader Election
//!
//! Command line entry point: run a node, submit a value, and manage the
//! node configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfpaxos::config::WolfPaxosConfig;
use wolfpaxos::error::Result;
use wolfpaxos::network::{Message, NetworkClient};
use wolfpaxos::replica::Replica;
use wolfpaxos::state::AcceptorStore;

/// WolfPaxos - Single-Value Paxos with Leader Election
#[derive(Parser)]
#[command(name = "wolfpaxos")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfpaxos.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfPaxos node
    Start {
        /// Value this node proposes once it leads
        #[arg(long)]
        propose: Option<String>,
    },

    /// Ask a running node to propose a value
    Propose {
        /// Node address to send the value to (host:port)
        #[arg(short, long, default_value = "localhost:7654")]
        address: String,

        /// Value to propose
        value: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfpaxos.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show the durable acceptor state and resolved value
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --log-level wins over the config file; RUST_LOG wins over both
    let level = cli.log_level.clone().unwrap_or_else(|| {
        WolfPaxosConfig::from_file(&cli.config)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    });
    init_logging(&level);

    match cli.command {
        Commands::Start { propose } => {
            run_start(cli.config, propose).await
        }
        Commands::Propose { address, value } => {
            run_propose(address, value).await
        }
        Commands::Init { output, node_id } => {
            run_init(output, node_id)
        }
        Commands::Validate => {
            run_validate(cli.config)
        }
        Commands::Status { json } => {
            run_status(cli.config, json).await
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the WolfPaxos node
async fn run_start(config_path: PathBuf, propose: Option<String>) -> Result<()> {
    tracing::info!("Starting WolfPaxos node...");

    let config = match WolfPaxosConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    tracing::info!(
        "Loaded configuration for node {} ({} nodes, quorum {})",
        config.node.id,
        config.cluster_size(),
        config.quorum_size()
    );

    let mut replica = match Replica::new(&config).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to initialize node: {}", e);
            return Err(e);
        }
    };

    if let Some(value) = propose {
        replica.propose(value).await;
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
        }
        let _ = shutdown_tx.send(true);
    });

    replica.run(shutdown_rx).await
}

/// Send a value to a running node
async fn run_propose(address: String, value: String) -> Result<()> {
    let mut client = NetworkClient::new(Duration::from_secs(5), Duration::from_secs(5));

    match client.send(&address, &Message::Propose { value: value.clone() }).await {
        Ok(()) => {
            println!("Proposed \"{}\" to {}", value, address);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to reach {}: {}", address, e);
            Err(e)
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfPaxos Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:7654"
data_dir = "/var/lib/wolfpaxos/{node_id}"
# advertise_address = "my-public-ip:7654"

[cluster]
members = [
    {{ id = "{node_id}", address = "localhost:7654" }},
]
# members = [
#     {{ id = "node-1", address = "node-1.example.com:7654" }},
#     {{ id = "node-2", address = "node-2.example.com:7654" }},
#     {{ id = "node-3", address = "node-3.example.com:7654" }},
# ]
heartbeat_interval_ms = 500
heartbeat_timeout_ms = 1500
liveness_window_ms = 2000
liveness_poll_ms = 250
liveness_jitter_ms = 250
# min_quorum = 2
# leader = "node-1"

[logging]
level = "info"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to list every cluster member.");
    println!("Then start with: wolfpaxos start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfPaxosConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Peers: {}", config.peers().count());
            println!("  Quorum Size: {}", config.quorum_size());
            println!(
                "  Initial Leader: {}",
                config.cluster.leader.as_deref().unwrap_or("(elected)")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show the durable state of this node
async fn run_status(config_path: PathBuf, json: bool) -> Result<()> {
    let config = WolfPaxosConfig::from_file(&config_path)?;
    let store = AcceptorStore::new(config.data_dir())?;
    let snapshot = store.load().await?.unwrap_or_default();
    let resolution = store.resolution().await?;

    if json {
        let status = serde_json::json!({
            "node_id": config.node.id,
            "acceptor": snapshot,
            "resolution": resolution.as_ref().map(|(id, value)| serde_json::json!({
                "proposal_id": id,
                "value": value,
            })),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let show = |id: &Option<wolfpaxos::paxos::ProposalId>| {
        id.as_ref().map_or_else(|| "-".to_string(), |id| id.to_string())
    };

    println!("WolfPaxos Node Status");
    println!("=====================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Acceptor:");
    println!("  Promised:       {}", show(&snapshot.promised_id));
    println!("  Accepted:       {}", show(&snapshot.accepted_id));
    println!("  Value:          {}", snapshot.accepted_value.as_deref().unwrap_or("-"));
    println!();
    match resolution {
        Some((id, value)) => println!("Resolved:         {} at {}", value, id),
        None => println!("Resolved:         (not yet)"),
    }

    Ok(())
}
