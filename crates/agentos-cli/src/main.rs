mod config;

use agentos_core::Metadata;
use agentos_gateway::{AuthConfig, GatewayServer};
use agentos_orchestrator::{builtin_agents, Classifier, Complexity, Orchestrator};
use clap::{Parser, Subcommand};
use config::AgentosConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentos", about = "agentos: task orchestration and agent dispatch")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentos.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show which capability a text would be routed to
    Classify {
        /// Task text
        text: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => {
            let config = AgentosConfig::load(&cli.config).await?;
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let store = config.open_store().await?;
            info!(kind = ?config.store.kind, data_dir = %config.data_dir.display(), "Task store ready");

            let orchestrator = Arc::new(Orchestrator::new(
                config.orchestrator,
                builtin_agents(),
                store,
            )?);
            orchestrator.start().await?;

            let auth = AuthConfig::new(config.security.api_keys);
            if auth.is_enabled() {
                info!(keys = auth.api_keys.len(), "API key auth enabled");
            }
            let app = GatewayServer::build_with_auth(orchestrator.clone(), auth);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("agentos gateway listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            orchestrator.shutdown().await;
        }
        Commands::Classify { text } => {
            let classification = Classifier::new().classify_detailed(&text, &Metadata::new());
            let matched: Vec<&str> = classification.matched.iter().map(|c| c.as_str()).collect();
            println!("capability: {}", classification.capability);
            println!("matched:    {}", matched.join(", "));
            println!("complexity: {}", Complexity::of(&text).as_str());
        }
        Commands::Config => {
            let config = AgentosConfig::load(&cli.config).await?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
