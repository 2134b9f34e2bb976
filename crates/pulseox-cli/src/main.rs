//! Command-line interface for the PulseOx backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulseox_api::{create_router, HttpIdentityVerifier, LlmConfig, OpenAiCompatGenerator, ServerState};
use pulseox_core::config::AppConfig;
use pulseox_core::{IdentityVerifier, StaticIdentityVerifier};
use pulseox_notify::{BrokerConfig, NotificationService};
use pulseox_store::{RedbTreeStore, TreeStore};

/// PulseOx - IoT health-monitoring backend.
#[derive(Parser, Debug)]
#[command(name = "pulseox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the API server and notification pipeline.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match args.command {
        Command::Serve { host, port } => serve(host, port).await,
    }
}

async fn serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = AppConfig::from_env();
    let host = host.unwrap_or_else(|| config.http_host.clone());
    let port = port.unwrap_or(config.http_port);

    let store: Arc<dyn TreeStore> = Arc::new(RedbTreeStore::open(&config.db_path)?);
    info!(db_path = %config.db_path, "document store opened");

    let mut broker_config =
        BrokerConfig::new(config.mqtt_host.clone()).with_port(config.mqtt_port);
    if let (Some(user), Some(pass)) = (&config.mqtt_username, &config.mqtt_password) {
        broker_config = broker_config.with_auth(user, pass);
    }
    broker_config = broker_config.with_tls(config.mqtt_tls);

    let notifications = NotificationService::new(
        store.clone(),
        broker_config,
        Duration::from_secs(config.schedule_grace_secs),
    );

    let identity: Arc<dyn IdentityVerifier> = match &config.identity_endpoint {
        Some(endpoint) => Arc::new(HttpIdentityVerifier::new(endpoint)),
        None => {
            warn!("no identity endpoint configured; user requests will be rejected");
            Arc::new(StaticIdentityVerifier::new())
        }
    };

    let mut llm_config = LlmConfig::new(&config.llm_endpoint, &config.llm_model);
    if let Some(key) = &config.llm_api_key {
        llm_config = llm_config.with_api_key(key);
    }
    let generator = Arc::new(OpenAiCompatGenerator::new(llm_config));

    let state = ServerState::new(store, notifications.clone(), identity, generator);
    let router = create_router(state);

    notifications.start().await?;

    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
    info!(%host, port, "server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    notifications.stop().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}
