//! # tab-coordinator
//!
//! ```text
//! tab-coordinator broker --listen 127.0.0.1:7400
//! tab-coordinator tab --tabs 3
//! ```
//!
//! `tab` runs one or more tabs in this process. Tabs in one process share
//! an in-process channel; tabs in different processes meet through the
//! broker (`TABSYNC_BROKER_ADDR`) or a shared store directory
//! (`TABSYNC_SHARED_DIR`).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordinator_runtime::{
    init_tracing, CoordinatorConfig, SessionCoordinator, TelemetryConfig,
};
use shared_bus::{BrokerServer, ChannelHub, EventFilter};
use shared_store::{FileSharedStore, InMemorySharedStore, SharedStore};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tab-coordinator")]
#[command(about = "Cross-tab session coordination")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the out-of-process message broker.
    Broker {
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        listen: String,
    },
    /// Run tabs against the configured session API.
    Tab {
        /// Tabs to run in this process.
        #[arg(short, long, default_value_t = 1)]
        tabs: usize,
        /// Broker address, overriding `TABSYNC_BROKER_ADDR`.
        #[arg(long)]
        broker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&TelemetryConfig::from_env()).context("Failed to initialise tracing")?;
    let cli = Cli::parse();

    match cli.command {
        Command::Broker { listen } => run_broker(&listen).await,
        Command::Tab { tabs, broker } => run_tabs(tabs.max(1), broker).await,
    }
}

async fn run_broker(listen: &str) -> Result<()> {
    let server = BrokerServer::bind(listen)
        .await
        .with_context(|| format!("Failed to bind broker on {listen}"))?;
    info!(addr = %server.local_addr()?, "Broker listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broker = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down broker");
    let _ = shutdown_tx.send(true);
    broker.await.context("Broker task panicked")?;
    Ok(())
}

async fn run_tabs(count: usize, broker: Option<String>) -> Result<()> {
    let mut config = CoordinatorConfig::from_env().context("Failed to load configuration")?;
    if broker.is_some() {
        config.transport.broker_addr = broker;
    }
    config.validate().context("Invalid configuration")?;

    let coordinators = if count == 1 {
        vec![SessionCoordinator::from_config(config).context("Failed to build coordinator")?]
    } else {
        build_local_tabs(config, count)?
    };

    let mut subscriptions = Vec::new();
    for tab in &coordinators {
        tab.start().await;
        let tab_id = tab.tab_id().clone();
        let mut events = tab.listen(EventFilter::all());
        subscriptions.push(tokio::spawn(async move {
            while let Some(message) = events.recv().await {
                info!(
                    tab_id = %tab_id,
                    message_type = %message.message_type,
                    source = %message.source_tab_id,
                    "Observed coordination event"
                );
            }
        }));
        info!(
            tab_id = %tab.tab_id(),
            leader = tab.is_leader(),
            transport = ?tab.active_transport(),
            "Tab running"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutting down tabs");
    for task in subscriptions {
        task.abort();
    }
    for tab in &coordinators {
        tab.stop().await;
    }
    Ok(())
}

/// Several tabs in one process: one channel hub, one shared store and one
/// context-local store per tab.
fn build_local_tabs(config: CoordinatorConfig, count: usize) -> Result<Vec<SessionCoordinator>> {
    let hub = ChannelHub::new("tabsync");
    let shared: Arc<dyn SharedStore> = match &config.storage.shared_dir {
        Some(dir) => Arc::new(
            FileSharedStore::open("shared", dir.clone()).context("Failed to open shared store")?,
        ),
        None => Arc::new(InMemorySharedStore::new("shared")),
    };
    let api = Arc::new(
        coordinator_runtime::adapters::HttpSessionApi::new(&config.api)
            .context("Failed to build session API client")?,
    );

    (0..count)
        .map(|_| {
            let mut builder = SessionCoordinator::builder(config.clone(), api.clone())
                .shared_store(shared.clone())
                .local_store(Arc::new(InMemorySharedStore::new("local")));
            if config.transport.channel {
                builder = builder.channel_hub(hub.clone());
            }
            builder.build().context("Failed to build coordinator")
        })
        .collect()
}
