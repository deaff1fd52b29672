mod configuration;
mod error;
mod routes;
mod state;
mod templates;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use confab::broker::EventBroker;
use confab::providers::factory;
use confab::registry::ToolRegistry;
use confab::store::MessageStore;

use configuration::{LogMode, Settings};

const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let settings = Settings::load(&config_path)?;
    init_tracing(&settings);

    let provider = factory::build_provider(
        settings.llm.clone().into_provider_config()?,
        settings.system_prompt(),
    )?;
    let title_provider = factory::build_provider(
        settings.title_llm().into_provider_config()?,
        settings.title_prompt(),
    )?;

    // The store lives beside the config file.
    let store_path = Path::new(&config_path)
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("store.db");
    let store = Arc::new(MessageStore::open(&store_path)?);

    let registry = Arc::new(ToolRegistry::connect(&settings.tool_server_configs()).await);
    let broker = EventBroker::new();

    let state = state::AppState::new(
        store,
        Arc::clone(&registry),
        Arc::clone(&broker),
        provider,
        title_provider,
    );
    let app = routes::configure(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server = {
        let broker = Arc::clone(&broker);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                    // Ending the event streams is what lets the HTTP
                    // connections drain.
                    broker.shutdown().await;
                })
                .await
        })
    };

    tokio::select! {
        result = &mut server => {
            result??;
            registry.shutdown().await;
            return Ok(());
        }
        _ = shutdown_rx.changed() => {
            info!("start shutdown");
        }
    }

    match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            warn!("graceful shutdown timed out, forcing server close");
            server.abort();
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_filter()));
    match settings.log_mode {
        LogMode::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogMode::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => warn!(%err, "failed to install terminate handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
