//! Experiment server
//!
//! Demo host application: serves a front page and an assignments API behind
//! the experiment middleware.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use experiment_kernel::{AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting experiment server");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        port = config.port,
        experiments_file = %config.experiments_file.display(),
        "Configuration loaded"
    );

    // An invalid experiments file aborts startup here.
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    info!(
        experiments = state.engine().registry().current().len(),
        store = state.engine().store().backend(),
        "Experiment registry ready"
    );

    #[cfg(unix)]
    spawn_reload_on_sighup(state.clone())?;

    let app = experiment_kernel::app(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Reload the experiments file on SIGHUP, keeping the old registry if the
/// new file does not validate.
#[cfg(unix)]
fn spawn_reload_on_sighup(state: AppState) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!(
                path = %state.experiments_file().display(),
                "SIGHUP received, reloading experiments"
            );
            if let Err(e) = state.reload_experiments() {
                tracing::error!(
                    error = %format!("{e:#}"),
                    "experiment reload failed, keeping current registry"
                );
            }
        }
    });
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
