//! Startup helpers for the console server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::core::config::JarvisConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    tracing::info!("Starting J.A.R.V.I.S. console v{}", env!("CARGO_PKG_VERSION"));

    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` refines the default
/// `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Build application state from the environment.
///
/// # Errors
/// Returns an error if configuration is invalid or the model client cannot
/// be created.
pub async fn initialize() -> anyhow::Result<Arc<AppState>> {
    let config = JarvisConfig::from_env().context("failed to read configuration")?;
    tracing::info!(
        model = %config.model.model,
        endpoint = %config.model.base_url,
        port = config.server.port,
        "configuration loaded"
    );
    AppState::from_config(config)
        .await
        .context("failed to create application state")
}

fn serve() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to create runtime")?;
    runtime.block_on(async {
        let state = initialize().await?;
        server::run_server_with_shutdown(state, server::shutdown_signal())
            .await
            .context("server error")
    })
}
