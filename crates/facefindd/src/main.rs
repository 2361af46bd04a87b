use anyhow::{Context, Result};
use facefind_engine::{spawn_engine, BootstrapCache, Config, FacefindService};
use facefind_vision::OnnxProvider;
use tracing_subscriber::EnvFilter;

mod api;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facefindd starting");

    let config = Config::load()?;
    let provider = OnnxProvider::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    let engine = spawn_engine(provider)?;
    let service = FacefindService::open(&config, engine)?;

    let bootstrap = if config.bootstrap {
        match BootstrapCache::load(service.images(), service.engine()).await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap cache unavailable; starting empty");
                BootstrapCache::empty()
            }
        }
    } else {
        tracing::info!("bootstrap cache disabled via FACEFIND_BOOTSTRAP");
        BootstrapCache::empty()
    };

    let app = api::router(api::AppState::new(service, bootstrap), config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "facefindd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facefindd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
    }
}
