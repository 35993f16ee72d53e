use anyhow::{Context, Result};
use rollcall_core::OnnxEmbedder;
use rollcall_store::{Database, FsImageStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = config::Config::from_env()?;

    let db = Arc::new(
        Database::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    let images = Arc::new(
        FsImageStore::open(&config.face_dir)
            .with_context(|| format!("opening face directory {}", config.face_dir.display()))?,
    );
    let pipeline = Arc::new(config.pipeline.clone());

    // Models load lazily; a failed load is logged and every detection then
    // reports "no face" until restart.
    let embedder = OnnxEmbedder::new(&config.model_dir, &pipeline);
    if embedder.warm_up() {
        tracing::info!(model_dir = %config.model_dir.display(), "face models loaded");
    } else {
        tracing::error!(
            model_dir = %config.model_dir.display(),
            "face models unavailable; check-in and registration will report no face"
        );
    }

    let engine = engine::spawn_engine(
        engine::Engine {
            embedder: Box::new(embedder),
            db: db.clone(),
            images: images.clone(),
            config: pipeline.clone(),
        },
        config.inference_timeout,
    )?;

    if config.allowed_kiosk_ips.is_empty() {
        tracing::warn!("ROLLCALL_ALLOWED_KIOSK_IPS is empty; kiosk endpoints accept any client");
    }

    let app = http::router(http::AppState {
        engine,
        db,
        images,
        pipeline,
        allowed_kiosk_ips: Arc::new(config.allowed_kiosk_ips.clone()),
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "rollcalld ready");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("rollcalld shutting down");
    })
    .await?;

    Ok(())
}
