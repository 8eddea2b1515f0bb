use anyhow::{Context, Result};
use oculus_core::{Pipeline, UploadArea};
use oculus_store::SqliteRecordStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    // Before the subscriber, so RUST_LOG may come from .env.
    let env_file = match dotenvy::dotenv() {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => return Err(e).context("failed to read .env"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Some(path) = env_file {
        tracing::info!(path = %path.display(), "loaded environment file");
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "oculusd starting");

    let config = config::Config::from_env()?;
    tracing::info!(
        store = %config.store_uri,
        database = %config.database_name,
        collection = %config.collection_name,
        uploads = %config.upload_dir.display(),
        models = %config.model_dir.display(),
        "configuration loaded"
    );

    let uploads = UploadArea::new(&config.upload_dir);
    uploads
        .ensure_exists()
        .await
        .with_context(|| format!("cannot create {}", config.upload_dir.display()))?;

    let store = SqliteRecordStore::open(
        &config.store_uri,
        &config.database_name,
        &config.collection_name,
    )
    .await?;

    let engine = engine::spawn_engine(
        &engine::ModelPaths {
            objects: config.object_model_path(),
            poses: config.pose_model_path(),
            faces: config.face_model_path(),
            emotions: config.emotion_model_path(),
        },
        config.intra_threads,
    )?;

    let pipeline = Pipeline::new(Arc::new(engine), Arc::new(store), uploads)
        .with_history_limit(config.history_limit);
    let app = http::router(http::AppState { pipeline });

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "oculusd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("oculusd shutting down");
        })
        .await?;

    Ok(())
}
