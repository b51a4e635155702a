use std::sync::Arc;

use anyhow::{Context, Result};
use liveframe_core::FaceEmbedder;
use tokio::signal;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
#[cfg(test)]
mod test_support;

use config::Config;
use http::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        listen = %config.listen,
        workers = config.workers,
        model_dir = %config.model_dir.display(),
        spoof_policy = %config.spoof_policy,
        "liveframed starting"
    );

    if config.verify_models {
        liveframe_models::verify_models_dir(&config.model_dir)
            .context("model integrity check failed")?;
        tracing::info!("model checksums verified");
    } else {
        tracing::warn!("model checksum verification disabled");
    }

    let detector_path = config.detector_model_path();
    let recognizer_path = config.recognizer_model_path();
    let engine = engine::spawn_engine(
        config.workers,
        || FaceEmbedder::load(&detector_path, &recognizer_path),
        config.pipeline_config(),
    )
    .context("failed to start scoring engine")?;

    let state = Arc::new(AppState {
        engine,
        max_frames: config.max_frames,
        reply_timeout: config.reply_timeout(),
        spoof_policy: config.spoof_policy,
        spoof: config.spoof,
        liveness: config.liveness,
    });

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(addr = %config.listen, "liveframed ready");

    axum::serve(listener, http::router(state, config.max_body_bytes))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("liveframed shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
