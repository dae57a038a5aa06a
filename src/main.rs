//! AltRead - alt-text and text-to-speech API

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use altread::cache::{RedisBackend, ResultCache};
use altread::config::{Config, LogFormat};
use altread::db::Database;
use altread::log_writer::LogWriter;
use altread::routes::build_router;
use altread::services::openai::{OpenAiClient, SpeechModel, VisionModel};
use altread::state::AppState;
use altread::tasks::rate_limit_sweep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "altread=info,tower_http=info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        "AltRead v{} starting on {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr,
        config.environment
    );
    info!("Database: {}", config.redacted_database_url());

    // Connect to database
    let db = match Database::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };

    // Result cache (optional)
    let cache = match config.redis_url.as_deref() {
        Some(url) => match RedisBackend::connect(url).await {
            Ok(backend) => ResultCache::new(Arc::new(backend), config.cache_ttl)
                .with_op_timeout(config.cache_op_timeout),
            Err(e) => {
                warn!(error = %e, "Failed to connect to Redis, result caching disabled");
                ResultCache::disabled(config.cache_ttl)
            }
        },
        None => {
            info!("REDIS_URL not set, result caching disabled");
            ResultCache::disabled(config.cache_ttl)
        }
    };

    let logs = LogWriter::start(db.clone(), config.log_writer.clone());

    // Model provider (optional)
    let (vision, speech): (Option<Arc<dyn VisionModel>>, Option<Arc<dyn SpeechModel>>) =
        match config.openai_api_key.as_deref() {
            Some(key) => {
                let client = Arc::new(
                    OpenAiClient::new(key, &config.openai_base_url, config.openai_timeout)
                        .context("Failed to build OpenAI client")?,
                );
                let vision: Arc<dyn VisionModel> = client.clone();
                let speech: Arc<dyn SpeechModel> = client;
                (Some(vision), Some(speech))
            }
            None => {
                warn!("OPENAI_API_KEY not set, generation endpoints will return 503");
                (None, None)
            }
        };

    let sweep_every = config.rate_limit_sweep_interval;
    let listen_addr = config.listen_addr;
    let cors = config.cors_layer();
    let state = AppState::new(config, db, cache, logs.clone(), vision, speech);

    // Spawn background tasks
    // Log flushing runs inside the LogWriter; only the limiter sweep is ours.
    let limiter = Arc::clone(&state.rate_limiter);
    tokio::spawn(async move {
        rate_limit_sweep::rate_limit_sweep_task(limiter, sweep_every).await;
    });

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Flushing queued audit logs");
    logs.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received");
}
