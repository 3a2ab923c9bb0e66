use nlp_service::api;
use nlp_service::gpu_detection::{detect_gpu_backend, select_device};
use nlp_service::models::load_models;
use nlp_service::{Config, NlpService};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // HuggingFace tokenizers can interfere with Tokio's blocking pool
    std::env::set_var("TOKENIZERS_PARALLELISM", "false");

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_max_level(config.log_level())
        .init();

    tracing::info!("🚀 Starting NLP service");

    let backend = detect_gpu_backend();
    let device = select_device(backend);

    tracing::info!(
        "📚 Loading models - translation: {}, simplification: {}",
        config.models.translation.repo,
        config.models.simplification.repo
    );
    let load_start = std::time::Instant::now();
    let models = load_models(&config.models, &device).await.map_err(|e| {
        tracing::error!("❌ Model loading failed: {}", e);
        e
    })?;
    tracing::info!("✅ Models loaded in {:?}", load_start.elapsed());

    let service = Arc::new(NlpService::from_models(models));
    let app = api::router(service);

    let addr = config.bind_address();
    tracing::info!("🌐 Server starting on http://{}", addr);
    tracing::info!("📡 Available endpoints:");
    tracing::info!("  • GET  /health - Health check");
    tracing::info!("  • POST /process-text - Translate or simplify text");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!("❌ Server error: {}", e);
            e
        })?;

    tracing::info!("👋 Server shutdown complete");
    Ok(())
}

// Ctrl+C for interactive runs, SIGTERM for containers.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    tracing::info!("🛑 Shutdown signal received");
}
