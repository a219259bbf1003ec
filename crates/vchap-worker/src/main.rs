//! Chaptering worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vchap_queue::{NotificationChannel, QueueConfig, TaskQueue};
use vchap_worker::asr::LazyAsr;
use vchap_worker::llm::LazyLlm;
use vchap_worker::{MemoryStore, ProcessingContext, TaskExecutor, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vchap=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vchap-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = QueueConfig::from_env();
    let queue = match TaskQueue::new(queue_config.clone()) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create task queue: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = match NotificationChannel::new(&queue_config.redis_url) {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to create notification channel: {}", e);
            std::process::exit(1);
        }
    };

    let transcriber = Arc::new(LazyAsr::from_env());
    let generator = Arc::new(LazyLlm::from_env());

    let store = MemoryStore::new();
    let ctx = ProcessingContext {
        jobs: Arc::new(store.clone()),
        videos: Arc::new(store.clone()),
        chapters: Arc::new(store),
        transcriber: Arc::clone(&transcriber) as Arc<dyn vchap_worker::adapters::TranscriptionAdapter>,
        generator: Arc::clone(&generator) as Arc<dyn vchap_worker::adapters::GenerationAdapter>,
        notifier: Arc::new(notifier),
        config: config.clone(),
    };

    let executor = Arc::new(TaskExecutor::new(config, queue, ctx));

    // Signal handler triggers graceful shutdown
    let shutdown_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    // Release cached model clients before exit
    transcriber.unload().await;
    generator.unload().await;

    info!("Worker shutdown complete");
}
