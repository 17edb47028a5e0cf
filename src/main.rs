//! Image Pipeline Service
//!
//! Runs the HTTP API and the worker pool in one process.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use image_pipeline::artifact::link::LinkSigner;
use image_pipeline::artifact::store::ObjectArtifactStore;
use image_pipeline::cache::memory::MemoryCache;
use image_pipeline::config::S3Config;
use image_pipeline::ledger::StatusLedger;
use image_pipeline::ledger::memory::MemoryLedger;
use image_pipeline::ledger::sqlite::SqliteLedger;
use image_pipeline::pipeline::types::PipelineSettings;
use image_pipeline::queue::local::LocalQueue;
use image_pipeline::transform::ResizeGrayscale;
use image_pipeline::{Config, Pipeline, WorkerPool, api};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "image-pipeline")]
#[command(about = "Asynchronous image processing service", long_about = None)]
struct Cli {
    /// Path to a JSON configuration file; built-in defaults when omitted
    #[arg(short, long, global = true, env = "IMAGE_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long, global = true, env = "BIND_ADDR")]
    bind: Option<String>,

    /// Override the worker pool size
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Store artifacts under this directory
    #[arg(long, global = true, env = "STORAGE_PATH")]
    storage_path: Option<PathBuf>,

    /// S3-compatible endpoint (MinIO); the raw and processed containers become buckets
    #[arg(long, global = true, env = "MINIO_ENDPOINT")]
    minio_endpoint: Option<String>,

    #[arg(long, global = true, env = "MINIO_ACCESS_KEY")]
    minio_access_key: Option<String>,

    #[arg(long, global = true, env = "MINIO_SECRET_KEY", hide_env_values = true)]
    minio_secret_key: Option<String>,

    /// Journal file making queued tasks survive a restart
    #[arg(long, global = true, env = "QUEUE_JOURNAL")]
    queue_journal: Option<PathBuf>,

    /// SQLite file making image records survive a restart
    #[arg(long, global = true, env = "LEDGER_PATH")]
    ledger_path: Option<PathBuf>,

    /// Hex-encoded 32-byte key for download link signatures
    #[arg(long, global = true, env = "LINK_SECRET", hide_env_values = true)]
    link_secret: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API and the workers (default if no command specified)
    Serve,

    /// Validate configuration
    Validate,

    /// Write a configuration file with every default filled in
    GenerateConfig {
        #[arg(short, long, default_value = "image-pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Serve) => {
            let config = load_config(&cli)?;
            serve(config).await?;
        }

        Some(Commands::Validate) => {
            load_config(&cli)?;
            println!("Configuration is valid");
        }

        Some(Commands::GenerateConfig { ref output }) => {
            generate_config(output)?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Apply overrides
    if let Some(bind) = &cli.bind {
        config.http.bind = bind.clone();
    }
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }
    if let Some(path) = &cli.storage_path {
        config.storage.local_path = Some(path.clone());
    }
    if let Some(endpoint) = &cli.minio_endpoint {
        config.storage.s3 = Some(S3Config {
            endpoint: Some(endpoint.clone()),
            access_key_id: cli.minio_access_key.clone(),
            secret_access_key: cli.minio_secret_key.clone(),
            ..S3Config::default()
        });
    }
    if let Some(journal) = &cli.queue_journal {
        config.queue.journal_path = Some(journal.clone());
    }
    if let Some(path) = &cli.ledger_path {
        config.ledger.path = Some(path.clone());
    }
    if let Some(secret) = &cli.link_secret {
        config.links.secret_hex = Some(secret.clone());
    }

    config.validate()?;
    Ok(config)
}

fn generate_config(output: &Path) -> Result<()> {
    std::fs::write(output, Config::default().to_json()?)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    // 1. Collaborators:
    let containers = [
        config.storage.raw_container.as_str(),
        config.storage.processed_container.as_str(),
    ];
    let artifacts = Arc::new(match (&config.storage.s3, &config.storage.local_path) {
        (Some(s3), _) => ObjectArtifactStore::s3(s3, &containers)?,
        (None, Some(path)) => ObjectArtifactStore::local(path)?,
        (None, None) => {
            tracing::warn!("No artifact storage configured, keeping artifacts in memory");
            ObjectArtifactStore::in_memory()
        }
    });
    tracing::info!(
        "Artifact containers: raw={} processed={}",
        config.storage.raw_container,
        config.storage.processed_container
    );
    artifacts.provision().await?;

    let ledger: Arc<dyn StatusLedger> = match &config.ledger.path {
        Some(path) => Arc::new(SqliteLedger::open(path)?),
        None => {
            if config.queue.journal_path.is_some() {
                tracing::warn!(
                    "Ledger is in-memory; restored tasks whose records did not survive the restart will be dropped"
                );
            }
            Arc::new(MemoryLedger::new())
        }
    };

    let queue = Arc::new(match &config.queue.journal_path {
        Some(path) => LocalQueue::open(path, config.queue.prefetch).await?,
        None => LocalQueue::new(config.queue.prefetch),
    });

    let cache = Arc::new(MemoryCache::with_capacity(config.cache.max_entries));

    let links = match &config.links.secret_hex {
        Some(secret) => LinkSigner::from_hex(&config.http.public_base_url, secret)?,
        None => {
            tracing::warn!("No link secret configured, download links will not survive a restart");
            LinkSigner::random(&config.http.public_base_url)
        }
    };

    // 2. Pipeline and workers:
    let pipeline = Arc::new(Pipeline::new(
        ledger.clone(),
        artifacts,
        queue.clone(),
        cache,
        Arc::new(
            ResizeGrayscale::new(config.transform.target_width)
                .with_max_output_pixels(config.transform.max_output_pixels),
        ),
        links,
        PipelineSettings::from_config(&config),
    ));

    let pool = WorkerPool::new(pipeline.clone(), config.workers.count)
        .start(queue.as_ref())
        .await?;

    // 3. Spawn stats reporter:
    let reporter = {
        let queue = queue.clone();
        let ledger = ledger.clone();
        let counters = pool.counters();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);

            loop {
                interval.tick().await;
                tracing::info!(
                    "Pipeline stats: queue depth={} unacked={} | {}",
                    queue.depth(),
                    queue.unacked_count(),
                    counters.snapshot()
                );
                match ledger.status_counts().await {
                    Ok(counts) => tracing::info!(
                        "  - ledger: pending={} processing={} completed={} failed={}",
                        counts.pending,
                        counts.processing,
                        counts.completed,
                        counts.failed
                    ),
                    Err(e) => tracing::warn!("  - ledger: counts unavailable: {}", e),
                }
            }
        })
    };

    // 4. Start HTTP server:
    let app = api::router(pipeline, config.http.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;

    tracing::info!("HTTP server listening on {}", listener.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 5. Drain:
    tracing::info!("HTTP server stopped, draining workers");
    let stats = pool.shutdown().await;
    reporter.abort();
    queue.close();

    tracing::info!(
        "Shutdown complete. {} ({} tasks left queued)",
        stats,
        queue.depth()
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
