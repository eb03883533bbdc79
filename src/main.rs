//! Catalog Ingest CLI
//!
//! Thin binary over the library: loads configuration, wires the
//! repositories, and runs the requested stage. Ctrl-C during an ingest
//! cancels between pages so the session stays resumable.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use catalog_ingest_lib::application::{
    IngestionOrchestrator, NormalizationStage, ProductNormalizer,
};
use catalog_ingest_lib::infrastructure::asset_downloader::AssetDownloader;
use catalog_ingest_lib::infrastructure::batch_repository::ProcessingBatchRepository;
use catalog_ingest_lib::infrastructure::catalog_client::CatalogClient;
use catalog_ingest_lib::infrastructure::config::ConfigManager;
use catalog_ingest_lib::infrastructure::database_connection::DatabaseConnection;
use catalog_ingest_lib::infrastructure::logging::init_logging_with_config;
use catalog_ingest_lib::infrastructure::product_repository::ProductRepository;
use catalog_ingest_lib::infrastructure::raw_product_repository::RawProductRepository;
use catalog_ingest_lib::infrastructure::retry::RetryPolicy;
use catalog_ingest_lib::infrastructure::session_repository::SessionRepository;

enum Command {
    Ingest,
    Normalize { batch_size: Option<u32> },
    Requeue,
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let command = match args.first().map(String::as_str) {
        Some("ingest") => Command::Ingest,
        Some("normalize") => match args.get(1).map(|v| v.parse::<u32>()) {
            None => Command::Normalize { batch_size: None },
            Some(Ok(n)) if n > 0 => Command::Normalize {
                batch_size: Some(n),
            },
            Some(_) => {
                eprintln!("normalize: batch size must be a positive integer");
                return ExitCode::from(2);
            }
        },
        Some("requeue") => Command::Requeue,
        Some("status") => Command::Status,
        Some("help" | "--help" | "-h") | None => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Some(other) => {
            eprintln!("unknown command: {other}");
            print_usage();
            return ExitCode::from(2);
        }
    };

    match execute(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("catalog-ingest - incremental catalog ingestion pipeline");
    eprintln!();
    eprintln!("Usage: catalog-ingest <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  ingest            Run one full ingestion pass against the catalog API");
    eprintln!("  normalize [N]     Drain pending raw records in batches of N (default from config)");
    eprintln!("  requeue           Put errored records back in the normalization queue");
    eprintln!("  status            Show raw store, product and session counts");
    eprintln!("  help              Show this message");
}

async fn execute(command: Command) -> Result<()> {
    let manager = ConfigManager::new()?;
    let config = manager.initialize_on_first_run().await?;
    init_logging_with_config(config.logging.clone())?;
    info!(config_path = %manager.config_path().display(), "📁 Configuration loaded");

    let db = DatabaseConnection::new(&config.database_url)
        .await
        .context("failed to open the database")?;
    db.migrate().await?;

    let raw_products = Arc::new(RawProductRepository::new(db.pool().clone()));
    let sessions = Arc::new(SessionRepository::new(db.pool().clone()));
    let batches = Arc::new(ProcessingBatchRepository::new(db.pool().clone()));
    let products = Arc::new(ProductRepository::new(db.pool().clone()));
    let retry_policy = RetryPolicy::from(&config.retry);

    match command {
        Command::Ingest => {
            let fetcher = Arc::new(CatalogClient::new(&config.client)?);
            let orchestrator = IngestionOrchestrator::new(
                fetcher,
                Arc::clone(&raw_products),
                Arc::clone(&sessions),
                retry_policy,
                &config.ingest,
            );

            let cancellation = CancellationToken::new();
            let signal_token = cancellation.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("🛑 Ctrl-C received, stopping after the current page");
                    signal_token.cancel();
                }
            });

            let report = orchestrator.run(cancellation).await?;
            let session = sessions.get(&report.session_id).await?;
            println!(
                "session {} finished as '{}': {} pages fetched, {} inserted, {} updated, {} unchanged, {} skipped, {} swept",
                report.session_id,
                session.status,
                report.pages_fetched,
                report.inserted,
                report.updated,
                report.unchanged,
                report.skipped,
                report.swept,
            );
        }
        Command::Normalize { batch_size } => {
            let batch_size = batch_size.unwrap_or(config.normalization.batch_size);

            let mut normalizer = ProductNormalizer::new(Arc::clone(&products));
            if config.normalization.cache_images {
                let image_dir = match &config.normalization.image_dir {
                    Some(dir) => dir.clone(),
                    None => ConfigManager::get_app_data_dir()?.join("images"),
                };
                let downloader =
                    AssetDownloader::new(config.client.request_timeout_seconds, retry_policy)?;
                normalizer = normalizer.with_image_cache(downloader, image_dir);
            }

            let stage = NormalizationStage::new(
                Arc::clone(&raw_products),
                Arc::clone(&batches),
                Arc::new(normalizer),
            );
            let total = stage.drain(batch_size).await?;
            println!("normalized {total} records");
        }
        Command::Requeue => {
            let requeued = raw_products.requeue_errors().await?;
            println!("requeued {requeued} errored records");
        }
        Command::Status => {
            let stats = raw_products.statistics().await?;
            println!(
                "raw store: {} records ({} pending, {} normalized, {} embedded, {} error, {} tombstoned)",
                stats.total,
                stats.pending,
                stats.normalized,
                stats.embedded,
                stats.error,
                stats.tombstoned,
            );
            println!("products: {}", products.count().await?);

            let recent = sessions.recent(5).await?;
            if !recent.is_empty() {
                println!("recent sessions:");
                for session in recent {
                    println!(
                        "  {} [{}] page {}/{} started {}",
                        session.id,
                        session.status,
                        session.current_page,
                        session.total_pages,
                        session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    );
                }
            }
        }
    }

    Ok(())
}
