//! Chalkline Vision Worker
//!
//! Processes page OCR jobs from the vision SQS queue:
//! 1. Receives a page job
//! 2. Sends the page image to the vision service
//! 3. Persists the extracted blocks and their taxonomy placement
//! 4. Settles the page and re-derives the batch status

mod errors;
mod processor;

use crate::processor::OcrProcessor;
use chalkline_common::{
    audit::LogAuditSink,
    config::AppConfig,
    db::DbPool,
    metrics::register_metrics,
    queue::{Queue, QueueConfig, VisionJobMessage},
    VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Chalkline Vision Worker v{}", VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Expose Prometheus metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let processor = OcrProcessor::new(db, Arc::new(LogAuditSink), config.vision.clone());

    let Some(queue_url) = config.queue.vision_queue_url.clone() else {
        warn!("queue.vision_queue_url not set, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Vision worker shutting down");
        return Ok(());
    };

    info!(url = %queue_url, "Connecting to vision queue...");
    let queue = Queue::new(QueueConfig {
        url: queue_url,
        dlq_url: config.queue.dlq_url.clone(),
        visibility_timeout: config.queue.visibility_timeout_secs as i32,
        wait_time_seconds: config.queue.poll_timeout_secs as i32,
        max_messages: config.queue.batch_size as i32,
    })
    .await?;

    // Circuit breaker state
    let mut consecutive_failures = 0;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

    info!("Vision worker ready, starting queue polling...");

    // Start polling loop
    loop {
        // Circuit breaker check
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive() => {
                match result {
                    Ok(messages) => {
                        for message in messages {
                            let Some(receipt_handle) = message.receipt_handle.clone() else {
                                warn!("Message without receipt handle, skipping");
                                continue;
                            };

                            let job: VisionJobMessage = match Queue::parse_message(&message) {
                                Ok(job) => job,
                                Err(e) => {
                                    // Unparseable messages can never succeed.
                                    error!(error = %e, "Dropping malformed job message");
                                    if let Err(e) = queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                    continue;
                                }
                            };

                            info!(page_id = %job.page_id, batch_id = %job.batch_id, "Received page job");

                            match processor.process_job(job).await {
                                Ok(()) => {
                                    consecutive_failures = 0;
                                    if let Err(e) = queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                Err(e) if !e.retryable() => {
                                    error!(error = %e, "Dropping unprocessable job");
                                    if let Err(e) = queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Failed to process page job"
                                    );
                                    // Message will be redelivered or moved to DLQ
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Vision worker shutting down");
    Ok(())
}
