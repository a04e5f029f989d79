//! Chalkline Admin API Gateway
//!
//! The entry point for all admin requests. Handles:
//! - Admin identity extraction
//! - Rate limiting
//! - Batch intake and job enqueueing
//! - Review and extraction endpoints
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{delete, get, post},
    Router,
};
use chalkline_common::{
    audit::{AuditSink, LogAuditSink},
    config::AppConfig,
    db::{DbPool, Repository},
    metrics,
    queue::{Queue, QueueConfig},
    review::ReviewService,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DbPool,
    pub review: ReviewService,
    pub audit: Arc<dyn AuditSink>,
    pub vision_queue: Option<Arc<Queue>>,
    pub extraction_queue: Option<Arc<Queue>>,
}

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

    info!("Starting Chalkline API Gateway v{}", chalkline_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Expose Prometheus metrics
    if config.observability.metrics_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "Prometheus exporter listening");
    }
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    // Queues are optional at boot so the read-only surface keeps working
    // without queue credentials; enqueueing endpoints return 503 instead.
    let vision_queue = build_queue(&config, config.queue.vision_queue_url.as_deref()).await;
    let extraction_queue = build_queue(&config, config.queue.extraction_queue_url.as_deref()).await;

    let audit: Arc<dyn AuditSink> = Arc::new(LogAuditSink);
    let review = ReviewService::new(Repository::new(db.clone()), audit.clone());

    // Create app state
    let state = AppState {
        config: config.clone(),
        db,
        review,
        audit,
        vision_queue,
        extraction_queue,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn build_queue(config: &AppConfig, url: Option<&str>) -> Option<Arc<Queue>> {
    let url = url?;

    let queue_config = QueueConfig {
        url: url.to_string(),
        dlq_url: config.queue.dlq_url.clone(),
        visibility_timeout: config.queue.visibility_timeout_secs as i32,
        wait_time_seconds: config.queue.poll_timeout_secs as i32,
        max_messages: config.queue.batch_size as i32,
    };

    match Queue::new(queue_config).await {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!(error = %e, url, "Queue client unavailable, enqueueing disabled");
            None
        }
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Batch endpoints
        .route("/batches", post(handlers::batches::create_batch))
        .route("/batches", get(handlers::batches::list_batches))
        .route("/batches/{id}", get(handlers::batches::get_batch))
        .route("/batches/{id}/cancel", post(handlers::batches::cancel_batch))
        .route("/batches/{id}/reprocess", post(handlers::batches::reprocess_batch))

        // Review endpoints
        .route("/batches/{id}/review", get(handlers::review::batch_for_review))
        .route("/batches/{id}/approved", get(handlers::review::approved_contents))
        .route("/blocks/{id}/approve", post(handlers::review::approve_block))
        .route("/blocks/{id}/reject", post(handlers::review::reject_block))
        .route("/blocks/{id}", delete(handlers::review::delete_block))
        .route("/pages/{id}/blocks", post(handlers::review::create_manual_block))

        // Extraction endpoints
        .route("/content/{id}/extract", post(handlers::extraction::trigger_extraction))
        .route("/content/{id}/reset", post(handlers::extraction::reset_extraction))
        .route("/content/{id}/verify", post(handlers::extraction::verify_extraction))
        .route("/exam-questions/analyze", post(handlers::extraction::analyze_exam_questions));

    // Compose the app
    let mut app = Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id);

    if state.config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        app = app.layer(axum::middleware::from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                middleware::rate_limit::rate_limit_middleware(req, next, limiter.clone())
            },
        ));
    }

    app.with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
