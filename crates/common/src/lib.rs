//! Chalkline Common Library
//!
//! Shared code for the Chalkline content pipeline services including:
//! - Database models and repository patterns
//! - Status lifecycles and transition validation
//! - Review orchestration and batch recalculation
//! - Vision and knowledge extraction client abstractions
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod metrics;
pub mod queue;
pub mod review;
pub mod transitions;
pub mod vision;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use review::ReviewService;
pub use transitions::{
    validate_transition, ApprovalStatus, BatchStatus, ExtractionStatus, Lifecycle,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
