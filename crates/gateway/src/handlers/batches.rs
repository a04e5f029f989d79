//! Batch intake and lifecycle handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use chalkline_common::{
    audit::AuditEvent,
    auth::AdminContext,
    db::{models::*, BlockCounts, Repository},
    errors::{AppError, Result},
    queue::VisionJobMessage,
    transitions::{validate_transition, BatchStatus, PageOcrStatus},
};

/// One uploaded page file, in display order
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PageFileInput {
    #[validate(length(min = 1, max = 1024))]
    pub file_path: String,

    #[validate(length(min = 1, max = 128))]
    pub file_type: String,
}

/// Request to create a new upload batch
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    /// Content-type hint forwarded to the vision service (e.g. "textbook")
    pub content_type: Option<String>,

    /// Per-batch vision provider override
    pub vision_provider: Option<String>,

    #[validate(length(min = 1, max = 500), nested)]
    pub pages: Vec<PageFileInput>,
}

/// Response after creating a batch
#[derive(Serialize)]
pub struct CreateBatchResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub page_count: usize,
    pub poll_url: String,
}

#[derive(Serialize)]
pub struct PageSummary {
    pub id: Uuid,
    pub page_index: i32,
    pub ocr_status: PageOcrStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Serialize)]
pub struct BlockCountsResponse {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub deleted: u64,
}

impl From<BlockCounts> for BlockCountsResponse {
    fn from(counts: BlockCounts) -> Self {
        Self {
            pending: counts.pending,
            approved: counts.approved,
            rejected: counts.rejected,
            deleted: counts.deleted,
        }
    }
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub id: Uuid,
    pub status: BatchStatus,
    pub content_type: Option<String>,
    pub vision_provider: Option<String>,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
    pub pages: Vec<PageSummary>,
    pub block_counts: BlockCountsResponse,
}

#[derive(Serialize)]
pub struct BatchListItem {
    pub id: Uuid,
    pub status: BatchStatus,
    pub content_type: Option<String>,
    pub created_by: Uuid,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct BatchListResponse {
    pub batches: Vec<BatchListItem>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    20
}

async fn batch_response(repo: &Repository, batch: Batch) -> Result<BatchResponse> {
    let pages = repo.list_pages_by_batch(batch.id).await?;
    let counts = repo.count_blocks_by_batch(batch.id).await?;

    Ok(BatchResponse {
        id: batch.id,
        status: batch.status,
        content_type: batch.content_type,
        vision_provider: batch.vision_provider,
        created_by: batch.created_by,
        created_at: batch.created_at.to_rfc3339(),
        updated_at: batch.updated_at.to_rfc3339(),
        pages: pages
            .into_iter()
            .map(|p| PageSummary {
                id: p.id,
                page_index: p.page_index,
                ocr_status: p.ocr_status,
                error_message: p.error_message,
            })
            .collect(),
        block_counts: counts.into(),
    })
}

/// Create a batch and enqueue one OCR job per page
pub async fn create_batch(
    State(state): State<AppState>,
    admin: AdminContext,
    Json(request): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<CreateBatchResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let queue = state
        .vision_queue
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "Vision queue is not configured".to_string(),
        })?;

    let repo = state.review.repository();
    let page_files = request
        .pages
        .into_iter()
        .map(|p| (p.file_path, p.file_type))
        .collect();

    let (batch, pages) = repo
        .create_batch(
            request.content_type,
            request.vision_provider,
            admin.admin_id,
            page_files,
        )
        .await?;

    // Batches enter the queue in PROCESSING; jobs delivered before the flip
    // would still find their page PENDING and claim it.
    repo.update_batch_status_checked(batch.id, BatchStatus::Pending, BatchStatus::Processing)
        .await?;

    for page in &pages {
        let job = VisionJobMessage {
            page_id: page.id,
            batch_id: batch.id,
        };
        if let Err(e) = queue.send(&job).await {
            // The page stays PENDING; a reprocess request re-enqueues it.
            tracing::error!(page_id = %page.id, error = %e, "Failed to enqueue OCR job");
        }
    }

    state
        .audit
        .emit(AuditEvent::batch("create", batch.id, admin.admin_id))
        .await;

    tracing::info!(
        batch_id = %batch.id,
        admin_id = %admin.admin_id,
        page_count = pages.len(),
        "Batch created"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateBatchResponse {
            batch_id: batch.id,
            status: BatchStatus::Processing,
            page_count: pages.len(),
            poll_url: format!("/v1/batches/{}", batch.id),
        }),
    ))
}

/// Get a batch with its pages and block counts
pub async fn get_batch(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResponse>> {
    let repo = state.review.repository();
    let batch = repo.require_batch(batch_id).await?;
    Ok(Json(batch_response(repo, batch).await?))
}

/// List batches, newest first
pub async fn list_batches(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<BatchListResponse>> {
    let limit = query.limit.clamp(1, 100);
    let repo = state.review.repository();
    let (batches, total) = repo.list_batches(query.offset, limit).await?;

    Ok(Json(BatchListResponse {
        batches: batches
            .into_iter()
            .map(|b| BatchListItem {
                id: b.id,
                status: b.status,
                content_type: b.content_type,
                created_by: b.created_by,
                created_at: b.created_at.to_rfc3339(),
            })
            .collect(),
        total,
        offset: query.offset,
        limit,
    }))
}

/// Cancel a batch from any non-terminal status
pub async fn cancel_batch(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResponse>> {
    let repo = state.review.repository();
    let batch = repo.require_batch(batch_id).await?;

    validate_transition(batch.status, BatchStatus::Cancelled)?;

    if !repo
        .update_batch_status_checked(batch.id, batch.status, BatchStatus::Cancelled)
        .await?
    {
        // Someone else moved the batch between our read and write.
        return Err(AppError::Conflict {
            message: format!("Batch {} changed status during cancel", batch.id),
        });
    }

    state
        .audit
        .emit(AuditEvent::batch("cancel", batch.id, admin.admin_id))
        .await;

    tracing::info!(batch_id = %batch.id, admin_id = %admin.admin_id, "Batch cancelled");

    let batch = repo.require_batch(batch_id).await?;
    Ok(Json(batch_response(repo, batch).await?))
}

/// Re-enqueue OCR for a batch's FAILED pages (and any never-delivered
/// PENDING pages), allowed while the batch is still before review.
pub async fn reprocess_batch(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchResponse>> {
    let queue = state
        .vision_queue
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "Vision queue is not configured".to_string(),
        })?;

    let repo = state.review.repository();
    let batch = repo.require_batch(batch_id).await?;

    if !batch.status.can_reprocess() {
        return Err(AppError::Conflict {
            message: format!("Batch in status {} cannot be reprocessed", batch.status),
        });
    }

    let reset = repo.reset_failed_pages(batch_id).await?;
    let pending: Vec<Page> = repo
        .list_pages_by_batch(batch_id)
        .await?
        .into_iter()
        .filter(|p| p.ocr_status == PageOcrStatus::Pending)
        .collect();

    let mut enqueued = 0usize;
    for page in &pending {
        let job = VisionJobMessage {
            page_id: page.id,
            batch_id,
        };
        if let Err(e) = queue.send(&job).await {
            tracing::error!(page_id = %page.id, error = %e, "Failed to enqueue OCR job");
        } else {
            enqueued += 1;
        }
    }

    state
        .audit
        .emit(AuditEvent::batch("reprocess", batch_id, admin.admin_id))
        .await;

    tracing::info!(
        batch_id = %batch_id,
        admin_id = %admin.admin_id,
        reset = reset.len(),
        enqueued,
        "Batch reprocess requested"
    );

    let batch = repo.require_batch(batch_id).await?;
    Ok(Json(batch_response(repo, batch).await?))
}
