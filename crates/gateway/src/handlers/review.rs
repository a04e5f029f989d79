//! Review-screen and block verdict handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use chalkline_common::{
    auth::AdminContext,
    db::models::*,
    errors::{AppError, Result},
    transitions::{ApprovalStatus, BatchStatus, ClassificationStatus, ExtractionStatus},
};

#[derive(Serialize)]
pub struct BlockResponse {
    pub id: Uuid,
    pub page_id: Uuid,
    pub block_index: i32,
    pub content_type: String,
    pub block_type: BlockType,
    pub text: String,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_payload: Option<serde_json::Value>,
    pub classification_status: ClassificationStatus,
    pub approval_status: ApprovalStatus,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtopic_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
}

impl From<Block> for BlockResponse {
    fn from(block: Block) -> Self {
        Self {
            id: block.id,
            page_id: block.page_id,
            block_index: block.block_index,
            text: block.canonical_text().to_string(),
            content_type: block.content_type,
            block_type: block.block_type,
            is_edited: block.is_edited,
            structured_payload: block.structured_payload,
            classification_status: block.classification_status,
            approval_status: block.approval_status,
            confidence: block.confidence,
            lesson_id: block.lesson_id,
            topic_id: block.topic_id,
            subtopic_id: block.subtopic_id,
            approved_by: block.approved_by,
        }
    }
}

#[derive(Serialize)]
pub struct ReviewPageResponse {
    pub id: Uuid,
    pub page_index: i32,
    pub ocr_status: chalkline_common::transitions::PageOcrStatus,
    pub blocks: Vec<BlockResponse>,
}

#[derive(Serialize)]
pub struct BatchReviewResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub content_type: Option<String>,
    pub pages: Vec<ReviewPageResponse>,
}

/// The review screen: batch, pages, and non-deleted blocks grouped by page.
/// Opening it moves an UPLOADED or CLASSIFIED batch to REVIEWED.
pub async fn batch_for_review(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchReviewResponse>> {
    let review = state.review.batch_for_review(batch_id).await?;

    let mut pages: Vec<ReviewPageResponse> = review
        .pages
        .into_iter()
        .map(|p| ReviewPageResponse {
            id: p.id,
            page_index: p.page_index,
            ocr_status: p.ocr_status,
            blocks: vec![],
        })
        .collect();

    for block in review.blocks {
        if let Some(page) = pages.iter_mut().find(|p| p.id == block.page_id) {
            page.blocks.push(block.into());
        }
    }

    Ok(Json(BatchReviewResponse {
        batch_id: review.batch.id,
        status: review.batch.status,
        content_type: review.batch.content_type,
        pages,
    }))
}

#[derive(Serialize)]
pub struct ApprovedContentResponse {
    pub id: Uuid,
    pub block_id: Uuid,
    pub block_type: BlockType,
    pub content: String,
    pub extraction_status: ExtractionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
}

#[derive(Serialize)]
pub struct ApprovedContentsResponse {
    pub batch_id: Uuid,
    pub contents: Vec<ApprovedContentResponse>,
}

/// Approved content rows of a batch, excluding rows whose block was deleted
/// after approval.
pub async fn approved_contents(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<ApprovedContentsResponse>> {
    let repo = state.review.repository();
    repo.require_batch(batch_id).await?;

    let blocks = repo.list_blocks_by_batch(batch_id, false).await?;
    let live: std::collections::HashSet<Uuid> = blocks.iter().map(|b| b.id).collect();

    let contents = repo
        .list_contents_by_batch(batch_id)
        .await?
        .into_iter()
        .filter(|c| live.contains(&c.block_id))
        .map(|c| ApprovedContentResponse {
            id: c.id,
            block_id: c.block_id,
            block_type: c.block_type,
            content: c.content,
            extraction_status: c.extraction_status,
            error_message: c.error_message,
            extracted_at: c.extracted_at.map(|t| t.to_rfc3339()),
        })
        .collect();

    Ok(Json(ApprovedContentsResponse { batch_id, contents }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveBlockRequest {
    /// Corrected text; when it differs from the stored raw text the block is
    /// marked edited and the edit becomes the approved content.
    #[serde(default)]
    pub edited_text: Option<String>,
}

/// Approve a block, optionally with corrected text
pub async fn approve_block(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(block_id): Path<Uuid>,
    body: Option<Json<ApproveBlockRequest>>,
) -> Result<Json<BlockResponse>> {
    let edited_text = body.and_then(|Json(b)| b.edited_text);
    let block = state
        .review
        .approve_block(block_id, admin.admin_id, edited_text)
        .await?;
    Ok(Json(block.into()))
}

/// Reject a block; it stays visible and can be re-reviewed
pub async fn reject_block(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(block_id): Path<Uuid>,
) -> Result<Json<BlockResponse>> {
    let block = state.review.reject_block(block_id, admin.admin_id).await?;
    Ok(Json(block.into()))
}

/// Soft-delete a block; one-way
pub async fn delete_block(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(block_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.review.delete_block(block_id, admin.admin_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateManualBlockRequest {
    #[validate(length(min = 1, max = 100_000))]
    pub raw_text: String,

    #[validate(length(min = 1, max = 128))]
    pub content_type: String,

    /// Must name an existing lesson when present
    pub lesson: Option<String>,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
}

/// Add an admin-authored block to a page
pub async fn create_manual_block(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(page_id): Path<Uuid>,
    Json(request): Json<CreateManualBlockRequest>,
) -> Result<(StatusCode, Json<BlockResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let block = state
        .review
        .create_manual_block(
            page_id,
            request.raw_text,
            request.content_type,
            admin.admin_id,
            request.lesson,
            request.topic,
            request.subtopic,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(block.into())))
}
