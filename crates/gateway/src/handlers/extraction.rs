//! Knowledge extraction trigger, reset, and verify handlers
//!
//! Extraction is a deliberate admin action, never a side effect of approval.
//! Each trigger walks the extraction lifecycle through conditional writes so
//! two concurrent triggers cannot double-queue the same row.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use chalkline_common::{
    audit::AuditEvent,
    auth::AdminContext,
    errors::{AppError, Result},
    queue::ExtractionJobMessage,
    transitions::{AnalysisStatus, ExtractionStatus},
};

#[derive(Serialize)]
pub struct ExtractionStateResponse {
    pub content_id: Uuid,
    pub extraction_status: ExtractionStatus,
}

/// Queue knowledge extraction for an approved-content row.
///
/// Legal from NOT_STARTED, FAILED (requeue) and VERIFIED (re-extraction,
/// stepping through NOT_STARTED). Anything in flight or completed reports
/// duplicate work.
pub async fn trigger_extraction(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(content_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ExtractionStateResponse>)> {
    let queue = state
        .extraction_queue
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "Extraction queue is not configured".to_string(),
        })?;

    let repo = state.review.repository();
    let content = repo
        .find_content_by_id(content_id)
        .await?
        .ok_or_else(|| AppError::ContentNotFound {
            id: content_id.to_string(),
        })?;

    if !content.extraction_status.can_trigger() && !content.extraction_status.can_reprocess() {
        return Err(AppError::DuplicateWork {
            target: "approved_content",
            id: content_id.to_string(),
            status: content.extraction_status.to_string(),
        });
    }

    // A verified row is first unwound to NOT_STARTED so the queue hop below
    // stays inside the transition table.
    if content.extraction_status == ExtractionStatus::Verified {
        repo.try_mark_extraction(
            content_id,
            &[ExtractionStatus::Verified],
            ExtractionStatus::NotStarted,
        )
        .await?;
    }

    let queued = repo
        .try_mark_extraction(
            content_id,
            &[ExtractionStatus::NotStarted, ExtractionStatus::Failed],
            ExtractionStatus::Queued,
        )
        .await?;

    if !queued {
        // Lost the race to a concurrent trigger.
        let current = repo
            .find_content_by_id(content_id)
            .await?
            .map(|c| c.extraction_status.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(AppError::DuplicateWork {
            target: "approved_content",
            id: content_id.to_string(),
            status: current,
        });
    }

    let job = ExtractionJobMessage::for_content(content_id);
    if let Err(e) = queue.send(&job).await {
        // Undo the claim so the row stays triggerable.
        repo.try_mark_extraction(
            content_id,
            &[ExtractionStatus::Queued],
            ExtractionStatus::NotStarted,
        )
        .await?;
        return Err(e);
    }

    state
        .audit
        .emit(AuditEvent::content("extract", content_id, admin.admin_id))
        .await;

    tracing::info!(content_id = %content_id, admin_id = %admin.admin_id, "Extraction queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(ExtractionStateResponse {
            content_id,
            extraction_status: ExtractionStatus::Queued,
        }),
    ))
}

/// Statuses an admin may reset by hand; every entry has a legal edge to
/// NOT_STARTED. In-flight rows (QUEUED, PROCESSING) belong to the worker.
const RESETTABLE: [ExtractionStatus; 3] = [
    ExtractionStatus::Failed,
    ExtractionStatus::Completed,
    ExtractionStatus::Verified,
];

/// Reset a settled extraction (FAILED, COMPLETED or VERIFIED) back to
/// NOT_STARTED without queueing anything; re-running is a separate trigger.
pub async fn reset_extraction(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(content_id): Path<Uuid>,
) -> Result<Json<ExtractionStateResponse>> {
    let repo = state.review.repository();
    let content = repo
        .find_content_by_id(content_id)
        .await?
        .ok_or_else(|| AppError::ContentNotFound {
            id: content_id.to_string(),
        })?;

    let reset = repo
        .try_mark_extraction(content_id, &RESETTABLE, ExtractionStatus::NotStarted)
        .await?;

    if !reset {
        return Err(AppError::Conflict {
            message: format!(
                "Extraction in status {} cannot be reset",
                content.extraction_status
            ),
        });
    }

    state
        .audit
        .emit(AuditEvent::content("reset", content_id, admin.admin_id))
        .await;

    Ok(Json(ExtractionStateResponse {
        content_id,
        extraction_status: ExtractionStatus::NotStarted,
    }))
}

/// Mark a COMPLETED extraction VERIFIED after a human checked the output.
pub async fn verify_extraction(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(content_id): Path<Uuid>,
) -> Result<Json<ExtractionStateResponse>> {
    let repo = state.review.repository();
    let content = repo
        .find_content_by_id(content_id)
        .await?
        .ok_or_else(|| AppError::ContentNotFound {
            id: content_id.to_string(),
        })?;

    let verified = repo
        .try_mark_extraction(
            content_id,
            &[ExtractionStatus::Completed],
            ExtractionStatus::Verified,
        )
        .await?;

    if !verified {
        return Err(AppError::Conflict {
            message: format!(
                "Extraction in status {} cannot be verified",
                content.extraction_status
            ),
        });
    }

    state
        .audit
        .emit(AuditEvent::content("verify", content_id, admin.admin_id))
        .await;

    // Verification can complete a batch-wide aggregate.
    state.review.recalculate_best_effort(content.batch_id).await;

    Ok(Json(ExtractionStateResponse {
        content_id,
        extraction_status: ExtractionStatus::Verified,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeExamQuestionsRequest {
    pub question_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct AnalyzeOutcome {
    pub question_id: Uuid,
    pub accepted: bool,
    pub detail: String,
}

#[derive(Serialize)]
pub struct AnalyzeExamQuestionsResponse {
    pub outcomes: Vec<AnalyzeOutcome>,
}

/// Queue analysis for a set of exam questions. Per-question outcomes: a
/// question that cannot be analyzed is skipped, not a batch-wide failure.
pub async fn analyze_exam_questions(
    State(state): State<AppState>,
    admin: AdminContext,
    Json(request): Json<AnalyzeExamQuestionsRequest>,
) -> Result<(StatusCode, Json<AnalyzeExamQuestionsResponse>)> {
    if request.question_ids.is_empty() {
        return Err(AppError::Validation {
            message: "question_ids must not be empty".to_string(),
            field: Some("question_ids".to_string()),
        });
    }

    let queue = state
        .extraction_queue
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "Extraction queue is not configured".to_string(),
        })?;

    let repo = state.review.repository();
    let mut outcomes = Vec::with_capacity(request.question_ids.len());

    for question_id in request.question_ids {
        let Some(question) = repo.find_exam_question_by_id(question_id).await? else {
            outcomes.push(AnalyzeOutcome {
                question_id,
                accepted: false,
                detail: "not found".to_string(),
            });
            continue;
        };

        if !question.analysis_status.can_analyze() {
            outcomes.push(AnalyzeOutcome {
                question_id,
                accepted: false,
                detail: format!("status {}", question.analysis_status),
            });
            continue;
        }

        let claimed = repo
            .try_mark_analysis(
                question_id,
                &[AnalysisStatus::Raw, AnalysisStatus::Failed],
                AnalysisStatus::Pending,
            )
            .await?;

        if !claimed {
            outcomes.push(AnalyzeOutcome {
                question_id,
                accepted: false,
                detail: "claimed by concurrent request".to_string(),
            });
            continue;
        }

        let job = ExtractionJobMessage::for_exam_question(question_id);
        if let Err(e) = queue.send(&job).await {
            repo.try_mark_analysis(question_id, &[AnalysisStatus::Pending], AnalysisStatus::Raw)
                .await?;
            outcomes.push(AnalyzeOutcome {
                question_id,
                accepted: false,
                detail: format!("enqueue failed: {}", e),
            });
            continue;
        }

        state
            .audit
            .emit(AuditEvent::exam_question("analyze", question_id, admin.admin_id))
            .await;

        outcomes.push(AnalyzeOutcome {
            question_id,
            accepted: true,
            detail: "queued".to_string(),
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeExamQuestionsResponse { outcomes }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkline_common::transitions::Lifecycle;

    #[test]
    fn every_resettable_status_has_a_legal_edge_to_not_started() {
        for status in RESETTABLE {
            assert!(
                status.can_transition(ExtractionStatus::NotStarted),
                "{status} must be able to reach NOT_STARTED"
            );
        }
    }

    #[test]
    fn reset_covers_completed_and_verified_not_just_failed() {
        assert!(RESETTABLE.contains(&ExtractionStatus::Completed));
        assert!(RESETTABLE.contains(&ExtractionStatus::Verified));
        assert!(!RESETTABLE.contains(&ExtractionStatus::Queued));
        assert!(!RESETTABLE.contains(&ExtractionStatus::Processing));
    }
}
