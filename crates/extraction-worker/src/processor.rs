//! Extraction worker processor
//!
//! Routes one extraction job to its target: an approved-content row or an
//! exam question. Each path claims the row with a conditional status write
//! before calling the extraction service, so a redelivered job for a row
//! someone else already claimed is skipped, not double-processed.

use chalkline_common::audit::AuditSink;
use chalkline_common::db::models::*;
use chalkline_common::db::{DbPool, Repository};
use chalkline_common::extraction::{KnowledgeExtractor, KnowledgePointDraft};
use chalkline_common::metrics;
use chalkline_common::queue::{ExtractionJobMessage, ExtractionTarget};
use chalkline_common::review::ReviewService;
use chalkline_common::transitions::{AnalysisStatus, ExtractionStatus};
use sea_orm::Set;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Extraction worker processor
pub struct ExtractionProcessor {
    repository: Repository,
    review: ReviewService,
    extractor: Arc<dyn KnowledgeExtractor>,
}

impl ExtractionProcessor {
    pub fn new(
        db_pool: DbPool,
        audit: Arc<dyn AuditSink>,
        extractor: Arc<dyn KnowledgeExtractor>,
    ) -> Self {
        let repository = Repository::new(db_pool);
        let review = ReviewService::new(repository.clone(), audit);
        Self {
            repository,
            review,
            extractor,
        }
    }

    /// Process one job. `Ok` covers skipped redeliveries; `Err` means the
    /// message should come back.
    pub async fn process_job(&self, job: ExtractionJobMessage) -> Result<(), ExtractionJobError> {
        match job.target().map_err(|e| ExtractionJobError::BadMessage(e.to_string()))? {
            ExtractionTarget::ApprovedContent(id) => self.process_content(id).await,
            ExtractionTarget::ExamQuestion(id) => self.process_exam_question(id).await,
        }
    }

    /// Knowledge extraction for an approved-content row.
    #[instrument(skip(self), fields(content_id = %content_id))]
    pub async fn process_content(&self, content_id: Uuid) -> Result<(), ExtractionJobError> {
        let Some(content) = self.repository.find_content_by_id(content_id).await? else {
            // The block (and its content row) was deleted after queueing.
            warn!("Approved content gone, dropping job");
            return Ok(());
        };

        // Claim: QUEUED -> PROCESSING. Losing this means another delivery of
        // the same job (or a reset) got here first.
        let claimed = self
            .repository
            .try_mark_extraction(
                content_id,
                &[ExtractionStatus::Queued],
                ExtractionStatus::Processing,
            )
            .await?;
        if !claimed {
            warn!(
                status = %content.extraction_status,
                "Content not claimable, skipping redelivered job"
            );
            return Ok(());
        }

        // The claim races admin edits: an approve-with-edit can replace the
        // text (resetting the row) between the read above and the claim.
        // Re-read so the text extracted is the text the claim landed on.
        let Some(content) = self.repository.find_content_by_id(content_id).await? else {
            warn!("Approved content gone after claim, dropping job");
            return Ok(());
        };

        let started = Instant::now();
        let drafts = match self
            .extractor
            .extract_content(&content.content, content.block_type)
            .await
        {
            Ok(drafts) => drafts,
            Err(e) => {
                let message = e.to_string();
                // Already failing; a failed status write is logged only.
                if let Err(mark_err) = self
                    .repository
                    .mark_extraction_failed(content_id, &message)
                    .await
                {
                    warn!(error = %mark_err, "Failed to record the extraction failure");
                }
                metrics::record_extraction_job(
                    "approved_content",
                    "failed",
                    started.elapsed().as_secs_f64(),
                );
                self.review.recalculate_best_effort(content.batch_id).await;
                return Err(ExtractionJobError::ExtractionFailed(message));
            }
        };

        // Re-extraction replaces the previous output wholesale.
        self.repository
            .delete_knowledge_points_for_content(content_id)
            .await?;
        let stored = self
            .repository
            .insert_knowledge_points(content_drafts(content_id, &drafts))
            .await?;

        if !self.repository.mark_extraction_completed(content_id).await? {
            // A concurrent reset won; the fresh knowledge points stand until
            // the next run replaces them.
            warn!("Extraction claim lost before completion could be recorded");
        }

        metrics::record_extraction_job(
            "approved_content",
            "completed",
            started.elapsed().as_secs_f64(),
        );
        metrics::record_knowledge_points(stored as usize);
        info!(knowledge_points = stored, "Content extraction complete");

        self.review.recalculate_best_effort(content.batch_id).await;
        Ok(())
    }

    /// Analysis for an exam question. Independent of any batch.
    #[instrument(skip(self), fields(question_id = %question_id))]
    pub async fn process_exam_question(&self, question_id: Uuid) -> Result<(), ExtractionJobError> {
        let Some(question) = self.repository.find_exam_question_by_id(question_id).await? else {
            warn!("Exam question gone, dropping job");
            return Ok(());
        };

        // PENDING is the normal enqueue state; RAW happens when a revert from
        // a failed enqueue raced with the delivery.
        let claimed = self
            .repository
            .try_mark_analysis(
                question_id,
                &[AnalysisStatus::Pending, AnalysisStatus::Raw],
                AnalysisStatus::Processing,
            )
            .await?;
        if !claimed {
            warn!(
                status = %question.analysis_status,
                "Question not claimable, skipping redelivered job"
            );
            return Ok(());
        }

        let started = Instant::now();
        let drafts = match self
            .extractor
            .extract_exam_question(&question.question_text, question.answer_text.as_deref())
            .await
        {
            Ok(drafts) => drafts,
            Err(e) => {
                let message = e.to_string();
                if let Err(mark_err) = self
                    .repository
                    .mark_analysis_failed(question_id, &message)
                    .await
                {
                    warn!(error = %mark_err, "Failed to record the analysis failure");
                }
                metrics::record_extraction_job(
                    "exam_question",
                    "failed",
                    started.elapsed().as_secs_f64(),
                );
                return Err(ExtractionJobError::ExtractionFailed(message));
            }
        };

        let stored = self
            .repository
            .insert_knowledge_points(exam_drafts(question_id, &drafts))
            .await?;

        if !self.repository.mark_analysis_completed(question_id).await? {
            warn!("Analysis claim lost before completion could be recorded");
        }

        let by_category = count_by_category(&drafts);
        metrics::record_extraction_job(
            "exam_question",
            "completed",
            started.elapsed().as_secs_f64(),
        );
        metrics::record_knowledge_points(stored as usize);
        info!(
            knowledge_points = stored,
            categories = ?by_category,
            "Exam question analysis complete"
        );

        Ok(())
    }
}

fn content_drafts(content_id: Uuid, drafts: &[KnowledgePointDraft]) -> Vec<KnowledgePointActiveModel> {
    drafts
        .iter()
        .map(|d| KnowledgePointActiveModel {
            id: Set(Uuid::new_v4()),
            approved_content_id: Set(Some(content_id)),
            exam_question_id: Set(None),
            category: Set(d.category.clone()),
            title: Set(d.title.clone()),
            body: Set(d.body.clone()),
            created_at: Set(chrono::Utc::now().into()),
        })
        .collect()
}

fn exam_drafts(question_id: Uuid, drafts: &[KnowledgePointDraft]) -> Vec<KnowledgePointActiveModel> {
    drafts
        .iter()
        .map(|d| KnowledgePointActiveModel {
            id: Set(Uuid::new_v4()),
            approved_content_id: Set(None),
            exam_question_id: Set(Some(question_id)),
            category: Set(d.category.clone()),
            title: Set(d.title.clone()),
            body: Set(d.body.clone()),
            created_at: Set(chrono::Utc::now().into()),
        })
        .collect()
}

fn count_by_category(drafts: &[KnowledgePointDraft]) -> Vec<(String, usize)> {
    let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
    for draft in drafts {
        *counts.entry(draft.category.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(category, count)| (category.to_string(), count))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionJobError {
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Malformed job message: {0}")]
    BadMessage(String),
}

impl ExtractionJobError {
    pub fn retryable(&self) -> bool {
        !matches!(self, ExtractionJobError::BadMessage(_))
    }
}

impl From<chalkline_common::errors::AppError> for ExtractionJobError {
    fn from(e: chalkline_common::errors::AppError) -> Self {
        use chalkline_common::errors::AppError;
        match e {
            AppError::ExtractionError { message } => ExtractionJobError::ExtractionFailed(message),
            other => ExtractionJobError::DatabaseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drafts_carry_exactly_one_target() {
        let drafts = vec![KnowledgePointDraft {
            category: "concept".to_string(),
            title: "t".to_string(),
            body: "b".to_string(),
        }];

        let content_id = Uuid::new_v4();
        let models = content_drafts(content_id, &drafts);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].approved_content_id.clone().unwrap(), Some(content_id));
        assert_eq!(models[0].exam_question_id.clone().unwrap(), None);

        let question_id = Uuid::new_v4();
        let models = exam_drafts(question_id, &drafts);
        assert_eq!(models[0].approved_content_id.clone().unwrap(), None);
        assert_eq!(models[0].exam_question_id.clone().unwrap(), Some(question_id));
    }

    #[test]
    fn categories_are_counted() {
        let drafts = vec![
            KnowledgePointDraft {
                category: "concept".into(),
                title: "a".into(),
                body: "a".into(),
            },
            KnowledgePointDraft {
                category: "concept".into(),
                title: "b".into(),
                body: "b".into(),
            },
            KnowledgePointDraft {
                category: "formula".into(),
                title: "c".into(),
                body: "c".into(),
            },
        ];

        let counts = count_by_category(&drafts);
        assert_eq!(
            counts,
            vec![("concept".to_string(), 2), ("formula".to_string(), 1)]
        );
    }
}
