//! Page OCR processor
//!
//! Core logic for one page job: claim the page, call the vision service,
//! persist the flattened block with its taxonomy placement, settle the
//! page, and nudge the owning batch's status.

use crate::errors::OcrError;
use chalkline_common::audit::AuditSink;
use chalkline_common::config::VisionConfig;
use chalkline_common::db::models::*;
use chalkline_common::db::{DbPool, NewBlock, Repository};
use chalkline_common::metrics;
use chalkline_common::queue::VisionJobMessage;
use chalkline_common::review::ReviewService;
use chalkline_common::transitions::{BatchStatus, ClassificationStatus, PageOcrStatus};
use chalkline_common::vision::{create_vision_parser, Classification, ParsedPage, VisionParser};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Confidence assigned to vision-parsed blocks; manual blocks get 1.0.
const PARSED_CONFIDENCE: f64 = 0.95;

/// A reason the page can never succeed; settles it FAILED without retry.
enum Fatal {
    Unreadable(String),
    PdfUpload,
    MissingContentTypeHint,
}

impl Fatal {
    fn message(&self) -> String {
        match self {
            Fatal::Unreadable(path) => format!("Page file is not readable: {}", path),
            Fatal::PdfUpload => {
                "PDF uploads are not supported; upload individual page images".to_string()
            }
            Fatal::MissingContentTypeHint => {
                "Batch carries no content-type hint for the vision service".to_string()
            }
        }
    }
}

/// How one claimed page job ended.
enum PageOutcome {
    /// Parse persisted (`usize` blocks) and the page settled COMPLETED.
    Completed(usize),
    /// The page can never succeed; settle it FAILED without retry.
    Fatal(String),
    /// The owning batch was cancelled; no terminal write at all.
    Abandoned,
}

/// Page OCR processor
pub struct OcrProcessor {
    repository: Repository,
    review: ReviewService,
    vision_config: VisionConfig,
}

impl OcrProcessor {
    pub fn new(db_pool: DbPool, audit: Arc<dyn AuditSink>, vision_config: VisionConfig) -> Self {
        let repository = Repository::new(db_pool);
        let review = ReviewService::new(repository.clone(), audit);
        Self {
            repository,
            review,
            vision_config,
        }
    }

    /// Build the parser for one job, honoring the batch's provider override.
    fn parser_for(&self, batch: &Batch) -> Arc<dyn VisionParser> {
        let provider = batch
            .vision_provider
            .as_deref()
            .unwrap_or(&self.vision_config.provider);
        create_vision_parser(
            provider,
            self.vision_config.api_key.clone(),
            self.vision_config.api_base.clone(),
            self.vision_config.timeout_secs,
            self.vision_config.max_retries,
        )
    }

    /// Process one page job. `Ok` means the message is finished (including
    /// pages settled FAILED for fatal reasons and pages abandoned under a
    /// cancelled batch); `Err` means redelivery may help.
    #[instrument(skip(self, job), fields(page_id = %job.page_id, batch_id = %job.batch_id))]
    pub async fn process_job(&self, job: VisionJobMessage) -> Result<(), OcrError> {
        // Claim refuses only COMPLETED pages, so a redelivered job for an
        // already-processed page is dropped here instead of duplicating work.
        if !self.repository.claim_page_for_ocr(job.page_id).await? {
            warn!("Page already completed, skipping redelivered job");
            return Ok(());
        }

        let started = Instant::now();
        match self.run(&job).await {
            Ok(PageOutcome::Completed(created)) => {
                metrics::record_page_ocr("completed", started.elapsed().as_secs_f64());
                metrics::record_blocks_created(created, "parsed");
                info!(blocks = created, "Page OCR complete");
                self.review.recalculate_best_effort(job.batch_id).await;
                Ok(())
            }
            Ok(PageOutcome::Fatal(message)) => {
                warn!(reason = %message, "Page cannot be processed");
                self.settle_failed(job.page_id, message).await;
                metrics::record_page_ocr("failed", started.elapsed().as_secs_f64());
                self.review.recalculate_best_effort(job.batch_id).await;
                Ok(())
            }
            Ok(PageOutcome::Abandoned) => {
                // A cancelled parent gets no terminal page write; the page is
                // left as the cancel found it.
                info!("Batch cancelled, abandoning page");
                Ok(())
            }
            Err(e) => {
                // Any exception on the post-claim path marks the page FAILED
                // best-effort, then surfaces so the queue's retry applies.
                self.settle_failed(job.page_id, e.to_string()).await;
                metrics::record_page_ocr("failed", started.elapsed().as_secs_f64());
                self.review.recalculate_best_effort(job.batch_id).await;
                Err(e)
            }
        }
    }

    /// The fallible body between the claim and the settle.
    async fn run(&self, job: &VisionJobMessage) -> Result<PageOutcome, OcrError> {
        let page = self.repository.require_page(job.page_id).await?;
        let batch = self.repository.require_batch(page.batch_id).await?;

        if batch.status == BatchStatus::Cancelled {
            return Ok(PageOutcome::Abandoned);
        }

        if let Some(fatal) = self.preflight(&page, &batch) {
            return Ok(PageOutcome::Fatal(fatal.message()));
        }
        // Checked by preflight.
        let content_type = batch.content_type.clone().unwrap_or_default();

        let parser = self.parser_for(&batch);
        let parsed = parser
            .parse_page(&page.file_path, &page.file_type, &content_type)
            .await?;

        // The batch may have been cancelled while the parser ran; discard
        // the output rather than writing blocks into a dead batch.
        let batch = self.repository.require_batch(batch.id).await?;
        if batch.status == BatchStatus::Cancelled {
            return Ok(PageOutcome::Abandoned);
        }

        let created = self.persist_block(&page, &batch, parsed, content_type).await?;

        if !self
            .repository
            .settle_page_ocr(page.id, PageOcrStatus::Completed, None)
            .await?
        {
            // A reprocess request or another worker took the page over.
            warn!("Page claim lost before completion could be recorded");
        }

        Ok(PageOutcome::Completed(created))
    }

    /// Checks that no amount of retrying can fix.
    fn preflight(&self, page: &Page, batch: &Batch) -> Option<Fatal> {
        let path = Path::new(&page.file_path);
        if !path.is_file() {
            return Some(Fatal::Unreadable(page.file_path.clone()));
        }

        let is_pdf = page.file_type.eq_ignore_ascii_case("application/pdf")
            || path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            return Some(Fatal::PdfUpload);
        }

        if batch.content_type.as_deref().is_none_or(str::is_empty) {
            return Some(Fatal::MissingContentTypeHint);
        }

        None
    }

    /// Replace this page's unreviewed machine output with the single block
    /// the new parse collapses into. Blocks an admin already reviewed, edited
    /// or authored are left alone.
    async fn persist_block(
        &self,
        page: &Page,
        batch: &Batch,
        parsed: ParsedPage,
        content_type: String,
    ) -> Result<usize, OcrError> {
        let dropped = self
            .repository
            .delete_unreviewed_parsed_blocks(page.id)
            .await?;
        if dropped > 0 {
            info!(dropped, "Removed unreviewed blocks from a previous parse");
        }

        let classification = parsed.classification;
        let Some(flattened) = parsed.content.flatten() else {
            info!("Vision extracted no content, nothing to persist");
            return Ok(0);
        };

        let (lesson_id, topic_id, subtopic_id, classification_status) =
            self.resolve_taxonomy(classification.as_ref()).await?;

        let block_index = self.repository.next_block_index(page.id).await?;
        self.repository
            .create_block(NewBlock {
                page_id: page.id,
                batch_id: batch.id,
                block_index,
                content_type,
                block_type: flattened.block_type,
                raw_text: flattened.raw_text,
                structured_payload: flattened.structured_payload,
                lesson_id,
                topic_id,
                subtopic_id,
                classification_status,
                confidence: PARSED_CONFIDENCE,
                created_by: None,
            })
            .await?;

        Ok(1)
    }

    /// Map the parser's classification onto taxonomy rows, creating them as
    /// needed. No classification settles the blocks as FAILED; review can
    /// still proceed.
    async fn resolve_taxonomy(
        &self,
        classification: Option<&Classification>,
    ) -> Result<(Option<Uuid>, Option<Uuid>, Option<Uuid>, ClassificationStatus), OcrError> {
        let Some(classification) = classification else {
            return Ok((None, None, None, ClassificationStatus::Failed));
        };

        let lesson = self.repository.resolve_lesson(&classification.lesson).await?;

        let mut topic_id = None;
        let mut subtopic_id = None;
        if let Some(topic_name) = &classification.topic {
            let topic = self.repository.resolve_topic(lesson.id, topic_name).await?;
            topic_id = Some(topic.id);

            if let Some(subtopic_name) = &classification.subtopic {
                let subtopic = self
                    .repository
                    .resolve_subtopic(topic.id, subtopic_name)
                    .await?;
                subtopic_id = Some(subtopic.id);
            }
        }

        Ok((
            Some(lesson.id),
            topic_id,
            subtopic_id,
            ClassificationStatus::Classified,
        ))
    }

    /// The worker is already on a failure path here, so a failed status
    /// write is logged, not escalated.
    async fn settle_failed(&self, page_id: Uuid, message: String) {
        if let Err(err) = self
            .repository
            .settle_page_ocr(page_id, PageOcrStatus::Failed, Some(message))
            .await
        {
            warn!(error = %err, "Failed to record the page failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_messages_name_the_problem() {
        assert!(Fatal::Unreadable("/tmp/x.png".into())
            .message()
            .contains("/tmp/x.png"));
        assert!(Fatal::PdfUpload.message().contains("PDF"));
        assert!(Fatal::MissingContentTypeHint.message().contains("hint"));
    }
}
