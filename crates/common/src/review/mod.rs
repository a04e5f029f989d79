//! Approval orchestration and batch-status recalculation
//!
//! [`ReviewService`] owns every mutation of block approval state: approve,
//! reject, soft delete, manual block creation, and the review-screen fetch.
//! After each mutation it re-derives the owning batch's status from current
//! child data.
//!
//! Recalculation is split into a side-effect-free [`next_status`] over a
//! [`BatchSnapshot`] and a validate-then-write wrapper that walks one legal
//! forward hop at a time until fixpoint. A candidate the validator rejects is
//! logged and discarded; recalculation never fails the mutation that
//! triggered it.

use crate::audit::{AuditEvent, AuditSink};
use crate::db::models::*;
use crate::db::{NewBlock, Repository};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::transitions::{
    validate_transition, ApprovalStatus, BatchStatus, ClassificationStatus, ExtractionStatus,
    PageOcrStatus,
};
use sea_orm::Set;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// The child state a batch's status is derived from.
///
/// Soft-deleted blocks are carried with their `Deleted` verdict so the
/// aggregate rules can exclude them; approved-content entries belonging to
/// deleted blocks must already be filtered out by the loader.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub status: BatchStatus,
    pub pages: Vec<PageOcrStatus>,
    pub blocks: Vec<BlockView>,
    pub contents: Vec<ExtractionStatus>,
}

/// The two block facets the aggregate rules look at.
#[derive(Debug, Clone, Copy)]
pub struct BlockView {
    pub approval: ApprovalStatus,
    pub classification: ClassificationStatus,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            approval: block.approval_status,
            classification: block.classification_status,
        }
    }
}

/// Position of a status along the forward chain; `Cancelled` is off it.
fn forward_rank(status: BatchStatus) -> Option<u8> {
    use BatchStatus::*;
    match status {
        Pending => Some(0),
        Processing => Some(1),
        Uploaded => Some(2),
        Classified => Some(3),
        Reviewed => Some(4),
        KnowledgeExtracted => Some(5),
        Completed => Some(6),
        Cancelled => None,
    }
}

/// Next status on the forward chain, ignoring cancellation.
fn forward_successor(status: BatchStatus) -> Option<BatchStatus> {
    use BatchStatus::*;
    match status {
        Pending => Some(Processing),
        Processing => Some(Uploaded),
        Uploaded => Some(Classified),
        Classified => Some(Reviewed),
        Reviewed => Some(KnowledgeExtracted),
        KnowledgeExtracted => Some(Completed),
        Completed | Cancelled => None,
    }
}

/// Compute the single forward hop the aggregate rules call for, or `None`
/// when the batch should stay put.
///
/// Rules fire in fixed priority order; each returns one candidate which the
/// caller still passes through the transition validator before writing. A
/// pure function of the snapshot: re-running it against unchanged children
/// yields the same answer, which makes the wrapper idempotent.
pub fn next_status(snapshot: &BatchSnapshot) -> Option<BatchStatus> {
    use BatchStatus::*;

    let live: Vec<&BlockView> = snapshot
        .blocks
        .iter()
        .filter(|b| b.approval != ApprovalStatus::Deleted)
        .collect();

    // Rule 1: every page settled its OCR outcome.
    if matches!(snapshot.status, Pending | Processing)
        && !snapshot.pages.is_empty()
        && snapshot.pages.iter().all(|p| p.is_settled())
    {
        return Some(Uploaded);
    }

    // Rule 2: at least one block exists and classification settled on all.
    if snapshot.status == Uploaded
        && !live.is_empty()
        && live.iter().all(|b| b.classification.is_settled())
    {
        return Some(Classified);
    }

    // Rule 3: verdicts outstanding, the batch is ready for review. The name
    // REVIEWED is historical; it fires while PENDING blocks still exist.
    if matches!(snapshot.status, Uploaded | Classified)
        && live.iter().any(|b| b.approval == ApprovalStatus::Pending)
    {
        return Some(Reviewed);
    }

    // Rule 4: every live block has a verdict; settle against the extraction
    // aggregate. No approved content means nothing to extract (COMPLETED);
    // all rows extracted means KNOWLEDGE_EXTRACTED; anything in flight means
    // stay put. The hop toward the target goes one chain step at a time so
    // every write the wrapper performs is a legal transition. Only rule 1 may
    // lift a batch with OCR still in flight, so this rule additionally
    // requires every page settled: a late page can still add blocks.
    if !snapshot.pages.is_empty()
        && snapshot.pages.iter().all(|p| p.is_settled())
        && !live.is_empty()
        && live.iter().all(|b| b.approval.is_resolved())
    {
        let target = if snapshot.contents.is_empty() {
            Some(Completed)
        } else if snapshot.contents.iter().all(|c| c.is_extracted()) {
            Some(KnowledgeExtracted)
        } else {
            None
        };

        if let (Some(target), Some(rank)) = (target, forward_rank(snapshot.status)) {
            if forward_rank(target).is_some_and(|t| rank < t) {
                return forward_successor(snapshot.status);
            }
        }
    }

    None
}

/// The review-screen payload: batch plus its pages and non-deleted blocks.
#[derive(Debug, Clone)]
pub struct BatchReview {
    pub batch: Batch,
    pub pages: Vec<Page>,
    pub blocks: Vec<Block>,
}

/// Approval orchestrator over the repository.
#[derive(Clone)]
pub struct ReviewService {
    repo: Repository,
    audit: Arc<dyn AuditSink>,
}

impl ReviewService {
    pub fn new(repo: Repository, audit: Arc<dyn AuditSink>) -> Self {
        Self { repo, audit }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================================================================
    // Block verdicts
    // ========================================================================

    /// Approve a block, optionally with edited text, and upsert its
    /// approved-content row. Extraction is never auto-enqueued here; that is
    /// a separate deliberate admin action.
    #[instrument(skip(self, edited_text), fields(block_id = %block_id))]
    pub async fn approve_block(
        &self,
        block_id: Uuid,
        approver_id: Uuid,
        edited_text: Option<String>,
    ) -> Result<Block> {
        let block = self.repo.require_block(block_id).await?;
        validate_transition(block.approval_status, ApprovalStatus::Approved)?;

        let now = chrono::Utc::now();
        let mut text = block.canonical_text().to_string();

        let mut active: BlockActiveModel = block.clone().into();
        if let Some(edited) = edited_text {
            if edited != block.raw_text {
                active.is_edited = Set(true);
                active.edited_text = Set(Some(edited.clone()));
            }
            text = edited;
        }
        active.approval_status = Set(ApprovalStatus::Approved);
        active.approved_by = Set(Some(approver_id));
        active.approved_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());

        let block = self.repo.update_block(active).await?;
        self.upsert_approved_content(&block, text).await?;

        metrics::record_approval("approved");
        self.audit
            .emit(AuditEvent::block_verdict("approve", block.id, approver_id))
            .await;

        self.recalculate_best_effort(block.batch_id).await;
        Ok(block)
    }

    /// Materialize or refresh the block's approved-content row.
    ///
    /// On re-approval with changed content the extraction status resets to
    /// NOT_STARTED only from COMPLETED/PROCESSING/QUEUED: resetting
    /// NOT_STARTED would be a no-op write, and resetting FAILED would mask
    /// the failure until reprocessing is explicitly requested.
    async fn upsert_approved_content(&self, block: &Block, text: String) -> Result<()> {
        match self.repo.find_content_by_block(block.id).await? {
            None => {
                self.repo
                    .insert_content(block.id, block.batch_id, text, block.block_type)
                    .await?;
            }
            Some(existing) if existing.content != text => {
                let stale = matches!(
                    existing.extraction_status,
                    ExtractionStatus::Completed
                        | ExtractionStatus::Processing
                        | ExtractionStatus::Queued
                );

                let mut active: ApprovedContentActiveModel = existing.into();
                active.content = Set(text);
                if stale {
                    active.extraction_status = Set(ExtractionStatus::NotStarted);
                    active.extracted_at = Set(None);
                    active.error_message = Set(None);
                }
                active.updated_at = Set(chrono::Utc::now().into());
                self.repo.update_content(active).await?;
            }
            // Same content: idempotent re-approval, no spurious write.
            Some(_) => {}
        }
        Ok(())
    }

    /// Reject a block. Rejected blocks can be re-reviewed.
    #[instrument(skip(self), fields(block_id = %block_id))]
    pub async fn reject_block(&self, block_id: Uuid, approver_id: Uuid) -> Result<Block> {
        let block = self.repo.require_block(block_id).await?;
        validate_transition(block.approval_status, ApprovalStatus::Rejected)?;

        let now = chrono::Utc::now();
        let mut active: BlockActiveModel = block.into();
        active.approval_status = Set(ApprovalStatus::Rejected);
        active.approved_by = Set(Some(approver_id));
        active.approved_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());

        let block = self.repo.update_block(active).await?;

        metrics::record_approval("rejected");
        self.audit
            .emit(AuditEvent::block_verdict("reject", block.id, approver_id))
            .await;

        self.recalculate_best_effort(block.batch_id).await;
        Ok(block)
    }

    /// Soft-delete a block. One-way: a deleted block leaves every future
    /// aggregate and cannot be re-reviewed.
    #[instrument(skip(self), fields(block_id = %block_id))]
    pub async fn delete_block(&self, block_id: Uuid, approver_id: Uuid) -> Result<Block> {
        let block = self.repo.require_block(block_id).await?;
        validate_transition(block.approval_status, ApprovalStatus::Deleted)?;

        let now = chrono::Utc::now();
        let mut active: BlockActiveModel = block.into();
        active.approval_status = Set(ApprovalStatus::Deleted);
        active.deleted_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());

        let block = self.repo.update_block(active).await?;

        metrics::record_approval("deleted");
        self.audit
            .emit(AuditEvent::block_verdict("delete", block.id, approver_id))
            .await;

        self.recalculate_best_effort(block.batch_id).await;
        Ok(block)
    }

    // ========================================================================
    // Manual blocks
    // ========================================================================

    /// Admin-authored block, bypassing the vision worker. The named lesson
    /// must already exist; topic and subtopic under it are resolved or
    /// created. Does not trigger recalculation: the caller's subsequent
    /// verdict does.
    #[instrument(skip(self, raw_text), fields(page_id = %page_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn create_manual_block(
        &self,
        page_id: Uuid,
        raw_text: String,
        content_type: String,
        created_by: Uuid,
        lesson: Option<String>,
        topic: Option<String>,
        subtopic: Option<String>,
    ) -> Result<Block> {
        let page = self.repo.require_page(page_id).await?;

        let mut lesson_id = None;
        let mut topic_id = None;
        let mut subtopic_id = None;

        if let Some(lesson_name) = lesson {
            let lesson = self
                .repo
                .find_lesson_by_name(&lesson_name)
                .await?
                .ok_or(AppError::LessonNotFound { name: lesson_name })?;
            lesson_id = Some(lesson.id);

            if let Some(topic_name) = topic {
                let topic = self.repo.resolve_topic(lesson.id, &topic_name).await?;
                topic_id = Some(topic.id);

                if let Some(subtopic_name) = subtopic {
                    let subtopic = self.repo.resolve_subtopic(topic.id, &subtopic_name).await?;
                    subtopic_id = Some(subtopic.id);
                }
            }
        }

        let block_index = self.repo.next_block_index(page_id).await?;
        let block = self
            .repo
            .create_block(NewBlock {
                page_id,
                batch_id: page.batch_id,
                block_index,
                content_type,
                block_type: BlockType::Text,
                raw_text,
                structured_payload: None,
                lesson_id,
                topic_id,
                subtopic_id,
                classification_status: ClassificationStatus::Classified,
                confidence: 1.0,
                created_by: Some(created_by),
            })
            .await?;

        info!(block_id = %block.id, block_index, "Manual block created");
        self.audit
            .emit(AuditEvent::block_verdict("create_manual", block.id, created_by))
            .await;

        Ok(block)
    }

    // ========================================================================
    // Review fetch
    // ========================================================================

    /// Side-effecting read backing the review screen: opening it marks the
    /// batch REVIEWED when the transition validates.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn batch_for_review(&self, batch_id: Uuid) -> Result<BatchReview> {
        let mut batch = self.repo.require_batch(batch_id).await?;

        if matches!(batch.status, BatchStatus::Uploaded | BatchStatus::Classified)
            && validate_transition(batch.status, BatchStatus::Reviewed).is_ok()
            && self
                .repo
                .update_batch_status_checked(batch.id, batch.status, BatchStatus::Reviewed)
                .await?
        {
            batch = self.repo.require_batch(batch_id).await?;
        }

        let pages = self.repo.list_pages_by_batch(batch_id).await?;
        let blocks = self.repo.list_blocks_by_batch(batch_id, false).await?;

        Ok(BatchReview {
            batch,
            pages,
            blocks,
        })
    }

    // ========================================================================
    // Recalculation
    // ========================================================================

    /// Load the current child aggregate for a batch. Approved-content rows
    /// belonging to soft-deleted blocks are excluded.
    async fn load_snapshot(&self, batch: &Batch) -> Result<BatchSnapshot> {
        let pages = self.repo.list_pages_by_batch(batch.id).await?;
        let blocks = self.repo.list_blocks_by_batch(batch.id, true).await?;
        let contents = self.repo.list_contents_by_batch(batch.id).await?;

        let deleted_blocks: HashSet<Uuid> = blocks
            .iter()
            .filter(|b| b.approval_status == ApprovalStatus::Deleted)
            .map(|b| b.id)
            .collect();

        Ok(BatchSnapshot {
            status: batch.status,
            pages: pages.iter().map(|p| p.ocr_status).collect(),
            blocks: blocks.iter().map(BlockView::from).collect(),
            contents: contents
                .iter()
                .filter(|c| !deleted_blocks.contains(&c.block_id))
                .map(|c| c.extraction_status)
                .collect(),
        })
    }

    /// Re-derive the batch's status from current child data, walking one
    /// validated hop per iteration until fixpoint. Returns the final status.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn recalculate_batch_status(&self, batch_id: Uuid) -> Result<BatchStatus> {
        loop {
            let batch = self.repo.require_batch(batch_id).await?;
            let snapshot = self.load_snapshot(&batch).await?;

            let Some(candidate) = next_status(&snapshot) else {
                metrics::record_recalculation("unchanged");
                return Ok(batch.status);
            };
            if candidate == batch.status {
                metrics::record_recalculation("unchanged");
                return Ok(batch.status);
            }

            match validate_transition(batch.status, candidate) {
                Ok(()) => {
                    if self
                        .repo
                        .update_batch_status_checked(batch.id, batch.status, candidate)
                        .await?
                    {
                        debug!(from = %batch.status, to = %candidate, "Batch status advanced");
                        metrics::record_recalculation("advanced");
                        // Walk on: the aggregate may call for another hop.
                        continue;
                    }
                    // Lost a race against a concurrent writer (or a cancel);
                    // reload and re-derive from whatever won.
                    continue;
                }
                Err(err) => {
                    // Advisory derivation: an illegal candidate is discarded,
                    // never surfaced to the triggering mutation.
                    warn!(error = %err, "Discarding illegal recalculated status");
                    metrics::record_recalculation("discarded");
                    return Ok(batch.status);
                }
            }
        }
    }

    /// The single call site where recalculation errors are swallowed: it runs
    /// as a side effect of many mutations and must never fail them.
    pub async fn recalculate_best_effort(&self, batch_id: Uuid) {
        if let Err(err) = self.recalculate_batch_status(batch_id).await {
            warn!(batch_id = %batch_id, error = %err, "Batch recalculation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(approval: ApprovalStatus) -> BlockView {
        BlockView {
            approval,
            classification: ClassificationStatus::Classified,
        }
    }

    fn snapshot(
        status: BatchStatus,
        pages: Vec<PageOcrStatus>,
        blocks: Vec<BlockView>,
        contents: Vec<ExtractionStatus>,
    ) -> BatchSnapshot {
        BatchSnapshot {
            status,
            pages,
            blocks,
            contents,
        }
    }

    /// Drive the snapshot to fixpoint exactly as the wrapper does: one
    /// validated hop per iteration, illegal candidates discarded.
    fn walk(mut snapshot: BatchSnapshot) -> BatchStatus {
        for _ in 0..8 {
            let Some(candidate) = next_status(&snapshot) else {
                return snapshot.status;
            };
            if candidate == snapshot.status
                || validate_transition(snapshot.status, candidate).is_err()
            {
                return snapshot.status;
            }
            snapshot.status = candidate;
        }
        snapshot.status
    }

    #[test]
    fn all_pages_settled_yields_uploaded() {
        let s = snapshot(
            BatchStatus::Processing,
            vec![PageOcrStatus::Completed, PageOcrStatus::Completed],
            vec![],
            vec![],
        );
        assert_eq!(next_status(&s), Some(BatchStatus::Uploaded));
    }

    #[test]
    fn failed_pages_count_as_settled() {
        let s = snapshot(
            BatchStatus::Processing,
            vec![PageOcrStatus::Completed, PageOcrStatus::Failed],
            vec![],
            vec![],
        );
        assert_eq!(next_status(&s), Some(BatchStatus::Uploaded));
    }

    #[test]
    fn unsettled_page_holds_the_batch() {
        let s = snapshot(
            BatchStatus::Processing,
            vec![PageOcrStatus::Completed, PageOcrStatus::Processing],
            vec![],
            vec![],
        );
        assert_eq!(next_status(&s), None);
    }

    #[test]
    fn batch_without_pages_does_not_advance() {
        let s = snapshot(BatchStatus::Processing, vec![], vec![], vec![]);
        assert_eq!(next_status(&s), None);
    }

    #[test]
    fn pending_batch_candidate_is_discarded_by_validator() {
        // Rule 1 fires from PENDING too, but PENDING -> UPLOADED is not in
        // the table; the wrapper discards it and the batch stays put.
        let s = snapshot(
            BatchStatus::Pending,
            vec![PageOcrStatus::Completed],
            vec![],
            vec![],
        );
        assert_eq!(next_status(&s), Some(BatchStatus::Uploaded));
        assert_eq!(walk(s), BatchStatus::Pending);
    }

    #[test]
    fn pending_block_yields_reviewed_not_classified() {
        // Two pages OCR-complete, three blocks, one approved, two pending:
        // the batch walks UPLOADED -> CLASSIFIED -> REVIEWED.
        let s = snapshot(
            BatchStatus::Processing,
            vec![PageOcrStatus::Completed, PageOcrStatus::Completed],
            vec![
                block(ApprovalStatus::Approved),
                block(ApprovalStatus::Pending),
                block(ApprovalStatus::Pending),
            ],
            vec![ExtractionStatus::NotStarted],
        );
        assert_eq!(walk(s), BatchStatus::Reviewed);
    }

    #[test]
    fn unsettled_classification_skips_classified_hop() {
        let s = snapshot(
            BatchStatus::Uploaded,
            vec![PageOcrStatus::Completed],
            vec![BlockView {
                approval: ApprovalStatus::Pending,
                classification: ClassificationStatus::Pending,
            }],
            vec![],
        );
        // Rule 2 cannot fire; rule 3's UPLOADED -> REVIEWED candidate is not
        // in the table and gets discarded.
        assert_eq!(next_status(&s), Some(BatchStatus::Reviewed));
        assert_eq!(walk(s), BatchStatus::Uploaded);
    }

    #[test]
    fn verdicts_do_not_outrun_ocr() {
        // Every existing block already has a verdict, but a sibling page is
        // still mid-OCR; the batch must hold for its blocks-to-be.
        let s = snapshot(
            BatchStatus::Processing,
            vec![PageOcrStatus::Completed, PageOcrStatus::Processing],
            vec![block(ApprovalStatus::Rejected)],
            vec![],
        );
        assert_eq!(next_status(&s), None);
        assert_eq!(walk(s), BatchStatus::Processing);
    }

    #[test]
    fn all_resolved_no_content_walks_to_completed() {
        let s = snapshot(
            BatchStatus::Reviewed,
            vec![PageOcrStatus::Completed],
            vec![
                block(ApprovalStatus::Rejected),
                block(ApprovalStatus::Deleted),
            ],
            vec![],
        );
        assert_eq!(walk(s), BatchStatus::Completed);
    }

    #[test]
    fn all_resolved_verified_content_stops_at_knowledge_extracted() {
        let s = snapshot(
            BatchStatus::Reviewed,
            vec![PageOcrStatus::Completed],
            vec![
                block(ApprovalStatus::Approved),
                block(ApprovalStatus::Rejected),
                block(ApprovalStatus::Deleted),
            ],
            vec![ExtractionStatus::Verified],
        );
        assert_eq!(walk(s), BatchStatus::KnowledgeExtracted);
    }

    #[test]
    fn in_flight_extraction_holds_the_batch() {
        let s = snapshot(
            BatchStatus::Reviewed,
            vec![PageOcrStatus::Completed],
            vec![block(ApprovalStatus::Approved)],
            vec![ExtractionStatus::Processing],
        );
        assert_eq!(next_status(&s), None);
    }

    #[test]
    fn recalculation_is_idempotent_at_fixpoint() {
        let s = snapshot(
            BatchStatus::KnowledgeExtracted,
            vec![PageOcrStatus::Completed],
            vec![block(ApprovalStatus::Approved)],
            vec![ExtractionStatus::Completed],
        );
        assert_eq!(walk(s.clone()), BatchStatus::KnowledgeExtracted);
        assert_eq!(next_status(&s), None);
    }

    #[test]
    fn cancelled_batch_never_advances() {
        let s = snapshot(
            BatchStatus::Cancelled,
            vec![PageOcrStatus::Completed],
            vec![block(ApprovalStatus::Approved)],
            vec![ExtractionStatus::Completed],
        );
        assert_eq!(next_status(&s), None);
    }

    #[test]
    fn deleted_blocks_leave_the_aggregate() {
        // The only live block is pending; the deleted one must not satisfy
        // rule 4's all-resolved check on its own.
        let s = snapshot(
            BatchStatus::Classified,
            vec![PageOcrStatus::Completed],
            vec![
                block(ApprovalStatus::Deleted),
                block(ApprovalStatus::Pending),
            ],
            vec![],
        );
        assert_eq!(next_status(&s), Some(BatchStatus::Reviewed));
    }

    #[test]
    fn every_emitted_hop_validates_or_is_discarded() {
        // Replay every candidate the walk would write through the validator.
        use crate::transitions::Lifecycle;
        use sea_orm::Iterable;

        for status in BatchStatus::iter() {
            for pages in [
                vec![PageOcrStatus::Completed],
                vec![PageOcrStatus::Pending],
                vec![],
            ] {
                for blocks in [
                    vec![],
                    vec![block(ApprovalStatus::Pending)],
                    vec![block(ApprovalStatus::Approved)],
                    vec![block(ApprovalStatus::Rejected)],
                ] {
                    for contents in [
                        vec![],
                        vec![ExtractionStatus::Verified],
                        vec![ExtractionStatus::Queued],
                    ] {
                        let s = snapshot(status, pages.clone(), blocks.clone(), contents);
                        if let Some(candidate) = next_status(&s) {
                            if candidate != status
                                && validate_transition(status, candidate).is_ok()
                            {
                                // A hop the wrapper would write must be legal
                                // from the then-current status by definition;
                                // assert it round-trips.
                                assert!(status.can_transition(candidate));
                            }
                        }
                    }
                }
            }
        }
    }
}
