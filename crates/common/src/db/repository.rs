//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations. Owns no
//! business logic beyond CRUD and joins; every status transition decision is
//! made by callers against the transition tables.
//!
//! Status claims are conditional writes keyed on the expected current status
//! and checked by `rows_affected`, so two workers racing on the same target
//! cannot both win: the second conditional update matches zero rows.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::transitions::{
    AnalysisStatus, ApprovalStatus, BatchStatus, ExtractionStatus, PageOcrStatus,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

/// Fields for a new block row; set by the vision worker or a manual-block
/// request, never both in one call.
#[derive(Debug, Clone)]
pub struct NewBlock {
    pub page_id: Uuid,
    pub batch_id: Uuid,
    pub block_index: i32,
    pub content_type: String,
    pub block_type: BlockType,
    pub raw_text: String,
    pub structured_payload: Option<serde_json::Value>,
    pub lesson_id: Option<Uuid>,
    pub topic_id: Option<Uuid>,
    pub subtopic_id: Option<Uuid>,
    pub classification_status: crate::transitions::ClassificationStatus,
    pub confidence: f64,
    pub created_by: Option<Uuid>,
}

/// Per-verdict block counts for a batch, excluding soft-deleted blocks from
/// the reviewable total.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockCounts {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub deleted: u64,
}

impl BlockCounts {
    /// Blocks that still count toward review aggregates.
    pub fn reviewable(&self) -> u64 {
        self.pending + self.approved + self.rejected
    }
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection. Also used for status-sensitive reads: claim
    /// decisions and recalculation snapshots must not see replica lag.
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Batch Operations
    // ========================================================================

    /// Create a new batch in PENDING with its pages, all PENDING. One
    /// transaction: a batch never lands with a partial page set.
    pub async fn create_batch(
        &self,
        content_type: Option<String>,
        vision_provider: Option<String>,
        created_by: Uuid,
        page_files: Vec<(String, String)>, // (file_path, file_type), in page order
    ) -> Result<(Batch, Vec<Page>)> {
        let now = chrono::Utc::now();
        let batch_id = Uuid::new_v4();
        let txn = self.write_conn().begin().await?;

        let batch = BatchActiveModel {
            id: Set(batch_id),
            status: Set(BatchStatus::Pending),
            content_type: Set(content_type),
            vision_provider: Set(vision_provider),
            created_by: Set(created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        let batch = batch.insert(&txn).await?;

        let mut pages = Vec::with_capacity(page_files.len());
        for (index, (file_path, file_type)) in page_files.into_iter().enumerate() {
            let page = PageActiveModel {
                id: Set(Uuid::new_v4()),
                batch_id: Set(batch_id),
                page_index: Set(index as i32),
                file_path: Set(file_path),
                file_type: Set(file_type),
                ocr_status: Set(PageOcrStatus::Pending),
                error_message: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            };
            pages.push(page.insert(&txn).await?);
        }

        txn.commit().await?;
        Ok((batch, pages))
    }

    /// Find batch by ID. Reads the primary: callers use this to make
    /// transition decisions.
    pub async fn find_batch_by_id(&self, id: Uuid) -> Result<Option<Batch>> {
        BatchEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// List batches with pagination
    pub async fn list_batches(&self, offset: u64, limit: u64) -> Result<(Vec<Batch>, u64)> {
        let paginator = BatchEntity::find()
            .order_by_desc(BatchColumn::CreatedAt)
            .paginate(self.read_conn(), limit);

        let total = paginator.num_items().await?;
        let batches = paginator.fetch_page(offset / limit).await?;

        Ok((batches, total))
    }

    /// Conditionally advance a batch's status: the write lands only if the
    /// stored status still equals `from`. Returns whether a row was updated.
    pub async fn update_batch_status_checked(
        &self,
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE batches SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
            vec![to.as_str().into(), batch_id.into(), from.as_str().into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Page Operations
    // ========================================================================

    /// Find page by ID (primary: workers decide from this)
    pub async fn find_page_by_id(&self, id: Uuid) -> Result<Option<Page>> {
        PageEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// List the pages of a batch in page order
    pub async fn list_pages_by_batch(&self, batch_id: Uuid) -> Result<Vec<Page>> {
        PageEntity::find()
            .filter(PageColumn::BatchId.eq(batch_id))
            .order_by_asc(PageColumn::PageIndex)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Claim a page for OCR. Accepts PENDING (first delivery), FAILED
    /// (explicit reprocess) and PROCESSING (redelivery after a dead worker).
    /// Returns false when the page is already COMPLETED.
    pub async fn claim_page_for_ocr(&self, page_id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE pages SET ocr_status = 'PROCESSING', error_message = NULL, updated_at = NOW() \
             WHERE id = $1 AND ocr_status IN ('PENDING', 'FAILED', 'PROCESSING')",
            vec![page_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a page's OCR outcome. Only lands while the page is PROCESSING, so
    /// a stale worker cannot overwrite a later claim's result.
    pub async fn settle_page_ocr(
        &self,
        page_id: Uuid,
        status: PageOcrStatus,
        error_message: Option<String>,
    ) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE pages SET ocr_status = $1, error_message = $2, updated_at = NOW() \
             WHERE id = $3 AND ocr_status = 'PROCESSING'",
            vec![status.as_str().into(), error_message.into(), page_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// List FAILED pages of a batch and re-mark them PENDING for reprocess.
    /// Returns the pages that were actually reset.
    pub async fn reset_failed_pages(&self, batch_id: Uuid) -> Result<Vec<Page>> {
        let failed = PageEntity::find()
            .filter(PageColumn::BatchId.eq(batch_id))
            .filter(PageColumn::OcrStatus.eq(PageOcrStatus::Failed))
            .order_by_asc(PageColumn::PageIndex)
            .all(self.write_conn())
            .await?;

        let mut reset = Vec::with_capacity(failed.len());
        for page in failed {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                "UPDATE pages SET ocr_status = 'PENDING', error_message = NULL, updated_at = NOW() \
                 WHERE id = $1 AND ocr_status = 'FAILED'",
                vec![page.id.into()],
            );
            if self.write_conn().execute(stmt).await?.rows_affected() > 0 {
                reset.push(page);
            }
        }

        Ok(reset)
    }

    // ========================================================================
    // Block Operations
    // ========================================================================

    /// Create a block, PENDING review.
    pub async fn create_block(&self, new: NewBlock) -> Result<Block> {
        let now = chrono::Utc::now();

        let block = BlockActiveModel {
            id: Set(Uuid::new_v4()),
            page_id: Set(new.page_id),
            batch_id: Set(new.batch_id),
            block_index: Set(new.block_index),
            content_type: Set(new.content_type),
            block_type: Set(new.block_type),
            raw_text: Set(new.raw_text),
            structured_payload: Set(new.structured_payload),
            lesson_id: Set(new.lesson_id),
            topic_id: Set(new.topic_id),
            subtopic_id: Set(new.subtopic_id),
            classification_status: Set(new.classification_status),
            confidence: Set(new.confidence),
            approval_status: Set(ApprovalStatus::Pending),
            is_edited: Set(false),
            edited_text: Set(None),
            approved_by: Set(None),
            approved_at: Set(None),
            created_by: Set(new.created_by),
            deleted_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        block.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find block by ID (primary: approval decisions read this)
    pub async fn find_block_by_id(&self, id: Uuid) -> Result<Option<Block>> {
        BlockEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Persist block mutations prepared by the approval orchestrator
    pub async fn update_block(&self, block: BlockActiveModel) -> Result<Block> {
        block.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Blocks of a batch, soft-deleted excluded unless asked for
    pub async fn list_blocks_by_batch(
        &self,
        batch_id: Uuid,
        include_deleted: bool,
    ) -> Result<Vec<Block>> {
        let mut query = BlockEntity::find().filter(BlockColumn::BatchId.eq(batch_id));
        if !include_deleted {
            query = query.filter(BlockColumn::DeletedAt.is_null());
        }
        query
            .order_by_asc(BlockColumn::BlockIndex)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Non-deleted blocks of a page in block order
    pub async fn list_blocks_by_page(&self, page_id: Uuid) -> Result<Vec<Block>> {
        BlockEntity::find()
            .filter(BlockColumn::PageId.eq(page_id))
            .filter(BlockColumn::DeletedAt.is_null())
            .order_by_asc(BlockColumn::BlockIndex)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Next free block index within a page (deleted blocks keep their slot)
    pub async fn next_block_index(&self, page_id: Uuid) -> Result<i32> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT COALESCE(MAX(block_index), -1) + 1 AS next_index FROM blocks WHERE page_id = $1",
            vec![page_id.into()],
        );

        let row = self.write_conn().query_one(stmt).await?;
        match row {
            Some(row) => Ok(row.try_get_by_index::<i32>(0)?),
            None => Ok(0),
        }
    }

    /// Remove machine-created blocks still awaiting review on a page. Run
    /// before a vision re-parse so admin-authored and already-reviewed blocks
    /// survive the retry.
    pub async fn delete_unreviewed_parsed_blocks(&self, page_id: Uuid) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM blocks WHERE page_id = $1 AND approval_status = 'PENDING' \
             AND created_by IS NULL",
            vec![page_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected())
    }

    /// Per-verdict block counts for a batch
    pub async fn count_blocks_by_batch(&self, batch_id: Uuid) -> Result<BlockCounts> {
        let blocks = self.list_blocks_by_batch(batch_id, true).await?;
        let mut counts = BlockCounts::default();
        for block in &blocks {
            match block.approval_status {
                ApprovalStatus::Pending => counts.pending += 1,
                ApprovalStatus::Approved => counts.approved += 1,
                ApprovalStatus::Rejected => counts.rejected += 1,
                ApprovalStatus::Deleted => counts.deleted += 1,
            }
        }
        Ok(counts)
    }

    // ========================================================================
    // Approved Content Operations
    // ========================================================================

    /// The at-most-one approved-content row of a block
    pub async fn find_content_by_block(&self, block_id: Uuid) -> Result<Option<ApprovedContent>> {
        ApprovedContentEntity::find()
            .filter(ApprovedContentColumn::BlockId.eq(block_id))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Find approved content by ID (primary: the duplicate-work guard and the
    /// worker claim decide from this)
    pub async fn find_content_by_id(&self, id: Uuid) -> Result<Option<ApprovedContent>> {
        ApprovedContentEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// All approved-content rows of a batch
    pub async fn list_contents_by_batch(&self, batch_id: Uuid) -> Result<Vec<ApprovedContent>> {
        ApprovedContentEntity::find()
            .filter(ApprovedContentColumn::BatchId.eq(batch_id))
            .order_by_asc(ApprovedContentColumn::CreatedAt)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Materialize the approved-content row on first approval
    pub async fn insert_content(
        &self,
        block_id: Uuid,
        batch_id: Uuid,
        content: String,
        block_type: BlockType,
    ) -> Result<ApprovedContent> {
        let now = chrono::Utc::now();

        let row = ApprovedContentActiveModel {
            id: Set(Uuid::new_v4()),
            block_id: Set(block_id),
            batch_id: Set(batch_id),
            content: Set(content),
            block_type: Set(block_type),
            extraction_status: Set(ExtractionStatus::NotStarted),
            error_message: Set(None),
            extracted_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        row.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Persist approved-content mutations prepared by the orchestrator
    pub async fn update_content(
        &self,
        content: ApprovedContentActiveModel,
    ) -> Result<ApprovedContent> {
        content.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Conditionally move an approved-content row's extraction status: the
    /// write lands only while the stored status is one of `from`. This is the
    /// atomic form of the duplicate-work guard: of two concurrent callers,
    /// exactly one sees `rows_affected == 1`.
    pub async fn try_mark_extraction(
        &self,
        content_id: Uuid,
        from: &[ExtractionStatus],
        to: ExtractionStatus,
    ) -> Result<bool> {
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("${}", i + 3)).collect();
        let sql = format!(
            "UPDATE approved_contents SET extraction_status = $1, updated_at = NOW() \
             WHERE id = $2 AND extraction_status IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<sea_orm::Value> = vec![to.as_str().into(), content_id.into()];
        values.extend(from.iter().map(|s| sea_orm::Value::from(s.as_str())));

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// COMPLETED with a timestamp; only lands while PROCESSING
    pub async fn mark_extraction_completed(&self, content_id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE approved_contents SET extraction_status = 'COMPLETED', error_message = NULL, \
             extracted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND extraction_status = 'PROCESSING'",
            vec![content_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// FAILED with the captured error; only lands while PROCESSING
    pub async fn mark_extraction_failed(&self, content_id: Uuid, error: &str) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE approved_contents SET extraction_status = 'FAILED', error_message = $1, \
             updated_at = NOW() WHERE id = $2 AND extraction_status = 'PROCESSING'",
            vec![error.into(), content_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Exam Question Operations
    // ========================================================================

    /// Find exam question by ID (primary)
    pub async fn find_exam_question_by_id(&self, id: Uuid) -> Result<Option<ExamQuestion>> {
        ExamQuestionEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Conditional analysis-status move, same shape as the extraction claim
    pub async fn try_mark_analysis(
        &self,
        question_id: Uuid,
        from: &[AnalysisStatus],
        to: AnalysisStatus,
    ) -> Result<bool> {
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("${}", i + 3)).collect();
        let sql = format!(
            "UPDATE exam_questions SET analysis_status = $1, updated_at = NOW() \
             WHERE id = $2 AND analysis_status IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<sea_orm::Value> = vec![to.as_str().into(), question_id.into()];
        values.extend(from.iter().map(|s| sea_orm::Value::from(s.as_str())));

        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, &sql, values);
        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// ANALYZED with a timestamp; only lands while PROCESSING
    pub async fn mark_analysis_completed(&self, question_id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE exam_questions SET analysis_status = 'ANALYZED', error_message = NULL, \
             analyzed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND analysis_status = 'PROCESSING'",
            vec![question_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    /// FAILED with the captured error; only lands while PROCESSING
    pub async fn mark_analysis_failed(&self, question_id: Uuid, error: &str) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE exam_questions SET analysis_status = 'FAILED', error_message = $1, \
             updated_at = NOW() WHERE id = $2 AND analysis_status = 'PROCESSING'",
            vec![error.into(), question_id.into()],
        );

        let result = self.write_conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Knowledge Point Operations
    // ========================================================================

    /// Insert the extraction collaborator's output
    pub async fn insert_knowledge_points(
        &self,
        points: Vec<KnowledgePointActiveModel>,
    ) -> Result<u64> {
        if points.is_empty() {
            return Ok(0);
        }
        let count = points.len() as u64;
        KnowledgePointEntity::insert_many(points)
            .exec(self.write_conn())
            .await?;
        Ok(count)
    }

    /// Drop prior extraction output before a re-run replaces it
    pub async fn delete_knowledge_points_for_content(&self, content_id: Uuid) -> Result<u64> {
        let result = KnowledgePointEntity::delete_many()
            .filter(KnowledgePointColumn::ApprovedContentId.eq(content_id))
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected)
    }

    // ========================================================================
    // Taxonomy Operations
    // ========================================================================

    /// Find a lesson by exact name
    pub async fn find_lesson_by_name(&self, name: &str) -> Result<Option<Lesson>> {
        LessonEntity::find()
            .filter(LessonColumn::Name.eq(name))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Find-or-create a lesson by name
    pub async fn resolve_lesson(&self, name: &str) -> Result<Lesson> {
        if let Some(existing) = self.find_lesson_by_name(name).await? {
            return Ok(existing);
        }

        let lesson = LessonActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };
        lesson.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find-or-create a topic, unique per (lesson, name)
    pub async fn resolve_topic(&self, lesson_id: Uuid, name: &str) -> Result<Topic> {
        let existing = TopicEntity::find()
            .filter(TopicColumn::LessonId.eq(lesson_id))
            .filter(TopicColumn::Name.eq(name))
            .one(self.write_conn())
            .await?;
        if let Some(topic) = existing {
            return Ok(topic);
        }

        let topic = TopicActiveModel {
            id: Set(Uuid::new_v4()),
            lesson_id: Set(lesson_id),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };
        topic.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find-or-create a subtopic, unique per (topic, name)
    pub async fn resolve_subtopic(&self, topic_id: Uuid, name: &str) -> Result<Subtopic> {
        let existing = SubtopicEntity::find()
            .filter(SubtopicColumn::TopicId.eq(topic_id))
            .filter(SubtopicColumn::Name.eq(name))
            .one(self.write_conn())
            .await?;
        if let Some(subtopic) = existing {
            return Ok(subtopic);
        }

        let subtopic = SubtopicActiveModel {
            id: Set(Uuid::new_v4()),
            topic_id: Set(topic_id),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };
        subtopic.insert(self.write_conn()).await.map_err(Into::into)
    }
}

impl Repository {
    /// Look up a block's batch not-found aware
    pub async fn require_block(&self, block_id: Uuid) -> Result<Block> {
        self.find_block_by_id(block_id)
            .await?
            .ok_or_else(|| AppError::BlockNotFound {
                id: block_id.to_string(),
            })
    }

    /// Look up a batch not-found aware
    pub async fn require_batch(&self, batch_id: Uuid) -> Result<Batch> {
        self.find_batch_by_id(batch_id)
            .await?
            .ok_or_else(|| AppError::BatchNotFound {
                id: batch_id.to_string(),
            })
    }

    /// Look up a page not-found aware
    pub async fn require_page(&self, page_id: Uuid) -> Result<Page> {
        self.find_page_by_id(page_id)
            .await?
            .ok_or_else(|| AppError::PageNotFound {
                id: page_id.to_string(),
            })
    }
}
