//! Lifecycle transition tables and guard predicates
//!
//! Every status column in the data model is a typed enum defined here, and
//! every writer goes through [`validate_transition`] against the single legal
//! transition table for that lifecycle. Guard predicates are cheap boolean
//! views over one current state, used to short-circuit expensive work before
//! a transition is even attempted; a guard failure and a transition failure
//! are reported differently to the caller.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A status enum with a fixed legal-transition table.
///
/// Terminal states return an empty slice from [`Lifecycle::allowed_next`].
pub trait Lifecycle: Copy + Eq + fmt::Display + Sized + 'static {
    /// Lifecycle name used in errors and logs (e.g. `"batch"`).
    const KIND: &'static str;

    /// States legally reachable from `self`.
    fn allowed_next(self) -> &'static [Self];

    /// True if no further transition is legal.
    fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// True if `self -> to` is in the transition table.
    fn can_transition(self, to: Self) -> bool {
        self.allowed_next().contains(&to)
    }
}

/// Rejected state change, naming the illegal pair and the allowed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal {lifecycle} transition {from} -> {to} (allowed from {from}: [{allowed}])")]
pub struct TransitionError {
    pub lifecycle: &'static str,
    pub from: String,
    pub to: String,
    pub allowed: String,
}

/// Check `from -> to` against the lifecycle's transition table.
///
/// Never mutates anything; callers must abstain from writing on `Err`.
pub fn validate_transition<S: Lifecycle>(from: S, to: S) -> Result<(), TransitionError> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(TransitionError {
            lifecycle: S::KIND,
            from: from.to_string(),
            to: to.to_string(),
            allowed: from
                .allowed_next()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

// ============================================================================
// Batch lifecycle
// ============================================================================

/// Upload-session lifecycle. Forward movement happens only through
/// recalculation; `Cancelled` is the only backward-ish exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "UPLOADED")]
    Uploaded,
    #[sea_orm(string_value = "CLASSIFIED")]
    Classified,
    #[sea_orm(string_value = "REVIEWED")]
    Reviewed,
    #[sea_orm(string_value = "KNOWLEDGE_EXTRACTED")]
    KnowledgeExtracted,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl BatchStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Uploaded => "UPLOADED",
            BatchStatus::Classified => "CLASSIFIED",
            BatchStatus::Reviewed => "REVIEWED",
            BatchStatus::KnowledgeExtracted => "KNOWLEDGE_EXTRACTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Cancelled => "CANCELLED",
        }
    }

    /// Cancellation is legal from any non-terminal state.
    pub fn can_cancel(self) -> bool {
        self.can_transition(BatchStatus::Cancelled)
    }

    /// Failed pages may be re-enqueued while the batch has not passed review.
    pub fn can_reprocess(self) -> bool {
        matches!(
            self,
            BatchStatus::Processing | BatchStatus::Uploaded | BatchStatus::Classified
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for BatchStatus {
    const KIND: &'static str = "batch";

    fn allowed_next(self) -> &'static [Self] {
        use BatchStatus::*;
        match self {
            Pending => &[Processing, Cancelled],
            Processing => &[Uploaded, Cancelled],
            Uploaded => &[Classified, Cancelled],
            Classified => &[Reviewed, Cancelled],
            Reviewed => &[KnowledgeExtracted, Cancelled],
            KnowledgeExtracted => &[Completed, Cancelled],
            Completed => &[],
            Cancelled => &[],
        }
    }
}

// ============================================================================
// Page OCR lifecycle
// ============================================================================

/// Per-page OCR state, mutated only by the vision worker.
///
/// `Failed -> Pending` is the explicit-reprocess path; `Failed -> Processing`
/// is a worker re-claim on queue redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageOcrStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl PageOcrStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PageOcrStatus::Pending => "PENDING",
            PageOcrStatus::Processing => "PROCESSING",
            PageOcrStatus::Completed => "COMPLETED",
            PageOcrStatus::Failed => "FAILED",
        }
    }

    /// True once OCR for the page cannot progress further on its own.
    pub fn is_settled(self) -> bool {
        matches!(self, PageOcrStatus::Completed | PageOcrStatus::Failed)
    }
}

impl fmt::Display for PageOcrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for PageOcrStatus {
    const KIND: &'static str = "page_ocr";

    fn allowed_next(self) -> &'static [Self] {
        use PageOcrStatus::*;
        match self {
            Pending => &[Processing],
            Processing => &[Completed, Failed],
            Completed => &[],
            Failed => &[Processing, Pending],
        }
    }
}

// ============================================================================
// Block approval lifecycle
// ============================================================================

/// Admin review verdict for a parsed block. Re-approving an approved block is
/// legal (upsert semantics), rejected blocks can be re-reviewed, and `Deleted`
/// is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "DELETED")]
    Deleted,
}

impl ApprovalStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Deleted => "DELETED",
        }
    }

    /// Deleted blocks are excluded from review and from every aggregate.
    pub fn is_reviewable(self) -> bool {
        !matches!(self, ApprovalStatus::Deleted)
    }

    /// True once the block no longer awaits a verdict.
    pub fn is_resolved(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for ApprovalStatus {
    const KIND: &'static str = "block_approval";

    fn allowed_next(self) -> &'static [Self] {
        use ApprovalStatus::*;
        match self {
            Pending => &[Approved, Rejected, Deleted],
            Approved => &[Approved, Rejected, Deleted],
            Rejected => &[Approved, Rejected, Deleted],
            Deleted => &[],
        }
    }
}

// ============================================================================
// Block classification state
// ============================================================================

/// AI classification outcome for a block. Not a queued lifecycle of its own:
/// the vision worker writes the final value at block creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "CLASSIFIED")]
    Classified,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl ClassificationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ClassificationStatus::Pending => "PENDING",
            ClassificationStatus::Classified => "CLASSIFIED",
            ClassificationStatus::Failed => "FAILED",
        }
    }

    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ClassificationStatus::Classified | ClassificationStatus::Failed
        )
    }
}

impl fmt::Display for ClassificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Approved-content extraction lifecycle
// ============================================================================

/// Knowledge-extraction state of one approved content row.
///
/// `NotStarted` is reachable from everywhere (explicit reset); extraction is
/// (re-)triggered only from `NotStarted` or `Verified`, and a trigger from
/// `Verified` passes through `NotStarted` so every written hop stays in the
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionStatus {
    #[sea_orm(string_value = "NOT_STARTED")]
    NotStarted,
    #[sea_orm(string_value = "QUEUED")]
    Queued,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "VERIFIED")]
    Verified,
}

impl ExtractionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExtractionStatus::NotStarted => "NOT_STARTED",
            ExtractionStatus::Queued => "QUEUED",
            ExtractionStatus::Processing => "PROCESSING",
            ExtractionStatus::Completed => "COMPLETED",
            ExtractionStatus::Failed => "FAILED",
            ExtractionStatus::Verified => "VERIFIED",
        }
    }

    /// Duplicate-work guard: extraction may start only from here.
    pub fn can_trigger(self) -> bool {
        matches!(self, ExtractionStatus::NotStarted | ExtractionStatus::Verified)
    }

    /// Direct requeue is legal only after a failure; completed or verified
    /// rows go through an explicit reset first.
    pub fn can_reprocess(self) -> bool {
        matches!(self, ExtractionStatus::Failed)
    }

    /// Extraction output exists and survived (or passed) review.
    pub fn is_extracted(self) -> bool {
        matches!(self, ExtractionStatus::Completed | ExtractionStatus::Verified)
    }

    /// Work is queued or running; triggering now would double-process.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ExtractionStatus::Queued | ExtractionStatus::Processing)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for ExtractionStatus {
    const KIND: &'static str = "extraction";

    fn allowed_next(self) -> &'static [Self] {
        use ExtractionStatus::*;
        match self {
            NotStarted => &[Queued, NotStarted],
            Queued => &[Processing, NotStarted],
            Processing => &[Completed, Failed, NotStarted],
            Completed => &[Verified, NotStarted],
            Verified => &[NotStarted],
            Failed => &[NotStarted, Queued],
        }
    }
}

// ============================================================================
// Exam-question analysis lifecycle
// ============================================================================

/// Analysis state of an exam question, decoupled from the batch lifecycle.
/// `Raw` plays the reset role that `NotStarted` plays for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    #[sea_orm(string_value = "RAW")]
    Raw,
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "ANALYZED")]
    Analyzed,
    #[sea_orm(string_value = "KNOWLEDGE_READY")]
    KnowledgeReady,
    #[sea_orm(string_value = "CONTENT_READY")]
    ContentReady,
    #[sea_orm(string_value = "NEEDS_REVIEW")]
    NeedsReview,
    #[sea_orm(string_value = "REVIEWED")]
    Reviewed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl AnalysisStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Raw => "RAW",
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Analyzed => "ANALYZED",
            AnalysisStatus::KnowledgeReady => "KNOWLEDGE_READY",
            AnalysisStatus::ContentReady => "CONTENT_READY",
            AnalysisStatus::NeedsReview => "NEEDS_REVIEW",
            AnalysisStatus::Reviewed => "REVIEWED",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    /// Analysis may be requested for raw or previously failed questions.
    pub fn can_analyze(self) -> bool {
        matches!(self, AnalysisStatus::Raw | AnalysisStatus::Failed)
    }

    /// Knowledge generation requires a finished analysis.
    pub fn can_generate_knowledge(self) -> bool {
        matches!(self, AnalysisStatus::Analyzed)
    }

    /// Content generation requires knowledge points to exist.
    pub fn can_generate_content(self) -> bool {
        matches!(self, AnalysisStatus::KnowledgeReady)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Lifecycle for AnalysisStatus {
    const KIND: &'static str = "exam_question";

    fn allowed_next(self) -> &'static [Self] {
        use AnalysisStatus::*;
        match self {
            Raw => &[Pending, Processing],
            Pending => &[Processing, Raw],
            Processing => &[Analyzed, Failed, Raw],
            Analyzed => &[KnowledgeReady, NeedsReview, Raw],
            KnowledgeReady => &[ContentReady, NeedsReview, Raw],
            ContentReady => &[NeedsReview, Reviewed, Raw],
            NeedsReview => &[Reviewed, Raw],
            Reviewed => &[],
            Failed => &[Raw, Pending],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    fn assert_table_is_authoritative<S>(states: Vec<S>)
    where
        S: Lifecycle + fmt::Debug,
    {
        for &from in &states {
            for &to in &states {
                let legal = from.allowed_next().contains(&to);
                let result = validate_transition(from, to);
                assert_eq!(
                    result.is_ok(),
                    legal,
                    "{} -> {} should be {}",
                    from,
                    to,
                    if legal { "legal" } else { "illegal" }
                );
                if let Err(err) = result {
                    assert_eq!(err.lifecycle, S::KIND);
                    assert_eq!(err.from, from.to_string());
                    assert_eq!(err.to, to.to_string());
                    for allowed in from.allowed_next() {
                        assert!(
                            err.allowed.contains(&allowed.to_string()),
                            "error must name the allowed set, missing {allowed}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn batch_table_matches_validator() {
        assert_table_is_authoritative(BatchStatus::iter().collect());
    }

    #[test]
    fn extraction_table_matches_validator() {
        assert_table_is_authoritative(ExtractionStatus::iter().collect());
    }

    #[test]
    fn exam_question_table_matches_validator() {
        assert_table_is_authoritative(AnalysisStatus::iter().collect());
    }

    #[test]
    fn page_table_matches_validator() {
        assert_table_is_authoritative(PageOcrStatus::iter().collect());
    }

    #[test]
    fn approval_table_matches_validator() {
        assert_table_is_authoritative(ApprovalStatus::iter().collect());
    }

    #[test]
    fn batch_terminals_have_no_successors() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::KnowledgeExtracted.is_terminal());
    }

    #[test]
    fn cancellation_legal_from_every_non_terminal_batch_state() {
        for status in BatchStatus::iter() {
            if status.is_terminal() {
                assert!(!status.can_cancel(), "{status} is terminal");
            } else {
                assert!(status.can_cancel(), "{status} must be cancellable");
            }
        }
    }

    #[test]
    fn extraction_trigger_guard_rejects_in_flight_states() {
        assert!(ExtractionStatus::NotStarted.can_trigger());
        assert!(ExtractionStatus::Verified.can_trigger());
        assert!(!ExtractionStatus::Queued.can_trigger());
        assert!(!ExtractionStatus::Processing.can_trigger());
        assert!(!ExtractionStatus::Completed.can_trigger());
        assert!(!ExtractionStatus::Failed.can_trigger());
    }

    #[test]
    fn extraction_reset_reachable_from_everywhere() {
        for status in ExtractionStatus::iter() {
            assert!(
                status.can_transition(ExtractionStatus::NotStarted),
                "{status} must allow reset"
            );
        }
    }

    #[test]
    fn extraction_reprocess_only_after_failure() {
        assert!(ExtractionStatus::Failed.can_reprocess());
        assert!(!ExtractionStatus::Completed.can_reprocess());
        assert!(!ExtractionStatus::Verified.can_reprocess());
        assert!(!ExtractionStatus::Processing.can_reprocess());
    }

    #[test]
    fn deleted_block_is_one_way() {
        assert!(ApprovalStatus::Deleted.is_terminal());
        assert!(!ApprovalStatus::Deleted.is_reviewable());
        assert!(validate_transition(ApprovalStatus::Deleted, ApprovalStatus::Pending).is_err());
        assert!(validate_transition(ApprovalStatus::Rejected, ApprovalStatus::Approved).is_ok());
        assert!(validate_transition(ApprovalStatus::Approved, ApprovalStatus::Approved).is_ok());
    }

    #[test]
    fn analysis_guards_follow_pipeline_order() {
        assert!(AnalysisStatus::Raw.can_analyze());
        assert!(AnalysisStatus::Failed.can_analyze());
        assert!(!AnalysisStatus::Processing.can_analyze());
        assert!(AnalysisStatus::Analyzed.can_generate_knowledge());
        assert!(!AnalysisStatus::Raw.can_generate_knowledge());
        assert!(AnalysisStatus::KnowledgeReady.can_generate_content());
        assert!(!AnalysisStatus::Analyzed.can_generate_content());
    }

    #[test]
    fn transition_error_message_names_pair_and_allowed_set() {
        let err = validate_transition(BatchStatus::Pending, BatchStatus::Uploaded).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("PENDING"));
        assert!(message.contains("UPLOADED"));
        assert!(message.contains("PROCESSING"));
        assert!(message.contains("CANCELLED"));
    }
}
