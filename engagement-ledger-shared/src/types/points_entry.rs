use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{IdempotencyKey, Metadata, SubjectId, UserId};

/// Tag describing why points were awarded or revoked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointsReason {
    CanvasApproved,
    CommentApproved,
    QuizCompleted,
    ContentLiked,
    Other(String),
}

impl PointsReason {
    pub fn as_str(&self) -> &str {
        match self {
            PointsReason::CanvasApproved => "CANVAS_APPROVED",
            PointsReason::CommentApproved => "COMMENT_APPROVED",
            PointsReason::QuizCompleted => "QUIZ_COMPLETED",
            PointsReason::ContentLiked => "CONTENT_LIKED",
            PointsReason::Other(tag) => tag,
        }
    }
}

impl From<&str> for PointsReason {
    fn from(tag: &str) -> Self {
        match tag {
            "CANVAS_APPROVED" => PointsReason::CanvasApproved,
            "COMMENT_APPROVED" => PointsReason::CommentApproved,
            "QUIZ_COMPLETED" => PointsReason::QuizCompleted,
            "CONTENT_LIKED" => PointsReason::ContentLiked,
            other => PointsReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PointsReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable row of the points ledger.
///
/// Entries are never updated or deleted. Awards carry positive `points`,
/// revocations negative ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsEntry {
    pub id: Uuid,
    pub user_id: UserId,
    pub points: i64,
    pub reason: PointsReason,
    pub subject_id: Option<SubjectId>,
    pub metadata: Metadata,
    pub idempotency_key: IdempotencyKey,
    pub earned_at: u64,
}

/// Input of an award or a revocation. `points` is always the positive magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAward {
    pub user_id: UserId,
    pub points: i64,
    pub reason: PointsReason,
    pub subject_id: Option<SubjectId>,
    pub metadata: Metadata,
}

/// Reasons an award or revocation is rejected before it reaches storage.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointsAwardError {
    #[error("points must be positive, got {0}")]
    NonPositivePoints(i64),
    #[error("reason must not be blank")]
    BlankReason,
    #[error("metadata must identify the event")]
    EmptyMetadata,
}

impl PointsAward {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::derive(&self.user_id, &self.metadata)
    }

    /// Checks the award is well formed: positive points, a non-blank reason
    /// and metadata identifying the event.
    pub fn validate(&self) -> Result<(), PointsAwardError> {
        if self.points <= 0 {
            return Err(PointsAwardError::NonPositivePoints(self.points));
        }
        if self.reason.as_str().trim().is_empty() {
            return Err(PointsAwardError::BlankReason);
        }
        if self.metadata.is_empty() {
            return Err(PointsAwardError::EmptyMetadata);
        }
        Ok(())
    }
}

/// What an award did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardOutcome {
    /// A new entry was appended and the cached total incremented.
    Applied(Uuid),
    /// The event already had a net-positive effect; nothing was written.
    AlreadyActive,
}

impl AwardOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AwardOutcome::Applied(_))
    }
}

/// Per-reason aggregate of a user's ledger entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsBreakdown {
    pub reason: PointsReason,
    pub total_points: i64,
    pub count: i64,
}

/// Result of comparing a user's cached total with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub user_id: UserId,
    pub before: i64,
    pub after: i64,
    pub corrected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_tags_roundtrip() {
        for reason in [
            PointsReason::CanvasApproved,
            PointsReason::CommentApproved,
            PointsReason::QuizCompleted,
            PointsReason::ContentLiked,
            PointsReason::Other("STREAK_BONUS".to_string()),
        ] {
            assert_eq!(PointsReason::from(reason.as_str()), reason);
        }
    }

    #[test]
    fn test_award_key_ignores_reason_and_points() {
        let award = PointsAward {
            user_id: Uuid::new_v4(),
            points: 100,
            reason: PointsReason::CanvasApproved,
            subject_id: None,
            metadata: Metadata::new().with("canvasId", 42),
        };
        let other = PointsAward {
            points: 5,
            reason: PointsReason::QuizCompleted,
            ..award.clone()
        };
        assert_eq!(award.idempotency_key(), other.idempotency_key());
    }

    #[test]
    fn test_validate_rejects_malformed_awards() {
        let award = PointsAward {
            user_id: Uuid::new_v4(),
            points: 10,
            reason: PointsReason::QuizCompleted,
            subject_id: None,
            metadata: Metadata::new().with("quizId", 1),
        };
        assert_eq!(award.validate(), Ok(()));

        let zero = PointsAward { points: 0, ..award.clone() };
        assert_eq!(zero.validate(), Err(PointsAwardError::NonPositivePoints(0)));

        let blank = PointsAward { reason: PointsReason::Other("  ".to_string()), ..award.clone() };
        assert_eq!(blank.validate(), Err(PointsAwardError::BlankReason));

        let anonymous = PointsAward { metadata: Metadata::new(), ..award };
        assert_eq!(anonymous.validate(), Err(PointsAwardError::EmptyMetadata));
    }
}
