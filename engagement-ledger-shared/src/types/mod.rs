mod changeset;
mod engagement_counters;
mod metadata;
mod points_entry;
mod user_vote;
mod vote;

pub use changeset::PointsChangeset;
pub use engagement_counters::{CounterRecount, EngagementCounters, TargetType, VoteTarget};
pub use metadata::{IdempotencyKey, Metadata, MetadataError};
pub use points_entry::{AwardOutcome, PointsAward, PointsAwardError, PointsBreakdown, PointsEntry, PointsReason, ReconcileReport};
pub use user_vote::{TargetCriteria, UserVote, VoteCriteria, VoteRequest, VoteToggle};
pub use vote::{CounterDelta, Transition, VoteState, VoteValue};

use uuid::Uuid;

pub type UserId = Uuid;
pub type TargetId = Uuid;
pub type SubjectId = Uuid;
