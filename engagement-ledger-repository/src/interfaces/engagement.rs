//! This module defines the `EngagementRepository` trait, the storage seam of the
//! engagement ledger. It covers vote rows, the denormalized counters on votable
//! targets, the append-only points ledger and the cached per-user totals.
use engagement_ledger_shared::types::{
    AwardOutcome, CounterRecount, EngagementCounters, IdempotencyKey, PointsAward, PointsBreakdown,
    PointsChangeset, PointsEntry, ReconcileReport, SubjectId, TargetCriteria, UserId, UserVote,
    VoteCriteria, VoteRequest, VoteTarget, VoteToggle,
};
use uuid::Uuid;

use crate::errors::EngagementRepositoryError;

/// A trait that defines the interface for interacting with the engagement data store.
///
/// Every mutating method runs as one atomic unit: either all of its writes
/// commit or none do. Implementations lock only the rows they touch (the
/// target's counters row, the user's aggregate row), never whole tables.
#[async_trait::async_trait]
pub trait EngagementRepository: Send + Sync {
    /// Creates the aggregate row for a user. Registering an existing user is a no-op.
    async fn register_user(&self, user_id: UserId) -> Result<(), EngagementRepositoryError>;

    /// Creates a votable target with zeroed counters. Registering an existing target is a no-op.
    async fn register_target(&self, target: &VoteTarget) -> Result<(), EngagementRepositoryError>;

    /// Toggles a vote and updates the target's counters in one transaction.
    ///
    /// When the request carries a like reward, the reward is awarded to the
    /// target's owner on entering the liked state and revoked on leaving it,
    /// inside the same transaction.
    ///
    /// # Errors
    ///
    /// * `TargetNotFound` - the target was never registered
    /// * `UserNotFound` - the voter (or the rewarded owner) was never registered
    async fn toggle_vote(&self, request: &VoteRequest) -> Result<VoteToggle, EngagementRepositoryError>;

    /// Returns the current vote of a voter on a target, if any.
    async fn get_vote(&self, criteria: VoteCriteria) -> Result<Option<UserVote>, EngagementRepositoryError>;

    /// Returns the denormalized counters of a target.
    async fn get_counters(&self, target: TargetCriteria) -> Result<EngagementCounters, EngagementRepositoryError>;

    /// Rebuilds a target's counters from its live vote rows.
    async fn recount_target_counters(
        &self,
        target: TargetCriteria,
    ) -> Result<CounterRecount, EngagementRepositoryError>;

    /// Awards points unless the award's metadata already has a net-positive effect
    /// for the user.
    async fn award_points(&self, award: &PointsAward) -> Result<AwardOutcome, EngagementRepositoryError>;

    /// Appends a negative entry and decrements the cached total. Not idempotent.
    async fn revoke_points(&self, revoke: &PointsAward) -> Result<Uuid, EngagementRepositoryError>;

    /// Applies every award and revocation of the changeset in a single transaction.
    ///
    /// Awards are applied before revocations, each in slice order.
    async fn persist_changeset(
        &self,
        changeset: &PointsChangeset<'_>,
    ) -> Result<Vec<AwardOutcome>, EngagementRepositoryError>;

    /// Sum of the ledger entries of a user carrying the given idempotency key.
    async fn net_points_for_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<i64, EngagementRepositoryError>;

    /// The cached total of a user.
    async fn get_user_total_points(&self, user_id: UserId) -> Result<i64, EngagementRepositoryError>;

    /// Ledger entries of a user grouped by reason, optionally restricted to one subject.
    async fn get_points_breakdown(
        &self,
        user_id: UserId,
        subject_id: Option<SubjectId>,
    ) -> Result<Vec<PointsBreakdown>, EngagementRepositoryError>;

    /// The newest `limit` ledger entries of a user, newest first.
    async fn get_points_history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<PointsEntry>, EngagementRepositoryError>;

    /// Recomputes a user's cached total from the ledger, overwriting it on drift.
    async fn reconcile_user_points(&self, user_id: UserId) -> Result<ReconcileReport, EngagementRepositoryError>;

    /// Users whose cached total disagrees with the ledger, at most `limit` of them.
    async fn find_drifted_users(&self, limit: i64) -> Result<Vec<UserId>, EngagementRepositoryError>;
}
