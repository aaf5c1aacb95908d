//! The `EngagementLedger` service: the public surface call sites use to record
//! votes and points.
//!
//! The service validates input, delegates every write to a single atomic
//! repository operation and translates storage failures into `LedgerError`.
use std::sync::Arc;

use engagement_ledger_repository::EngagementRepository;
use engagement_ledger_shared::types::{
    AwardOutcome, CounterRecount, EngagementCounters, IdempotencyKey, Metadata, PointsAward, PointsBreakdown,
    PointsChangeset, PointsEntry, PointsReason, ReconcileReport, SubjectId, TargetId, TargetType, UserId,
    VoteRequest, VoteState, VoteTarget, VoteValue,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::LedgerSettings;
use crate::errors::LedgerError;

/// Records votes, awards and revocations and keeps the cached aggregates honest.
#[derive(Clone)]
pub struct EngagementLedger {
    repository: Arc<dyn EngagementRepository>,
    settings: LedgerSettings,
}

impl EngagementLedger {
    /// Creates a new `EngagementLedger`.
    ///
    /// # Arguments
    ///
    /// * `repository` - Storage backend shared with other components
    /// * `settings` - Reward and reconciliation settings
    pub fn new(repository: Arc<dyn EngagementRepository>, settings: LedgerSettings) -> Self {
        Self { repository, settings }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn register_user(&self, user_id: UserId) -> Result<(), LedgerError> {
        self.repository.register_user(user_id).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(target_id = %target.target_id, target_type = target.target_type.as_str()))]
    pub async fn register_target(&self, target: &VoteTarget) -> Result<(), LedgerError> {
        self.repository.register_target(target).await?;
        Ok(())
    }

    /// Toggles `voter_id`'s vote on a target and returns the target's new counters.
    ///
    /// Requesting the vote already held removes it; requesting the other vote
    /// switches sides. When the vote enters or leaves the liked state, the
    /// target's owner gains or loses the configured like reward in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// * `NotFound` - the voter or the target is unknown
    #[instrument(skip_all, fields(voter_id = %voter_id, target_id = %target_id, target_type = target_type.as_str(), vote = ?vote))]
    pub async fn toggle_vote(
        &self,
        voter_id: UserId,
        target_id: TargetId,
        target_type: TargetType,
        vote: VoteValue,
    ) -> Result<EngagementCounters, LedgerError> {
        let request = VoteRequest {
            voter_id,
            target_id,
            target_type,
            vote,
            like_reward: self.settings.like_reward_points,
        };
        let toggle = self.repository.toggle_vote(&request).await?;

        debug!(
            from = ?toggle.transition.from,
            to = ?toggle.transition.to,
            upvotes = toggle.counters.upvotes,
            downvotes = toggle.counters.downvotes,
            net_score = toggle.counters.net_score,
            "Vote toggled"
        );
        Ok(toggle.counters)
    }

    /// Awards points for an event identified by `metadata`.
    ///
    /// Awarding an event that already has a net-positive effect for the user
    /// is a no-op reported as `AwardOutcome::AlreadyActive`. Once the event has
    /// been revoked it can be awarded again.
    ///
    /// # Errors
    ///
    /// * `Validation` - `points` is not positive, the reason is blank or the metadata is empty
    /// * `NotFound` - the user is unknown
    #[instrument(skip_all, fields(user_id = %user_id, points = points, reason = %reason))]
    pub async fn award_points(
        &self,
        user_id: UserId,
        points: i64,
        reason: PointsReason,
        subject_id: Option<SubjectId>,
        metadata: Metadata,
    ) -> Result<AwardOutcome, LedgerError> {
        let award = validated(user_id, points, reason, subject_id, metadata)?;
        let outcome = self.repository.award_points(&award).await?;

        match outcome {
            AwardOutcome::Applied(entry_id) => info!(%entry_id, points, "Points awarded"),
            AwardOutcome::AlreadyActive => debug!("Award already active, nothing written"),
        }
        Ok(outcome)
    }

    /// Appends a negative entry of `points` and decrements the user's total.
    ///
    /// Revocations are not idempotent: each call appends an entry.
    #[instrument(skip_all, fields(user_id = %user_id, points = points, reason = %reason))]
    pub async fn revoke_points(
        &self,
        user_id: UserId,
        points: i64,
        reason: PointsReason,
        subject_id: Option<SubjectId>,
        metadata: Metadata,
    ) -> Result<Uuid, LedgerError> {
        let revoke = validated(user_id, points, reason, subject_id, metadata)?;
        let entry_id = self.repository.revoke_points(&revoke).await?;

        info!(%entry_id, points, "Points revoked");
        Ok(entry_id)
    }

    /// True when the event identified by `metadata` has a net-positive effect for the user.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn check_points_awarded(&self, user_id: UserId, metadata: &Metadata) -> Result<bool, LedgerError> {
        let key = IdempotencyKey::derive(&user_id, metadata);
        let net = self.repository.net_points_for_key(user_id, &key).await?;
        Ok(net > 0)
    }

    /// The cached total of a user.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_user_total_points(&self, user_id: UserId) -> Result<i64, LedgerError> {
        Ok(self.repository.get_user_total_points(user_id).await?)
    }

    /// Ledger entries grouped by reason, optionally for a single subject.
    ///
    /// An unknown user simply has no entries.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_user_points_breakdown(
        &self,
        user_id: UserId,
        subject_id: Option<SubjectId>,
    ) -> Result<Vec<PointsBreakdown>, LedgerError> {
        Ok(self.repository.get_points_breakdown(user_id, subject_id).await?)
    }

    /// The newest `limit` ledger entries of a user.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_points_history(&self, user_id: UserId, limit: i64) -> Result<Vec<PointsEntry>, LedgerError> {
        if limit <= 0 {
            return Err(LedgerError::Validation(format!("history limit must be positive, got {limit}")));
        }
        Ok(self.repository.get_points_history(user_id, limit).await?)
    }

    /// Recomputes a user's cached total from the ledger, repairing any drift.
    ///
    /// Drift is reported, never raised.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn reconcile_user_points(&self, user_id: UserId) -> Result<ReconcileReport, LedgerError> {
        let report = self.repository.reconcile_user_points(user_id).await?;
        if report.corrected {
            warn!(before = report.before, after = report.after, "Cached total drifted from ledger, corrected");
        }
        Ok(report)
    }

    /// Reconciles every user whose cached total disagrees with the ledger.
    ///
    /// Drifted users are fetched in batches of the configured size. Returns the
    /// reports of the users that were corrected.
    #[instrument(skip_all, fields(batch_size = self.settings.reconcile_batch_size))]
    pub async fn reconcile_all_users(&self) -> Result<Vec<ReconcileReport>, LedgerError> {
        let batch_size = self.settings.reconcile_batch_size;
        if batch_size <= 0 {
            return Err(LedgerError::Validation(format!("batch size must be positive, got {batch_size}")));
        }

        let mut corrected = Vec::new();
        loop {
            let drifted = self.repository.find_drifted_users(batch_size).await?;
            let fetched = drifted.len();

            let mut corrected_in_batch = 0;
            for user_id in drifted {
                let report = self.reconcile_user_points(user_id).await?;
                if report.corrected {
                    corrected_in_batch += 1;
                    corrected.push(report);
                }
            }

            // A batch that corrected nothing would be fetched again.
            if (fetched as i64) < batch_size || corrected_in_batch == 0 {
                break;
            }
        }

        info!(corrected = corrected.len(), "Reconciliation sweep finished");
        Ok(corrected)
    }

    #[instrument(skip_all, fields(target_id = %target_id, target_type = target_type.as_str()))]
    pub async fn get_counters(
        &self,
        target_id: TargetId,
        target_type: TargetType,
    ) -> Result<EngagementCounters, LedgerError> {
        Ok(self.repository.get_counters((target_id, target_type)).await?)
    }

    #[instrument(skip_all, fields(voter_id = %voter_id, target_id = %target_id))]
    pub async fn get_vote(
        &self,
        voter_id: UserId,
        target_id: TargetId,
        target_type: TargetType,
    ) -> Result<VoteState, LedgerError> {
        let vote = self.repository.get_vote((voter_id, target_id, target_type)).await?;
        Ok(VoteState::from(vote.map(|vote| vote.vote_type)))
    }

    /// Rebuilds a target's counters from its live votes.
    #[instrument(skip_all, fields(target_id = %target_id, target_type = target_type.as_str()))]
    pub async fn recount_target_counters(
        &self,
        target_id: TargetId,
        target_type: TargetType,
    ) -> Result<CounterRecount, LedgerError> {
        let recount = self.repository.recount_target_counters((target_id, target_type)).await?;
        if recount.corrected {
            warn!(before = ?recount.before, after = ?recount.after, "Counters drifted from votes, corrected");
        }
        Ok(recount)
    }

    /// Applies several awards and revocations atomically.
    ///
    /// Returns the outcome of each award, in order.
    #[instrument(skip_all, fields(awards = changeset.awards.len(), revokes = changeset.revokes.len()))]
    pub async fn persist_changeset(&self, changeset: &PointsChangeset<'_>) -> Result<Vec<AwardOutcome>, LedgerError> {
        for operation in changeset.awards.iter().chain(changeset.revokes) {
            operation.validate()?;
        }
        if changeset.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self.repository.persist_changeset(changeset).await?;
        info!(
            applied = outcomes.iter().filter(|outcome| outcome.is_applied()).count(),
            "Changeset persisted"
        );
        Ok(outcomes)
    }
}

fn validated(
    user_id: UserId,
    points: i64,
    reason: PointsReason,
    subject_id: Option<SubjectId>,
    metadata: Metadata,
) -> Result<PointsAward, LedgerError> {
    let award = PointsAward { user_id, points, reason, subject_id, metadata };
    award.validate()?;
    Ok(award)
}
