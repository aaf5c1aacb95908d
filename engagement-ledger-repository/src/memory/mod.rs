//! In-memory engagement repository for tests and local development.
//!
//! The `InMemoryEngagementRepository` keeps all tables behind one mutex, so
//! every operation is trivially atomic and serializable. It mirrors the
//! PostgreSQL semantics, including the idempotency rules and the like rewards
//! applied inside a vote toggle.
//!
//! # Example
//!
//! ```ignore
//! use engagement_ledger_repository::{EngagementRepository, InMemoryEngagementRepository};
//!
//! let repository = InMemoryEngagementRepository::new();
//! repository.register_user(user_id).await?;
//! let outcome = repository.award_points(&award).await?;
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use engagement_ledger_shared::types::{
    AwardOutcome, CounterRecount, EngagementCounters, IdempotencyKey, PointsAward, PointsBreakdown,
    PointsChangeset, PointsEntry, PointsReason, ReconcileReport, SubjectId, TargetCriteria, UserId,
    UserVote, VoteCriteria, VoteRequest, VoteState, VoteTarget, VoteToggle,
};
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{EngagementRepository, EngagementRepositoryError};

#[derive(Default)]
struct Tables {
    totals: HashMap<UserId, i64>,
    targets: HashMap<TargetCriteria, VoteTarget>,
    votes: HashMap<VoteCriteria, UserVote>,
    entries: Vec<PointsEntry>,
}

fn now() -> u64 {
    OffsetDateTime::now_utc().unix_timestamp() as u64
}

impl Tables {
    fn require_user(&self, user_id: UserId) -> Result<(), EngagementRepositoryError> {
        if self.totals.contains_key(&user_id) {
            Ok(())
        } else {
            Err(EngagementRepositoryError::UserNotFound(user_id))
        }
    }

    fn net_for_key(&self, user_id: UserId, key: &IdempotencyKey) -> i64 {
        self.entries
            .iter()
            .filter(|entry| entry.user_id == user_id && &entry.idempotency_key == key)
            .map(|entry| entry.points)
            .sum()
    }

    fn ledger_sum(&self, user_id: UserId) -> i64 {
        self.entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.points)
            .sum()
    }

    fn append(&mut self, source: &PointsAward, points: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.entries.push(PointsEntry {
            id,
            user_id: source.user_id,
            points,
            reason: source.reason.clone(),
            subject_id: source.subject_id,
            metadata: source.metadata.clone(),
            idempotency_key: source.idempotency_key(),
            earned_at: now(),
        });
        *self.totals.entry(source.user_id).or_default() += points;
        id
    }

    /// Caller must have checked that the user exists.
    fn award(&mut self, award: &PointsAward) -> AwardOutcome {
        if self.net_for_key(award.user_id, &award.idempotency_key()) > 0 {
            return AwardOutcome::AlreadyActive;
        }
        AwardOutcome::Applied(self.append(award, award.points))
    }

    /// Caller must have checked that the user exists.
    fn revoke(&mut self, revoke: &PointsAward) -> Uuid {
        self.append(revoke, -revoke.points)
    }
}

/// Repository keeping every table in process memory.
#[derive(Default)]
pub struct InMemoryEngagementRepository {
    tables: Mutex<Tables>,
}

impl InMemoryEngagementRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a user's cached total without touching the ledger.
    ///
    /// Fault injection for reconciliation tests.
    pub fn overwrite_cached_total(&self, user_id: UserId, total: i64) {
        self.tables.lock().totals.insert(user_id, total);
    }

    /// Overwrites a target's counters without touching the vote rows.
    ///
    /// Fault injection for recount tests.
    pub fn overwrite_counters(&self, target: TargetCriteria, counters: EngagementCounters) {
        if let Some(stored) = self.tables.lock().targets.get_mut(&target) {
            stored.counters = counters;
        }
    }

    /// Number of ledger entries of a user.
    pub fn entry_count(&self, user_id: UserId) -> usize {
        self.tables
            .lock()
            .entries
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl EngagementRepository for InMemoryEngagementRepository {
    async fn register_user(&self, user_id: UserId) -> Result<(), EngagementRepositoryError> {
        self.tables.lock().totals.entry(user_id).or_insert(0);
        Ok(())
    }

    async fn register_target(&self, target: &VoteTarget) -> Result<(), EngagementRepositoryError> {
        let mut tables = self.tables.lock();
        if let Some(owner_id) = target.owner_id {
            tables.require_user(owner_id)?;
        }
        tables
            .targets
            .entry((target.target_id, target.target_type))
            .or_insert_with(|| VoteTarget {
                counters: EngagementCounters::default(),
                ..target.clone()
            });
        Ok(())
    }

    async fn toggle_vote(&self, request: &VoteRequest) -> Result<VoteToggle, EngagementRepositoryError> {
        let mut tables = self.tables.lock();

        let target = tables
            .targets
            .get(&request.target())
            .cloned()
            .ok_or(EngagementRepositoryError::TargetNotFound(request.target_type, request.target_id))?;
        tables.require_user(request.voter_id)?;

        let stored = tables.votes.get(&request.criteria()).map(|vote| vote.vote_type);
        let transition = VoteState::from(stored).toggle(request.vote);
        let updated = target.counters.apply(transition.delta).ok_or_else(|| {
            EngagementRepositoryError::Inconsistent(format!(
                "counters {:?} of {:?} {} cannot absorb {:?}",
                target.counters, request.target_type, request.target_id, transition.delta
            ))
        })?;

        let reward = if transition.entered_like() {
            request.reward_for(target.owner_id, target.subject_id)
        } else if transition.left_like() {
            request.like_reward(target.owner_id, target.subject_id)
        } else {
            None
        };
        if let Some(reward) = &reward {
            tables.require_user(reward.user_id)?;
        }

        match transition.to.vote_value() {
            None => {
                tables.votes.remove(&request.criteria());
            }
            Some(vote_type) => {
                tables.votes.insert(
                    request.criteria(),
                    UserVote {
                        voter_id: request.voter_id,
                        target_id: request.target_id,
                        target_type: request.target_type,
                        vote_type,
                        voted_at: now(),
                    },
                );
            }
        }
        if let Some(stored) = tables.targets.get_mut(&request.target()) {
            stored.counters = updated;
        }

        if let Some(reward) = reward {
            if transition.entered_like() {
                tables.award(&reward);
            } else if transition.left_like() {
                let net = tables.net_for_key(reward.user_id, &reward.idempotency_key());
                if net > 0 {
                    tables.revoke(&PointsAward { points: net, ..reward });
                }
            }
        }

        Ok(VoteToggle { transition, counters: updated })
    }

    async fn get_vote(&self, criteria: VoteCriteria) -> Result<Option<UserVote>, EngagementRepositoryError> {
        Ok(self.tables.lock().votes.get(&criteria).cloned())
    }

    async fn get_counters(&self, target: TargetCriteria) -> Result<EngagementCounters, EngagementRepositoryError> {
        self.tables
            .lock()
            .targets
            .get(&target)
            .map(|stored| stored.counters)
            .ok_or(EngagementRepositoryError::TargetNotFound(target.1, target.0))
    }

    async fn recount_target_counters(
        &self,
        target: TargetCriteria,
    ) -> Result<CounterRecount, EngagementRepositoryError> {
        let mut tables = self.tables.lock();
        let before = tables
            .targets
            .get(&target)
            .map(|stored| stored.counters)
            .ok_or(EngagementRepositoryError::TargetNotFound(target.1, target.0))?;

        let after = EngagementCounters::from_states(
            tables
                .votes
                .values()
                .filter(|vote| (vote.target_id, vote.target_type) == target)
                .map(|vote| VoteState::from(Some(vote.vote_type))),
        );

        let corrected = before != after;
        if let Some(stored) = tables.targets.get_mut(&target) {
            stored.counters = after;
        }
        Ok(CounterRecount { before, after, corrected })
    }

    async fn award_points(&self, award: &PointsAward) -> Result<AwardOutcome, EngagementRepositoryError> {
        award.validate()?;
        let mut tables = self.tables.lock();
        tables.require_user(award.user_id)?;
        Ok(tables.award(award))
    }

    async fn revoke_points(&self, revoke: &PointsAward) -> Result<Uuid, EngagementRepositoryError> {
        revoke.validate()?;
        let mut tables = self.tables.lock();
        tables.require_user(revoke.user_id)?;
        Ok(tables.revoke(revoke))
    }

    async fn persist_changeset(
        &self,
        changeset: &PointsChangeset<'_>,
    ) -> Result<Vec<AwardOutcome>, EngagementRepositoryError> {
        let mut tables = self.tables.lock();
        for operation in changeset.awards.iter().chain(changeset.revokes) {
            operation.validate()?;
            tables.require_user(operation.user_id)?;
        }

        let outcomes = changeset.awards.iter().map(|award| tables.award(award)).collect();
        for revoke in changeset.revokes {
            tables.revoke(revoke);
        }
        Ok(outcomes)
    }

    async fn net_points_for_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<i64, EngagementRepositoryError> {
        Ok(self.tables.lock().net_for_key(user_id, key))
    }

    async fn get_user_total_points(&self, user_id: UserId) -> Result<i64, EngagementRepositoryError> {
        self.tables
            .lock()
            .totals
            .get(&user_id)
            .copied()
            .ok_or(EngagementRepositoryError::UserNotFound(user_id))
    }

    async fn get_points_breakdown(
        &self,
        user_id: UserId,
        subject_id: Option<SubjectId>,
    ) -> Result<Vec<PointsBreakdown>, EngagementRepositoryError> {
        let tables = self.tables.lock();
        let mut grouped: HashMap<PointsReason, (i64, i64)> = HashMap::new();
        for entry in tables.entries.iter().filter(|entry| {
            entry.user_id == user_id && subject_id.is_none_or(|subject| entry.subject_id == Some(subject))
        }) {
            let (total, count) = grouped.entry(entry.reason.clone()).or_default();
            *total += entry.points;
            *count += 1;
        }

        let mut breakdown: Vec<PointsBreakdown> = grouped
            .into_iter()
            .map(|(reason, (total_points, count))| PointsBreakdown { reason, total_points, count })
            .collect();
        breakdown.sort_by(|a, b| a.reason.as_str().cmp(b.reason.as_str()));
        Ok(breakdown)
    }

    async fn get_points_history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<PointsEntry>, EngagementRepositoryError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .tables
            .lock()
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn reconcile_user_points(&self, user_id: UserId) -> Result<ReconcileReport, EngagementRepositoryError> {
        let mut tables = self.tables.lock();
        let before = tables
            .totals
            .get(&user_id)
            .copied()
            .ok_or(EngagementRepositoryError::UserNotFound(user_id))?;
        let after = tables.ledger_sum(user_id);
        tables.totals.insert(user_id, after);

        Ok(ReconcileReport { user_id, before, after, corrected: before != after })
    }

    async fn find_drifted_users(&self, limit: i64) -> Result<Vec<UserId>, EngagementRepositoryError> {
        let tables = self.tables.lock();
        let mut drifted: Vec<UserId> = tables
            .totals
            .iter()
            .filter(|(user_id, total)| **total != tables.ledger_sum(**user_id))
            .map(|(user_id, _)| *user_id)
            .collect();
        drifted.sort();
        drifted.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(drifted)
    }
}
