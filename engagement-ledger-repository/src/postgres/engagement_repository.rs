//! PostgreSQL implementation of the engagement repository.
//!
//! Provides a production PostgreSQL backend for the `EngagementRepository` trait
//! with connection pooling, transaction safety and row-level locking.
//!
//! ## Key Features
//!
//! - Connection pooling with `sqlx::PgPool`
//! - ACID transactions with automatic rollback on drop
//! - `SELECT ... FOR UPDATE` on the single contended row of each operation
//! - Unique award generations per idempotency key, so a lost award race is a no-op
//! - `*_tx` variants that run inside a caller-supplied transaction
//!
//! ## Database Tables
//!
//! - `ledger_users`: Cached point totals per user
//! - `vote_targets`: Votable entities with their denormalized counters
//! - `user_votes`: One vote row per voter and target
//! - `points_entries`: Append-only points ledger
use async_trait::async_trait;
use engagement_ledger_shared::types::{
    AwardOutcome, CounterRecount, EngagementCounters, IdempotencyKey, Metadata, PointsAward,
    PointsBreakdown, PointsChangeset, PointsEntry, PointsReason, ReconcileReport, SubjectId,
    TargetCriteria, TargetType, UserId, UserVote, VoteCriteria, VoteRequest, VoteState, VoteTarget,
    VoteToggle, VoteValue,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::{EngagementRepository, EngagementRepositoryError};

/// PostgreSQL implementation of the engagement repository.
///
/// Every trait method opens its own transaction. Call sites that already hold
/// a transaction (for instance a content approval that must award points
/// atomically with its own writes) use the public `*_tx` methods instead.
pub struct PostgresEngagementRepository {
    pool: sqlx::PgPool,
}

impl PostgresEngagementRepository {
    /// Creates a new PostgreSQL repository instance.
    ///
    /// # Arguments
    ///
    /// * `pool` - Configured PostgreSQL connection pool with the required schema
    pub async fn new(pool: sqlx::PgPool) -> Result<Self, EngagementRepositoryError> {
        Ok(Self { pool })
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, EngagementRepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), EngagementRepositoryError> {
        sqlx::migrate!("src/postgres/migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    /// Locks the user's aggregate row and returns the cached total.
    async fn lock_user_total_tx(
        &self,
        user_id: UserId,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<i64, EngagementRepositoryError> {
        let total: Option<i64> =
            sqlx::query_scalar("SELECT total_points FROM ledger_users WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?;

        total.ok_or(EngagementRepositoryError::UserNotFound(user_id))
    }

    /// Sum of a user's entries under `key`, read within the transaction.
    pub async fn net_points_for_key_tx(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<i64, EngagementRepositoryError> {
        let net: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0)::BIGINT FROM points_entries WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id)
        .bind(key.as_str())
        .fetch_one(&mut **tx)
        .await?;
        Ok(net)
    }

    /// Awards points within an active transaction.
    ///
    /// Locks the user's aggregate row, then checks the net effect of the
    /// award's idempotency key. A net-positive key is left untouched. Otherwise
    /// the entry is inserted with the next award generation for the key; if a
    /// concurrent award already claimed that generation the insert is skipped
    /// and the award reported as already active.
    ///
    /// # Arguments
    ///
    /// * `award` - The award to apply
    /// * `tx` - Active transaction context
    ///
    /// # Errors
    ///
    /// * `InvalidAward` - non-positive points, blank reason or empty metadata
    pub async fn award_points_tx(
        &self,
        award: &PointsAward,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<AwardOutcome, EngagementRepositoryError> {
        award.validate()?;
        self.lock_user_total_tx(award.user_id, tx).await?;

        let key = award.idempotency_key();
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points), 0)::BIGINT AS net,
                   COUNT(*) FILTER (WHERE points > 0) AS awards
            FROM points_entries
            WHERE user_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(award.user_id)
        .bind(key.as_str())
        .fetch_one(&mut **tx)
        .await?;

        let net: i64 = row.try_get("net")?;
        let awards: i64 = row.try_get("awards")?;
        if net > 0 {
            debug!(user_id = %award.user_id, key = %key, net, "award already active");
            return Ok(AwardOutcome::AlreadyActive);
        }

        let generation = i32::try_from(awards + 1).map_err(|_| {
            EngagementRepositoryError::Inconsistent(format!("award generation overflow for key {key}"))
        })?;

        let id = Uuid::new_v4();
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO points_entries (id, user_id, points, reason, subject_id, metadata, idempotency_key, award_generation, earned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (idempotency_key, award_generation) WHERE points > 0
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(award.user_id)
        .bind(award.points)
        .bind(award.reason.as_str())
        .bind(award.subject_id)
        .bind(award.metadata.to_json())
        .bind(key.as_str())
        .bind(generation)
        .bind(OffsetDateTime::now_utc())
        .fetch_optional(&mut **tx)
        .await?;

        if inserted.is_none() {
            debug!(user_id = %award.user_id, key = %key, generation, "award generation already claimed");
            return Ok(AwardOutcome::AlreadyActive);
        }

        sqlx::query("UPDATE ledger_users SET total_points = total_points + $2 WHERE user_id = $1")
            .bind(award.user_id)
            .bind(award.points)
            .execute(&mut **tx)
            .await?;

        Ok(AwardOutcome::Applied(id))
    }

    /// Revokes points within an active transaction.
    ///
    /// Appends an entry carrying `-revoke.points` and decrements the cached
    /// total. There is no idempotency check.
    pub async fn revoke_points_tx(
        &self,
        revoke: &PointsAward,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Uuid, EngagementRepositoryError> {
        revoke.validate()?;
        self.lock_user_total_tx(revoke.user_id, tx).await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO points_entries (id, user_id, points, reason, subject_id, metadata, idempotency_key, award_generation, earned_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8)
            "#,
        )
        .bind(id)
        .bind(revoke.user_id)
        .bind(-revoke.points)
        .bind(revoke.reason.as_str())
        .bind(revoke.subject_id)
        .bind(revoke.metadata.to_json())
        .bind(revoke.idempotency_key().as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(&mut **tx)
        .await?;

        sqlx::query("UPDATE ledger_users SET total_points = total_points - $2 WHERE user_id = $1")
            .bind(revoke.user_id)
            .bind(revoke.points)
            .execute(&mut **tx)
            .await?;

        Ok(id)
    }

    /// Toggles a vote within an active transaction.
    ///
    /// The target's counters row is locked first, so concurrent toggles on the
    /// same target serialize there. The vote row is then created, switched or
    /// deleted according to the transition, and the counters are rewritten
    /// with the net score recomputed from the new counts.
    pub async fn toggle_vote_tx(
        &self,
        request: &VoteRequest,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<VoteToggle, EngagementRepositoryError> {
        let target = sqlx::query(
            r#"
            SELECT upvotes, downvotes, owner_id, subject_id
            FROM vote_targets
            WHERE target_id = $1 AND target_type = $2
            FOR UPDATE
            "#,
        )
        .bind(request.target_id)
        .bind(request.target_type.as_i16())
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngagementRepositoryError::TargetNotFound(request.target_type, request.target_id))?;

        let counters = EngagementCounters::new(target.try_get("upvotes")?, target.try_get("downvotes")?);
        let owner_id: Option<Uuid> = target.try_get("owner_id")?;
        let subject_id: Option<Uuid> = target.try_get("subject_id")?;

        let voter_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ledger_users WHERE user_id = $1)")
                .bind(request.voter_id)
                .fetch_one(&mut **tx)
                .await?;
        if !voter_exists {
            return Err(EngagementRepositoryError::UserNotFound(request.voter_id));
        }

        let stored: Option<i16> = sqlx::query_scalar(
            "SELECT vote_type FROM user_votes WHERE voter_id = $1 AND target_id = $2 AND target_type = $3",
        )
        .bind(request.voter_id)
        .bind(request.target_id)
        .bind(request.target_type.as_i16())
        .fetch_optional(&mut **tx)
        .await?;
        let stored = stored
            .map(|value| VoteValue::from_i16(value).ok_or(EngagementRepositoryError::InvalidVoteType(value)))
            .transpose()?;

        let transition = VoteState::from(stored).toggle(request.vote);
        let updated = counters.apply(transition.delta).ok_or_else(|| {
            EngagementRepositoryError::Inconsistent(format!(
                "counters {counters:?} of {:?} {} cannot absorb {:?}",
                request.target_type, request.target_id, transition.delta
            ))
        })?;

        match (transition.from.vote_value(), transition.to.vote_value()) {
            (_, None) => {
                sqlx::query("DELETE FROM user_votes WHERE voter_id = $1 AND target_id = $2 AND target_type = $3")
                    .bind(request.voter_id)
                    .bind(request.target_id)
                    .bind(request.target_type.as_i16())
                    .execute(&mut **tx)
                    .await?;
            }
            (None, Some(vote)) => {
                sqlx::query(
                    r#"
                    INSERT INTO user_votes (voter_id, target_id, target_type, vote_type, voted_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(request.voter_id)
                .bind(request.target_id)
                .bind(request.target_type.as_i16())
                .bind(vote.as_i16())
                .bind(OffsetDateTime::now_utc())
                .execute(&mut **tx)
                .await?;
            }
            (Some(_), Some(vote)) => {
                sqlx::query(
                    r#"
                    UPDATE user_votes SET vote_type = $4, voted_at = $5
                    WHERE voter_id = $1 AND target_id = $2 AND target_type = $3
                    "#,
                )
                .bind(request.voter_id)
                .bind(request.target_id)
                .bind(request.target_type.as_i16())
                .bind(vote.as_i16())
                .bind(OffsetDateTime::now_utc())
                .execute(&mut **tx)
                .await?;
            }
        }

        self.write_counters_tx(request.target(), updated, tx).await?;

        if transition.entered_like() {
            if let Some(reward) = request.reward_for(owner_id, subject_id) {
                self.award_points_tx(&reward, tx).await?;
            }
        } else if transition.left_like() {
            // The active amount is revoked even when rewards are now disabled or changed.
            if let Some(reward) = request.like_reward(owner_id, subject_id) {
                self.lock_user_total_tx(reward.user_id, tx).await?;
                let net = self.net_points_for_key_tx(reward.user_id, &reward.idempotency_key(), tx).await?;
                if net > 0 {
                    self.revoke_points_tx(&PointsAward { points: net, ..reward }, tx).await?;
                }
            }
        }

        Ok(VoteToggle { transition, counters: updated })
    }

    async fn write_counters_tx(
        &self,
        (target_id, target_type): TargetCriteria,
        counters: EngagementCounters,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), EngagementRepositoryError> {
        sqlx::query(
            r#"
            UPDATE vote_targets SET upvotes = $3, downvotes = $4, net_score = $5
            WHERE target_id = $1 AND target_type = $2
            "#,
        )
        .bind(target_id)
        .bind(target_type.as_i16())
        .bind(counters.upvotes)
        .bind(counters.downvotes)
        .bind(counters.net_score)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn user_vote_from_row(row: &PgRow) -> Result<UserVote, EngagementRepositoryError> {
    let target_type: i16 = row.try_get("target_type")?;
    let vote_type: i16 = row.try_get("vote_type")?;
    let voted_at: OffsetDateTime = row.try_get("voted_at")?;

    Ok(UserVote {
        voter_id: row.try_get("voter_id")?,
        target_id: row.try_get("target_id")?,
        target_type: TargetType::from_i16(target_type)
            .ok_or(EngagementRepositoryError::InvalidTargetType(target_type))?,
        vote_type: VoteValue::from_i16(vote_type).ok_or(EngagementRepositoryError::InvalidVoteType(vote_type))?,
        voted_at: voted_at.unix_timestamp() as u64,
    })
}

fn points_entry_from_row(row: &PgRow) -> Result<PointsEntry, EngagementRepositoryError> {
    let reason: String = row.try_get("reason")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let earned_at: OffsetDateTime = row.try_get("earned_at")?;

    Ok(PointsEntry {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        points: row.try_get("points")?,
        reason: PointsReason::from(reason.as_str()),
        subject_id: row.try_get("subject_id")?,
        metadata: Metadata::from_json(metadata)?,
        idempotency_key: IdempotencyKey::from_stored(row.try_get("idempotency_key")?),
        earned_at: earned_at.unix_timestamp() as u64,
    })
}

#[async_trait]
impl EngagementRepository for PostgresEngagementRepository {
    async fn register_user(&self, user_id: UserId) -> Result<(), EngagementRepositoryError> {
        sqlx::query("INSERT INTO ledger_users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn register_target(&self, target: &VoteTarget) -> Result<(), EngagementRepositoryError> {
        if let Some(owner_id) = target.owner_id {
            let owner_exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ledger_users WHERE user_id = $1)")
                    .bind(owner_id)
                    .fetch_one(&self.pool)
                    .await?;
            if !owner_exists {
                return Err(EngagementRepositoryError::UserNotFound(owner_id));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO vote_targets (target_id, target_type, owner_id, subject_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (target_id, target_type) DO NOTHING
            "#,
        )
        .bind(target.target_id)
        .bind(target.target_type.as_i16())
        .bind(target.owner_id)
        .bind(target.subject_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn toggle_vote(&self, request: &VoteRequest) -> Result<VoteToggle, EngagementRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let toggle = self.toggle_vote_tx(request, &mut tx).await?;
        tx.commit().await?;
        Ok(toggle)
    }

    async fn get_vote(&self, (voter_id, target_id, target_type): VoteCriteria) -> Result<Option<UserVote>, EngagementRepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT voter_id, target_id, target_type, vote_type, voted_at
            FROM user_votes
            WHERE voter_id = $1 AND target_id = $2 AND target_type = $3
            "#,
        )
        .bind(voter_id)
        .bind(target_id)
        .bind(target_type.as_i16())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_vote_from_row).transpose()
    }

    async fn get_counters(&self, (target_id, target_type): TargetCriteria) -> Result<EngagementCounters, EngagementRepositoryError> {
        let row = sqlx::query(
            "SELECT upvotes, downvotes, net_score FROM vote_targets WHERE target_id = $1 AND target_type = $2",
        )
        .bind(target_id)
        .bind(target_type.as_i16())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(EngagementRepositoryError::TargetNotFound(target_type, target_id))?;

        Ok(EngagementCounters {
            upvotes: row.try_get("upvotes")?,
            downvotes: row.try_get("downvotes")?,
            net_score: row.try_get("net_score")?,
        })
    }

    async fn recount_target_counters(
        &self,
        target: TargetCriteria,
    ) -> Result<CounterRecount, EngagementRepositoryError> {
        let (target_id, target_type) = target;
        let mut tx = self.pool.begin().await?;

        let stored = sqlx::query(
            "SELECT upvotes, downvotes, net_score FROM vote_targets WHERE target_id = $1 AND target_type = $2 FOR UPDATE",
        )
        .bind(target_id)
        .bind(target_type.as_i16())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(EngagementRepositoryError::TargetNotFound(target_type, target_id))?;
        let before = EngagementCounters {
            upvotes: stored.try_get("upvotes")?,
            downvotes: stored.try_get("downvotes")?,
            net_score: stored.try_get("net_score")?,
        };

        let live = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE vote_type = $3) AS upvotes,
                   COUNT(*) FILTER (WHERE vote_type = $4) AS downvotes
            FROM user_votes
            WHERE target_id = $1 AND target_type = $2
            "#,
        )
        .bind(target_id)
        .bind(target_type.as_i16())
        .bind(VoteValue::Like.as_i16())
        .bind(VoteValue::Dislike.as_i16())
        .fetch_one(&mut *tx)
        .await?;
        let after = EngagementCounters::new(live.try_get("upvotes")?, live.try_get("downvotes")?);

        let corrected = before != after;
        if corrected {
            self.write_counters_tx(target, after, &mut tx).await?;
        }
        tx.commit().await?;

        Ok(CounterRecount { before, after, corrected })
    }

    async fn award_points(&self, award: &PointsAward) -> Result<AwardOutcome, EngagementRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let outcome = self.award_points_tx(award, &mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn revoke_points(&self, revoke: &PointsAward) -> Result<Uuid, EngagementRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let id = self.revoke_points_tx(revoke, &mut tx).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn persist_changeset(
        &self,
        changeset: &PointsChangeset<'_>,
    ) -> Result<Vec<AwardOutcome>, EngagementRepositoryError> {
        let operations = changeset.awards.iter().chain(changeset.revokes);
        let mut user_ids = Vec::new();
        for operation in operations {
            operation.validate()?;
            user_ids.push(operation.user_id);
        }
        // Concurrent changesets over the same users take the row locks in one order.
        user_ids.sort();
        user_ids.dedup();

        let mut tx = self.pool.begin().await?;
        for user_id in user_ids {
            self.lock_user_total_tx(user_id, &mut tx).await?;
        }

        let mut outcomes = Vec::with_capacity(changeset.awards.len());
        for award in changeset.awards {
            outcomes.push(self.award_points_tx(award, &mut tx).await?);
        }
        for revoke in changeset.revokes {
            self.revoke_points_tx(revoke, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(outcomes)
    }

    async fn net_points_for_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<i64, EngagementRepositoryError> {
        let net: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(points), 0)::BIGINT FROM points_entries WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id)
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(net)
    }

    async fn get_user_total_points(&self, user_id: UserId) -> Result<i64, EngagementRepositoryError> {
        let total: Option<i64> = sqlx::query_scalar("SELECT total_points FROM ledger_users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        total.ok_or(EngagementRepositoryError::UserNotFound(user_id))
    }

    async fn get_points_breakdown(
        &self,
        user_id: UserId,
        subject_id: Option<SubjectId>,
    ) -> Result<Vec<PointsBreakdown>, EngagementRepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT reason, COALESCE(SUM(points), 0)::BIGINT AS total_points, COUNT(*) AS count
            FROM points_entries
            WHERE user_id = $1 AND ($2::uuid IS NULL OR subject_id = $2)
            GROUP BY reason
            ORDER BY reason
            "#,
        )
        .bind(user_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        let mut breakdown = Vec::with_capacity(rows.len());
        for row in rows {
            let reason: String = row.try_get("reason")?;
            breakdown.push(PointsBreakdown {
                reason: PointsReason::from(reason.as_str()),
                total_points: row.try_get("total_points")?,
                count: row.try_get("count")?,
            });
        }
        Ok(breakdown)
    }

    async fn get_points_history(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> Result<Vec<PointsEntry>, EngagementRepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, points, reason, subject_id, metadata, idempotency_key, earned_at
            FROM points_entries
            WHERE user_id = $1
            ORDER BY entry_seq DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(points_entry_from_row).collect()
    }

    async fn reconcile_user_points(&self, user_id: UserId) -> Result<ReconcileReport, EngagementRepositoryError> {
        let mut tx = self.pool.begin().await?;
        let before = self.lock_user_total_tx(user_id, &mut tx).await?;

        let after: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(points), 0)::BIGINT FROM points_entries WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        let corrected = before != after;
        if corrected {
            sqlx::query("UPDATE ledger_users SET total_points = $2 WHERE user_id = $1")
                .bind(user_id)
                .bind(after)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(ReconcileReport { user_id, before, after, corrected })
    }

    async fn find_drifted_users(&self, limit: i64) -> Result<Vec<UserId>, EngagementRepositoryError> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT u.user_id
            FROM ledger_users u
            LEFT JOIN (
                SELECT user_id, SUM(points)::BIGINT AS actual
                FROM points_entries
                GROUP BY user_id
            ) p ON p.user_id = u.user_id
            WHERE u.total_points <> COALESCE(p.actual, 0)
            ORDER BY u.user_id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
