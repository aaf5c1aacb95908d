use serde::{Deserialize, Serialize};
use crate::types::{
    EngagementCounters, Metadata, PointsAward, PointsReason, SubjectId, TargetId, TargetType, Transition, UserId,
    VoteValue,
};

/// Represents a user's vote on a votable target.
///
/// At most one row exists per (voter, target). It is created on the first
/// vote, updated on a switch and deleted when the vote is toggled off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserVote {
    pub voter_id: UserId,
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub vote_type: VoteValue,
    pub voted_at: u64,
}

/// Identifies a (voter, target) pair.
pub type VoteCriteria = (UserId, TargetId, TargetType);

/// Identifies a votable target.
pub type TargetCriteria = (TargetId, TargetType);

/// A request to toggle a vote, as issued by a vote call site.
///
/// `like_reward` is the number of points granted to the target's owner while
/// the vote is a like. Zero disables rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    pub voter_id: UserId,
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub vote: VoteValue,
    pub like_reward: i64,
}

impl VoteRequest {
    pub fn target(&self) -> TargetCriteria {
        (self.target_id, self.target_type)
    }

    pub fn criteria(&self) -> VoteCriteria {
        (self.voter_id, self.target_id, self.target_type)
    }

    /// Metadata identifying the like reward this vote grants,
    /// e.g. "user B liked comment 7".
    pub fn reward_metadata(&self) -> Metadata {
        Metadata::new()
            .with("voterId", self.voter_id.to_string())
            .with("targetId", self.target_id.to_string())
            .with("targetType", self.target_type.as_str())
    }

    /// The like reward this vote ties to `owner_id`, carrying the configured amount.
    ///
    /// Self-votes and ownerless targets have none. The amount is zero when
    /// rewards are disabled; the idempotency key is the same either way, so a
    /// like rewarded earlier can still be revoked.
    pub fn like_reward(&self, owner_id: Option<UserId>, subject_id: Option<SubjectId>) -> Option<PointsAward> {
        let owner_id = owner_id?;
        if owner_id == self.voter_id {
            return None;
        }
        Some(PointsAward {
            user_id: owner_id,
            points: self.like_reward.max(0),
            reason: PointsReason::ContentLiked,
            subject_id,
            metadata: self.reward_metadata(),
        })
    }

    /// The reward granted to `owner_id` when this vote enters the liked state, if any.
    pub fn reward_for(&self, owner_id: Option<UserId>, subject_id: Option<SubjectId>) -> Option<PointsAward> {
        self.like_reward(owner_id, subject_id).filter(|reward| reward.points > 0)
    }
}

/// Outcome of a vote toggle: the transition taken and the target's new counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteToggle {
    pub transition: Transition,
    pub counters: EngagementCounters,
}
