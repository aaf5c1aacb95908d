use serde::{Deserialize, Serialize};

use crate::types::{CounterDelta, SubjectId, TargetId, UserId, VoteState};

/// The kind of entity a vote is cast on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TargetType {
    Comment,
    Canvas,
    Post,
}

impl TargetType {
    /// Storage representation of the target type.
    pub fn as_i16(self) -> i16 {
        match self {
            TargetType::Comment => 0,
            TargetType::Canvas => 1,
            TargetType::Post => 2,
        }
    }

    /// Decodes the storage representation, returning `None` for unknown values.
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(TargetType::Comment),
            1 => Some(TargetType::Canvas),
            2 => Some(TargetType::Post),
            _ => None,
        }
    }

    /// Stable lowercase name used in points metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Comment => "comment",
            TargetType::Canvas => "canvas",
            TargetType::Post => "post",
        }
    }
}

/// Represents the denormalized vote tallies embedded on a votable target.
///
/// `net_score` is never moved on its own: every constructor and every update
/// derives it from `upvotes - downvotes`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngagementCounters {
    pub upvotes: i64,
    pub downvotes: i64,
    pub net_score: i64,
}

impl EngagementCounters {
    pub fn new(upvotes: i64, downvotes: i64) -> Self {
        Self {
            upvotes,
            downvotes,
            net_score: upvotes - downvotes,
        }
    }

    /// Applies a transition delta and recomputes the net score.
    ///
    /// Returns `None` if either count would go negative, which can only happen
    /// when the stored counters no longer match the vote rows.
    pub fn apply(&self, delta: CounterDelta) -> Option<Self> {
        let upvotes = self.upvotes + delta.upvotes;
        let downvotes = self.downvotes + delta.downvotes;
        if upvotes < 0 || downvotes < 0 {
            return None;
        }
        Some(Self::new(upvotes, downvotes))
    }

    /// Computes the counters from the live vote states of a target.
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = VoteState>,
    {
        let (upvotes, downvotes) = states.into_iter().fold((0, 0), |(up, down), state| match state {
            VoteState::Liked => (up + 1, down),
            VoteState::Disliked => (up, down + 1),
            VoteState::None => (up, down),
        });
        Self::new(upvotes, downvotes)
    }
}

/// A votable entity together with its denormalized counters.
///
/// `owner_id` receives like rewards; `subject_id` scopes those rewards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTarget {
    pub target_id: TargetId,
    pub target_type: TargetType,
    pub owner_id: Option<UserId>,
    pub subject_id: Option<SubjectId>,
    pub counters: EngagementCounters,
}

impl VoteTarget {
    /// A freshly created target with zeroed counters.
    pub fn new(
        target_id: TargetId,
        target_type: TargetType,
        owner_id: Option<UserId>,
        subject_id: Option<SubjectId>,
    ) -> Self {
        Self {
            target_id,
            target_type,
            owner_id,
            subject_id,
            counters: EngagementCounters::default(),
        }
    }
}

/// Result of rebuilding a target's counters from its vote rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecount {
    pub before: EngagementCounters,
    pub after: EngagementCounters,
    pub corrected: bool,
}
