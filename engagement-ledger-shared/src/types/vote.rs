use serde::{Deserialize, Serialize};

/// Represents the vote requested by a user on a votable target.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VoteValue {
    /// Indicates a like or positive endorsement.
    Like,
    /// Indicates a dislike or negative endorsement.
    Dislike,
}

impl VoteValue {
    /// Storage representation of the vote value.
    pub fn as_i16(self) -> i16 {
        match self {
            VoteValue::Like => 0,
            VoteValue::Dislike => 1,
        }
    }

    /// Decodes the storage representation, returning `None` for unknown values.
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(VoteValue::Like),
            1 => Some(VoteValue::Dislike),
            _ => None,
        }
    }
}

/// The state a (voter, target) pair is in.
///
/// `None` means no vote row exists for the pair.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VoteState {
    #[default]
    None,
    Liked,
    Disliked,
}

impl From<Option<VoteValue>> for VoteState {
    fn from(value: Option<VoteValue>) -> Self {
        match value {
            None => VoteState::None,
            Some(VoteValue::Like) => VoteState::Liked,
            Some(VoteValue::Dislike) => VoteState::Disliked,
        }
    }
}

impl VoteState {
    /// The vote row value held in this state, `None` when no row should exist.
    pub fn vote_value(self) -> Option<VoteValue> {
        match self {
            VoteState::None => None,
            VoteState::Liked => Some(VoteValue::Like),
            VoteState::Disliked => Some(VoteValue::Dislike),
        }
    }

    /// Applies a requested vote to this state.
    ///
    /// Requesting the vote already held toggles it off. Requesting the opposite
    /// vote switches sides. Every pair of (state, request) maps to exactly one
    /// transition, so the resulting counter delta is never ambiguous.
    pub fn toggle(self, requested: VoteValue) -> Transition {
        let (to, upvotes, downvotes) = match (self, requested) {
            (VoteState::None, VoteValue::Like) => (VoteState::Liked, 1, 0),
            (VoteState::None, VoteValue::Dislike) => (VoteState::Disliked, 0, 1),
            (VoteState::Liked, VoteValue::Like) => (VoteState::None, -1, 0),
            (VoteState::Disliked, VoteValue::Dislike) => (VoteState::None, 0, -1),
            (VoteState::Liked, VoteValue::Dislike) => (VoteState::Disliked, -1, 1),
            (VoteState::Disliked, VoteValue::Like) => (VoteState::Liked, 1, -1),
        };

        Transition {
            from: self,
            to,
            delta: CounterDelta { upvotes, downvotes },
        }
    }
}

/// Change applied to a target's upvote and downvote counts.
/// The net score is recomputed from the two counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub upvotes: i64,
    pub downvotes: i64,
}

/// Result of toggling a vote: the state before, the state after and the counter delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: VoteState,
    pub to: VoteState,
    pub delta: CounterDelta,
}

impl Transition {
    /// True when the voter moved into the liked state.
    pub fn entered_like(&self) -> bool {
        self.from != VoteState::Liked && self.to == VoteState::Liked
    }

    /// True when the voter left the liked state.
    pub fn left_like(&self) -> bool {
        self.from == VoteState::Liked && self.to != VoteState::Liked
    }
}
