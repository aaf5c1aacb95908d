use crate::types::PointsAward;

/// Represents a collection of points operations to be persisted together.
///
/// A `PointsChangeset` bundles awards and revocations for atomic
/// persistence: either every operation commits or none does.
pub struct PointsChangeset<'a> {
    pub awards: &'a [PointsAward],
    pub revokes: &'a [PointsAward],
}

impl PointsChangeset<'_> {
    pub fn is_empty(&self) -> bool {
        self.awards.is_empty() && self.revokes.is_empty()
    }
}
