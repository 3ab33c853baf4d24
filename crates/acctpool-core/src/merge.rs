//! Three-way merge of concurrent control record edits.
//!
//! Saving a record is never a blind overwrite. The caller holds two copies:
//! the `baseline` snapshot taken when the record was last read, and the
//! `local` copy carrying the caller's edits. At save time the store is read
//! again (`current`), and the caller's *changes relative to baseline* are
//! replayed on top of `current`:
//!
//! - `owner` and `desc` are single-writer fields: the local value wins only
//!   if the caller actually changed it, otherwise the remote value is kept.
//! - tags merge per element. Tags the caller added are added to `current`,
//!   tags the caller removed are removed from it, and tags the caller never
//!   touched stay exactly as the remote side has them.
//!
//! The merge itself is pure and total; detecting that the result would
//! clobber another caller's ownership change is the save protocol's job,
//! not the merge's.

use crate::record::ControlRecord;

/// Element-wise difference between two tag lists.
///
/// Produced by [`tag_delta`] and replayed with [`TagDelta::apply`]. Both
/// lists are kept sorted so the diff walk and the replay stay linear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Tags present locally but not in the baseline.
    pub added: Vec<String>,
    /// Tags present in the baseline but dropped locally.
    pub removed: Vec<String>,
}

impl TagDelta {
    /// Returns true when the delta changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Replays the delta on top of another tag list, returning the merged
    /// canonical list. A tag named on both sides of the delta is treated
    /// as added.
    #[must_use]
    pub fn apply(&self, current: &[String]) -> Vec<String> {
        let mut merged: Vec<String> = current
            .iter()
            .filter(|tag| !self.removed.contains(tag))
            .cloned()
            .collect();
        merged.extend(self.added.iter().cloned());
        merged.sort_unstable();
        merged.dedup();
        merged
    }
}

/// Computes the tag changes that turn `baseline` into `local`.
///
/// Both inputs must be in canonical (sorted, de-duplicated) order, which is
/// how every decoded or merged record carries them.
#[must_use]
pub fn tag_delta(local: &[String], baseline: &[String]) -> TagDelta {
    let mut delta = TagDelta::default();
    let mut l = 0;
    let mut b = 0;
    while l < local.len() && b < baseline.len() {
        match local[l].cmp(&baseline[b]) {
            std::cmp::Ordering::Less => {
                delta.added.push(local[l].clone());
                l += 1;
            },
            std::cmp::Ordering::Greater => {
                delta.removed.push(baseline[b].clone());
                b += 1;
            },
            std::cmp::Ordering::Equal => {
                l += 1;
                b += 1;
            },
        }
    }
    delta.added.extend_from_slice(&local[l..]);
    delta.removed.extend_from_slice(&baseline[b..]);
    delta
}

/// Merges the caller's edits into the freshly fetched remote record.
///
/// See the module docs for the field rules. The result always carries
/// canonical tags.
#[must_use]
pub fn merge(
    local: &ControlRecord,
    current: &ControlRecord,
    baseline: &ControlRecord,
) -> ControlRecord {
    let owner = if local.owner != baseline.owner {
        local.owner.clone()
    } else {
        current.owner.clone()
    };
    let desc = if local.desc != baseline.desc {
        local.desc.clone()
    } else {
        current.desc.clone()
    };
    let tags = tag_delta(&local.tags, &baseline.tags).apply(&current.tags);
    ControlRecord { desc, owner, tags }
}
