//! Account identities, per-account handles, and ordered account sets.
//!
//! An [`AccountHandle`] is the unit the rest of the crate operates on. It
//! pairs the immutable identity of one pool account with the mutable
//! control state tracked for it:
//!
//! - `current`: the caller's working copy of the control record, `None`
//!   while the account is not under pool management
//! - `baseline`: the last record actually observed in the backing store,
//!   used as the merge base when saving
//! - `error`: the failure of the most recent batch operation, if any
//!
//! Handles are plain data. All behavior that touches the backing store
//! lives in [`crate::control`] and [`crate::alloc`], which is what keeps
//! those layers testable against the in-memory store.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::control::ControlError;
use crate::record::ControlRecord;

/// Exact length of an account ID.
pub const ACCOUNT_ID_LEN: usize = 12;

/// Error raised when text does not form a valid account ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("account id must be exactly {ACCOUNT_ID_LEN} ASCII digits, got {value:?}")]
pub struct InvalidAccountId {
    /// The rejected text.
    pub value: String,
}

/// Canonical account identifier: exactly twelve ASCII digits.
///
/// Leading zeros are significant, so the ID is kept as text rather than a
/// number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(String);

impl AccountId {
    /// Parses and validates an account ID.
    pub fn parse(value: &str) -> Result<Self, InvalidAccountId> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidAccountId {
                value: value.to_string(),
            })
        }
    }

    /// Returns true when `value` is syntactically a valid account ID. The
    /// filter language uses this to recognize ID-mode entries.
    #[must_use]
    pub fn is_valid(value: &str) -> bool {
        value.len() == ACCOUNT_ID_LEN && value.bytes().all(|b| b.is_ascii_digit())
    }

    /// The ID as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = InvalidAccountId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Immutable identity of one pool account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    /// Unique account ID.
    pub id: AccountId,
    /// Human-facing display name. Not guaranteed unique across the pool.
    pub name: String,
}

impl AccountIdentity {
    /// Builds an identity from its parts.
    pub fn new(id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// One account plus the control state tracked for it.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    /// Who this handle is about.
    pub identity: AccountIdentity,
    /// Working copy of the control record. `None` while the account is not
    /// under pool management.
    pub current: Option<ControlRecord>,
    /// Last record observed in the backing store; the merge base for the
    /// next save. Only ever replaced with store-observed values.
    pub baseline: ControlRecord,
    /// Error of the most recent batch operation on this handle, cleared
    /// when a later operation succeeds.
    pub error: Option<ControlError>,
}

impl AccountHandle {
    /// Creates a handle in the "never fetched" state.
    #[must_use]
    pub fn new(identity: AccountIdentity) -> Self {
        Self {
            identity,
            current: None,
            baseline: ControlRecord::new(),
            error: None,
        }
    }

    /// Account ID shorthand.
    #[must_use]
    pub fn id(&self) -> &AccountId {
        &self.identity.id
    }

    /// Display name shorthand.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Returns true when the account carries a control record, i.e. is
    /// under pool management as far as this handle knows.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.current.is_some()
    }

    /// Mutable access to the working record, if managed.
    pub fn record_mut(&mut self) -> Option<&mut ControlRecord> {
        self.current.as_mut()
    }
}

/// An ordered collection of account handles.
///
/// Sets preserve insertion order until told otherwise; batch operations
/// never reorder them. Allocation shuffles explicitly and result sets are
/// sorted by name before they are returned to callers.
#[derive(Debug, Clone, Default)]
pub struct AccountSet {
    handles: Vec<AccountHandle>,
}

impl AccountSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates fresh handles for the given identities.
    #[must_use]
    pub fn from_identities(identities: impl IntoIterator<Item = AccountIdentity>) -> Self {
        Self {
            handles: identities.into_iter().map(AccountHandle::new).collect(),
        }
    }

    /// Appends a handle.
    pub fn push(&mut self, handle: AccountHandle) {
        self.handles.push(handle);
    }

    /// Moves every handle of `other` to the end of this set.
    pub fn append(&mut self, other: &mut AccountSet) {
        self.handles.append(&mut other.handles);
    }

    /// Number of handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true when the set holds no handles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Looks up a handle by account ID.
    #[must_use]
    pub fn get(&self, id: &AccountId) -> Option<&AccountHandle> {
        self.handles.iter().find(|h| h.id() == id)
    }

    /// Iterates over the handles in order.
    pub fn iter(&self) -> std::slice::Iter<'_, AccountHandle> {
        self.handles.iter()
    }

    /// Iterates mutably over the handles in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, AccountHandle> {
        self.handles.iter_mut()
    }

    /// Keeps only the handles matching `pred`, preserving order.
    pub fn retain(&mut self, pred: impl FnMut(&AccountHandle) -> bool) {
        self.handles.retain(pred);
    }

    /// Sorts by display name, breaking ties by account ID so the order is
    /// total even when names repeat.
    pub fn sort_by_name(&mut self) {
        self.handles.sort_by(|a, b| {
            a.identity
                .name
                .cmp(&b.identity.name)
                .then_with(|| a.identity.id.cmp(&b.identity.id))
        });
    }

    /// Shuffles the set with the caller's RNG. Allocation uses this to
    /// spread contending callers across the pool.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.handles.shuffle(rng);
    }

    /// Removes and returns the first `n` handles (fewer if the set is
    /// smaller).
    pub fn drain_front(&mut self, n: usize) -> AccountSet {
        let n = n.min(self.handles.len());
        AccountSet {
            handles: self.handles.drain(..n).collect(),
        }
    }

    /// Iterates over the handles whose last operation failed.
    pub fn failures(&self) -> impl Iterator<Item = (&AccountIdentity, &ControlError)> {
        self.handles
            .iter()
            .filter_map(|h| h.error.as_ref().map(|e| (&h.identity, e)))
    }

    /// Returns true when any handle carries an operation error.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.handles.iter().any(|h| h.error.is_some())
    }
}

impl From<Vec<AccountHandle>> for AccountSet {
    fn from(handles: Vec<AccountHandle>) -> Self {
        Self { handles }
    }
}

impl FromIterator<AccountHandle> for AccountSet {
    fn from_iter<I: IntoIterator<Item = AccountHandle>>(iter: I) -> Self {
        Self {
            handles: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AccountSet {
    type Item = AccountHandle;
    type IntoIter = std::vec::IntoIter<AccountHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}

impl<'a> IntoIterator for &'a AccountSet {
    type Item = &'a AccountHandle;
    type IntoIter = std::slice::Iter<'a, AccountHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter()
    }
}

impl<'a> IntoIterator for &'a mut AccountSet {
    type Item = &'a mut AccountHandle;
    type IntoIter = std::slice::IterMut<'a, AccountHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn identity(id: &str, name: &str) -> AccountIdentity {
        AccountIdentity::new(AccountId::parse(id).unwrap(), name)
    }

    #[test]
    fn account_id_accepts_twelve_digits() {
        let id = AccountId::parse("012345678901").unwrap();
        assert_eq!(id.as_str(), "012345678901");
        assert_eq!(id.to_string(), "012345678901");
    }

    #[test]
    fn account_id_rejects_wrong_length() {
        assert!(AccountId::parse("123").is_err());
        assert!(AccountId::parse("1234567890123").is_err());
        assert!(AccountId::parse("").is_err());
    }

    #[test]
    fn account_id_rejects_non_digits() {
        assert!(AccountId::parse("12345678901x").is_err());
        assert!(AccountId::parse("12345678901 ").is_err());
        assert!(AccountId::parse("-12345678901").is_err());
    }

    #[test]
    fn account_id_from_str_round_trips() {
        let id: AccountId = "999999999999".parse().unwrap();
        assert_eq!(id.as_str(), "999999999999");
    }

    #[test]
    fn new_handle_is_unmanaged() {
        let handle = AccountHandle::new(identity("111111111111", "alpha"));
        assert!(!handle.is_managed());
        assert!(handle.error.is_none());
        assert_eq!(handle.baseline, ControlRecord::new());
    }

    #[test]
    fn sort_by_name_breaks_ties_by_id() {
        let mut set = AccountSet::from_identities([
            identity("333333333333", "beta"),
            identity("222222222222", "alpha"),
            identity("111111111111", "alpha"),
        ]);
        set.sort_by_name();
        let ids: Vec<_> = set.iter().map(|h| h.id().as_str()).collect();
        assert_eq!(ids, ["111111111111", "222222222222", "333333333333"]);
    }

    #[test]
    fn shuffle_is_deterministic_under_a_seeded_rng() {
        let identities = [
            identity("111111111111", "a"),
            identity("222222222222", "b"),
            identity("333333333333", "c"),
            identity("444444444444", "d"),
        ];
        let mut first = AccountSet::from_identities(identities.clone());
        let mut second = AccountSet::from_identities(identities);

        first.shuffle(&mut StdRng::seed_from_u64(7));
        second.shuffle(&mut StdRng::seed_from_u64(7));

        let order = |set: &AccountSet| -> Vec<String> {
            set.iter().map(|h| h.id().to_string()).collect()
        };
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn drain_front_takes_at_most_n() {
        let mut set = AccountSet::from_identities([
            identity("111111111111", "a"),
            identity("222222222222", "b"),
        ]);
        let taken = set.drain_front(5);
        assert_eq!(taken.len(), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn get_finds_by_id() {
        let set = AccountSet::from_identities([
            identity("111111111111", "a"),
            identity("222222222222", "b"),
        ]);
        let id = AccountId::parse("222222222222").unwrap();
        assert_eq!(set.get(&id).map(AccountHandle::name), Some("b"));
    }
}
