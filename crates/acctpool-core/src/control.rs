//! Per-account control operations and their batch counterparts.
//!
//! The backing store offers no transactions and no compare-and-swap, so
//! [`save`] layers an optimistic protocol over plain reads and writes:
//!
//! 1. re-fetch the record and three-way merge the caller's edits onto it
//! 2. skip the write entirely when the merge changes nothing
//! 3. refuse to write when ownership changed underneath the caller
//! 4. after writing, compare the store's post-write text against what was
//!    sent; a mismatch means a concurrent writer won the slot
//!
//! None of this makes a save atomic. It makes the common races either
//! harmless (disjoint edits merge) or detected (ownership and write-write
//! conflicts surface as errors and refresh the caller's baseline), which
//! is enough for the allocation layer to build on.
//!
//! The `*_all` variants run the per-account operation across a whole
//! [`AccountSet`] under the batch executor. They never short-circuit:
//! each handle ends up with its own outcome in
//! [`AccountHandle::error`](crate::account::AccountHandle), and handles
//! whose operation succeeded have it cleared.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::{AccountHandle, AccountSet};
use crate::merge;
use crate::record::{self, CodecError, ControlRecord};
use crate::store::{ControlStore, StoreError};

/// Error raised by per-account control operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ControlError {
    /// The account carries no control record, locally or in the store.
    #[error("account is not under pool management")]
    NotManaged,

    /// Another caller changed ownership between this caller's last read
    /// and its save. Nothing was written; the baseline now reflects the
    /// store.
    #[error("ownership changed concurrently: store has owner {remote_owner:?}, baseline had {baseline_owner:?}")]
    OwnerConflict {
        /// Owner the store holds now.
        remote_owner: String,
        /// Owner this caller last observed.
        baseline_owner: String,
    },

    /// A concurrent write landed inside this caller's update window and
    /// won the slot. The baseline now reflects the winning record.
    #[error("a concurrent write interrupted the update; refetch before retrying")]
    UpdateInterrupted,

    /// The record could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What [`save`] did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The merged record was written.
    Written,
    /// The merge reproduced the stored record exactly; nothing was
    /// written.
    Unchanged,
}

/// Persists the caller's edits to one account's control record.
///
/// On success both `baseline` and `current` are the saved record. On
/// [`ControlError::OwnerConflict`] and [`ControlError::UpdateInterrupted`]
/// the baseline is refreshed from the store while `current` keeps the
/// caller's unsaved edits, so the caller can inspect, re-merge, or retry.
pub async fn save<S>(store: &S, handle: &mut AccountHandle) -> Result<SaveOutcome, ControlError>
where
    S: ControlStore + ?Sized,
{
    let Some(local) = handle.current.clone() else {
        return Err(ControlError::NotManaged);
    };
    let Some(text) = store.fetch(&handle.identity).await? else {
        return Err(ControlError::NotManaged);
    };
    let current = record::decode(&text)?;
    let merged = merge::merge(&local, &current, &handle.baseline);

    if merged == current {
        debug!(account = %handle.identity, "save is a no-op after merge");
        handle.current = Some(current.clone());
        handle.baseline = current;
        return Ok(SaveOutcome::Unchanged);
    }

    // Ownership is the one field a merge must never settle silently: the
    // write only proceeds if the store's owner is either what this caller
    // last saw or what it is writing.
    if current.owner != merged.owner && current.owner != handle.baseline.owner {
        warn!(
            account = %handle.identity,
            remote_owner = %current.owner,
            "save aborted: ownership changed underneath the caller"
        );
        let conflict = ControlError::OwnerConflict {
            remote_owner: current.owner.clone(),
            baseline_owner: handle.baseline.owner.clone(),
        };
        handle.baseline = current;
        return Err(conflict);
    }

    let encoded = record::encode(&merged)?;
    let written = store.put(&handle.identity, &encoded).await?;
    if written != encoded {
        return match record::decode(&written) {
            Ok(winner) => {
                warn!(
                    account = %handle.identity,
                    "post-write verification failed; adopting the winning record as baseline"
                );
                handle.baseline = winner;
                Err(ControlError::UpdateInterrupted)
            },
            // The winning value is not even a record. The baseline only
            // ever holds store-observed records, so the handle drops to
            // the same unmanaged state a failed refresh leaves behind.
            Err(err) => {
                warn!(
                    account = %handle.identity,
                    "post-write verification found an undecodable record"
                );
                handle.current = None;
                handle.baseline = ControlRecord::new();
                Err(err.into())
            },
        };
    }

    debug!(account = %handle.identity, "control record saved");
    handle.current = Some(merged.clone());
    handle.baseline = merged;
    Ok(SaveOutcome::Written)
}

/// Discards local state and reloads one account's record from the store.
///
/// An account without a control slot comes back unmanaged, not failed. A
/// slot that exists but does not decode leaves the handle unmanaged and
/// returns the decode error.
pub async fn refresh<S>(store: &S, handle: &mut AccountHandle) -> Result<(), ControlError>
where
    S: ControlStore + ?Sized,
{
    match store.fetch(&handle.identity).await? {
        None => {
            handle.current = None;
            handle.baseline = ControlRecord::new();
            Ok(())
        },
        Some(text) => match record::decode(&text) {
            Ok(rec) => {
                handle.current = Some(rec.clone());
                handle.baseline = rec;
                Ok(())
            },
            Err(err) => {
                handle.current = None;
                handle.baseline = ControlRecord::new();
                Err(err.into())
            },
        },
    }
}

/// Brings an unmanaged account under pool management by provisioning its
/// control slot and writing the zero record into it.
pub async fn init<S>(store: &S, handle: &mut AccountHandle) -> Result<(), ControlError>
where
    S: ControlStore + ?Sized,
{
    store.create(&handle.identity).await?;
    let rec = ControlRecord::new();
    let encoded = record::encode(&rec)?;
    let written = store.put(&handle.identity, &encoded).await?;
    if written != encoded {
        return match record::decode(&written) {
            Ok(winner) => {
                handle.baseline = winner;
                Err(ControlError::UpdateInterrupted)
            },
            Err(err) => {
                handle.current = None;
                handle.baseline = ControlRecord::new();
                Err(err.into())
            },
        };
    }
    handle.current = Some(rec.clone());
    handle.baseline = rec;
    info!(account = %handle.identity, "account brought under pool management");
    Ok(())
}

/// Saves every handle in the set; see [`save`] for per-account semantics.
pub async fn save_all<S>(store: &S, set: &mut AccountSet)
where
    S: ControlStore + ?Sized,
{
    set.for_each_concurrent(|mut handle| async move {
        handle.error = save(store, &mut handle).await.err();
        handle
    })
    .await;
}

/// Refreshes every handle in the set from the store.
pub async fn refresh_all<S>(store: &S, set: &mut AccountSet)
where
    S: ControlStore + ?Sized,
{
    set.for_each_concurrent(|mut handle| async move {
        handle.error = refresh(store, &mut handle).await.err();
        handle
    })
    .await;
}

/// Initializes every handle in the set; accounts already under management
/// fail individually with [`StoreError::AlreadyExists`].
pub async fn init_all<S>(store: &S, set: &mut AccountSet)
where
    S: ControlStore + ?Sized,
{
    set.for_each_concurrent(|mut handle| async move {
        handle.error = init(store, &mut handle).await.err();
        handle
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountId, AccountIdentity};
    use crate::store::MemoryControlStore;

    fn acct(i: u64, name: &str) -> AccountIdentity {
        AccountIdentity::new(AccountId::parse(&format!("{i:012}")).unwrap(), name)
    }

    async fn managed_handle(store: &MemoryControlStore, i: u64, name: &str) -> AccountHandle {
        let mut handle = AccountHandle::new(acct(i, name));
        init(store, &mut handle).await.unwrap();
        handle
    }

    fn encoded(rec: &ControlRecord) -> String {
        record::encode(rec).unwrap()
    }

    #[tokio::test]
    async fn save_requires_a_managed_handle() {
        let store = MemoryControlStore::new();
        let mut handle = AccountHandle::new(acct(1, "alpha"));

        let err = save(&store, &mut handle).await.unwrap_err();
        assert_eq!(err, ControlError::NotManaged);
        assert_eq!(store.fetch_calls().await, 0);
    }

    #[tokio::test]
    async fn save_writes_local_edits() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;

        let rec = handle.record_mut().unwrap();
        rec.set_desc("perf testing");
        rec.add_tag("perf").unwrap();

        assert_eq!(save(&store, &mut handle).await.unwrap(), SaveOutcome::Written);

        let stored = store.contents(&handle.identity).await.unwrap();
        let on_store = record::decode(&stored).unwrap();
        assert_eq!(on_store.desc, "perf testing");
        assert_eq!(on_store.tags, vec!["perf"]);
        assert_eq!(handle.baseline, on_store);
        assert_eq!(handle.current, Some(on_store));
    }

    #[tokio::test]
    async fn save_without_changes_writes_nothing() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        let puts_after_init = store.put_calls().await;

        assert_eq!(
            save(&store, &mut handle).await.unwrap(),
            SaveOutcome::Unchanged
        );
        assert_eq!(store.put_calls().await, puts_after_init);
    }

    #[tokio::test]
    async fn save_merges_concurrent_remote_edits() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;

        // A third party updates the description behind this handle's back.
        let mut remote = handle.baseline.clone();
        remote.set_desc("claimed by nightly suite");
        store.seed(&handle.identity, &encoded(&remote)).await;

        // This caller only adds a tag.
        handle.record_mut().unwrap().add_tag("nightly").unwrap();
        save(&store, &mut handle).await.unwrap();

        let merged = handle.current.clone().unwrap();
        assert_eq!(merged.desc, "claimed by nightly suite");
        assert_eq!(merged.tags, vec!["nightly"]);
    }

    #[tokio::test]
    async fn save_detects_owner_conflict_without_writing() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        let puts_before = store.put_calls().await;

        let mut remote = handle.baseline.clone();
        remote.set_owner("them");
        store.seed(&handle.identity, &encoded(&remote)).await;

        handle.record_mut().unwrap().set_owner("me");
        let err = save(&store, &mut handle).await.unwrap_err();

        assert_eq!(
            err,
            ControlError::OwnerConflict {
                remote_owner: "them".to_string(),
                baseline_owner: String::new(),
            }
        );
        assert_eq!(store.put_calls().await, puts_before);
        // Baseline caught up with the store; local edits stay put.
        assert_eq!(handle.baseline.owner, "them");
        assert_eq!(handle.current.as_ref().unwrap().owner, "me");
    }

    #[tokio::test]
    async fn save_claims_when_remote_owner_is_unchanged() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;

        handle.record_mut().unwrap().set_owner("me");
        assert_eq!(save(&store, &mut handle).await.unwrap(), SaveOutcome::Written);
        assert_eq!(handle.baseline.owner, "me");
    }

    #[tokio::test]
    async fn save_reports_interrupted_update() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;

        let mut winner = handle.baseline.clone();
        winner.set_desc("their write");
        store.interpose_put(&handle.identity, &encoded(&winner)).await;

        handle.record_mut().unwrap().set_desc("our write");
        let err = save(&store, &mut handle).await.unwrap_err();

        assert_eq!(err, ControlError::UpdateInterrupted);
        assert_eq!(handle.baseline, winner);
        assert_eq!(handle.current.as_ref().unwrap().desc, "our write");
    }

    #[tokio::test]
    async fn save_losing_to_an_undecodable_winner_surfaces_the_codec_error() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        store.interpose_put(&handle.identity, "1#???").await;

        handle.record_mut().unwrap().set_desc("ours");
        let err = save(&store, &mut handle).await.unwrap_err();

        assert!(matches!(err, ControlError::Codec(_)));
        // No fabricated baseline: the handle drops to the unmanaged state,
        // exactly as a refresh against the garbage slot would leave it.
        assert!(!handle.is_managed());
        assert_eq!(handle.baseline, ControlRecord::new());
    }

    #[tokio::test]
    async fn save_notices_a_vanished_slot() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        store.remove(&handle.identity).await;

        handle.record_mut().unwrap().set_desc("too late");
        assert_eq!(
            save(&store, &mut handle).await.unwrap_err(),
            ControlError::NotManaged
        );
    }

    #[tokio::test]
    async fn save_refuses_oversized_records() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        let puts_before = store.put_calls().await;

        handle.record_mut().unwrap().set_desc("x".repeat(5000));
        let err = save(&store, &mut handle).await.unwrap_err();

        assert!(matches!(
            err,
            ControlError::Codec(CodecError::TooLong { .. })
        ));
        assert_eq!(store.put_calls().await, puts_before);
    }

    #[tokio::test]
    async fn refresh_loads_the_stored_record() {
        let store = MemoryControlStore::new();
        let seeded = managed_handle(&store, 1, "alpha").await;

        let mut remote = seeded.baseline.clone();
        remote.set_owner("somebody");
        store.seed(&seeded.identity, &encoded(&remote)).await;

        let mut handle = AccountHandle::new(seeded.identity.clone());
        refresh(&store, &mut handle).await.unwrap();
        assert_eq!(handle.current, Some(remote.clone()));
        assert_eq!(handle.baseline, remote);
    }

    #[tokio::test]
    async fn refresh_marks_slotless_accounts_unmanaged() {
        let store = MemoryControlStore::new();
        let mut handle = AccountHandle::new(acct(1, "alpha"));
        handle.current = Some(ControlRecord::new());

        refresh(&store, &mut handle).await.unwrap();
        assert!(!handle.is_managed());
    }

    #[tokio::test]
    async fn refresh_surfaces_decode_failures() {
        let store = MemoryControlStore::new();
        let handle_seed = managed_handle(&store, 1, "alpha").await;
        store.seed(&handle_seed.identity, "1#???").await;

        let mut handle = AccountHandle::new(handle_seed.identity.clone());
        let err = refresh(&store, &mut handle).await.unwrap_err();
        assert!(matches!(err, ControlError::Codec(_)));
        assert!(!handle.is_managed());
    }

    #[tokio::test]
    async fn init_provisions_and_writes_the_zero_record() {
        let store = MemoryControlStore::new();
        let mut handle = AccountHandle::new(acct(1, "alpha"));

        init(&store, &mut handle).await.unwrap();

        assert!(handle.is_managed());
        let stored = store.contents(&handle.identity).await.unwrap();
        assert_eq!(record::decode(&stored).unwrap(), ControlRecord::new());
    }

    #[tokio::test]
    async fn init_fails_on_managed_accounts() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;

        let err = init(&store, &mut handle).await.unwrap_err();
        assert!(matches!(
            err,
            ControlError::Store(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn save_all_isolates_per_account_failures() {
        let store = MemoryControlStore::new();
        let mut set = AccountSet::new();
        for i in 1..=3 {
            set.push(managed_handle(&store, i, &format!("acct-{i}")).await);
        }
        for handle in set.iter_mut() {
            handle.record_mut().unwrap().set_desc("updated");
        }

        let broken = set.iter().nth(1).unwrap().identity.clone();
        store
            .fail_next_fetch(
                &broken,
                StoreError::Api {
                    code: "AccessDenied".to_string(),
                    message: "no".to_string(),
                },
            )
            .await;

        save_all(&store, &mut set).await;

        let errors: Vec<bool> = set.iter().map(|h| h.error.is_some()).collect();
        assert_eq!(errors, [false, true, false]);
        // The healthy accounts were still written.
        for handle in set.iter().filter(|h| h.error.is_none()) {
            let stored = store.contents(&handle.identity).await.unwrap();
            assert_eq!(record::decode(&stored).unwrap().desc, "updated");
        }
    }

    #[tokio::test]
    async fn batch_success_clears_stale_errors() {
        let store = MemoryControlStore::new();
        let mut handle = managed_handle(&store, 1, "alpha").await;
        handle.error = Some(ControlError::NotManaged);

        let mut set = AccountSet::new();
        set.push(handle);
        refresh_all(&store, &mut set).await;

        assert!(!set.has_failures());
    }

    #[tokio::test]
    async fn refresh_all_handles_mixed_management_states() {
        let store = MemoryControlStore::new();
        let mut set = AccountSet::new();
        set.push(managed_handle(&store, 1, "managed").await);
        set.push(AccountHandle::new(acct(2, "unmanaged")));

        refresh_all(&store, &mut set).await;

        assert!(!set.has_failures());
        let managed: Vec<bool> = set.iter().map(AccountHandle::is_managed).collect();
        assert_eq!(managed, [true, false]);
    }
}
