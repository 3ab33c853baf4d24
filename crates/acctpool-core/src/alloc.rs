//! Claiming accounts out of the free pool and releasing them afterwards.
//!
//! Allocation rides entirely on the save protocol in [`crate::control`];
//! there is no separate lock service. A claim is an ordinary save that
//! sets the owner token, and contention shows up as the save protocol's
//! conflict errors plus one provider-specific wrinkle: the backing store's
//! read path lags its write path, so a claim that "stuck" is only trusted
//! after a settling delay and a re-read. Claims whose re-read shows a
//! different owner simply went to somebody faster.
//!
//! The claim loop is therefore: shuffle the free candidates (so contending
//! callers spread out instead of stampeding the same accounts), claim a
//! batch of the still-needed size, wait out the settling window, re-read,
//! and keep only the claims that verified. Candidates that failed or lost
//! are consumed, not retried, and a claim whose re-read fails outright is
//! released again rather than trusted or leaked; a caller that runs out
//! of candidates rolls back everything it claimed and reports how many
//! accounts it was short.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::AccountSet;
use crate::config::AllocatorConfig;
use crate::control;
use crate::store::ControlStore;

/// Error raised by [`Allocator::allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AllocError {
    /// The owner token was empty, which would claim accounts as "free".
    #[error("allocation owner token must not be empty")]
    EmptyOwner,

    /// The pool ran out of claimable accounts. Every account claimed
    /// before the shortfall was detected has been released again.
    #[error("not enough free accounts: short by {missing}")]
    Shortfall {
        /// How many accounts could not be claimed.
        missing: usize,
    },
}

/// Claims accounts on behalf of one owner token.
///
/// Carries its own RNG so tests can drive the candidate shuffle
/// deterministically; production callers use [`Allocator::new`], which
/// seeds from entropy.
pub struct Allocator {
    settle_delay: Duration,
    rng: StdRng,
}

impl Allocator {
    /// Creates an allocator with an entropy-seeded RNG.
    #[must_use]
    pub fn new(config: &AllocatorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Creates an allocator with a caller-provided RNG.
    #[must_use]
    pub fn with_rng(config: &AllocatorConfig, rng: StdRng) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            rng,
        }
    }

    /// Claims `count` free accounts from `pool` for `owner`.
    ///
    /// `pool` is consumed: the caller hands over its view of the pool
    /// (typically fresh from a refresh) and gets back a new set holding
    /// exactly the verified claims, sorted by display name. On shortfall
    /// every verified claim is released again before the error returns,
    /// so a failed allocation never leaves accounts bound to `owner`.
    pub async fn allocate<S>(
        &mut self,
        store: &S,
        pool: AccountSet,
        count: usize,
        owner: &str,
    ) -> Result<AccountSet, AllocError>
    where
        S: ControlStore + ?Sized,
    {
        if owner.is_empty() {
            return Err(AllocError::EmptyOwner);
        }

        let mut candidates = pool;
        candidates.retain(|h| {
            h.error.is_none() && h.current.as_ref().is_some_and(|rec| rec.is_free())
        });
        candidates.shuffle(&mut self.rng);
        debug!(
            requested = count,
            candidates = candidates.len(),
            owner,
            "starting allocation"
        );

        let mut allocated = AccountSet::new();
        let mut suspects = AccountSet::new();
        let mut remaining = count;
        while remaining > 0 {
            if candidates.len() < remaining {
                let missing = remaining - candidates.len();
                warn!(
                    missing,
                    rolling_back = allocated.len() + suspects.len(),
                    owner,
                    "allocation shortfall; releasing claimed accounts"
                );
                release(store, &mut allocated).await;
                release(store, &mut suspects).await;
                return Err(AllocError::Shortfall { missing });
            }

            let mut batch = candidates.drain_front(remaining);
            for handle in batch.iter_mut() {
                if let Some(rec) = handle.record_mut() {
                    rec.set_owner(owner);
                }
            }
            control::save_all(store, &mut batch).await;
            batch.retain(|h| h.error.is_none());

            // The store's read path lags its writes; a claim only counts
            // once a post-settle re-read still shows our token.
            if !batch.is_empty() && !self.settle_delay.is_zero() {
                tokio::time::sleep(self.settle_delay).await;
            }
            control::refresh_all(store, &mut batch).await;
            // A claim whose verification read failed may still have stuck.
            // The account is consumed either way, so it joins the release
            // pile rather than staying silently bound to the token.
            let (readable, unreadable): (Vec<_>, Vec<_>) =
                batch.into_iter().partition(|h| h.error.is_none());
            suspects.append(&mut AccountSet::from(unreadable));
            let mut batch = AccountSet::from(readable);
            batch.retain(|h| h.current.as_ref().is_some_and(|rec| rec.owner == owner));

            remaining -= batch.len();
            allocated.append(&mut batch);
        }

        if !suspects.is_empty() {
            warn!(
                unverified = suspects.len(),
                owner,
                "releasing claims whose verification read failed"
            );
            release(store, &mut suspects).await;
        }
        allocated.sort_by_name();
        info!(count, owner, "allocation complete");
        Ok(allocated)
    }
}

/// Releases every managed account in `set` by clearing its owner and
/// saving. Per-account failures land on the handles, as with any batch
/// operation; the healthy accounts are released regardless.
pub async fn release<S>(store: &S, set: &mut AccountSet)
where
    S: ControlStore + ?Sized,
{
    for handle in set.iter_mut() {
        if let Some(rec) = handle.record_mut() {
            rec.clear_owner();
        }
    }
    control::save_all(store, set).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountHandle, AccountId, AccountIdentity};
    use crate::control::ControlError;
    use crate::record;
    use crate::store::MemoryControlStore;

    fn no_delay() -> AllocatorConfig {
        AllocatorConfig { settle_delay_ms: 0 }
    }

    fn identity(i: u64) -> AccountIdentity {
        AccountIdentity::new(
            AccountId::parse(&format!("{i:012}")).unwrap(),
            format!("acct-{i:03}"),
        )
    }

    async fn managed_pool(store: &MemoryControlStore, n: u64) -> AccountSet {
        let mut set = AccountSet::from_identities((1..=n).map(identity));
        control::init_all(store, &mut set).await;
        assert!(!set.has_failures(), "pool setup must succeed");
        set
    }

    async fn owner_in_store(store: &MemoryControlStore, identity: &AccountIdentity) -> String {
        let text = store.contents(identity).await.unwrap();
        record::decode(&text).unwrap().owner
    }

    async fn count_owned_by(store: &MemoryControlStore, pool: &AccountSet, owner: &str) -> usize {
        let mut owned = 0;
        for handle in pool.iter() {
            if owner_in_store(store, &handle.identity).await == owner {
                owned += 1;
            }
        }
        owned
    }

    #[tokio::test]
    async fn allocate_zero_accounts_is_an_empty_success() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 3).await;

        let mut allocator = Allocator::new(&no_delay());
        let got = allocator.allocate(&store, pool, 0, "job-1").await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn allocate_rejects_an_empty_owner() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 3).await;

        let mut allocator = Allocator::new(&no_delay());
        assert_eq!(
            allocator.allocate(&store, pool, 1, "").await.unwrap_err(),
            AllocError::EmptyOwner
        );
    }

    #[tokio::test]
    async fn allocate_claims_and_sorts_by_name() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 5).await;
        let snapshot = pool.clone();

        let mut allocator = Allocator::new(&no_delay());
        let got = allocator
            .allocate(&store, pool, 3, "job-42")
            .await
            .unwrap();

        assert_eq!(got.len(), 3);
        let names: Vec<&str> = got.iter().map(AccountHandle::name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);

        for handle in got.iter() {
            assert_eq!(handle.current.as_ref().unwrap().owner, "job-42");
            assert_eq!(owner_in_store(&store, &handle.identity).await, "job-42");
        }
        assert_eq!(count_owned_by(&store, &snapshot, "job-42").await, 3);
    }

    #[tokio::test]
    async fn allocate_skips_owned_and_errored_candidates() {
        let store = MemoryControlStore::new();
        let mut pool = managed_pool(&store, 4).await;

        // One account is already taken, one carries a stale batch error.
        {
            let mut iter = pool.iter_mut();
            let taken = iter.next().unwrap();
            taken.record_mut().unwrap().set_owner("someone-else");
            control::save(&store, taken).await.unwrap();
            iter.next().unwrap().error = Some(ControlError::NotManaged);
        }

        let mut allocator = Allocator::new(&no_delay());
        let got = allocator.allocate(&store, pool, 2, "job-7").await.unwrap();

        assert_eq!(got.len(), 2);
        for handle in got.iter() {
            assert_ne!(handle.current.as_ref().unwrap().owner, "someone-else");
        }
    }

    #[tokio::test]
    async fn allocate_reports_exact_shortfall_without_claiming() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 2).await;
        let snapshot = pool.clone();

        let mut allocator = Allocator::new(&no_delay());
        let err = allocator
            .allocate(&store, pool, 5, "job-9")
            .await
            .unwrap_err();

        assert_eq!(err, AllocError::Shortfall { missing: 3 });
        assert_eq!(count_owned_by(&store, &snapshot, "job-9").await, 0);
    }

    #[tokio::test]
    async fn allocate_rolls_back_partial_claims_on_shortfall() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 3).await;
        let snapshot = pool.clone();

        // One candidate refuses the claim write, so the allocator verifies
        // two, runs out of candidates for the third, and must release the
        // two it already holds.
        let victim = snapshot.iter().next().unwrap().identity.clone();
        store
            .fail_next_put(
                &victim,
                crate::store::StoreError::Api {
                    code: "AccessDenied".to_string(),
                    message: "claim refused".to_string(),
                },
            )
            .await;

        let mut allocator = Allocator::new(&no_delay());
        let err = allocator
            .allocate(&store, pool, 3, "job-11")
            .await
            .unwrap_err();

        assert_eq!(err, AllocError::Shortfall { missing: 1 });
        assert_eq!(count_owned_by(&store, &snapshot, "job-11").await, 0);
    }

    #[tokio::test]
    async fn allocate_consumes_claims_that_lose_the_write_race() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 3).await;
        let snapshot = pool.clone();

        // Pick the account a seeded allocator will try first and arrange
        // for a rival's write to land inside the claim's update window.
        let mut probe = snapshot.clone();
        probe.shuffle(&mut StdRng::seed_from_u64(99));
        let contested = probe.iter().next().unwrap().identity.clone();

        let mut rival = record::decode(&store.contents(&contested).await.unwrap()).unwrap();
        rival.set_owner("rival");
        store
            .interpose_put(&contested, &record::encode(&rival).unwrap())
            .await;

        let mut allocator =
            Allocator::with_rng(&no_delay(), StdRng::seed_from_u64(99));
        let got = allocator
            .allocate(&store, pool, 2, "job-13")
            .await
            .unwrap();

        assert_eq!(got.len(), 2);
        assert!(got.get(&contested.id).is_none(), "lost claim must not be returned");
        assert_eq!(owner_in_store(&store, &contested).await, "rival");
        assert_eq!(count_owned_by(&store, &snapshot, "job-13").await, 2);
    }

    #[tokio::test]
    async fn allocate_releases_claims_it_cannot_verify() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 2).await;
        let snapshot = pool.clone();

        // Find the account a seeded allocator tries first, let its claim
        // write through, and fail the verification read that follows.
        let mut probe = snapshot.clone();
        probe.shuffle(&mut StdRng::seed_from_u64(21));
        let unlucky = probe.iter().next().unwrap().identity.clone();
        store.pass_next_fetch(&unlucky).await;
        store
            .fail_next_fetch(
                &unlucky,
                crate::store::StoreError::Api {
                    code: "Throttled".to_string(),
                    message: "slow down".to_string(),
                },
            )
            .await;

        let mut allocator = Allocator::with_rng(&no_delay(), StdRng::seed_from_u64(21));
        let got = allocator.allocate(&store, pool, 1, "job-21").await.unwrap();

        // The second candidate satisfied the request; the unverifiable
        // claim was handed back instead of staying bound to the token.
        assert_eq!(got.len(), 1);
        assert!(got.get(&unlucky.id).is_none());
        assert_eq!(owner_in_store(&store, &unlucky).await, "");
        assert_eq!(count_owned_by(&store, &snapshot, "job-21").await, 1);
    }

    #[tokio::test]
    async fn shortfall_rollback_covers_unverified_claims() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 1).await;
        let unlucky = pool.iter().next().unwrap().identity.clone();

        // The only candidate's claim sticks but cannot be verified, and no
        // candidates remain to cover the request.
        store.pass_next_fetch(&unlucky).await;
        store
            .fail_next_fetch(
                &unlucky,
                crate::store::StoreError::Api {
                    code: "Throttled".to_string(),
                    message: "slow down".to_string(),
                },
            )
            .await;

        let mut allocator = Allocator::new(&no_delay());
        let err = allocator
            .allocate(&store, pool, 1, "job-23")
            .await
            .unwrap_err();

        assert_eq!(err, AllocError::Shortfall { missing: 1 });
        assert_eq!(owner_in_store(&store, &unlucky).await, "");
    }

    #[tokio::test]
    async fn allocate_waits_out_the_settling_window() {
        tokio::time::pause();
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 2).await;

        let config = AllocatorConfig {
            settle_delay_ms: 7000,
        };
        let started = tokio::time::Instant::now();
        let mut allocator = Allocator::new(&config);
        allocator.allocate(&store, pool, 1, "job-15").await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(7000));
    }

    #[tokio::test]
    async fn shuffle_is_reproducible_with_a_seeded_rng() {
        let pick = |seed: u64| async move {
            let store = MemoryControlStore::new();
            let pool = managed_pool(&store, 6).await;
            let mut allocator = Allocator::with_rng(&no_delay(), StdRng::seed_from_u64(seed));
            let got = allocator.allocate(&store, pool, 2, "job-17").await.unwrap();
            got.iter().map(|h| h.id().to_string()).collect::<Vec<_>>()
        };

        assert_eq!(pick(5).await, pick(5).await);
    }

    #[tokio::test]
    async fn release_frees_every_managed_account() {
        let store = MemoryControlStore::new();
        let pool = managed_pool(&store, 3).await;
        let snapshot = pool.clone();

        let mut allocator = Allocator::new(&no_delay());
        let mut got = allocator.allocate(&store, pool, 3, "job-19").await.unwrap();
        assert_eq!(count_owned_by(&store, &snapshot, "job-19").await, 3);

        release(&store, &mut got).await;
        assert!(!got.has_failures());
        assert_eq!(count_owned_by(&store, &snapshot, "job-19").await, 0);
        for handle in snapshot.iter() {
            assert_eq!(owner_in_store(&store, &handle.identity).await, "");
        }
    }
}
