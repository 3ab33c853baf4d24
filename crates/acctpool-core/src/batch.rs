//! Bounded-concurrency batch execution over account sets.
//!
//! Every multi-account operation in this crate (refresh the pool, save a
//! claim batch, release a set) is the same shape: run one independent
//! async operation per account, against a remote API that tolerates some
//! parallelism but throttles aggressive callers. This module owns that
//! shape so the operations themselves stay sequential, single-account
//! code.
//!
//! Execution keeps a fixed window of in-flight operations: the window
//! fills up front, and every completion immediately launches the next
//! queued account. One slow account therefore delays only its own slot,
//! not the whole batch, and a failing account never prevents the others
//! from running to completion.

use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::account::{AccountHandle, AccountSet};

/// Upper bound on concurrently executing per-account operations.
///
/// Fixed rather than configurable: the workload is I/O-bound against a
/// rate-limited control API, where a small constant window captures most
/// of the latency win without tripping server-side throttling.
pub const MAX_INFLIGHT_OPS: usize = 10;

impl AccountSet {
    /// Runs `op` once per handle, at most [`MAX_INFLIGHT_OPS`] at a time,
    /// and waits for every operation to finish.
    ///
    /// Each operation takes its handle by value and returns it (updated)
    /// when done; the set's order is preserved regardless of completion
    /// order. There is no short-circuiting: per-account failures are
    /// recorded on the handles by the operation itself, never raised out
    /// of the batch.
    pub async fn for_each_concurrent<F, Fut>(&mut self, op: F)
    where
        F: Fn(AccountHandle) -> Fut,
        Fut: Future<Output = AccountHandle>,
    {
        let handles: Vec<AccountHandle> = std::mem::take(self).into_iter().collect();
        let total = handles.len();
        if total == 0 {
            return;
        }
        let window = total.min(MAX_INFLIGHT_OPS);
        debug!(total, window, "dispatching account batch");

        // Tag each operation with its input position so the set can be
        // reassembled in order once everything has completed.
        let run = |idx: usize, handle: AccountHandle| {
            let fut = op(handle);
            async move { (idx, fut.await) }
        };

        let mut queue = handles.into_iter().enumerate();
        let mut inflight = FuturesUnordered::new();
        for _ in 0..window {
            if let Some((idx, handle)) = queue.next() {
                inflight.push(run(idx, handle));
            }
        }

        let mut done: Vec<(usize, AccountHandle)> = Vec::with_capacity(total);
        while let Some(finished) = inflight.next().await {
            done.push(finished);
            if let Some((idx, handle)) = queue.next() {
                inflight.push(run(idx, handle));
            }
        }

        done.sort_unstable_by_key(|(idx, _)| *idx);
        *self = done.into_iter().map(|(_, handle)| handle).collect();
    }
}
