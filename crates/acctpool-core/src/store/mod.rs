//! Access to the backing metadata slot that stores control records.
//!
//! Every pool account exposes exactly one writable text slot the control
//! plane is allowed to use (in production: the description of a designated
//! IAM role inside the account). [`ControlStore`] is the narrow seam over
//! that slot; everything above it works purely on wire text and never sees
//! provider types.
//!
//! The trait deliberately has no compare-and-swap primitive because the
//! real backing API has none. Instead [`ControlStore::put`] returns the
//! text the store holds after the write, and the save protocol in
//! [`crate::control`] compares it against what was sent to detect racing
//! writers.

mod memory;

pub use memory::MemoryControlStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::account::AccountIdentity;

/// Error raised by [`ControlStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The control slot does not exist for this account.
    #[error("account {account_id} has no control slot")]
    NotFound {
        /// Account whose slot was addressed.
        account_id: String,
    },

    /// [`ControlStore::create`] was asked to provision a slot that is
    /// already there.
    #[error("account {account_id} already has a control slot")]
    AlreadyExists {
        /// Account whose slot was addressed.
        account_id: String,
    },

    /// The store cannot reach this account at all (no credentials, not
    /// part of the fleet, and so on).
    #[error("account {account_id} is not reachable through this store: {message}")]
    Unavailable {
        /// Account whose slot was addressed.
        account_id: String,
        /// Human-readable explanation.
        message: String,
    },

    /// The backing service rejected the request.
    #[error("control store request failed with {code}: {message}")]
    Api {
        /// Service error code, e.g. `AccessDenied`.
        code: String,
        /// Service-provided message.
        message: String,
    },
}

/// One account's control slot, read and written as opaque wire text.
///
/// Implementations must be safe to share across the concurrent batch
/// executor: every method takes `&self` and may be called for many
/// accounts at once.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Reads the slot. `Ok(None)` means the slot does not exist, which the
    /// layers above interpret as "account not under pool management"; an
    /// existing but empty slot is `Ok(Some(""))` and decodes to the zero
    /// record.
    async fn fetch(&self, account: &AccountIdentity) -> Result<Option<String>, StoreError>;

    /// Overwrites the slot and returns the text the store holds afterwards.
    /// With no racing writer that is exactly `text`; a different return
    /// value means another write landed in the same window.
    async fn put(&self, account: &AccountIdentity, text: &str) -> Result<String, StoreError>;

    /// Provisions an empty slot for an account joining the pool. Fails
    /// with [`StoreError::AlreadyExists`] when the slot is already there.
    async fn create(&self, account: &AccountIdentity) -> Result<(), StoreError>;

    /// Short implementation name for log lines.
    fn name(&self) -> &'static str;
}
