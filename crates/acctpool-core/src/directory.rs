//! Enumeration of the accounts that make up the pool.
//!
//! The directory is read-only from the control plane's perspective: it
//! supplies `(id, name)` pairs and nothing else. Production backs this
//! with the cloud provider's organization listing (see `acctpool-aws`);
//! tests use [`StaticDirectory`].

use async_trait::async_trait;
use thiserror::Error;

use crate::account::{AccountIdentity, AccountSet};

/// Error raised by [`AccountDirectory::list_accounts`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DirectoryError {
    /// The directory service rejected or failed the request.
    #[error("account directory request failed with {code}: {message}")]
    Api {
        /// Service error code.
        code: String,
        /// Service-provided message.
        message: String,
    },

    /// The directory returned an entry that does not form a valid
    /// account identity.
    #[error("account directory returned an invalid account: {message}")]
    InvalidAccount {
        /// What was wrong with the entry.
        message: String,
    },
}

/// Source of the pool's account roster.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Lists every account in the pool, in no particular order.
    async fn list_accounts(&self) -> Result<Vec<AccountIdentity>, DirectoryError>;

    /// Short implementation name for log lines.
    fn name(&self) -> &'static str;
}

/// Builds an unfetched [`AccountSet`] covering the directory's full
/// roster. The usual opening move of any pool operation: load, then
/// refresh, then filter.
pub async fn load_pool<D>(directory: &D) -> Result<AccountSet, DirectoryError>
where
    D: AccountDirectory + ?Sized,
{
    let identities = directory.list_accounts().await?;
    Ok(AccountSet::from_identities(identities))
}

/// Fixed roster, for tests and single-tenant deployments where the pool
/// membership is configuration rather than discovery.
pub struct StaticDirectory {
    accounts: Vec<AccountIdentity>,
}

impl StaticDirectory {
    /// Creates a directory that always answers with `accounts`.
    #[must_use]
    pub fn new(accounts: Vec<AccountIdentity>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn list_accounts(&self) -> Result<Vec<AccountIdentity>, DirectoryError> {
        Ok(self.accounts.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
