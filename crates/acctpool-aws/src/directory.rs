//! Fleet roster from AWS Organizations.
//!
//! `ListAccounts` is the source of truth for which accounts exist;
//! membership in the pool is decided later by control records and filters,
//! not here. Suspended and pending-closure accounts are dropped from the
//! roster, as are entries the service returns without an id or name.

use acctpool_core::account::{AccountId, AccountIdentity};
use acctpool_core::directory::{AccountDirectory, DirectoryError};
use async_trait::async_trait;
use aws_sdk_organizations::error::ProvideErrorMetadata;
use aws_sdk_organizations::types::AccountStatus;
use aws_sdk_organizations::Client;
use tracing::debug;

/// [`AccountDirectory`] backed by the Organizations `ListAccounts` API.
///
/// The client must carry credentials for the organization's management
/// account (or a delegated administrator); member-account credentials
/// cannot list the fleet.
pub struct OrgAccountDirectory {
    client: Client,
}

impl OrgAccountDirectory {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds the client from shared SDK configuration.
    #[must_use]
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(Client::new(config))
    }
}

#[async_trait]
impl AccountDirectory for OrgAccountDirectory {
    async fn list_accounts(&self) -> Result<Vec<AccountIdentity>, DirectoryError> {
        let mut identities = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self.client.list_accounts();
            if let Some(next) = &token {
                request = request.next_token(next);
            }
            let resp = request.send().await.map_err(|err| {
                let err = err.into_service_error();
                DirectoryError::Api {
                    code: err.code().unwrap_or("Unknown").to_string(),
                    message: err.message().unwrap_or("no message provided").to_string(),
                }
            })?;

            for account in resp.accounts() {
                let (Some(id), Some(name)) = (account.id(), account.name()) else {
                    debug!("skipping directory entry without id or name");
                    continue;
                };
                if account
                    .status()
                    .is_some_and(|status| *status != AccountStatus::Active)
                {
                    debug!(account_id = id, "skipping non-active account");
                    continue;
                }
                let id = AccountId::parse(id).map_err(|err| DirectoryError::InvalidAccount {
                    message: err.to_string(),
                })?;
                identities.push(AccountIdentity::new(id, name));
            }

            match resp.next_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        debug!(count = identities.len(), "fleet roster loaded");
        Ok(identities)
    }

    fn name(&self) -> &'static str {
        "organizations"
    }
}
