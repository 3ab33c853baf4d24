//! Control records stored in IAM role descriptions.
//!
//! Each pool account holds one designated role, created under a well-known
//! name and path, whose description field is the control slot:
//!
//! - fetch = `GetRole` (a missing role means the account is not under pool
//!   management)
//! - put = `UpdateRoleDescription`, whose response carries the description
//!   the service holds after the write; the save protocol compares it
//!   against what was sent to detect racing writers
//! - create = `CreateRole` with a trust policy that denies `sts:AssumeRole`
//!   to everyone, so the control role can never be used to enter the
//!   account it describes
//!
//! The description field caps at 1000 characters, which is where the
//! codec's encoded-length limit comes from.

use acctpool_core::account::AccountIdentity;
use acctpool_core::config::ControlSlotConfig;
use acctpool_core::store::{ControlStore, StoreError};
use async_trait::async_trait;
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::Client;
use tracing::debug;

/// Supplies an IAM client credentialed for a given account.
///
/// An IAM client is bound to one account's credentials, so a store that
/// spans the fleet needs one client per account. How those credentials are
/// obtained (role assumption, SSO, a session daemon) is outside this
/// crate; implementations hand back ready-to-use clients.
#[async_trait]
pub trait RoleClientSource: Send + Sync {
    /// Returns a client whose credentials act inside `account`.
    async fn client_for(&self, account: &AccountIdentity) -> Result<Client, StoreError>;
}

/// A [`RoleClientSource`] that answers every account with the same client.
///
/// Useful for single-account deployments and endpoint-override test rigs,
/// where one set of credentials covers the whole "fleet".
pub struct FixedRoleClients {
    client: Client,
}

impl FixedRoleClients {
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
impl RoleClientSource for FixedRoleClients {
    async fn client_for(&self, _account: &AccountIdentity) -> Result<Client, StoreError> {
        Ok(self.client.clone())
    }
}

/// [`ControlStore`] backed by per-account IAM role descriptions.
pub struct RoleControlStore<S> {
    clients: S,
    role_name: String,
    role_path: String,
}

impl<S: RoleClientSource> RoleControlStore<S> {
    /// Creates a store addressing the control role named by `slot`.
    #[must_use]
    pub fn new(clients: S, slot: &ControlSlotConfig) -> Self {
        Self {
            clients,
            role_name: slot.role_name.clone(),
            role_path: slot.role_path.clone(),
        }
    }
}

#[async_trait]
impl<S: RoleClientSource> ControlStore for RoleControlStore<S> {
    async fn fetch(&self, account: &AccountIdentity) -> Result<Option<String>, StoreError> {
        let client = self.clients.client_for(account).await?;
        match client.get_role().role_name(&self.role_name).send().await {
            Ok(out) => {
                // A role without a description is an empty slot, which
                // decodes to the zero record upstream.
                let text = out
                    .role()
                    .and_then(|role| role.description())
                    .unwrap_or_default();
                Ok(Some(text.to_string()))
            },
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_entity_exception() {
                    debug!(account = %account, role = %self.role_name, "control role absent");
                    return Ok(None);
                }
                Err(api_error(&err))
            },
        }
    }

    async fn put(&self, account: &AccountIdentity, text: &str) -> Result<String, StoreError> {
        let client = self.clients.client_for(account).await?;
        match client
            .update_role_description()
            .role_name(&self.role_name)
            .description(text)
            .send()
            .await
        {
            Ok(out) => {
                let stored = out
                    .role()
                    .and_then(|role| role.description())
                    .unwrap_or_default();
                Ok(stored.to_string())
            },
            Err(err) => {
                let err = err.into_service_error();
                if err.is_no_such_entity_exception() {
                    return Err(StoreError::NotFound {
                        account_id: account.id.to_string(),
                    });
                }
                Err(api_error(&err))
            },
        }
    }

    async fn create(&self, account: &AccountIdentity) -> Result<(), StoreError> {
        let client = self.clients.client_for(account).await?;
        match client
            .create_role()
            .role_name(&self.role_name)
            .path(&self.role_path)
            .assume_role_policy_document(deny_all_trust_policy())
            .send()
            .await
        {
            Ok(_) => {
                debug!(account = %account, role = %self.role_name, "control role created");
                Ok(())
            },
            Err(err) => {
                let err = err.into_service_error();
                if err.is_entity_already_exists_exception() {
                    return Err(StoreError::AlreadyExists {
                        account_id: account.id.to_string(),
                    });
                }
                Err(api_error(&err))
            },
        }
    }

    fn name(&self) -> &'static str {
        "iam-role"
    }
}

/// Trust policy for the control role: nobody may assume it, ever. The role
/// exists purely as a place to keep the description.
fn deny_all_trust_policy() -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Deny",
            "Principal": { "AWS": "*" },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

fn api_error<E: ProvideErrorMetadata>(err: &E) -> StoreError {
    StoreError::Api {
        code: err.code().unwrap_or("Unknown").to_string(),
        message: err.message().unwrap_or("no message provided").to_string(),
    }
}
