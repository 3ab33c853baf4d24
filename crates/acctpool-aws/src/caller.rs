//! Caller identity from STS.
//!
//! The owner token written into control records is the final segment of
//! the caller's ARN: the user name for IAM users, the session name for
//! assumed roles. Short, stable per caller, and recognizable to a human
//! reading a record, which is all the control plane asks of it.

use acctpool_core::caller::{CallerIdentity, IdentityError};
use async_trait::async_trait;
use aws_sdk_sts::error::ProvideErrorMetadata;
use aws_sdk_sts::Client;

/// [`CallerIdentity`] backed by the STS `GetCallerIdentity` API.
pub struct StsCallerIdentity {
    client: Client,
}

impl StsCallerIdentity {
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
impl CallerIdentity for StsCallerIdentity {
    async fn whoami(&self) -> Result<String, IdentityError> {
        let resp = self.client.get_caller_identity().send().await.map_err(|err| {
            let err = err.into_service_error();
            IdentityError::Api {
                code: err.code().unwrap_or("Unknown").to_string(),
                message: err.message().unwrap_or("no message provided").to_string(),
            }
        })?;
        let arn = resp.arn().ok_or_else(|| IdentityError::Unresolved {
            message: "caller identity response carried no ARN".to_string(),
        })?;
        principal_from_arn(arn).ok_or_else(|| IdentityError::Unresolved {
            message: format!("cannot derive a principal token from ARN {arn:?}"),
        })
    }

    fn name(&self) -> &'static str {
        "sts"
    }
}

/// Extracts the owner token from a caller ARN: the segment after the last
/// `/`, or after the last `:` for resource types without a path (`root`).
fn principal_from_arn(arn: &str) -> Option<String> {
    let tail = match arn.rsplit_once('/') {
        Some((_, tail)) => tail,
        None => arn.rsplit_once(':')?.1,
    };
    if tail.is_empty() {
        return None;
    }
    Some(tail.to_string())
}
