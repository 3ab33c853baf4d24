//! Resolution of the calling principal.
//!
//! Two things need to know who is asking: allocation uses the caller as
//! its default owner token, and the filter language substitutes it for
//! the owner value `me`. The token is opaque to the control plane; it
//! only ever participates in equality checks against record owners.

use async_trait::async_trait;
use thiserror::Error;

/// Error raised by [`CallerIdentity::whoami`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The identity service rejected or failed the request.
    #[error("caller identity request failed with {code}: {message}")]
    Api {
        /// Service error code.
        code: String,
        /// Service-provided message.
        message: String,
    },

    /// The response held nothing usable as an identity token.
    #[error("caller identity could not be determined: {message}")]
    Unresolved {
        /// What was missing or malformed.
        message: String,
    },
}

/// Answers "who is running this tool".
#[async_trait]
pub trait CallerIdentity: Send + Sync {
    /// Returns the short token naming the calling principal. Never empty
    /// on success; an empty owner token means "free" everywhere else in
    /// this crate.
    async fn whoami(&self) -> Result<String, IdentityError>;

    /// Short implementation name for log lines.
    fn name(&self) -> &'static str;
}

/// Fixed identity, for tests and for callers that pass an explicit owner
/// token instead of resolving one.
pub struct StaticCaller {
    identity: String,
}

impl StaticCaller {
    /// Creates a resolver that always answers `identity`.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

#[async_trait]
impl CallerIdentity for StaticCaller {
    async fn whoami(&self) -> Result<String, IdentityError> {
        if self.identity.is_empty() {
            return Err(IdentityError::Unresolved {
                message: "static identity is empty".to_string(),
            });
        }
        Ok(self.identity.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
