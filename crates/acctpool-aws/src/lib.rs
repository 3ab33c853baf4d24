//! acctpool-aws - AWS implementations of the acctpool boundary traits.
//!
//! `acctpool-core` talks to three collaborators through traits: a control
//! store holding each account's record, a directory enumerating the fleet,
//! and a resolver for the calling principal. This crate binds those seams
//! to AWS:
//!
//! - [`RoleControlStore`]: the control record lives in the description of a
//!   designated IAM role inside each account. The role's trust policy
//!   denies all assumption, so the slot that describes access can never
//!   grant it.
//! - [`OrgAccountDirectory`]: the fleet roster comes from the
//!   Organizations `ListAccounts` API.
//! - [`StsCallerIdentity`]: the caller token is derived from the STS
//!   caller identity ARN.
//!
//! Credential bootstrap is the caller's problem: every type here takes
//! already-configured SDK clients. The control store additionally needs a
//! client *per account* (an IAM client is bound to one account's
//! credentials), which is what the [`RoleClientSource`] seam is for.

pub mod caller;
pub mod control_store;
pub mod directory;

pub use caller::StsCallerIdentity;
pub use control_store::{FixedRoleClients, RoleClientSource, RoleControlStore};
pub use directory::OrgAccountDirectory;
