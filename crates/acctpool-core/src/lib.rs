//! acctpool-core - Shared Account Pool Control Plane
//!
//! This library implements the control plane for a pool of cloud accounts
//! shared by integration-test jobs and developers. Each account carries a
//! small control record (description, owner, tags) persisted in a designated
//! metadata slot inside the account itself; this crate owns the record
//! format, the optimistic-concurrency save protocol, and the allocation and
//! filtering layers built on top of it.
//!
//! The backing store, the account directory, and the caller identity are
//! abstracted behind traits so the control plane can run against a real
//! cloud provider or entirely in memory. Production implementations live in
//! the companion `acctpool-aws` crate.
//!
//! # Modules
//!
//! - [`record`]: the control record type and its versioned wire codec
//! - [`merge`]: three-way merge of concurrent record edits
//! - [`store`]: the [`store::ControlStore`] trait plus an in-memory
//!   implementation for tests
//! - [`account`]: account identities, per-account handles, and ordered
//!   account sets
//! - [`batch`]: bounded-concurrency batch execution over account sets
//! - [`control`]: per-account save/refresh/init operations and their batch
//!   counterparts
//! - [`alloc`]: claiming accounts out of the free pool and releasing them
//! - [`filter`]: the account selection mini-language (IDs, names, tag
//!   expressions)
//! - [`directory`]: enumeration of the accounts that make up the pool
//! - [`caller`]: resolution of the calling principal for `owner=me` filters
//! - [`config`]: TOML-backed settings for the allocator and the control
//!   object layout

pub mod account;
pub mod alloc;
pub mod batch;
pub mod caller;
pub mod config;
pub mod control;
pub mod directory;
pub mod filter;
pub mod merge;
pub mod record;
pub mod store;
