//! # mailferry-core
//!
//! The synchronization engine behind mailferry: the persistent catalog of
//! message identities, the incremental mailbox scan protocol, account
//! discovery, and the copy orchestration that converges a destination
//! IMAP account toward a source without duplicating mail.
//!
//! ## Modules
//!
//! - [`catalog`]: SQLite-backed record of accounts, mailboxes, and
//!   message GUIDs
//! - [`guid`]: deterministic cross-server message identity
//! - [`account`]: mailbox discovery and traversal order
//! - [`mailbox`]: per-mailbox scanning and message operations
//! - [`copier`]: the top-level driver and its counters
//! - [`config`]: YAML configuration sections
//! - [`exclude`]: mailbox exclusion filters

pub mod account;
pub mod catalog;
pub mod config;
pub mod copier;
mod error;
pub mod exclude;
pub mod guid;
pub mod mailbox;

pub use account::{Account, MailboxEntry};
pub use catalog::{AccountId, Catalog, MailboxId, MailboxRecord, MessageRecord};
pub use config::{ConfigFile, Section, Settings, SyncScope, Verbosity};
pub use copier::{Copier, CopyOptions, Counters, Stats};
pub use error::{Error, Result};
pub use exclude::ExcludeList;
pub use mailbox::{MailboxOptions, PulledMessage, SyncMailbox};
