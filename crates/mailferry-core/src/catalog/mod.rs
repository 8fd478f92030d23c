//! Persistent catalog of accounts, mailboxes, and message identities.
//!
//! The catalog is what makes re-runs cheap and idempotent: a message
//! whose GUID is already recorded on both sides is never appended again.

mod model;
mod repository;

pub use model::{AccountId, MailboxId, MailboxRecord, MessageRecord};
pub use repository::Catalog;
