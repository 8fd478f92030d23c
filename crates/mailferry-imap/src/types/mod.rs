//! Core IMAP types shared across the crate.

mod flags;
mod mailbox;
mod sequence;

pub use flags::{Flag, Flags};
pub use mailbox::{ListItem, MailboxAttribute, SelectInfo, StatusInfo};
pub use sequence::UidSet;
