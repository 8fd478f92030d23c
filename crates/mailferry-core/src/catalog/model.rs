//! Catalog row types.

/// Row id of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId(pub i64);

/// Row id of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(pub i64);

/// A catalogued mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxRecord {
    /// Row id.
    pub id: MailboxId,
    /// Owning account.
    pub account_id: AccountId,
    /// Delimiter-normalized UTF-8 name.
    pub name: String,
    /// Hierarchy delimiter reported by the server.
    pub delim: Option<char>,
    /// Space-joined attribute list as received.
    pub attr: String,
    /// Subscription bit.
    pub subscribed: bool,
    /// Last-seen UIDVALIDITY.
    pub uidvalidity: Option<u32>,
    /// Next UID to enumerate from (last stored UID + 1).
    pub uidnext: Option<u32>,
}

/// A catalogued message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Owning mailbox.
    pub mailbox_id: MailboxId,
    /// Server UID, valid under the mailbox's UIDVALIDITY.
    pub uid: u32,
    /// Cross-server GUID.
    pub guid: String,
    /// Raw Message-ID header value, when present.
    pub message_id: Option<String>,
    /// RFC822.SIZE in octets.
    pub rfc822_size: u32,
    /// INTERNALDATE as Unix seconds.
    pub internal_date: i64,
    /// Comma-joined catalog flag string.
    pub flags: String,
}
