//! Server-side account: mailbox discovery and traversal order.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use mailferry_imap::types::{ListItem, MailboxAttribute};
use mailferry_imap::{SessionPool, utf7};

use crate::catalog::{AccountId, Catalog};
use crate::Result;

/// A mailbox as discovered on the server, names already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxEntry {
    /// Delimiter-normalized name (`/` between levels, `INBOX` canonical).
    pub name: String,
    /// UTF-8 name still using the server's delimiter.
    pub raw: String,
    /// The server's hierarchy delimiter.
    pub delim: Option<char>,
    /// LIST attributes.
    pub attributes: Vec<MailboxAttribute>,
    /// Present in the LSUB listing.
    pub subscribed: bool,
}

impl MailboxEntry {
    fn from_list_item(item: &ListItem, subscribed: bool) -> Self {
        let raw = canonicalize_inbox(&utf7::decode(&item.raw_name));
        let name = normalize_name(&raw, item.delimiter);
        Self {
            name,
            raw,
            delim: item.delimiter,
            attributes: item.attributes.clone(),
            subscribed,
        }
    }

    /// True when the mailbox cannot be opened (container only).
    #[must_use]
    pub fn is_noselect(&self) -> bool {
        self.attributes.contains(&MailboxAttribute::Noselect)
    }

    /// True when children may exist below this mailbox.
    #[must_use]
    pub fn may_have_children(&self) -> bool {
        !self.attributes.contains(&MailboxAttribute::Noinferiors)
            && !self.attributes.contains(&MailboxAttribute::Hasnochildren)
    }
}

/// One account on one server, backed by a session pool.
pub struct Account {
    pool: Arc<SessionPool>,
    catalog: Arc<Catalog>,
    account_id: AccountId,
}

impl Account {
    /// Registers the account in the catalog and wires it to a pool.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn open(pool: Arc<SessionPool>, catalog: Arc<Catalog>) -> Result<Self> {
        let uri = pool.uri().clone();
        let account_id = catalog.upsert_account(&uri.host, &uri.username).await?;
        Ok(Self { pool, catalog, account_id })
    }

    /// The catalog id of this account.
    #[must_use]
    pub const fn id(&self) -> AccountId {
        self.account_id
    }

    /// The pool this account connects through.
    #[must_use]
    pub fn pool(&self) -> Arc<SessionPool> {
        Arc::clone(&self.pool)
    }

    /// The catalog this account records into.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Lists every mailbox (`LIST "" "*"`), marks the subscribed subset
    /// (`LSUB "" "*"`), prunes catalog rows the server no longer lists,
    /// and returns entries in traversal order.
    ///
    /// # Errors
    ///
    /// IMAP and database errors.
    pub async fn discover_all(&self) -> Result<Vec<MailboxEntry>> {
        let (listed, subscribed) = self
            .pool
            .with(None, async |session| {
                session
                    .safely(async |client, _| {
                        let listed = client.list("", "*").await?;
                        let subscribed = client.lsub("", "*").await?;
                        Ok((listed, subscribed))
                    })
                    .await
            })
            .await?;

        let subscribed_names: HashSet<String> = subscribed
            .iter()
            .map(|item| canonicalize_inbox(&utf7::decode(&item.raw_name)))
            .collect();

        let mut entries: Vec<MailboxEntry> = listed
            .iter()
            .map(|item| {
                let entry = MailboxEntry::from_list_item(item, false);
                let subscribed = subscribed_names.contains(&entry.raw);
                MailboxEntry { subscribed, ..entry }
            })
            .collect();
        sort_for_traversal(&mut entries);

        let names: HashSet<String> = entries.iter().map(|e| e.name.clone()).collect();
        let removed = self
            .catalog
            .remove_unlisted_mailboxes(self.account_id, &names)
            .await?;
        if removed > 0 {
            debug!(removed, "dropped catalog rows for unlisted mailboxes");
        }

        Ok(entries)
    }

    /// Looks up a single mailbox by its delimiter-normalized name.
    ///
    /// # Errors
    ///
    /// IMAP errors; `Ok(None)` when the server does not list it.
    pub async fn find(&self, name: &str) -> Result<Option<MailboxEntry>> {
        // Ask with the canonical '/' delimiter first, then retranslate
        // once the server's delimiter is known from the response.
        let pattern = utf7::encode(name);
        let rows = self
            .pool
            .with(None, async |session| {
                session
                    .safely(async |client, quirks| {
                        client.list("", &quirks.map_mailbox(&pattern)).await
                    })
                    .await
            })
            .await?;
        if let Some(item) = rows.first() {
            return Ok(Some(MailboxEntry::from_list_item(item, false)));
        }

        // The name may use '/' while the server uses another delimiter.
        let delim = self.server_delimiter().await?;
        if let Some(delim) = delim {
            if delim != '/' && name.contains('/') {
                let translated = name.replace('/', &delim.to_string());
                let pattern = utf7::encode(&translated);
                let rows = self
                    .pool
                    .with(None, async |session| {
                        session
                            .safely(async |client, quirks| {
                                client.list("", &quirks.map_mailbox(&pattern)).await
                            })
                            .await
                    })
                    .await?;
                return Ok(rows.first().map(|item| MailboxEntry::from_list_item(item, false)));
            }
        }
        Ok(None)
    }

    /// One level of children below `parent`, requested with `%`.
    ///
    /// # Errors
    ///
    /// IMAP errors.
    pub async fn children(&self, parent: &MailboxEntry) -> Result<Vec<MailboxEntry>> {
        if !parent.may_have_children() {
            return Ok(Vec::new());
        }
        let Some(delim) = parent.delim else {
            return Ok(Vec::new());
        };
        let pattern = format!("{}{delim}%", utf7::encode(&parent.raw));
        let rows = self
            .pool
            .with(None, async |session| {
                session
                    .safely(async |client, _| client.list("", &pattern).await)
                    .await
            })
            .await?;

        let mut entries: Vec<MailboxEntry> = rows
            .iter()
            .map(|item| MailboxEntry::from_list_item(item, parent.subscribed))
            .filter(|child| child.raw != parent.raw)
            .collect();
        sort_for_traversal(&mut entries);
        Ok(entries)
    }

    /// The server's hierarchy delimiter, from `LIST "" ""`.
    ///
    /// # Errors
    ///
    /// IMAP errors.
    pub async fn server_delimiter(&self) -> Result<Option<char>> {
        let rows = self
            .pool
            .with(None, async |session| {
                session
                    .safely(async |client, _| client.list("", "").await)
                    .await
            })
            .await?;
        Ok(rows.first().and_then(|item| item.delimiter))
    }
}

/// `inbox` in any case is the same mailbox; catalog it as `INBOX`.
fn canonicalize_inbox(name: &str) -> String {
    if name.eq_ignore_ascii_case("INBOX") {
        "INBOX".to_string()
    } else {
        name.to_string()
    }
}

/// Rewrites the server delimiter to the canonical `/`.
fn normalize_name(raw: &str, delim: Option<char>) -> String {
    match delim {
        Some(d) if d != '/' => raw.replace(d, "/"),
        _ => raw.to_string(),
    }
}

/// Case-insensitive name order, except INBOX always sorts first.
fn sort_for_traversal(entries: &mut [MailboxEntry]) {
    entries.sort_by(|a, b| {
        let a_inbox = a.name.eq_ignore_ascii_case("INBOX");
        let b_inbox = b.name.eq_ignore_ascii_case("INBOX");
        b_inbox
            .cmp(&a_inbox)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(name: &str) -> MailboxEntry {
        MailboxEntry {
            name: name.to_string(),
            raw: name.to_string(),
            delim: Some('/'),
            attributes: Vec::new(),
            subscribed: false,
        }
    }

    #[test]
    fn inbox_sorts_first_case_insensitively() {
        let mut entries = vec![entry("Archive"), entry("Work"), entry("inbox"), entry("drafts")];
        sort_for_traversal(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["inbox", "Archive", "drafts", "Work"]);
    }

    #[test]
    fn inbox_is_canonicalized() {
        assert_eq!(canonicalize_inbox("inbox"), "INBOX");
        assert_eq!(canonicalize_inbox("Inbox"), "INBOX");
        assert_eq!(canonicalize_inbox("INBOX"), "INBOX");
        assert_eq!(canonicalize_inbox("Inbox2"), "Inbox2");
    }

    #[test]
    fn names_are_delimiter_normalized() {
        assert_eq!(normalize_name("Work.Projects", Some('.')), "Work/Projects");
        assert_eq!(normalize_name("Work/Projects", Some('/')), "Work/Projects");
        assert_eq!(normalize_name("Flat", None), "Flat");
    }

    #[test]
    fn list_item_decoding() {
        let item = ListItem {
            raw_name: "&UYYwsDDpMNWCbzBEMGcwWQ-".to_string(),
            delimiter: Some('.'),
            attributes: vec![MailboxAttribute::Hasnochildren],
        };
        let entry = MailboxEntry::from_list_item(&item, true);
        assert_eq!(entry.raw, "円グラフ良いです");
        assert_eq!(entry.name, "円グラフ良いです");
        assert!(entry.subscribed);
        assert!(!entry.may_have_children());
    }

    #[test]
    fn noselect_gates_opening() {
        let item = ListItem {
            raw_name: "Parent".to_string(),
            delimiter: Some('/'),
            attributes: vec![MailboxAttribute::Noselect],
        };
        let entry = MailboxEntry::from_list_item(&item, false);
        assert!(entry.is_noselect());
        assert!(entry.may_have_children());
    }
}
