//! SQLite-backed catalog repository.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::model::{AccountId, MailboxId, MailboxRecord, MessageRecord};
use crate::Result;

/// Current on-disk schema version.
const SCHEMA_VERSION: i64 = 1;

/// Accounts untouched for this long are pruned after a run.
const STALE_ACCOUNT_SECS: i64 = 30 * 24 * 60 * 60;

/// The local record of accounts, mailboxes, and message identities.
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if needed) the catalog at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// In-memory catalog for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS schema_info (version INTEGER NOT NULL)",
        )
        .execute(&self.pool)
        .await?;

        let version: Option<i64> = sqlx::query_scalar(r"SELECT version FROM schema_info")
            .fetch_optional(&self.pool)
            .await?;

        if version.is_none() {
            self.create_schema().await?;
            sqlx::query(r"INSERT INTO schema_info (version) VALUES (?)")
                .bind(SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hostname TEXT NOT NULL,
                username TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(hostname, username)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mailboxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                delim TEXT,
                attr TEXT NOT NULL DEFAULT '',
                subscribed INTEGER NOT NULL DEFAULT 0,
                uidvalidity INTEGER,
                uidnext INTEGER,
                UNIQUE(account_id, name, uidvalidity)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mailbox_id INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                guid TEXT NOT NULL,
                message_id TEXT,
                rfc822_size INTEGER NOT NULL,
                internaldate INTEGER NOT NULL,
                flags TEXT NOT NULL DEFAULT '',
                UNIQUE(mailbox_id, uid)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(r"CREATE INDEX IF NOT EXISTS idx_messages_guid ON messages(guid)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r"CREATE INDEX IF NOT EXISTS idx_mailboxes_account ON mailboxes(account_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // === Accounts ===

    /// Finds or creates the account row, touching `updated_at`.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn upsert_account(&self, hostname: &str, username: &str) -> Result<AccountId> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r"
            INSERT INTO accounts (hostname, username, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(hostname, username) DO UPDATE SET updated_at = excluded.updated_at
            ",
        )
        .bind(hostname)
        .bind(username)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar(
            r"SELECT id FROM accounts WHERE hostname = ? AND username = ?",
        )
        .bind(hostname)
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(AccountId(id))
    }

    /// Post-run maintenance: removes accounts untouched for 30 days,
    /// together with their mailboxes and messages.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn prune_stale_accounts(&self) -> Result<u64> {
        let cutoff = Utc::now().timestamp() - STALE_ACCOUNT_SECS;
        let stale: Vec<i64> =
            sqlx::query_scalar(r"SELECT id FROM accounts WHERE updated_at < ?")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        for account_id in &stale {
            sqlx::query(
                r"DELETE FROM messages WHERE mailbox_id IN
                  (SELECT id FROM mailboxes WHERE account_id = ?)",
            )
            .bind(account_id)
            .execute(&self.pool)
            .await?;
            sqlx::query(r"DELETE FROM mailboxes WHERE account_id = ?")
                .bind(account_id)
                .execute(&self.pool)
                .await?;
            sqlx::query(r"DELETE FROM accounts WHERE id = ?")
                .bind(account_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(stale.len() as u64)
    }

    // === Mailboxes ===

    /// Finds or creates a mailbox row, refreshing delimiter, attributes,
    /// and subscription. UIDVALIDITY and UIDNEXT are left alone.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn upsert_mailbox(
        &self,
        account_id: AccountId,
        name: &str,
        delim: Option<char>,
        attr: &str,
        subscribed: bool,
    ) -> Result<MailboxRecord> {
        // NULL UIDVALIDITY rows never hit the UNIQUE constraint (SQLite
        // treats NULLs as distinct), so upsert by explicit lookup.
        let delim_text = delim.map(String::from);
        if let Some(existing) = self.mailbox(account_id, name).await? {
            sqlx::query(
                r"UPDATE mailboxes SET delim = ?, attr = ?, subscribed = ? WHERE id = ?",
            )
            .bind(&delim_text)
            .bind(attr)
            .bind(subscribed)
            .bind(existing.id.0)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r"
                INSERT INTO mailboxes (account_id, name, delim, attr, subscribed)
                VALUES (?, ?, ?, ?, ?)
                ",
            )
            .bind(account_id.0)
            .bind(name)
            .bind(&delim_text)
            .bind(attr)
            .bind(subscribed)
            .execute(&self.pool)
            .await?;
        }

        self.mailbox(account_id, name)
            .await?
            .ok_or_else(|| sqlx::Error::RowNotFound.into())
    }

    /// Looks a mailbox up by name.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn mailbox(
        &self,
        account_id: AccountId,
        name: &str,
    ) -> Result<Option<MailboxRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, account_id, name, delim, attr, subscribed, uidvalidity, uidnext
            FROM mailboxes WHERE account_id = ? AND name = ?
            ORDER BY uidvalidity DESC LIMIT 1
            ",
        )
        .bind(account_id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| mailbox_from_row(&row)))
    }

    /// Records a new UIDVALIDITY for a mailbox and drops every cached
    /// message row: under a new UIDVALIDITY all UIDs are new.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn reset_mailbox_validity(
        &self,
        mailbox_id: MailboxId,
        uidvalidity: u32,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r"DELETE FROM messages WHERE mailbox_id = ?")
            .bind(mailbox_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r"UPDATE mailboxes SET uidvalidity = ?, uidnext = NULL WHERE id = ?")
            .bind(uidvalidity)
            .bind(mailbox_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Advances the stored UIDNEXT (crash-resume point).
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn set_mailbox_uidnext(&self, mailbox_id: MailboxId, uidnext: u32) -> Result<()> {
        sqlx::query(r"UPDATE mailboxes SET uidnext = ? WHERE id = ?")
            .bind(uidnext)
            .bind(mailbox_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Updates the subscription bit.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn set_mailbox_subscribed(
        &self,
        mailbox_id: MailboxId,
        subscribed: bool,
    ) -> Result<()> {
        sqlx::query(r"UPDATE mailboxes SET subscribed = ? WHERE id = ?")
            .bind(subscribed)
            .bind(mailbox_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes mailboxes (and their messages) that the server no longer
    /// lists. `listed` holds the delimiter-normalized names that exist.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn remove_unlisted_mailboxes(
        &self,
        account_id: AccountId,
        listed: &HashSet<String>,
    ) -> Result<u64> {
        let rows = sqlx::query(r"SELECT id, name FROM mailboxes WHERE account_id = ?")
            .bind(account_id.0)
            .fetch_all(&self.pool)
            .await?;

        let mut removed = 0;
        for row in rows {
            let name: String = row.get("name");
            if listed.contains(&name) {
                continue;
            }
            let id: i64 = row.get("id");
            sqlx::query(r"DELETE FROM messages WHERE mailbox_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            sqlx::query(r"DELETE FROM mailboxes WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    // === Messages ===

    /// Inserts one scan block of message rows in a single transaction.
    /// Existing (mailbox, uid) rows are replaced.
    ///
    /// # Errors
    ///
    /// Database errors roll the whole block back.
    pub async fn insert_messages(&self, records: &[MessageRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r"
                INSERT INTO messages
                    (mailbox_id, uid, guid, message_id, rfc822_size, internaldate, flags)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(mailbox_id, uid) DO UPDATE SET
                    guid = excluded.guid,
                    message_id = excluded.message_id,
                    rfc822_size = excluded.rfc822_size,
                    internaldate = excluded.internaldate,
                    flags = excluded.flags
                ",
            )
            .bind(record.mailbox_id.0)
            .bind(record.uid)
            .bind(&record.guid)
            .bind(&record.message_id)
            .bind(record.rfc822_size)
            .bind(record.internal_date)
            .bind(&record.flags)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Rewrites the flag string of one message.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn update_message_flags(
        &self,
        mailbox_id: MailboxId,
        uid: u32,
        flags: &str,
    ) -> Result<()> {
        sqlx::query(r"UPDATE messages SET flags = ? WHERE mailbox_id = ? AND uid = ?")
            .bind(flags)
            .bind(mailbox_id.0)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes messages by UID (server-side expunge observed).
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn delete_messages(&self, mailbox_id: MailboxId, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for uid in uids {
            sqlx::query(r"DELETE FROM messages WHERE mailbox_id = ? AND uid = ?")
                .bind(mailbox_id.0)
                .bind(uid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Every message row for a mailbox, UID-ordered.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn messages(&self, mailbox_id: MailboxId) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT mailbox_id, uid, guid, message_id, rfc822_size, internaldate, flags
            FROM messages WHERE mailbox_id = ? ORDER BY uid
            ",
        )
        .bind(mailbox_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Message rows keyed by GUID. Under GUID collisions (identical
    /// ID-less messages) the first UID wins.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn messages_by_guid(
        &self,
        mailbox_id: MailboxId,
    ) -> Result<HashMap<String, MessageRecord>> {
        let mut map = HashMap::new();
        for record in self.messages(mailbox_id).await? {
            map.entry(record.guid.clone()).or_insert(record);
        }
        Ok(map)
    }

    /// Number of catalogued messages in a mailbox.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn message_count(&self, mailbox_id: MailboxId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar(r"SELECT COUNT(*) FROM messages WHERE mailbox_id = ?")
                .bind(mailbox_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

fn mailbox_from_row(row: &sqlx::sqlite::SqliteRow) -> MailboxRecord {
    let delim: Option<String> = row.get("delim");
    MailboxRecord {
        id: MailboxId(row.get("id")),
        account_id: AccountId(row.get("account_id")),
        name: row.get("name"),
        delim: delim.and_then(|d| d.chars().next()),
        attr: row.get("attr"),
        subscribed: row.get("subscribed"),
        uidvalidity: row.get("uidvalidity"),
        uidnext: row.get("uidnext"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> MessageRecord {
    MessageRecord {
        mailbox_id: MailboxId(row.get("mailbox_id")),
        uid: row.get("uid"),
        guid: row.get("guid"),
        message_id: row.get("message_id"),
        rfc822_size: row.get("rfc822_size"),
        internal_date: row.get("internaldate"),
        flags: row.get("flags"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(mailbox_id: MailboxId, uid: u32, guid: &str) -> MessageRecord {
        MessageRecord {
            mailbox_id,
            uid,
            guid: guid.to_string(),
            message_id: Some(format!("<{guid}@example.com>")),
            rfc822_size: 1000 + uid,
            internal_date: 1_700_000_000 + i64::from(uid),
            flags: "Seen".to_string(),
        }
    }

    #[tokio::test]
    async fn account_upsert_is_stable() {
        let catalog = Catalog::in_memory().await.unwrap();
        let a = catalog.upsert_account("mail.example.com", "user").await.unwrap();
        let b = catalog.upsert_account("mail.example.com", "user").await.unwrap();
        assert_eq!(a, b);
        let c = catalog.upsert_account("mail.example.com", "other").await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn mailbox_upsert_preserves_uid_state() {
        let catalog = Catalog::in_memory().await.unwrap();
        let account = catalog.upsert_account("h", "u").await.unwrap();
        let mb = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "", false)
            .await
            .unwrap();
        catalog.reset_mailbox_validity(mb.id, 7).await.unwrap();
        catalog.set_mailbox_uidnext(mb.id, 100).await.unwrap();

        // A later discovery pass must not clobber scan state.
        let again = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "\\HasChildren", true)
            .await
            .unwrap();
        assert_eq!(again.id, mb.id);
        assert_eq!(again.uidvalidity, Some(7));
        assert_eq!(again.uidnext, Some(100));
        assert!(again.subscribed);
    }

    #[tokio::test]
    async fn validity_reset_drops_messages() {
        let catalog = Catalog::in_memory().await.unwrap();
        let account = catalog.upsert_account("h", "u").await.unwrap();
        let mb = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "", false)
            .await
            .unwrap();
        catalog.reset_mailbox_validity(mb.id, 1).await.unwrap();

        let rows: Vec<MessageRecord> = (1..=50).map(|uid| record(mb.id, uid, &format!("g{uid}"))).collect();
        catalog.insert_messages(&rows).await.unwrap();
        assert_eq!(catalog.message_count(mb.id).await.unwrap(), 50);

        catalog.reset_mailbox_validity(mb.id, 2).await.unwrap();
        assert_eq!(catalog.message_count(mb.id).await.unwrap(), 0);
        let mb = catalog.mailbox(account, "INBOX").await.unwrap().unwrap();
        assert_eq!(mb.uidvalidity, Some(2));
        assert_eq!(mb.uidnext, None);
    }

    #[tokio::test]
    async fn message_rows_round_trip() {
        let catalog = Catalog::in_memory().await.unwrap();
        let account = catalog.upsert_account("h", "u").await.unwrap();
        let mb = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "", false)
            .await
            .unwrap();

        catalog
            .insert_messages(&[record(mb.id, 3, "g3"), record(mb.id, 1, "g1")])
            .await
            .unwrap();
        let rows = catalog.messages(mb.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].uid, 1); // UID-ordered
        assert_eq!(rows[1].guid, "g3");

        catalog.update_message_flags(mb.id, 1, "Answered,Seen").await.unwrap();
        let by_guid = catalog.messages_by_guid(mb.id).await.unwrap();
        assert_eq!(by_guid["g1"].flags, "Answered,Seen");

        catalog.delete_messages(mb.id, &[1]).await.unwrap();
        assert_eq!(catalog.message_count(mb.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unlisted_mailboxes_are_removed() {
        let catalog = Catalog::in_memory().await.unwrap();
        let account = catalog.upsert_account("h", "u").await.unwrap();
        let keep = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "", false)
            .await
            .unwrap();
        let drop_me = catalog
            .upsert_mailbox(account, "Old", Some('/'), "", false)
            .await
            .unwrap();
        catalog.insert_messages(&[record(drop_me.id, 1, "x")]).await.unwrap();

        let listed: HashSet<String> = ["INBOX".to_string()].into_iter().collect();
        let removed = catalog.remove_unlisted_mailboxes(account, &listed).await.unwrap();
        assert_eq!(removed, 1);
        assert!(catalog.mailbox(account, "Old").await.unwrap().is_none());
        assert!(catalog.mailbox(account, "INBOX").await.unwrap().is_some());
        assert_eq!(catalog.message_count(keep.id).await.unwrap(), 0);
        assert_eq!(catalog.message_count(drop_me.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn guid_collisions_keep_first_uid() {
        let catalog = Catalog::in_memory().await.unwrap();
        let account = catalog.upsert_account("h", "u").await.unwrap();
        let mb = catalog
            .upsert_mailbox(account, "INBOX", Some('/'), "", false)
            .await
            .unwrap();
        let mut a = record(mb.id, 1, "same");
        let mut b = record(mb.id, 2, "same");
        a.message_id = None;
        b.message_id = None;
        catalog.insert_messages(&[a, b]).await.unwrap();

        let by_guid = catalog.messages_by_guid(mb.id).await.unwrap();
        assert_eq!(by_guid.len(), 1);
        assert_eq!(by_guid["same"].uid, 1);
    }
}
