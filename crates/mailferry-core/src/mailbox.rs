//! The unit of synchronization: one mailbox on one server.
//!
//! A [`SyncMailbox`] keeps the catalog in step with the server through
//! STATUS-driven incremental scans, and exposes the message operations
//! the copier needs (peek, append, flag store, delete, expunge).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use mailferry_imap::types::{Flag, Flags};
use mailferry_imap::{
    Envelope, FetchItem, FetchRecord, SessionPool, StatusAttr, StoreAction, UidSet,
};

use crate::account::{Account, MailboxEntry};
use crate::catalog::{Catalog, MailboxRecord, MessageRecord};
use crate::guid;
use crate::{Error, Result};

/// UIDs per header-enumeration FETCH.
const HEADER_BLOCK: u32 = 1024;

/// UIDs per flag-refresh FETCH.
const FLAG_BLOCK: u32 = 16384;

/// Minimum time between scans of one mailbox.
const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// A message in flight between two mailboxes. Lives for one copy.
#[derive(Debug, Clone)]
pub struct PulledMessage {
    /// Cross-server GUID (from the source catalog row).
    pub guid: String,
    /// Envelope, for logging.
    pub envelope: Option<Envelope>,
    /// Full RFC822 body.
    pub body: Vec<u8>,
    /// Source flags, unfiltered.
    pub flags: Flags,
    /// Source INTERNALDATE.
    pub internal_date: Option<DateTime<Utc>>,
}

/// Scan-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct MailboxOptions {
    /// Skip the Message-ID header fetch; GUIDs degrade to size+date.
    pub fast_scan: bool,
    /// Suppress every mutating command.
    pub dry_run: bool,
}

/// One mailbox under synchronization.
pub struct SyncMailbox {
    pool: Arc<SessionPool>,
    catalog: Arc<Catalog>,
    entry: MailboxEntry,
    record: MailboxRecord,
    options: MailboxOptions,
    last_scan: Option<Instant>,
    /// Refresh range has run once this process.
    refreshed: bool,
    /// Flags the server will accept, from the last EXAMINE.
    accepted_flags: Option<(Flags, bool)>,
    /// Set when the account stopped listing this mailbox.
    invalidated: bool,
}

impl SyncMailbox {
    /// Binds a discovered mailbox to its catalog row.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn open(account: &Account, entry: MailboxEntry, options: MailboxOptions) -> Result<Self> {
        let attr = entry
            .attributes
            .iter()
            .map(mailferry_imap::MailboxAttribute::as_wire)
            .collect::<Vec<_>>()
            .join(" ");
        let record = account
            .catalog()
            .upsert_mailbox(account.id(), &entry.name, entry.delim, &attr, entry.subscribed)
            .await?;
        Ok(Self {
            pool: account.pool(),
            catalog: account.catalog(),
            entry,
            record,
            options,
            last_scan: None,
            refreshed: false,
            accepted_flags: None,
            invalidated: false,
        })
    }

    /// Delimiter-normalized mailbox name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// The discovery entry this mailbox was built from.
    #[must_use]
    pub const fn entry(&self) -> &MailboxEntry {
        &self.entry
    }

    /// True when the mailbox rejects EXAMINE / SELECT.
    #[must_use]
    pub fn is_noselect(&self) -> bool {
        self.entry.is_noselect()
    }

    /// Marks the handle stale; every later operation fails.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    fn check_open(&self) -> Result<()> {
        if self.invalidated {
            return Err(Error::Imap(mailferry_imap::Error::MailboxClosed(
                self.entry.name.clone(),
            )));
        }
        Ok(())
    }

    /// Catalogued rows for this mailbox, UID-ordered.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn messages(&self) -> Result<Vec<MessageRecord>> {
        self.catalog.messages(self.record.id).await
    }

    /// Catalogued rows keyed by GUID.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn guids(&self) -> Result<HashMap<String, MessageRecord>> {
        self.catalog.messages_by_guid(self.record.id).await
    }

    /// Number of catalogued messages.
    ///
    /// # Errors
    ///
    /// Database errors.
    pub async fn message_count(&self) -> Result<u64> {
        self.catalog.message_count(self.record.id).await
    }

    // === Scan protocol ===

    /// Brings the catalog up to date with the server. Skipped when the
    /// last successful scan is under a minute old, and for Noselect
    /// containers.
    ///
    /// # Errors
    ///
    /// IMAP and database errors.
    pub async fn scan(&mut self) -> Result<()> {
        self.check_open()?;
        if self.is_noselect() {
            return Ok(());
        }
        if self.last_scan.is_some_and(|t| t.elapsed() < SCAN_INTERVAL) {
            return Ok(());
        }

        let raw = self.entry.raw.clone();
        let status = self
            .pool
            .with(Some(&self.entry.name), async |session| {
                session
                    .safely(async |client, quirks| {
                        client
                            .status(
                                &quirks.map_mailbox(&raw),
                                &[StatusAttr::Messages, StatusAttr::UidNext, StatusAttr::UidValidity],
                            )
                            .await
                    })
                    .await
            })
            .await?;

        let server_validity = status.uid_validity.unwrap_or(1);
        let server_uidnext = match status.uid_next {
            Some(n) => n,
            // Rare servers omit UIDNEXT from STATUS; a full re-open below
            // would report it, but MESSAGES+1 is a safe ceiling here.
            None => status.messages.unwrap_or(0) + 1,
        };

        if self.record.uidvalidity != Some(server_validity) {
            if self.record.uidvalidity.is_some() {
                info!(
                    mailbox = %self.entry.name,
                    old = ?self.record.uidvalidity,
                    new = server_validity,
                    "UIDVALIDITY changed; invalidating cached messages"
                );
            }
            self.catalog
                .reset_mailbox_validity(self.record.id, server_validity)
                .await?;
            self.record.uidvalidity = Some(server_validity);
            self.record.uidnext = None;
        }

        let start = self.record.uidnext.unwrap_or(1);
        let refresh_end = if self.refreshed { 0 } else { start.saturating_sub(1) };

        let pool = Arc::clone(&self.pool);
        let name = self.entry.name.clone();
        pool.with(Some(&name), async |session| {
            let info = session.examine(&raw).await?;
            self.accepted_flags = Some((info.accepted_flags(), info.accepts_new_keywords));

            if server_uidnext > start {
                self.enumerate_new(session, start, server_uidnext - 1).await?;
            }
            if refresh_end >= 1 {
                self.refresh_flags(session, refresh_end).await?;
            }
            Ok::<(), Error>(())
        })
        .await?;

        self.refreshed = true;
        self.last_scan = Some(Instant::now());
        Ok(())
    }

    /// Enumerates `start..=end` in header blocks, cataloguing each row
    /// and advancing the stored UIDNEXT after every block.
    async fn enumerate_new(
        &mut self,
        session: &mut mailferry_imap::Session,
        start: u32,
        end: u32,
    ) -> Result<()> {
        let mut items = vec![
            FetchItem::Uid,
            FetchItem::Rfc822Size,
            FetchItem::InternalDate,
            FetchItem::Flags,
        ];
        if !self.options.fast_scan {
            items.insert(1, FetchItem::header_fields(&["MESSAGE-ID"]));
        }

        let total = u64::from(end - start) + 1;
        let report_progress = total > u64::from(4 * HEADER_BLOCK);
        let mut seen: u64 = 0;
        let mut last_percent: u64 = 0;

        let mut block_start = start;
        while block_start <= end {
            let block_end = block_start.saturating_add(HEADER_BLOCK - 1).min(end);
            let set = UidSet::range(block_start, block_end);
            let rows = fetch_tolerant(session, &set, &items).await?;

            let mut records = Vec::with_capacity(rows.len());
            for row in &rows {
                if let Some(record) = self.row_to_record(row) {
                    records.push(record);
                }
            }
            let last_uid = records.iter().map(|r| r.uid).max();
            self.catalog.insert_messages(&records).await?;

            // Crash-resume point: everything below this UID is stored.
            let next = last_uid.map_or(block_end + 1, |uid| uid + 1);
            self.catalog.set_mailbox_uidnext(self.record.id, next).await?;
            self.record.uidnext = Some(next);

            seen += u64::from(block_end - block_start) + 1;
            if report_progress {
                let percent = seen * 100 / total;
                if percent > last_percent {
                    info!(mailbox = %self.entry.name, "scanned {percent}% ({seen}/{total})");
                    last_percent = percent;
                }
            }
            block_start = block_end + 1;
        }

        // The whole range enumerated; next run starts at the server's
        // UIDNEXT even if trailing UIDs were expunged server-side.
        let final_next = end + 1;
        if self.record.uidnext != Some(final_next) {
            self.catalog.set_mailbox_uidnext(self.record.id, final_next).await?;
            self.record.uidnext = Some(final_next);
        }
        Ok(())
    }

    /// Refreshes flags for `1..=refresh_end` and removes catalog rows the
    /// server no longer returns (expunged elsewhere).
    async fn refresh_flags(
        &mut self,
        session: &mut mailferry_imap::Session,
        refresh_end: u32,
    ) -> Result<()> {
        let catalogued = self.catalog.messages(self.record.id).await?;
        let in_range: Vec<&MessageRecord> = catalogued
            .iter()
            .filter(|r| r.uid <= refresh_end)
            .collect();
        if in_range.is_empty() {
            return Ok(());
        }

        let items = [FetchItem::Uid, FetchItem::Flags];
        let mut block_start = 1u32;
        while block_start <= refresh_end {
            let block_end = block_start.saturating_add(FLAG_BLOCK - 1).min(refresh_end);
            let set = UidSet::range(block_start, block_end);
            let rows = fetch_tolerant(session, &set, &items).await?;

            let server_flags: HashMap<u32, String> = rows
                .iter()
                .filter_map(|row| {
                    let uid = row.uid?;
                    let flags = row.flags.clone().unwrap_or_default();
                    Some((uid, flags.to_catalog()))
                })
                .collect();

            let mut expunged = Vec::new();
            for record in in_range
                .iter()
                .filter(|r| r.uid >= block_start && r.uid <= block_end)
            {
                match server_flags.get(&record.uid) {
                    Some(flags) if *flags != record.flags => {
                        self.catalog
                            .update_message_flags(self.record.id, record.uid, flags)
                            .await?;
                    }
                    Some(_) => {}
                    None => expunged.push(record.uid),
                }
            }
            if !expunged.is_empty() {
                debug!(
                    mailbox = %self.entry.name,
                    count = expunged.len(),
                    "removing catalog rows for expunged messages"
                );
                self.catalog.delete_messages(self.record.id, &expunged).await?;
            }
            block_start = block_end + 1;
        }
        Ok(())
    }

    fn row_to_record(&self, row: &FetchRecord) -> Option<MessageRecord> {
        let uid = row.uid?;
        let message_id = row
            .section("HEADER.FIELDS (MESSAGE-ID)")
            .and_then(guid::message_id_from_headers);
        let size = row.rfc822_size.unwrap_or(0);
        let internal_date = row.internal_date.map_or(0, |d| d.timestamp());
        let guid = guid::message_guid(message_id.as_deref(), size, internal_date);
        Some(MessageRecord {
            mailbox_id: self.record.id,
            uid,
            guid,
            message_id,
            rfc822_size: size,
            internal_date,
            flags: row.flags.clone().unwrap_or_default().to_catalog(),
        })
    }

    // === Message operations ===

    /// Peeks the full message for a catalog row. `Ok(None)` when the
    /// server no longer has the UID or refuses it in a tolerated way.
    ///
    /// # Errors
    ///
    /// IMAP errors not scoped to this one message.
    pub async fn fetch_message(&self, record: &MessageRecord) -> Result<Option<PulledMessage>> {
        self.check_open()?;
        let raw = self.entry.raw.clone();
        let uid = record.uid;
        let rows = self
            .pool
            .with(Some(&self.entry.name), async |session| {
                session.examine(&raw).await?;
                session
                    .safely(async |client, quirks| {
                        let items = [
                            FetchItem::Uid,
                            FetchItem::BodyPeek(String::new()),
                            FetchItem::Flags,
                            FetchItem::InternalDate,
                            FetchItem::Envelope,
                        ];
                        match client.uid_fetch(&UidSet::Single(uid), &items).await {
                            Err(mailferry_imap::Error::No(msg))
                                if quirks.tolerates_fetch_error(&msg) =>
                            {
                                warn!(uid, reason = %msg, "server refused FETCH; skipping message");
                                Ok(Vec::new())
                            }
                            other => other,
                        }
                    })
                    .await
            })
            .await?;

        let Some(row) = rows.into_iter().find(|r| r.uid == Some(uid)) else {
            return Ok(None);
        };
        let body = row.body().map(<[u8]>::to_vec).unwrap_or_default();
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(PulledMessage {
            guid: record.guid.clone(),
            envelope: row.envelope,
            body,
            flags: row.flags.unwrap_or_default(),
            internal_date: row.internal_date,
        }))
    }

    /// Appends a pulled message, filtering flags to what this mailbox
    /// accepts. Returns false when suppressed by dry-run.
    ///
    /// # Errors
    ///
    /// IMAP errors, including `MailboxNotFound` for a missing target.
    pub async fn append(&self, message: &PulledMessage) -> Result<bool> {
        self.check_open()?;
        let (flags, dropped) = self.filter_flags(&message.flags);
        if !dropped.is_empty() {
            warn!(
                mailbox = %self.entry.name,
                dropped = %dropped.iter().map(Flag::as_wire).collect::<Vec<_>>().join(" "),
                "dropping flags the destination does not accept"
            );
        }
        if self.options.dry_run {
            debug!(mailbox = %self.entry.name, guid = %message.guid, "dry-run: skipping APPEND");
            return Ok(false);
        }

        let raw = self.entry.raw.clone();
        let body = message.body.as_slice();
        let internal_date = message.internal_date;
        self.pool
            .with(Some(&self.entry.name), async |session| {
                session
                    .safely(async |client, quirks| {
                        client
                            .append(&quirks.map_mailbox(&raw), body, &flags, internal_date)
                            .await
                    })
                    .await
            })
            .await?;
        Ok(true)
    }

    /// Replaces a message's flags (`UID STORE FLAGS.SILENT`), filtered to
    /// what this mailbox accepts, and mirrors the result in the catalog.
    ///
    /// # Errors
    ///
    /// IMAP and database errors.
    pub async fn set_flags(&self, uid: u32, flags: &Flags) -> Result<()> {
        self.check_open()?;
        let (flags, dropped) = self.filter_flags(flags);
        if !dropped.is_empty() {
            warn!(
                mailbox = %self.entry.name,
                dropped = %dropped.iter().map(Flag::as_wire).collect::<Vec<_>>().join(" "),
                "dropping flags the destination does not accept"
            );
        }
        if self.options.dry_run {
            debug!(mailbox = %self.entry.name, uid, "dry-run: skipping STORE");
            return Ok(());
        }

        let raw = self.entry.raw.clone();
        let store_flags = flags.clone();
        self.pool
            .with(Some(&self.entry.name), async |session| {
                session.select(&raw).await?;
                session
                    .safely(async |client, _| {
                        client
                            .uid_store(
                                &UidSet::Single(uid),
                                StoreAction::Set(store_flags.clone()),
                                true,
                            )
                            .await
                    })
                    .await
            })
            .await?;
        self.catalog
            .update_message_flags(self.record.id, uid, &flags.to_catalog())
            .await?;
        Ok(())
    }

    /// Marks a message `\Deleted`, routing through the provider's trash
    /// when the quirks require it.
    ///
    /// # Errors
    ///
    /// IMAP and database errors.
    pub async fn mark_deleted(&self, record: &MessageRecord) -> Result<()> {
        self.check_open()?;
        if self.options.dry_run {
            debug!(mailbox = %self.entry.name, uid = record.uid, "dry-run: skipping delete");
            return Ok(());
        }

        let raw = self.entry.raw.clone();
        let uid = record.uid;
        self.pool
            .with(Some(&self.entry.name), async |session| {
                session.select(&raw).await?;
                session
                    .safely(async |client, quirks| {
                        if let Some(trash) = quirks.delete_via_trash() {
                            client.uid_copy(&UidSet::Single(uid), trash).await?;
                        }
                        client
                            .uid_store(
                                &UidSet::Single(uid),
                                StoreAction::Add(Flags::from_vec(vec![Flag::Deleted])),
                                true,
                            )
                            .await
                    })
                    .await
            })
            .await?;

        let mut flags = Flags::from_catalog(&record.flags);
        flags.insert(Flag::Deleted);
        self.catalog
            .update_message_flags(self.record.id, uid, &flags.to_catalog())
            .await?;
        Ok(())
    }

    /// Expunges `\Deleted` messages.
    ///
    /// # Errors
    ///
    /// IMAP errors.
    pub async fn expunge(&self) -> Result<()> {
        self.check_open()?;
        if self.options.dry_run {
            debug!(mailbox = %self.entry.name, "dry-run: skipping EXPUNGE");
            return Ok(());
        }
        let raw = self.entry.raw.clone();
        let removed = self
            .pool
            .with(Some(&self.entry.name), async |session| {
                session.select(&raw).await?;
                session
                    .safely(async |client, _| client.expunge().await)
                    .await
            })
            .await?;
        if !removed.is_empty() {
            info!(mailbox = %self.entry.name, count = removed.len(), "expunged messages");
        }
        Ok(())
    }

    /// Subscribes (or unsubscribes) and records the bit.
    ///
    /// # Errors
    ///
    /// IMAP and database errors.
    pub async fn set_subscribed(&mut self, subscribed: bool) -> Result<()> {
        self.check_open()?;
        if self.options.dry_run {
            debug!(mailbox = %self.entry.name, subscribed, "dry-run: skipping subscription change");
            return Ok(());
        }
        let raw = self.entry.raw.clone();
        self.pool
            .with(Some(&self.entry.name), async |session| {
                session
                    .safely(async |client, quirks| {
                        let name = quirks.map_mailbox(&raw);
                        if subscribed {
                            client.subscribe(&name).await
                        } else {
                            client.unsubscribe(&name).await
                        }
                    })
                    .await
            })
            .await?;
        self.catalog
            .set_mailbox_subscribed(self.record.id, subscribed)
            .await?;
        self.entry.subscribed = subscribed;
        Ok(())
    }

    fn filter_flags(&self, flags: &Flags) -> (Flags, Vec<Flag>) {
        match &self.accepted_flags {
            Some((accepted, star)) => flags.filtered_for(accepted, *star),
            // Never examined (e.g. just created): only \Recent is known
            // to be unappendable.
            None => {
                let kept: Flags = flags
                    .iter()
                    .filter(|f| **f != Flag::Recent)
                    .cloned()
                    .collect();
                (kept, Vec::new())
            }
        }
    }
}

/// UID FETCH with the Gmail partial-failure quirk applied.
async fn fetch_tolerant(
    session: &mut mailferry_imap::Session,
    set: &UidSet,
    items: &[FetchItem],
) -> Result<Vec<FetchRecord>> {
    let records = session
        .safely(async |client, quirks| {
            match client.uid_fetch(set, items).await {
                Err(mailferry_imap::Error::No(msg)) if quirks.tolerates_fetch_error(&msg) => {
                    warn!(range = %set, reason = %msg, "server refused FETCH; continuing");
                    Ok(Vec::new())
                }
                other => other,
            }
        })
        .await?;
    Ok(records)
}
