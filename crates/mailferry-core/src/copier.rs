//! Top-level copy orchestration.
//!
//! The copier walks source mailboxes in traversal order, pairs each with
//! a destination mailbox, scans both against the catalog, and copies the
//! messages whose GUID the destination lacks. Within one mailbox the
//! source peek and destination append run concurrently over a bounded
//! channel.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mailferry_imap::types::Flags;
use mailferry_imap::Error as ImapError;

use crate::account::{Account, MailboxEntry};
use crate::catalog::MessageRecord;
use crate::config::SyncScope;
use crate::exclude::ExcludeList;
use crate::mailbox::{MailboxOptions, PulledMessage, SyncMailbox};
use crate::{Error, Result};

/// In-flight messages buffered between peek and append.
const CHANNEL_CAPACITY: usize = 8;

/// A producer or consumer silent for this long is considered stalled.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Options steering one copy run.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Descend into child folders.
    pub recursive: bool,
    /// Create missing destination folders.
    pub create_folders: bool,
    /// Only copy subscribed folders.
    pub subscribed_only: bool,
    /// Mark source messages deleted once present at the destination.
    pub delete: bool,
    /// Expunge each source mailbox after copying.
    pub expunge: bool,
    /// Keep destination flags in step with the source.
    pub sync_flags: bool,
    /// Suppress every mutating command.
    pub dry_run: bool,
    /// Skip Message-ID fetches during scans.
    pub fast_scan: bool,
    /// Flatten everything into this destination folder.
    pub to_folder: Option<String>,
}

/// Shared run counters.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<Counters>,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Source messages considered.
    pub total: u64,
    /// Messages appended to the destination.
    pub copied: u64,
    /// Single-message failures.
    pub failed: u64,
    /// Messages already present at the destination.
    pub untouched: u64,
    /// Source messages marked deleted.
    pub deleted: u64,
}

impl Stats {
    fn update(&self, f: impl FnOnce(&mut Counters)) {
        #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable
        let mut counters = self.inner.lock().unwrap();
        f(&mut counters);
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> Counters {
        #[allow(clippy::unwrap_used)]
        let counters = self.inner.lock().unwrap();
        *counters
    }

    /// The end-of-run summary line.
    #[must_use]
    pub fn summary(&self) -> String {
        let c = self.snapshot();
        format!(
            "{} copied, {} failed, {} untouched out of {} total",
            c.copied, c.failed, c.untouched, c.total
        )
    }
}

/// What to do with one source message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePlan {
    /// Append to the destination (GUID absent there).
    pub copy: bool,
    /// Rewrite these flags on this destination UID.
    pub store_flags: Option<(u32, Flags)>,
    /// Mark the source message deleted.
    pub delete_source: bool,
}

/// Decides per-message actions from the two catalog rows.
#[must_use]
pub fn plan_message(
    source: &MessageRecord,
    destination: Option<&MessageRecord>,
    sync_flags: bool,
    delete: bool,
) -> MessagePlan {
    let Some(dest) = destination else {
        return MessagePlan { copy: true, store_flags: None, delete_source: false };
    };

    let store_flags = if sync_flags && dest.flags != source.flags {
        Some((dest.uid, Flags::from_catalog(&source.flags)))
    } else {
        None
    };
    let already_deleted = Flags::from_catalog(&source.flags).is_deleted();
    MessagePlan {
        copy: false,
        store_flags,
        delete_source: delete && !already_deleted,
    }
}

/// Drives a whole run between two accounts.
pub struct Copier {
    source: Account,
    destination: Account,
    options: CopyOptions,
    exclude: ExcludeList,
    stats: Arc<Stats>,
    cancel: CancellationToken,
}

impl Copier {
    /// Builds a copier over two opened accounts.
    #[must_use]
    pub fn new(
        source: Account,
        destination: Account,
        options: CopyOptions,
        exclude: ExcludeList,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            destination,
            options,
            exclude,
            stats: Arc::new(Stats::default()),
            cancel,
        }
    }

    /// The shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    /// Copies everything in scope. Per-mailbox failures are logged and
    /// the run continues; per-message failures are counted.
    ///
    /// # Errors
    ///
    /// Fatal setup errors (scope resolution, destination delimiter).
    pub async fn copy_all(&self, scope: &SyncScope) -> Result<()> {
        let mut queue: Vec<MailboxEntry> = match scope {
            SyncScope::All | SyncScope::AllSubscribed => self.source.discover_all().await?,
            SyncScope::Folder(name) => {
                let entry = self.source.find(name).await?.ok_or_else(|| {
                    Error::Imap(ImapError::MailboxNotFound(name.clone()))
                })?;
                vec![entry]
            }
        };
        let subscribed_only =
            self.options.subscribed_only || matches!(scope, SyncScope::AllSubscribed);
        // `*` listings already include every descendant.
        let recurse_children =
            self.options.recursive && matches!(scope, SyncScope::Folder(_));
        // The queue is a stack; reverse so pop() follows traversal order.
        queue.reverse();

        while let Some(entry) = queue.pop() {
            if self.cancel.is_cancelled() {
                info!("cancelled; stopping traversal");
                break;
            }

            if recurse_children {
                let mut children = self.source.children(&entry).await.unwrap_or_else(|e| {
                    warn!(mailbox = %entry.name, error = %e, "failed to list children");
                    Vec::new()
                });
                // Reverse so pop() keeps traversal order.
                children.reverse();
                queue.extend(children);
            }

            if self.exclude.matches(&entry.name) {
                info!(mailbox = %entry.name, "excluded; skipping");
                continue;
            }
            if subscribed_only && !entry.subscribed {
                debug!(mailbox = %entry.name, "not subscribed; skipping");
                continue;
            }
            if entry.is_noselect() {
                debug!(mailbox = %entry.name, "container only; skipping");
                continue;
            }

            if let Err(e) = self.copy_one(&entry).await {
                error!(mailbox = %entry.name, error = %e, "mailbox failed; continuing");
            }
        }

        info!("{}", self.stats.summary());
        Ok(())
    }

    async fn copy_one(&self, entry: &MailboxEntry) -> Result<()> {
        let mailbox_options = MailboxOptions {
            fast_scan: self.options.fast_scan,
            dry_run: self.options.dry_run,
        };
        let mut src = SyncMailbox::open(&self.source, entry.clone(), mailbox_options).await?;
        let mut dest = match self.resolve_destination(entry).await? {
            Some(dest_entry) => Some(
                SyncMailbox::open(&self.destination, dest_entry, mailbox_options).await?,
            ),
            None => None,
        };

        // Mirror the subscription bit when the source is subscribed.
        if entry.subscribed {
            if let Some(dest_mb) = dest.as_mut() {
                if let Err(e) = dest_mb.set_subscribed(true).await {
                    warn!(mailbox = %dest_mb.name(), error = %e, "failed to mirror subscription");
                }
            }
        }

        self.copy_mailbox(&mut src, dest.as_mut()).await
    }

    /// Maps a source mailbox to its destination entry, creating the
    /// folder when permitted.
    async fn resolve_destination(&self, entry: &MailboxEntry) -> Result<Option<MailboxEntry>> {
        let name = match &self.options.to_folder {
            Some(flat) => flat.clone(),
            None => entry.name.clone(),
        };

        if let Some(found) = self.destination.find(&name).await? {
            return Ok(Some(found));
        }

        if !self.options.create_folders {
            return Err(Error::Imap(ImapError::MailboxNotFound(name)));
        }
        if self.options.dry_run {
            info!(mailbox = %name, "dry-run: would create destination folder");
            return Ok(None);
        }

        // Re-translate the canonical '/' to the destination's delimiter.
        let delim = self.destination.server_delimiter().await?;
        let server_name = match delim {
            Some(d) if d != '/' => name.replace('/', &d.to_string()),
            _ => name.clone(),
        };
        info!(mailbox = %server_name, "creating destination folder");
        self.destination
            .pool()
            .with(None, async |session| {
                session
                    .safely(async |client, quirks| {
                        client.create(&quirks.map_mailbox(&server_name)).await
                    })
                    .await
            })
            .await?;

        self.destination.find(&name).await
    }

    /// Scans both sides, then copies, flag-syncs, and deletes per plan.
    async fn copy_mailbox(
        &self,
        src: &mut SyncMailbox,
        mut dest: Option<&mut SyncMailbox>,
    ) -> Result<()> {
        match dest.as_mut() {
            Some(dest_mb) => {
                let (src_scan, dest_scan) = tokio::join!(src.scan(), dest_mb.scan());
                src_scan?;
                dest_scan?;
            }
            None => src.scan().await?,
        }

        let rows = src.messages().await?;
        self.stats.update(|c| c.total += rows.len() as u64);
        let dest_guids = match dest.as_ref() {
            Some(dest_mb) => dest_mb.guids().await?,
            None => std::collections::HashMap::new(),
        };

        let mut to_copy: Vec<MessageRecord> = Vec::new();
        let mut planned_guids = std::collections::HashSet::new();
        for row in rows {
            let plan = plan_message(
                &row,
                dest_guids.get(&row.guid),
                self.options.sync_flags,
                self.options.delete,
            );

            if plan.copy {
                // Duplicate GUIDs on the source (identical ID-less
                // messages) collapse to one append.
                if planned_guids.insert(row.guid.clone()) {
                    to_copy.push(row);
                    continue;
                }
                self.stats.update(|c| c.untouched += 1);
                continue;
            }

            self.stats.update(|c| c.untouched += 1);
            if let Some((dest_uid, flags)) = plan.store_flags {
                if let Some(dest_mb) = dest.as_ref() {
                    match dest_mb.set_flags(dest_uid, &flags).await {
                        Ok(()) => {}
                        Err(e) if e.is_single_message() => {
                            warn!(uid = dest_uid, error = %e, "flag sync failed");
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            if plan.delete_source {
                match src.mark_deleted(&row).await {
                    Ok(()) => self.stats.update(|c| c.deleted += 1),
                    Err(e) if e.is_single_message() => {
                        warn!(uid = row.uid, error = %e, "delete failed");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if let Some(dest_mb) = dest.as_deref() {
            self.pipeline(src, dest_mb, to_copy).await?;
        } else if self.options.dry_run {
            // No destination folder yet; everything would be new.
            self.stats.update(|c| c.copied += to_copy.len() as u64);
            for row in &to_copy {
                debug!(guid = %row.guid, "dry-run: would copy");
            }
        }

        if self.options.expunge {
            src.expunge().await?;
        }
        Ok(())
    }

    /// Producer/consumer copy over a bounded channel: the source peek and
    /// the destination append overlap. Stalls are detected with timeouts;
    /// a stalled fetch drops its session (the retry envelope reconnects)
    /// and confirms liveness with a NOOP before resuming.
    async fn pipeline(
        &self,
        src: &SyncMailbox,
        dest: &SyncMailbox,
        to_copy: Vec<MessageRecord>,
    ) -> Result<()> {
        if to_copy.is_empty() {
            return Ok(());
        }
        if self.options.dry_run {
            self.stats.update(|c| c.copied += to_copy.len() as u64);
            for row in &to_copy {
                debug!(guid = %row.guid, "dry-run: would copy");
            }
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<PulledMessage>(CHANNEL_CAPACITY);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.clone();

        let producer = async {
            for record in &to_copy {
                if cancel.is_cancelled() {
                    break;
                }
                let pulled = match self.fetch_with_watchdog(src, record).await {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        stats.update(|c| c.failed += 1);
                        continue;
                    }
                    Err(e) => {
                        warn!(uid = record.uid, error = %e, "fetch failed");
                        stats.update(|c| c.failed += 1);
                        continue;
                    }
                };
                if tx.send(pulled).await.is_err() {
                    break; // consumer gone
                }
            }
            drop(tx);
        };

        let consumer = async {
            while let Some(message) = rx.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                // Two stall cycles without progress aborts the append.
                let appended =
                    tokio::time::timeout(2 * STALL_TIMEOUT, dest.append(&message)).await;
                match appended {
                    Ok(Ok(_)) => {
                        debug!(
                            guid = %message.guid,
                            subject = message
                                .envelope
                                .as_ref()
                                .and_then(|e| e.subject.as_deref())
                                .unwrap_or("<none>"),
                            "copied"
                        );
                        stats.update(|c| c.copied += 1);
                    }
                    Ok(Err(e)) if e.is_single_message() => {
                        warn!(guid = %message.guid, error = %e, "append failed");
                        stats.update(|c| c.failed += 1);
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!(guid = %message.guid, "append stalled; counting as failed");
                        stats.update(|c| c.failed += 1);
                    }
                }
            }
            Ok(())
        };

        let ((), consumer_result) = tokio::join!(producer, consumer);
        consumer_result
    }

    /// One watched fetch: a peek silent for longer than the stall window
    /// is cancelled (dropping its lease and socket), liveness is
    /// confirmed with a NOOP on a fresh session, and the peek retried
    /// once.
    async fn fetch_with_watchdog(
        &self,
        src: &SyncMailbox,
        record: &MessageRecord,
    ) -> Result<Option<PulledMessage>> {
        match tokio::time::timeout(STALL_TIMEOUT, src.fetch_message(record)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(uid = record.uid, "fetch stalled; reconnecting");
                self.source
                    .pool()
                    .with(None, async |session| {
                        session.drop_connection();
                        session.safely(async |client, _| client.noop().await).await
                    })
                    .await?;
                match tokio::time::timeout(2 * STALL_TIMEOUT, src.fetch_message(record)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(uid = record.uid, "fetch stalled twice; skipping message");
                        Ok(None)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::MailboxId;

    fn record(uid: u32, guid: &str, flags: &str) -> MessageRecord {
        MessageRecord {
            mailbox_id: MailboxId(1),
            uid,
            guid: guid.to_string(),
            message_id: None,
            rfc822_size: 100,
            internal_date: 1_700_000_000,
            flags: flags.to_string(),
        }
    }

    #[test]
    fn absent_guid_is_copied() {
        let plan = plan_message(&record(1, "g", "Seen"), None, true, true);
        assert!(plan.copy);
        assert!(plan.store_flags.is_none());
        assert!(!plan.delete_source);
    }

    #[test]
    fn present_guid_is_untouched() {
        let src = record(1, "g", "Seen");
        let dest = record(40, "g", "Seen");
        let plan = plan_message(&src, Some(&dest), false, false);
        assert_eq!(plan, MessagePlan { copy: false, store_flags: None, delete_source: false });
    }

    #[test]
    fn differing_flags_sync_to_destination_uid() {
        let src = record(1, "g", "Answered,Seen");
        let dest = record(40, "g", "Seen");
        let plan = plan_message(&src, Some(&dest), true, false);
        let (uid, flags) = plan.store_flags.unwrap();
        assert_eq!(uid, 40);
        assert_eq!(flags.to_catalog(), "Answered,Seen");
        assert!(!plan.copy);
    }

    #[test]
    fn matching_flags_do_not_store() {
        let src = record(1, "g", "Seen");
        let dest = record(40, "g", "Seen");
        let plan = plan_message(&src, Some(&dest), true, false);
        assert!(plan.store_flags.is_none());
    }

    #[test]
    fn delete_skips_already_deleted_sources() {
        let src = record(1, "g", "Deleted,Seen");
        let dest = record(40, "g", "Seen");
        let plan = plan_message(&src, Some(&dest), false, true);
        assert!(!plan.delete_source);

        let src = record(2, "g", "Seen");
        let plan = plan_message(&src, Some(&dest), false, true);
        assert!(plan.delete_source);
    }

    #[test]
    fn summary_line_format() {
        let stats = Stats::default();
        stats.update(|c| {
            c.total = 100;
            c.copied = 97;
            c.failed = 1;
            c.untouched = 2;
        });
        assert_eq!(stats.summary(), "97 copied, 1 failed, 2 untouched out of 100 total");
    }

    #[test]
    fn counters_accumulate() {
        let stats = Stats::default();
        stats.update(|c| c.copied += 1);
        stats.update(|c| c.copied += 1);
        stats.update(|c| c.deleted += 1);
        let c = stats.snapshot();
        assert_eq!(c.copied, 2);
        assert_eq!(c.deleted, 1);
    }
}
