//! One-shot-per-call IMAP wire client.
//!
//! A [`WireClient`] owns one socket and executes exactly one command per
//! call, reading untagged responses until the matching tagged completion.
//! No command pipelining: the strict ordering the protocol requires is a
//! property of this type.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::command::{Command, FetchItem, StatusAttr, StoreAction};
use crate::framed::Framed;
use crate::response::{FetchRecord, RespStatus, Response, ResponseCode, Untagged};
use crate::stream::{ImapStream, TlsOptions};
use crate::types::{Flags, ListItem, SelectInfo, StatusInfo, UidSet};
use crate::{Error, Result};

const WIRE: &str = "imap.wire";

/// An authenticated-or-not IMAP connection executing one command at a time.
#[derive(Debug)]
pub struct WireClient<S> {
    framed: Framed<S>,
    tag_seq: u32,
    /// Greeting text from the `* OK` / `* PREAUTH` line.
    greeting: String,
    /// True when the greeting was PREAUTH.
    pre_authenticated: bool,
    /// Last advertised capability set, uppercased.
    capabilities: Vec<String>,
    /// Most recent untagged responses, keyed by response name.
    recent: HashMap<&'static str, Untagged>,
}

impl<S> WireClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream and consumes the server greeting.
    ///
    /// # Errors
    ///
    /// Fails if the greeting is BYE or unreadable.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut client = Self {
            framed: Framed::new(stream),
            tag_seq: 0,
            greeting: String::new(),
            pre_authenticated: false,
            capabilities: Vec::new(),
            recent: HashMap::new(),
        };

        let line = client.framed.read_response().await?;
        trace!(target: WIRE, "<< {}", String::from_utf8_lossy(&line).trim_end());
        match Response::parse(&line)? {
            Response::Untagged(Untagged::Condition {
                status: RespStatus::Ok,
                code,
                text,
            }) => {
                client.greeting = text;
                if let Some(ResponseCode::Capability(caps)) = code {
                    client.set_capabilities(caps);
                }
            }
            Response::Untagged(Untagged::PreAuth { code, text }) => {
                client.greeting = text;
                client.pre_authenticated = true;
                if let Some(ResponseCode::Capability(caps)) = code {
                    client.set_capabilities(caps);
                }
            }
            Response::Untagged(Untagged::Bye { text }) => return Err(Error::Bye(text)),
            other => {
                return Err(Error::Protocol(format!("unexpected greeting: {other:?}")));
            }
        }
        Ok(client)
    }

    /// The greeting text the server sent on connect.
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// True when the server greeted with PREAUTH.
    #[must_use]
    pub const fn is_pre_authenticated(&self) -> bool {
        self.pre_authenticated
    }

    /// The last advertised capability set (uppercased).
    #[must_use]
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// True when `name` appears in the capability set.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        let upper = name.to_uppercase();
        self.capabilities.iter().any(|c| *c == upper)
    }

    /// The most recent untagged response of the given kind
    /// (`EXISTS`, `RECENT`, `FLAGS`, …), if any has been seen.
    #[must_use]
    pub fn last_untagged(&self, name: &str) -> Option<&Untagged> {
        self.recent.get(name.to_uppercase().as_str())
    }

    fn set_capabilities(&mut self, caps: Vec<String>) {
        self.capabilities = caps.into_iter().map(|c| c.to_uppercase()).collect();
    }

    fn next_tag(&mut self) -> String {
        self.tag_seq += 1;
        format!("A{:04}", self.tag_seq)
    }

    /// Sends one command and reads responses until its tagged completion.
    /// Untagged responses are returned in order and mirrored into the
    /// recent-response table.
    async fn run(&mut self, cmd: &Command) -> Result<Vec<Untagged>> {
        let tag = self.next_tag();
        trace!(target: WIRE, ">> {}", cmd.redacted(&tag));
        self.framed.write_all(&cmd.serialize(&tag)).await?;
        self.read_until_tagged(&tag).await
    }

    async fn read_until_tagged(&mut self, tag: &str) -> Result<Vec<Untagged>> {
        let mut collected = Vec::new();
        loop {
            let line = self.framed.read_response().await?;
            trace!(target: WIRE, "<< {}", preview(&line));
            match Response::parse(&line)? {
                Response::Tagged { tag: got, status, code, text } => {
                    if got != tag {
                        return Err(Error::Protocol(format!(
                            "tag mismatch: expected {tag}, got {got}"
                        )));
                    }
                    if let Some(ResponseCode::Capability(caps)) = &code {
                        self.set_capabilities(caps.clone());
                    }
                    return match status {
                        RespStatus::Ok => Ok(collected),
                        RespStatus::No if matches!(code, Some(ResponseCode::TryCreate)) => {
                            Err(Error::MailboxNotFound(text))
                        }
                        RespStatus::No => Err(Error::No(text)),
                        RespStatus::Bad => Err(Error::Bad(text)),
                    };
                }
                Response::Untagged(untagged) => {
                    self.remember(&untagged);
                    if let Untagged::Bye { text } = &untagged {
                        return Err(Error::Bye(text.clone()));
                    }
                    collected.push(untagged);
                }
                Response::Continuation { .. } => {
                    return Err(Error::Protocol("unexpected continuation".to_string()));
                }
            }
        }
    }

    /// Reads one raw response expecting a continuation request.
    async fn read_continuation(&mut self, tag: &str) -> Result<String> {
        loop {
            let line = self.framed.read_response().await?;
            trace!(target: WIRE, "<< {}", preview(&line));
            match Response::parse(&line)? {
                Response::Continuation { text } => return Ok(text),
                Response::Untagged(untagged) => {
                    if let Untagged::Bye { text } = untagged {
                        return Err(Error::Bye(text));
                    }
                    // Stray unsolicited data before the continuation.
                }
                Response::Tagged { tag: got, status, code, text } if got == tag => {
                    return match status {
                        RespStatus::No if matches!(code, Some(ResponseCode::TryCreate)) => {
                            Err(Error::MailboxNotFound(text))
                        }
                        RespStatus::No => Err(Error::No(text)),
                        RespStatus::Bad => Err(Error::Bad(text)),
                        RespStatus::Ok => {
                            Err(Error::Protocol("command completed before payload".into()))
                        }
                    };
                }
                Response::Tagged { tag: got, .. } => {
                    return Err(Error::Protocol(format!("tag mismatch: got {got}")));
                }
            }
        }
    }

    fn remember(&mut self, untagged: &Untagged) {
        let key = match untagged {
            Untagged::Exists(_) => "EXISTS",
            Untagged::Recent(_) => "RECENT",
            Untagged::Flags(_) => "FLAGS",
            Untagged::Capability(caps) => {
                self.set_capabilities(caps.clone());
                "CAPABILITY"
            }
            Untagged::Status { .. } => "STATUS",
            Untagged::Search(_) => "SEARCH",
            Untagged::List(_) => "LIST",
            Untagged::Lsub(_) => "LSUB",
            Untagged::Fetch { .. } => "FETCH",
            Untagged::Expunge(_) => "EXPUNGE",
            _ => return,
        };
        self.recent.insert(key, untagged.clone());
    }

    // === Commands ===

    /// CAPABILITY; refreshes and returns the capability set.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn capability(&mut self) -> Result<Vec<String>> {
        self.run(&Command::Capability).await?;
        Ok(self.capabilities.clone())
    }

    /// Ensures capabilities are known, asking the server only when the
    /// greeting did not carry them.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn ensure_capabilities(&mut self) -> Result<()> {
        if self.capabilities.is_empty() {
            self.run(&Command::Capability).await?;
        }
        Ok(())
    }

    /// LOGIN with quoted credentials.
    ///
    /// # Errors
    ///
    /// Propagates command failure; NO means rejected credentials.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.run(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        Ok(())
    }

    /// AUTHENTICATE PLAIN (RFC 4616).
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn authenticate_plain(&mut self, username: &str, password: &str) -> Result<()> {
        let tag = self.next_tag();
        let cmd = Command::Authenticate { mechanism: "PLAIN".into() };
        trace!(target: WIRE, ">> {}", cmd.redacted(&tag));
        self.framed.write_all(&cmd.serialize(&tag)).await?;
        self.read_continuation(&tag).await?;

        let payload = BASE64.encode(format!("\0{username}\0{password}"));
        trace!(target: WIRE, ">> <auth payload>");
        self.framed.write_all(format!("{payload}\r\n").as_bytes()).await?;
        self.read_until_tagged(&tag).await?;
        Ok(())
    }

    /// AUTHENTICATE CRAM-MD5 (RFC 2195).
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn authenticate_cram_md5(&mut self, username: &str, password: &str) -> Result<()> {
        let tag = self.next_tag();
        let cmd = Command::Authenticate { mechanism: "CRAM-MD5".into() };
        trace!(target: WIRE, ">> {}", cmd.redacted(&tag));
        self.framed.write_all(&cmd.serialize(&tag)).await?;

        let challenge_b64 = self.read_continuation(&tag).await?;
        let challenge = BASE64
            .decode(challenge_b64.trim())
            .map_err(|e| Error::Protocol(format!("bad CRAM-MD5 challenge: {e}")))?;

        let digest = hmac_md5(password.as_bytes(), &challenge);
        let response = BASE64.encode(format!("{username} {digest}"));
        trace!(target: WIRE, ">> <auth payload>");
        self.framed.write_all(format!("{response}\r\n").as_bytes()).await?;
        self.read_until_tagged(&tag).await?;
        Ok(())
    }

    /// RFC 2971 ID exchange.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn id(&mut self, pairs: &[(&str, &str)]) -> Result<()> {
        self.run(&Command::Id {
            pairs: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        })
        .await?;
        Ok(())
    }

    /// LIST; rows come back in server order with raw (modified UTF-7) names.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListItem>> {
        let untagged = self
            .run(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(untagged
            .into_iter()
            .filter_map(|u| match u {
                Untagged::List(item) => Some(item),
                _ => None,
            })
            .collect())
    }

    /// LSUB; the subscribed subset.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn lsub(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListItem>> {
        let untagged = self
            .run(&Command::Lsub {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(untagged
            .into_iter()
            .filter_map(|u| match u {
                Untagged::Lsub(item) | Untagged::List(item) => Some(item),
                _ => None,
            })
            .collect())
    }

    /// SELECT (read-write).
    ///
    /// # Errors
    ///
    /// NO maps to [`Error::MailboxNotFound`].
    pub async fn select(&mut self, mailbox: &str) -> Result<SelectInfo> {
        let untagged = self
            .run(&Command::Select { mailbox: mailbox.to_string() })
            .await
            .map_err(|e| not_found_on_no(e, mailbox))?;
        Ok(build_select_info(&untagged, false))
    }

    /// EXAMINE (read-only).
    ///
    /// # Errors
    ///
    /// NO maps to [`Error::MailboxNotFound`].
    pub async fn examine(&mut self, mailbox: &str) -> Result<SelectInfo> {
        let untagged = self
            .run(&Command::Examine { mailbox: mailbox.to_string() })
            .await
            .map_err(|e| not_found_on_no(e, mailbox))?;
        Ok(build_select_info(&untagged, true))
    }

    /// STATUS without selecting the mailbox.
    ///
    /// # Errors
    ///
    /// NO maps to [`Error::MailboxNotFound`].
    pub async fn status(&mut self, mailbox: &str, attrs: &[StatusAttr]) -> Result<StatusInfo> {
        let untagged = self
            .run(&Command::Status {
                mailbox: mailbox.to_string(),
                attrs: attrs.to_vec(),
            })
            .await
            .map_err(|e| not_found_on_no(e, mailbox))?;
        untagged
            .into_iter()
            .find_map(|u| match u {
                Untagged::Status { info, .. } => Some(info),
                _ => None,
            })
            .ok_or_else(|| Error::Protocol("STATUS returned no data".to_string()))
    }

    /// CREATE.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn create(&mut self, mailbox: &str) -> Result<()> {
        self.run(&Command::Create { mailbox: mailbox.to_string() }).await?;
        Ok(())
    }

    /// SUBSCRIBE.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn subscribe(&mut self, mailbox: &str) -> Result<()> {
        self.run(&Command::Subscribe { mailbox: mailbox.to_string() }).await?;
        Ok(())
    }

    /// UNSUBSCRIBE.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn unsubscribe(&mut self, mailbox: &str) -> Result<()> {
        self.run(&Command::Unsubscribe { mailbox: mailbox.to_string() }).await?;
        Ok(())
    }

    /// UID FETCH. Returns one record per message the server produced; a
    /// response covering fewer UIDs than requested is not an error.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn uid_fetch(&mut self, set: &UidSet, items: &[FetchItem]) -> Result<Vec<FetchRecord>> {
        if set.is_empty() {
            return Ok(Vec::new());
        }
        let untagged = self
            .run(&Command::UidFetch { set: set.clone(), items: items.to_vec() })
            .await?;
        Ok(untagged
            .into_iter()
            .filter_map(|u| match u {
                Untagged::Fetch { record, .. } if record.uid.is_some() => Some(record),
                _ => None,
            })
            .collect())
    }

    /// UID STORE.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn uid_store(&mut self, set: &UidSet, action: StoreAction, silent: bool) -> Result<()> {
        if set.is_empty() {
            return Ok(());
        }
        self.run(&Command::UidStore { set: set.clone(), action, silent }).await?;
        Ok(())
    }

    /// UID COPY.
    ///
    /// # Errors
    ///
    /// NO with TRYCREATE maps to [`Error::MailboxNotFound`].
    pub async fn uid_copy(&mut self, set: &UidSet, mailbox: &str) -> Result<()> {
        if set.is_empty() {
            return Ok(());
        }
        self.run(&Command::UidCopy {
            set: set.clone(),
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// APPEND one message. `flags` must no longer contain `\Recent`.
    ///
    /// # Errors
    ///
    /// NO with TRYCREATE maps to [`Error::MailboxNotFound`].
    pub async fn append(
        &mut self,
        mailbox: &str,
        body: &[u8],
        flags: &Flags,
        internal_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let tag = self.next_tag();
        let cmd = Command::Append {
            mailbox: mailbox.to_string(),
            flags: flags.clone(),
            internal_date,
            size: body.len(),
        };
        trace!(target: WIRE, ">> {}", cmd.redacted(&tag));
        self.framed.write_all(&cmd.serialize(&tag)).await?;
        self.read_continuation(&tag).await?;

        trace!(target: WIRE, ">> <{} message octets>", body.len());
        self.framed.write_all(body).await?;
        self.framed.write_all(b"\r\n").await?;
        self.read_until_tagged(&tag).await?;
        Ok(())
    }

    /// EXPUNGE; returns the expunged sequence numbers.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn expunge(&mut self) -> Result<Vec<u32>> {
        let untagged = self.run(&Command::Expunge).await?;
        Ok(untagged
            .into_iter()
            .filter_map(|u| match u {
                Untagged::Expunge(n) => Some(n),
                _ => None,
            })
            .collect())
    }

    /// CLOSE; silently expunges in the selected state.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn close(&mut self) -> Result<()> {
        self.run(&Command::Close).await?;
        Ok(())
    }

    /// UNSELECT (RFC 3691). Callers must check the capability first.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn unselect(&mut self) -> Result<()> {
        self.run(&Command::Unselect).await?;
        Ok(())
    }

    /// NOOP heartbeat.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn noop(&mut self) -> Result<()> {
        self.run(&Command::Noop).await?;
        Ok(())
    }

    /// LOGOUT. The server's BYE is expected and not an error.
    pub async fn logout(&mut self) {
        let tag = self.next_tag();
        let cmd = Command::Logout;
        trace!(target: WIRE, ">> {}", cmd.redacted(&tag));
        if self.framed.write_all(&cmd.serialize(&tag)).await.is_ok() {
            let _ = self.read_until_tagged(&tag).await;
        }
    }
}

impl WireClient<ImapStream> {
    /// STARTTLS: upgrades the connection in place and re-fetches
    /// capabilities (the pre-TLS set must be discarded).
    ///
    /// # Errors
    ///
    /// Fails when the server rejects STARTTLS or the handshake fails.
    pub async fn starttls(mut self, host: &str, tls: &TlsOptions) -> Result<Self> {
        self.run(&Command::StartTls).await?;
        let stream = self.framed.into_inner().upgrade_to_tls(host, tls).await?;
        self.framed = Framed::new(stream);
        self.capabilities.clear();
        self.ensure_capabilities().await?;
        Ok(self)
    }
}

/// Truncated, lossy rendering of a wire line for trace logs.
fn preview(line: &[u8]) -> String {
    const MAX: usize = 512;
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    if text.len() > MAX {
        let mut cut = MAX;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}… ({} bytes)", &text[..cut], line.len())
    } else {
        text.to_string()
    }
}

/// SELECT / EXAMINE failures mean the mailbox is not there.
fn not_found_on_no(err: Error, mailbox: &str) -> Error {
    match err {
        Error::No(text) => Error::MailboxNotFound(format!("{mailbox}: {text}")),
        other => other,
    }
}

fn build_select_info(untagged: &[Untagged], read_only_default: bool) -> SelectInfo {
    let mut info = SelectInfo {
        read_only: read_only_default,
        ..SelectInfo::default()
    };
    for u in untagged {
        match u {
            Untagged::Exists(n) => info.exists = *n,
            Untagged::Recent(n) => info.recent = *n,
            Untagged::Flags(flags) => info.flags = flags.clone(),
            Untagged::Condition { code: Some(code), .. } => match code {
                ResponseCode::PermanentFlags(flags, star) => {
                    info.permanent_flags = flags.clone();
                    info.accepts_new_keywords = *star;
                }
                ResponseCode::UidValidity(v) => info.uid_validity = Some(*v),
                ResponseCode::UidNext(v) => info.uid_next = Some(*v),
                ResponseCode::Unseen(v) => info.unseen = Some(*v),
                ResponseCode::ReadOnly => info.read_only = true,
                ResponseCode::ReadWrite => info.read_only = false,
                _ => {}
            },
            _ => {}
        }
    }
    info
}

/// HMAC-MD5 digest rendered as lowercase hex (RFC 2195).
fn hmac_md5(key: &[u8], message: &[u8]) -> String {
    const BLOCK: usize = 64;
    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        key_block[..16].copy_from_slice(&md5::compute(key).0);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Vec::with_capacity(BLOCK + message.len());
    inner.extend(key_block.iter().map(|b| b ^ 0x36));
    inner.extend_from_slice(message);
    let inner_digest = md5::compute(&inner);

    let mut outer = Vec::with_capacity(BLOCK + 16);
    outer.extend(key_block.iter().map(|b| b ^ 0x5c));
    outer.extend_from_slice(&inner_digest.0);
    format!("{:x}", md5::compute(&outer))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hmac_md5_rfc2202_vectors() {
        // RFC 2202 test case 2.
        assert_eq!(
            hmac_md5(b"Jefe", b"what do ya want for nothing?"),
            "750c783e6ab0b503eaa86e310a5db738"
        );
        // RFC 2202 test case 1 uses a binary key; case 6 exercises the
        // long-key hashing path.
        let long_key = [0xaau8; 80];
        assert_eq!(
            hmac_md5(&long_key, b"Test Using Larger Than Block-Size Key - Hash Key First"),
            "6b1ab7fe4bd7bf8f0b62e6ce61b9d0cd"
        );
    }

    #[test]
    fn preview_truncates() {
        let long = vec![b'a'; 2000];
        let shown = preview(&long);
        assert!(shown.len() < 600);
        assert!(shown.contains("2000 bytes"));
    }

    #[test]
    fn select_info_from_untagged() {
        let untagged = vec![
            Untagged::Exists(3),
            Untagged::Recent(1),
            Untagged::Condition {
                status: RespStatus::Ok,
                code: Some(ResponseCode::UidValidity(99)),
                text: String::new(),
            },
            Untagged::Condition {
                status: RespStatus::Ok,
                code: Some(ResponseCode::UidNext(100)),
                text: String::new(),
            },
        ];
        let info = build_select_info(&untagged, false);
        assert_eq!(info.exists, 3);
        assert_eq!(info.uid_validity, Some(99));
        assert_eq!(info.uid_next, Some(100));
        assert!(!info.read_only);
    }
}
