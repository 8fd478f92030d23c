//! IMAP command construction and wire serialization.

use chrono::{DateTime, Utc};

use crate::types::{Flags, UidSet};
use crate::utf7;

/// One item in a FETCH request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// UID attribute.
    Uid,
    /// FLAGS attribute.
    Flags,
    /// RFC822.SIZE attribute.
    Rfc822Size,
    /// INTERNALDATE attribute.
    InternalDate,
    /// ENVELOPE attribute.
    Envelope,
    /// `BODY.PEEK[<section>]`; an empty section fetches the whole message.
    BodyPeek(String),
}

impl FetchItem {
    /// The section string `BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)]`.
    #[must_use]
    pub fn header_fields(names: &[&str]) -> Self {
        Self::BodyPeek(format!("HEADER.FIELDS ({})", names.join(" ")))
    }

    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Uid => buf.extend_from_slice(b"UID"),
            Self::Flags => buf.extend_from_slice(b"FLAGS"),
            Self::Rfc822Size => buf.extend_from_slice(b"RFC822.SIZE"),
            Self::InternalDate => buf.extend_from_slice(b"INTERNALDATE"),
            Self::Envelope => buf.extend_from_slice(b"ENVELOPE"),
            Self::BodyPeek(section) => {
                buf.extend_from_slice(b"BODY.PEEK[");
                buf.extend_from_slice(section.as_bytes());
                buf.push(b']');
            }
        }
    }
}

/// A STORE data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    /// Replace the flag set (`FLAGS`).
    Set(Flags),
    /// Add flags (`+FLAGS`).
    Add(Flags),
    /// Remove flags (`-FLAGS`).
    Remove(Flags),
}

/// STATUS attributes we request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAttr {
    /// Message count.
    Messages,
    /// Recent count.
    Recent,
    /// Next UID.
    UidNext,
    /// UID validity value.
    UidValidity,
    /// Unseen count.
    Unseen,
}

impl StatusAttr {
    const fn as_wire(self) -> &'static str {
        match self {
            Self::Messages => "MESSAGES",
            Self::Recent => "RECENT",
            Self::UidNext => "UIDNEXT",
            Self::UidValidity => "UIDVALIDITY",
            Self::Unseen => "UNSEEN",
        }
    }
}

/// An IMAP command, tag excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY.
    Capability,
    /// STARTTLS.
    StartTls,
    /// LOGIN with quoted credentials.
    Login {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },
    /// AUTHENTICATE with a SASL mechanism name.
    Authenticate {
        /// Mechanism, e.g. `PLAIN` or `CRAM-MD5`.
        mechanism: String,
    },
    /// RFC 2971 ID with key/value pairs.
    Id {
        /// Parameter pairs; empty sends `ID NIL`.
        pairs: Vec<(String, String)>,
    },
    /// LIST.
    List {
        /// Reference name.
        reference: String,
        /// Pattern, already in wire (modified UTF-7) form.
        pattern: String,
    },
    /// LSUB.
    Lsub {
        /// Reference name.
        reference: String,
        /// Pattern, already in wire form.
        pattern: String,
    },
    /// SELECT (read-write open).
    Select {
        /// UTF-8 mailbox name.
        mailbox: String,
    },
    /// EXAMINE (read-only open).
    Examine {
        /// UTF-8 mailbox name.
        mailbox: String,
    },
    /// STATUS.
    Status {
        /// UTF-8 mailbox name.
        mailbox: String,
        /// Requested attributes.
        attrs: Vec<StatusAttr>,
    },
    /// CREATE.
    Create {
        /// UTF-8 mailbox name.
        mailbox: String,
    },
    /// SUBSCRIBE.
    Subscribe {
        /// UTF-8 mailbox name.
        mailbox: String,
    },
    /// UNSUBSCRIBE.
    Unsubscribe {
        /// UTF-8 mailbox name.
        mailbox: String,
    },
    /// CLOSE (expunges in selected state).
    Close,
    /// UNSELECT (RFC 3691).
    Unselect,
    /// EXPUNGE.
    Expunge,
    /// NOOP heartbeat.
    Noop,
    /// LOGOUT.
    Logout,
    /// UID FETCH.
    UidFetch {
        /// UID set.
        set: UidSet,
        /// Items to fetch.
        items: Vec<FetchItem>,
    },
    /// UID STORE.
    UidStore {
        /// UID set.
        set: UidSet,
        /// Flag change.
        action: StoreAction,
        /// Suppress untagged FETCH responses (`.SILENT`).
        silent: bool,
    },
    /// UID COPY.
    UidCopy {
        /// UID set.
        set: UidSet,
        /// UTF-8 destination mailbox name.
        mailbox: String,
    },
    /// First line of APPEND, announcing a synchronizing literal. The
    /// message body follows after the server's continuation.
    Append {
        /// UTF-8 mailbox name.
        mailbox: String,
        /// Flags for the new message; `\Recent` must already be filtered.
        flags: Flags,
        /// INTERNALDATE for the new message.
        internal_date: Option<DateTime<Utc>>,
        /// Size of the literal that will follow.
        size: usize,
    },
}

impl Command {
    /// Serializes the command with its tag, CRLF included.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        buf.push(b' ');
        self.write_body(&mut buf);
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// The command name and arguments, with credentials redacted; used for
    /// wire tracing.
    #[must_use]
    pub fn redacted(&self, tag: &str) -> String {
        match self {
            Self::Login { username, .. } => format!("{tag} LOGIN {username} ***"),
            other => {
                let mut buf = Vec::new();
                other.write_body(&mut buf);
                format!("{tag} {}", String::from_utf8_lossy(&buf))
            }
        }
    }

    fn write_body(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),
            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_quoted(buf, username);
                buf.push(b' ');
                write_quoted(buf, password);
            }
            Self::Authenticate { mechanism } => {
                buf.extend_from_slice(b"AUTHENTICATE ");
                buf.extend_from_slice(mechanism.as_bytes());
            }
            Self::Id { pairs } => {
                buf.extend_from_slice(b"ID ");
                if pairs.is_empty() {
                    buf.extend_from_slice(b"NIL");
                } else {
                    buf.push(b'(');
                    for (i, (k, v)) in pairs.iter().enumerate() {
                        if i > 0 {
                            buf.push(b' ');
                        }
                        write_quoted(buf, k);
                        buf.push(b' ');
                        write_quoted(buf, v);
                    }
                    buf.push(b')');
                }
            }
            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_astring(buf, reference);
                buf.push(b' ');
                write_astring(buf, pattern);
            }
            Self::Lsub { reference, pattern } => {
                buf.extend_from_slice(b"LSUB ");
                write_astring(buf, reference);
                buf.push(b' ');
                write_astring(buf, pattern);
            }
            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_mailbox(buf, mailbox);
            }
            Self::Examine { mailbox } => {
                buf.extend_from_slice(b"EXAMINE ");
                write_mailbox(buf, mailbox);
            }
            Self::Status { mailbox, attrs } => {
                buf.extend_from_slice(b"STATUS ");
                write_mailbox(buf, mailbox);
                buf.extend_from_slice(b" (");
                for (i, attr) in attrs.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    buf.extend_from_slice(attr.as_wire().as_bytes());
                }
                buf.push(b')');
            }
            Self::Create { mailbox } => {
                buf.extend_from_slice(b"CREATE ");
                write_mailbox(buf, mailbox);
            }
            Self::Subscribe { mailbox } => {
                buf.extend_from_slice(b"SUBSCRIBE ");
                write_mailbox(buf, mailbox);
            }
            Self::Unsubscribe { mailbox } => {
                buf.extend_from_slice(b"UNSUBSCRIBE ");
                write_mailbox(buf, mailbox);
            }
            Self::Close => buf.extend_from_slice(b"CLOSE"),
            Self::Unselect => buf.extend_from_slice(b"UNSELECT"),
            Self::Expunge => buf.extend_from_slice(b"EXPUNGE"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::UidFetch { set, items } => {
                buf.extend_from_slice(b"UID FETCH ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.extend_from_slice(b" (");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    item.write(buf);
                }
                buf.push(b')');
            }
            Self::UidStore { set, action, silent } => {
                buf.extend_from_slice(b"UID STORE ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.push(b' ');
                let (prefix, flags) = match action {
                    StoreAction::Set(f) => ("FLAGS", f),
                    StoreAction::Add(f) => ("+FLAGS", f),
                    StoreAction::Remove(f) => ("-FLAGS", f),
                };
                buf.extend_from_slice(prefix.as_bytes());
                if *silent {
                    buf.extend_from_slice(b".SILENT");
                }
                buf.push(b' ');
                write_flag_list(buf, flags);
            }
            Self::UidCopy { set, mailbox } => {
                buf.extend_from_slice(b"UID COPY ");
                buf.extend_from_slice(set.to_string().as_bytes());
                buf.push(b' ');
                write_mailbox(buf, mailbox);
            }
            Self::Append { mailbox, flags, internal_date, size } => {
                buf.extend_from_slice(b"APPEND ");
                write_mailbox(buf, mailbox);
                if !flags.is_empty() {
                    buf.push(b' ');
                    write_flag_list(buf, flags);
                }
                if let Some(date) = internal_date {
                    buf.push(b' ');
                    let stamp = date.format("%d-%b-%Y %H:%M:%S +0000").to_string();
                    write_quoted(buf, &stamp);
                }
                buf.extend_from_slice(format!(" {{{size}}}").as_bytes());
            }
        }
    }
}

/// Writes a mailbox name: UTF-8 → modified UTF-7, then astring quoting.
fn write_mailbox(buf: &mut Vec<u8>, name: &str) {
    write_astring(buf, &utf7::encode(name));
}

/// Writes an astring (bare atom or quoted string).
fn write_astring(buf: &mut Vec<u8>, s: &str) {
    if s.is_empty() || s.bytes().any(needs_quoting) {
        write_quoted(buf, s);
    } else {
        buf.extend_from_slice(s.as_bytes());
    }
}

fn write_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

const fn needs_quoting(b: u8) -> bool {
    matches!(b, b' ' | b'"' | b'\\' | b'(' | b')' | b'{' | b'%' | b'*') || b < 0x20 || b == 0x7F
}

fn write_flag_list(buf: &mut Vec<u8>, flags: &Flags) {
    buf.push(b'(');
    for (i, flag) in flags.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        buf.extend_from_slice(flag.as_wire().as_bytes());
    }
    buf.push(b')');
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Flag;
    use chrono::TimeZone;

    fn wire(cmd: &Command) -> String {
        String::from_utf8(cmd.serialize("A0001")).unwrap()
    }

    #[test]
    fn login_quotes_credentials() {
        let cmd = Command::Login {
            username: "user@example.com".into(),
            password: "pa\"ss".into(),
        };
        assert_eq!(wire(&cmd), "A0001 LOGIN \"user@example.com\" \"pa\\\"ss\"\r\n");
    }

    #[test]
    fn login_redaction_hides_password() {
        let cmd = Command::Login {
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!cmd.redacted("A0001").contains("hunter2"));
    }

    #[test]
    fn select_encodes_utf7() {
        let cmd = Command::Select { mailbox: "円グラフ良いです".into() };
        assert_eq!(wire(&cmd), "A0001 SELECT &UYYwsDDpMNWCbzBEMGcwWQ-\r\n");
    }

    #[test]
    fn select_quotes_spaces() {
        let cmd = Command::Select { mailbox: "Sent Items".into() };
        assert_eq!(wire(&cmd), "A0001 SELECT \"Sent Items\"\r\n");
    }

    #[test]
    fn list_wildcard_stays_bare_where_allowed() {
        let cmd = Command::List { reference: String::new(), pattern: "*".into() };
        // Empty reference and '*' both need quoting per the astring rules.
        assert_eq!(wire(&cmd), "A0001 LIST \"\" \"*\"\r\n");
    }

    #[test]
    fn status_attrs() {
        let cmd = Command::Status {
            mailbox: "INBOX".into(),
            attrs: vec![StatusAttr::Messages, StatusAttr::UidNext, StatusAttr::UidValidity],
        };
        assert_eq!(wire(&cmd), "A0001 STATUS INBOX (MESSAGES UIDNEXT UIDVALIDITY)\r\n");
    }

    #[test]
    fn uid_fetch_scan_fields() {
        let cmd = Command::UidFetch {
            set: UidSet::Range(1, 1024),
            items: vec![
                FetchItem::Uid,
                FetchItem::header_fields(&["MESSAGE-ID"]),
                FetchItem::Rfc822Size,
                FetchItem::InternalDate,
                FetchItem::Flags,
            ],
        };
        assert_eq!(
            wire(&cmd),
            "A0001 UID FETCH 1:1024 (UID BODY.PEEK[HEADER.FIELDS (MESSAGE-ID)] RFC822.SIZE INTERNALDATE FLAGS)\r\n"
        );
    }

    #[test]
    fn uid_store_silent() {
        let cmd = Command::UidStore {
            set: UidSet::Single(9),
            action: StoreAction::Set(Flags::from_vec(vec![Flag::Seen, Flag::Answered])),
            silent: true,
        };
        assert_eq!(wire(&cmd), "A0001 UID STORE 9 FLAGS.SILENT (\\Seen \\Answered)\r\n");
    }

    #[test]
    fn uid_copy_to_gmail_trash() {
        let cmd = Command::UidCopy {
            set: UidSet::Single(77),
            mailbox: "[Gmail]/Trash".into(),
        };
        assert_eq!(wire(&cmd), "A0001 UID COPY 77 \"[Gmail]/Trash\"\r\n");
    }

    #[test]
    fn append_header_line() {
        let date = chrono::Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        let cmd = Command::Append {
            mailbox: "INBOX".into(),
            flags: Flags::from_vec(vec![Flag::Seen]),
            internal_date: Some(date),
            size: 310,
        };
        assert_eq!(
            wire(&cmd),
            "A0001 APPEND INBOX (\\Seen) \"14-Nov-2023 22:13:20 +0000\" {310}\r\n"
        );
    }

    #[test]
    fn append_without_flags_or_date() {
        let cmd = Command::Append {
            mailbox: "INBOX".into(),
            flags: Flags::new(),
            internal_date: None,
            size: 5,
        };
        assert_eq!(wire(&cmd), "A0001 APPEND INBOX {5}\r\n");
    }

    #[test]
    fn id_pairs() {
        let cmd = Command::Id {
            pairs: vec![("guid".into(), "1".into())],
        };
        assert_eq!(wire(&cmd), "A0001 ID (\"guid\" \"1\")\r\n");
    }
}
