//! Integration tests for the wire client against a scripted stream.
//!
//! No network: a mock stream returns canned server responses and captures
//! everything the client writes.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use mailferry_imap::client::WireClient;
use mailferry_imap::types::{Flag, Flags, UidSet};
use mailferry_imap::{Error, FetchItem, StatusAttr};

/// Mock stream that replays scripted responses and records writes.
#[derive(Debug)]
struct MockStream {
    responses: Cursor<Vec<u8>>,
    sent: Vec<u8>,
}

impl MockStream {
    fn new(responses: &[u8]) -> Self {
        Self {
            responses: Cursor::new(responses.to_vec()),
            sent: Vec::new(),
        }
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.responses.position()).unwrap();
        let data = self.responses.get_ref().clone();
        if pos >= data.len() {
            return Poll::Ready(Ok(()));
        }
        let to_read = (data.len() - pos).min(buf.remaining());
        buf.put_slice(&data[pos..pos + to_read]);
        self.responses.set_position((pos + to_read) as u64);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn greeting_carries_capabilities() {
    let script = b"* OK [CAPABILITY IMAP4rev1 UNSELECT AUTH=PLAIN] ready\r\n";
    let client = WireClient::from_stream(MockStream::new(script)).await.unwrap();
    assert_eq!(client.greeting(), "ready");
    assert!(client.has_capability("IMAP4rev1"));
    assert!(client.has_capability("unselect"));
    assert!(client.has_capability("AUTH=PLAIN"));
    assert!(!client.is_pre_authenticated());
}

#[tokio::test]
async fn bye_greeting_is_an_error() {
    let script = b"* BYE overloaded, come back later\r\n";
    let err = WireClient::from_stream(MockStream::new(script)).await.unwrap_err();
    assert!(matches!(err, Error::Bye(_)));
}

#[tokio::test]
async fn login_and_list() {
    let script = concat!(
        "* OK ready\r\n",
        "A0001 OK LOGIN completed\r\n",
        "* LIST (\\HasNoChildren) \"/\" INBOX\r\n",
        "* LIST (\\HasChildren) \"/\" Work\r\n",
        "A0002 OK LIST completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    client.login("user", "secret").await.unwrap();
    let rows = client.list("", "*").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].raw_name, "INBOX");
    assert_eq!(rows[1].raw_name, "Work");
    assert!(rows[1].may_have_children());
}

#[tokio::test]
async fn rejected_login_is_no() {
    let script = concat!(
        "* OK ready\r\n",
        "A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let err = client.login("user", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::No(_)));
}

#[tokio::test]
async fn select_extracts_mailbox_state() {
    let script = concat!(
        "* OK ready\r\n",
        "* 172 EXISTS\r\n",
        "* 1 RECENT\r\n",
        "* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n",
        "* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n",
        "* OK [UIDVALIDITY 3857529045] UIDs valid\r\n",
        "* OK [UIDNEXT 4392] Predicted next UID\r\n",
        "A0001 OK [READ-WRITE] SELECT completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let info = client.select("INBOX").await.unwrap();
    assert_eq!(info.exists, 172);
    assert_eq!(info.recent, 1);
    assert_eq!(info.uid_validity, Some(3_857_529_045));
    assert_eq!(info.uid_next, Some(4392));
    assert!(info.accepts_new_keywords);
    assert!(!info.read_only);
    assert!(info.flags.contains(&Flag::Draft));
}

#[tokio::test]
async fn select_missing_mailbox_is_not_found() {
    let script = concat!(
        "* OK ready\r\n",
        "A0001 NO Mailbox doesn't exist: Nope\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let err = client.select("Nope").await.unwrap_err();
    assert!(matches!(err, Error::MailboxNotFound(_)));
}

#[tokio::test]
async fn status_returns_counters() {
    let script = concat!(
        "* OK ready\r\n",
        "* STATUS INBOX (MESSAGES 100 UIDNEXT 101 UIDVALIDITY 7)\r\n",
        "A0001 OK STATUS completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let info = client
        .status(
            "INBOX",
            &[StatusAttr::Messages, StatusAttr::UidNext, StatusAttr::UidValidity],
        )
        .await
        .unwrap();
    assert_eq!(info.messages, Some(100));
    assert_eq!(info.uid_next, Some(101));
    assert_eq!(info.uid_validity, Some(7));
}

#[tokio::test]
async fn uid_fetch_parses_rows_and_tolerates_short_responses() {
    // Three UIDs requested, two rows returned: still success.
    let script = concat!(
        "* OK ready\r\n",
        "* 1 FETCH (UID 10 RFC822.SIZE 512 FLAGS (\\Seen))\r\n",
        "* 2 FETCH (UID 12 RFC822.SIZE 1024 FLAGS ())\r\n",
        "A0001 OK FETCH completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let rows = client
        .uid_fetch(
            &UidSet::Range(10, 12),
            &[FetchItem::Uid, FetchItem::Rfc822Size, FetchItem::Flags],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].uid, Some(10));
    assert_eq!(rows[0].rfc822_size, Some(512));
    assert_eq!(rows[1].uid, Some(12));
}

#[tokio::test]
async fn uid_fetch_body_section_with_literal() {
    let script = concat!(
        "* OK ready\r\n",
        "* 7 FETCH (UID 33 BODY[HEADER.FIELDS (MESSAGE-ID)] {31}\r\n",
        "Message-ID: <x@example.org>\r\n\r\n",
        ")\r\n",
        "A0001 OK FETCH completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let rows = client
        .uid_fetch(
            &UidSet::Single(33),
            &[FetchItem::Uid, FetchItem::header_fields(&["MESSAGE-ID"])],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let header = rows[0].section("HEADER.FIELDS (MESSAGE-ID)").unwrap();
    assert!(header.starts_with(b"Message-ID: <x@example.org>"));
}

#[tokio::test]
async fn append_waits_for_continuation() {
    let script = concat!(
        "* OK ready\r\n",
        "+ Ready for literal data\r\n",
        "A0001 OK [APPENDUID 1 3] APPEND completed\r\n",
    );
    let body = b"From: a@example.com\r\n\r\nhi\r\n";
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    client
        .append(
            "INBOX",
            body,
            &Flags::from_vec(vec![Flag::Seen]),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn append_trycreate_maps_to_mailbox_not_found() {
    let script = concat!(
        "* OK ready\r\n",
        "A0001 NO [TRYCREATE] No such destination\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let err = client
        .append("Missing", b"x", &Flags::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MailboxNotFound(_)));
}

#[tokio::test]
async fn expunge_collects_sequence_numbers() {
    let script = concat!(
        "* OK ready\r\n",
        "* 3 EXPUNGE\r\n",
        "* 3 EXPUNGE\r\n",
        "* 5 EXPUNGE\r\n",
        "A0001 OK EXPUNGE completed\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let gone = client.expunge().await.unwrap();
    assert_eq!(gone, vec![3, 3, 5]);
}

#[tokio::test]
async fn capability_command_refreshes_set() {
    let script = concat!(
        "* OK hello\r\n",
        "* CAPABILITY IMAP4rev1 IDLE LOGINDISABLED\r\n",
        "A0001 OK done\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    assert!(client.capabilities().is_empty());
    let caps = client.capability().await.unwrap();
    assert!(caps.contains(&"LOGINDISABLED".to_string()));
}

#[tokio::test]
async fn mid_command_bye_surfaces() {
    let script = concat!(
        "* OK ready\r\n",
        "* BYE shutting down\r\n",
    );
    let mut client = WireClient::from_stream(MockStream::new(script.as_bytes()))
        .await
        .unwrap();
    let err = client.noop().await.unwrap_err();
    assert!(matches!(err, Error::Bye(_)));
}
