//! IMAP response parsing.
//!
//! Parses single logical response lines (literals already inlined by the
//! framing layer) into structured data. The grammar follows RFC 3501 with
//! lenient handling of unknown attributes and response codes.

use chrono::{DateTime, Utc};

use crate::types::{Flag, Flags, ListItem, MailboxAttribute, StatusInfo};
use crate::{Error, Result};

/// Completion status of a tagged or condition response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespStatus {
    /// Command succeeded.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed or inappropriate.
    Bad,
}

/// Bracketed response code in resp-text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// `[ALERT]`.
    Alert,
    /// `[CAPABILITY ...]` piggybacked on a greeting or completion.
    Capability(Vec<String>),
    /// `[PERMANENTFLAGS (...)]`; the bool reports a `\*` entry.
    PermanentFlags(Flags, bool),
    /// `[READ-ONLY]`.
    ReadOnly,
    /// `[READ-WRITE]`.
    ReadWrite,
    /// `[TRYCREATE]`.
    TryCreate,
    /// `[UIDNEXT n]`.
    UidNext(u32),
    /// `[UIDVALIDITY n]`.
    UidValidity(u32),
    /// `[UNSEEN n]`.
    Unseen(u32),
    /// Anything else, kept verbatim.
    Other(String),
}

/// A parsed response line.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Tagged completion.
    Tagged {
        /// Command tag.
        tag: String,
        /// Completion status.
        status: RespStatus,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged server data.
    Untagged(Untagged),
    /// Continuation request (`+ ...`).
    Continuation {
        /// Text or base64 challenge after the `+`.
        text: String,
    },
}

/// Untagged response payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Untagged {
    /// `* OK/NO/BAD [code] text` condition state.
    Condition {
        /// Condition severity.
        status: RespStatus,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text.
        text: String,
    },
    /// `* PREAUTH ...` greeting.
    PreAuth {
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Text.
        text: String,
    },
    /// `* BYE ...`.
    Bye {
        /// Text.
        text: String,
    },
    /// `* CAPABILITY ...`.
    Capability(Vec<String>),
    /// `* n EXISTS`.
    Exists(u32),
    /// `* n RECENT`.
    Recent(u32),
    /// `* n EXPUNGE`.
    Expunge(u32),
    /// `* FLAGS (...)`.
    Flags(Flags),
    /// `* LIST (...) delim name`.
    List(ListItem),
    /// `* LSUB (...) delim name`.
    Lsub(ListItem),
    /// `* STATUS name (...)`.
    Status {
        /// Mailbox name as received (modified UTF-7).
        raw_name: String,
        /// Parsed counters.
        info: StatusInfo,
    },
    /// `* SEARCH n n n`.
    Search(Vec<u32>),
    /// `* n FETCH (...)`.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Parsed attributes.
        record: FetchRecord,
    },
    /// `* ID (...)` or other ignorable data.
    Ignored(String),
}

/// Attributes parsed from one FETCH response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRecord {
    /// UID attribute.
    pub uid: Option<u32>,
    /// FLAGS attribute.
    pub flags: Option<Flags>,
    /// RFC822.SIZE attribute.
    pub rfc822_size: Option<u32>,
    /// INTERNALDATE attribute.
    pub internal_date: Option<DateTime<Utc>>,
    /// ENVELOPE attribute.
    pub envelope: Option<Envelope>,
    /// `BODY[<section>]` payloads keyed by section string.
    pub sections: Vec<(String, Vec<u8>)>,
}

impl FetchRecord {
    /// Returns the payload of `BODY[<section>]`. Requests made with
    /// `BODY.PEEK[...]` come back under the same section key.
    #[must_use]
    pub fn section(&self, section: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(section))
            .map(|(_, data)| data.as_slice())
    }

    /// Shorthand for the whole-message section `BODY[]`.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.section("")
    }
}

/// The pieces of an ENVELOPE we keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Date header text.
    pub date: Option<String>,
    /// Subject header text.
    pub subject: Option<String>,
    /// First From address, rendered as `name <mailbox@host>`.
    pub from: Option<String>,
    /// Message-Id header text.
    pub message_id: Option<String>,
}

impl Response {
    /// Parses one complete response line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on grammar violations.
    pub fn parse(input: &[u8]) -> Result<Self> {
        Parser::new(input).response()
    }
}

/// Byte-cursor parser over one response line.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn fail<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(Error::Parse {
            position: self.pos,
            message: message.into(),
        })
    }

    fn response(&mut self) -> Result<Response> {
        match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                self.expect_space()?;
                self.untagged().map(Response::Untagged)
            }
            Some(b'+') => {
                self.pos += 1;
                if self.peek() == Some(b' ') {
                    self.pos += 1;
                }
                Ok(Response::Continuation { text: self.rest_text() })
            }
            Some(_) => {
                let tag = self.atom()?;
                self.expect_space()?;
                let status = self.status()?;
                let (code, text) = self.resp_text()?;
                Ok(Response::Tagged { tag, status, code, text })
            }
            None => self.fail("empty response"),
        }
    }

    fn untagged(&mut self) -> Result<Untagged> {
        // Numbered data: EXISTS / RECENT / EXPUNGE / FETCH.
        if self.peek().is_some_and(|b| b.is_ascii_digit()) {
            let n = self.number()?;
            self.expect_space()?;
            let word = self.atom()?;
            return match word.to_uppercase().as_str() {
                "EXISTS" => Ok(Untagged::Exists(n)),
                "RECENT" => Ok(Untagged::Recent(n)),
                "EXPUNGE" => Ok(Untagged::Expunge(n)),
                "FETCH" => {
                    self.expect_space()?;
                    let record = self.fetch_record()?;
                    Ok(Untagged::Fetch { seq: n, record })
                }
                other => self.fail(format!("unknown numbered response: {other}")),
            };
        }

        let word = self.atom()?;
        match word.to_uppercase().as_str() {
            "OK" => {
                let (code, text) = self.resp_text()?;
                Ok(Untagged::Condition { status: RespStatus::Ok, code, text })
            }
            "NO" => {
                let (code, text) = self.resp_text()?;
                Ok(Untagged::Condition { status: RespStatus::No, code, text })
            }
            "BAD" => {
                let (code, text) = self.resp_text()?;
                Ok(Untagged::Condition { status: RespStatus::Bad, code, text })
            }
            "PREAUTH" => {
                let (code, text) = self.resp_text()?;
                Ok(Untagged::PreAuth { code, text })
            }
            "BYE" => {
                let (_, text) = self.resp_text()?;
                Ok(Untagged::Bye { text })
            }
            "CAPABILITY" => Ok(Untagged::Capability(self.capability_list())),
            "FLAGS" => {
                self.expect_space()?;
                Ok(Untagged::Flags(self.flag_list()?))
            }
            "LIST" => Ok(Untagged::List(self.list_item()?)),
            "LSUB" => Ok(Untagged::Lsub(self.list_item()?)),
            "STATUS" => self.status_response(),
            "SEARCH" => {
                let mut hits = Vec::new();
                while self.skip_space() && self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    hits.push(self.number()?);
                }
                Ok(Untagged::Search(hits))
            }
            _ => Ok(Untagged::Ignored(format!("{word} {}", self.rest_text()))),
        }
    }

    fn status(&mut self) -> Result<RespStatus> {
        let word = self.atom()?;
        match word.to_uppercase().as_str() {
            "OK" => Ok(RespStatus::Ok),
            "NO" => Ok(RespStatus::No),
            "BAD" => Ok(RespStatus::Bad),
            other => self.fail(format!("expected OK/NO/BAD, got {other}")),
        }
    }

    /// Parses `[code] text` after a status word.
    fn resp_text(&mut self) -> Result<(Option<ResponseCode>, String)> {
        self.skip_space();
        let code = if self.peek() == Some(b'[') {
            self.pos += 1;
            let code = self.response_code()?;
            if self.peek() == Some(b']') {
                self.pos += 1;
            }
            self.skip_space();
            Some(code)
        } else {
            None
        };
        Ok((code, self.rest_text()))
    }

    fn response_code(&mut self) -> Result<ResponseCode> {
        let word = self.atom()?;
        match word.to_uppercase().as_str() {
            "ALERT" => Ok(ResponseCode::Alert),
            "CAPABILITY" => {
                let mut caps = Vec::new();
                while self.skip_space() && self.peek() != Some(b']') {
                    caps.push(self.atom()?);
                }
                Ok(ResponseCode::Capability(caps))
            }
            "PERMANENTFLAGS" => {
                self.expect_space()?;
                let (flags, star) = self.flag_list_with_star()?;
                Ok(ResponseCode::PermanentFlags(flags, star))
            }
            "READ-ONLY" => Ok(ResponseCode::ReadOnly),
            "READ-WRITE" => Ok(ResponseCode::ReadWrite),
            "TRYCREATE" => Ok(ResponseCode::TryCreate),
            "UIDNEXT" => {
                self.expect_space()?;
                Ok(ResponseCode::UidNext(self.number()?))
            }
            "UIDVALIDITY" => {
                self.expect_space()?;
                Ok(ResponseCode::UidValidity(self.number()?))
            }
            "UNSEEN" => {
                self.expect_space()?;
                Ok(ResponseCode::Unseen(self.number()?))
            }
            _ => {
                // Swallow any arguments up to the closing bracket.
                while self.peek().is_some_and(|b| b != b']') {
                    self.pos += 1;
                }
                Ok(ResponseCode::Other(word))
            }
        }
    }

    fn capability_list(&mut self) -> Vec<String> {
        let mut caps = Vec::new();
        while self.skip_space() && !self.at_crlf() {
            if let Ok(atom) = self.atom() {
                caps.push(atom);
            } else {
                break;
            }
        }
        caps
    }

    fn list_item(&mut self) -> Result<ListItem> {
        self.expect_space()?;
        self.expect(b'(')?;
        let mut attributes = Vec::new();
        while self.peek() != Some(b')') {
            self.skip_space();
            if self.peek() == Some(b')') {
                break;
            }
            attributes.push(MailboxAttribute::from_wire(&self.atom()?));
        }
        self.expect(b')')?;
        self.expect_space()?;

        let delimiter = match self.nstring()? {
            Some(bytes) => String::from_utf8_lossy(&bytes).chars().next(),
            None => None,
        };
        self.expect_space()?;
        let raw_name = self.astring()?;
        Ok(ListItem { raw_name, delimiter, attributes })
    }

    fn status_response(&mut self) -> Result<Untagged> {
        self.expect_space()?;
        let raw_name = self.astring()?;
        self.expect_space()?;
        self.expect(b'(')?;
        let mut info = StatusInfo::default();
        while self.peek() != Some(b')') {
            self.skip_space();
            if self.peek() == Some(b')') {
                break;
            }
            let attr = self.atom()?;
            self.expect_space()?;
            let value = self.number()?;
            match attr.to_uppercase().as_str() {
                "MESSAGES" => info.messages = Some(value),
                "RECENT" => info.recent = Some(value),
                "UIDNEXT" => info.uid_next = Some(value),
                "UIDVALIDITY" => info.uid_validity = Some(value),
                "UNSEEN" => info.unseen = Some(value),
                _ => {}
            }
        }
        self.expect(b')')?;
        Ok(Untagged::Status { raw_name, info })
    }

    fn fetch_record(&mut self) -> Result<FetchRecord> {
        self.expect(b'(')?;
        let mut record = FetchRecord::default();
        loop {
            self.skip_space();
            if self.peek() == Some(b')') {
                self.pos += 1;
                break;
            }
            let name = self.fetch_att_name()?;
            let upper = name.to_uppercase();
            self.skip_space();
            match upper.as_str() {
                "UID" => record.uid = Some(self.number()?),
                "FLAGS" => record.flags = Some(self.flag_list()?),
                "RFC822.SIZE" => record.rfc822_size = Some(self.number()?),
                "INTERNALDATE" => {
                    let raw = self
                        .nstring()?
                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                        .unwrap_or_default();
                    record.internal_date = parse_internal_date(&raw);
                }
                "ENVELOPE" => record.envelope = Some(self.envelope()?),
                _ if upper.starts_with("BODY[") => {
                    let section = name["BODY[".len()..name.len() - 1].to_string();
                    let data = self.nstring()?.unwrap_or_default();
                    record.sections.push((section, data));
                }
                _ => self.skip_value()?,
            }
        }
        Ok(record)
    }

    /// Reads a fetch attribute name, including a bracketed section and an
    /// optional `<origin>` suffix.
    fn fetch_att_name(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'[' => {
                    while self.peek().is_some_and(|b| b != b']') {
                        self.pos += 1;
                    }
                    self.expect(b']')?;
                }
                b'<' => {
                    while self.peek().is_some_and(|b| b != b'>') {
                        self.pos += 1;
                    }
                    self.expect(b'>')?;
                }
                b' ' | b')' | b'\r' => break,
                _ => self.pos += 1,
            }
        }
        if self.pos == start {
            return self.fail("expected fetch attribute");
        }
        // Strip any partial suffix; the section key keeps only BODY[...].
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        Ok(name.split('<').next().unwrap_or(&name).to_string())
    }

    fn envelope(&mut self) -> Result<Envelope> {
        self.expect(b'(')?;
        let date = self.nstring_text()?;
        self.skip_space();
        let subject = self.nstring_text()?;
        self.skip_space();
        let from = self.address_list()?;
        // sender, reply-to, to, cc, bcc
        for _ in 0..5 {
            self.skip_space();
            self.skip_address_list()?;
        }
        self.skip_space();
        let _in_reply_to = self.nstring()?;
        self.skip_space();
        let message_id = self.nstring_text()?;
        self.skip_space();
        self.expect(b')')?;
        Ok(Envelope { date, subject, from, message_id })
    }

    /// Parses an address list, rendering only the first address.
    fn address_list(&mut self) -> Result<Option<String>> {
        if self.peek() != Some(b'(') {
            let _ = self.nstring()?; // NIL
            return Ok(None);
        }
        self.pos += 1;
        let mut first = None;
        while self.peek() == Some(b'(') {
            self.pos += 1;
            let name = self.nstring_text()?;
            self.skip_space();
            let _route = self.nstring()?;
            self.skip_space();
            let mailbox = self.nstring_text()?;
            self.skip_space();
            let host = self.nstring_text()?;
            self.expect(b')')?;
            self.skip_space();
            if first.is_none() {
                let addr = match (mailbox, host) {
                    (Some(m), Some(h)) => format!("{m}@{h}"),
                    (Some(m), None) => m,
                    _ => String::new(),
                };
                first = Some(match name {
                    Some(n) if !addr.is_empty() => format!("{n} <{addr}>"),
                    Some(n) => n,
                    None => addr,
                });
            }
        }
        self.expect(b')')?;
        Ok(first)
    }

    fn skip_address_list(&mut self) -> Result<()> {
        if self.peek() == Some(b'(') {
            self.skip_parenthesized()
        } else {
            self.nstring().map(|_| ())
        }
    }

    fn flag_list(&mut self) -> Result<Flags> {
        let (flags, _) = self.flag_list_with_star()?;
        Ok(flags)
    }

    fn flag_list_with_star(&mut self) -> Result<(Flags, bool)> {
        self.expect(b'(')?;
        let mut flags = Flags::new();
        let mut star = false;
        while self.peek() != Some(b')') {
            self.skip_space();
            if self.peek() == Some(b')') {
                break;
            }
            let atom = self.atom()?;
            if atom == "\\*" {
                star = true;
            } else {
                flags.insert(Flag::from_wire(&atom));
            }
        }
        self.expect(b')')?;
        Ok((flags, star))
    }

    /// Skips a value of unknown shape: parenthesized list, literal,
    /// quoted string, or atom.
    fn skip_value(&mut self) -> Result<()> {
        match self.peek() {
            Some(b'(') => self.skip_parenthesized(),
            Some(b'{' | b'"') => self.nstring().map(|_| ()),
            Some(_) => self.atom().map(|_| ()),
            None => self.fail("unexpected end of input"),
        }
    }

    fn skip_parenthesized(&mut self) -> Result<()> {
        self.expect(b'(')?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.peek() {
                Some(b'(') => {
                    depth += 1;
                    self.pos += 1;
                }
                Some(b')') => {
                    depth -= 1;
                    self.pos += 1;
                }
                Some(b'"' | b'{') => {
                    let _ = self.nstring()?;
                }
                Some(_) => self.pos += 1,
                None => return self.fail("unbalanced parentheses"),
            }
        }
        Ok(())
    }

    // === Token-level helpers ===

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn at_crlf(&self) -> bool {
        self.input[self.pos..].starts_with(b"\r\n")
    }

    fn expect(&mut self, b: u8) -> Result<()> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            self.fail(format!("expected {:?}", char::from(b)))
        }
    }

    fn expect_space(&mut self) -> Result<()> {
        self.expect(b' ')
    }

    fn skip_space(&mut self) -> bool {
        let mut any = false;
        while self.peek() == Some(b' ') {
            self.pos += 1;
            any = true;
        }
        any
    }

    fn atom(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'(' | b')' | b'[' | b']' | b'"' | b'\r' | b'\n') {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return self.fail("expected atom");
        }
        Ok(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn number(&mut self) -> Result<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return self.fail("expected number");
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .map_or_else(|| self.fail("number out of range"), Ok)
    }

    /// NIL, quoted string, or literal → optional bytes.
    fn nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.peek() {
            Some(b'"') => self.quoted().map(Some),
            Some(b'{') => self.literal().map(Some),
            _ => {
                let atom = self.atom()?;
                if atom.eq_ignore_ascii_case("NIL") {
                    Ok(None)
                } else {
                    Ok(Some(atom.into_bytes()))
                }
            }
        }
    }

    fn nstring_text(&mut self) -> Result<Option<String>> {
        Ok(self
            .nstring()?
            .map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// An astring in responses: atom, quoted string, or literal.
    fn astring(&mut self) -> Result<String> {
        match self.peek() {
            Some(b'"') => Ok(String::from_utf8_lossy(&self.quoted()?).into_owned()),
            Some(b'{') => Ok(String::from_utf8_lossy(&self.literal()?).into_owned()),
            _ => self.atom(),
        }
    }

    fn quoted(&mut self) -> Result<Vec<u8>> {
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            out.push(b);
                            self.pos += 1;
                        }
                        None => return self.fail("dangling escape"),
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                }
                None => return self.fail("unterminated quoted string"),
            }
        }
    }

    /// `{n}\r\n<n octets>`, as inlined by the framing layer.
    fn literal(&mut self) -> Result<Vec<u8>> {
        self.expect(b'{')?;
        let len = self.number()? as usize;
        if self.peek() == Some(b'+') {
            self.pos += 1;
        }
        self.expect(b'}')?;
        if !self.at_crlf() {
            return self.fail("literal header not followed by CRLF");
        }
        self.pos += 2;
        if self.input.len() < self.pos + len {
            return self.fail("literal truncated");
        }
        let data = self.input[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(data)
    }

    fn rest_text(&mut self) -> String {
        let rest = &self.input[self.pos..];
        let rest = rest.strip_suffix(b"\r\n").unwrap_or(rest);
        self.pos = self.input.len();
        String::from_utf8_lossy(rest).into_owned()
    }
}

/// Parses an IMAP date-time (`"14-Nov-2023 22:13:20 +0000"`, possibly with
/// a space-padded day) into UTC.
#[must_use]
pub fn parse_internal_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    DateTime::parse_from_str(trimmed, "%d-%b-%Y %H:%M:%S %z")
        .or_else(|_| DateTime::parse_from_str(trimmed, "%e-%b-%Y %H:%M:%S %z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tagged_ok_with_text() {
        let r = Response::parse(b"A0007 OK FETCH completed\r\n").unwrap();
        assert_eq!(
            r,
            Response::Tagged {
                tag: "A0007".into(),
                status: RespStatus::Ok,
                code: None,
                text: "FETCH completed".into(),
            }
        );
    }

    #[test]
    fn tagged_no_with_trycreate() {
        let r = Response::parse(b"A2 NO [TRYCREATE] mailbox does not exist\r\n").unwrap();
        let Response::Tagged { status, code, .. } = r else {
            panic!("not tagged");
        };
        assert_eq!(status, RespStatus::No);
        assert_eq!(code, Some(ResponseCode::TryCreate));
    }

    #[test]
    fn greeting_with_capability_code() {
        let r = Response::parse(b"* OK [CAPABILITY IMAP4rev1 AUTH=PLAIN AUTH=CRAM-MD5] ready\r\n")
            .unwrap();
        let Response::Untagged(Untagged::Condition { code, text, .. }) = r else {
            panic!("not a condition");
        };
        assert_eq!(
            code,
            Some(ResponseCode::Capability(vec![
                "IMAP4rev1".into(),
                "AUTH=PLAIN".into(),
                "AUTH=CRAM-MD5".into(),
            ]))
        );
        assert_eq!(text, "ready");
    }

    #[test]
    fn exists_and_recent() {
        assert_eq!(
            Response::parse(b"* 23 EXISTS\r\n").unwrap(),
            Response::Untagged(Untagged::Exists(23))
        );
        assert_eq!(
            Response::parse(b"* 0 RECENT\r\n").unwrap(),
            Response::Untagged(Untagged::Recent(0))
        );
    }

    #[test]
    fn flags_line() {
        let r = Response::parse(b"* FLAGS (\\Answered \\Seen NonJunk)\r\n").unwrap();
        let Response::Untagged(Untagged::Flags(flags)) = r else {
            panic!("not flags");
        };
        assert!(flags.contains(&Flag::Seen));
        assert!(flags.contains(&Flag::Keyword("NonJunk".into())));
    }

    #[test]
    fn permanentflags_with_star() {
        let r =
            Response::parse(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] limited\r\n").unwrap();
        let Response::Untagged(Untagged::Condition { code, .. }) = r else {
            panic!("not a condition");
        };
        let Some(ResponseCode::PermanentFlags(flags, star)) = code else {
            panic!("not permanentflags");
        };
        assert!(star);
        assert!(flags.contains(&Flag::Deleted));
        assert_eq!(flags.len(), 2);
    }

    #[test]
    fn list_row_quoted_name() {
        let r = Response::parse(b"* LIST (\\HasNoChildren) \"/\" \"Sent Items\"\r\n").unwrap();
        let Response::Untagged(Untagged::List(item)) = r else {
            panic!("not list");
        };
        assert_eq!(item.raw_name, "Sent Items");
        assert_eq!(item.delimiter, Some('/'));
        assert!(!item.may_have_children());
    }

    #[test]
    fn list_row_nil_delimiter() {
        let r = Response::parse(b"* LIST (\\Noselect) NIL foo\r\n").unwrap();
        let Response::Untagged(Untagged::List(item)) = r else {
            panic!("not list");
        };
        assert_eq!(item.delimiter, None);
        assert!(item.is_noselect());
    }

    #[test]
    fn list_row_literal_name() {
        let r = Response::parse(b"* LIST () \".\" {7}\r\nstrange\r\n").unwrap();
        let Response::Untagged(Untagged::List(item)) = r else {
            panic!("not list");
        };
        assert_eq!(item.raw_name, "strange");
    }

    #[test]
    fn status_counters() {
        let r = Response::parse(
            b"* STATUS INBOX (MESSAGES 231 UIDNEXT 44292 UIDVALIDITY 1700000000)\r\n",
        )
        .unwrap();
        let Response::Untagged(Untagged::Status { raw_name, info }) = r else {
            panic!("not status");
        };
        assert_eq!(raw_name, "INBOX");
        assert_eq!(info.messages, Some(231));
        assert_eq!(info.uid_next, Some(44292));
        assert_eq!(info.uid_validity, Some(1_700_000_000));
        assert_eq!(info.unseen, None);
    }

    #[test]
    fn fetch_scan_row() {
        let input = b"* 12 FETCH (UID 4827 RFC822.SIZE 4096 INTERNALDATE \"14-Nov-2023 22:13:20 +0000\" FLAGS (\\Seen) BODY[HEADER.FIELDS (MESSAGE-ID)] {33}\r\nMessage-ID: <abc@example.com>\r\n\r\n)\r\n";
        let r = Response::parse(input).unwrap();
        let Response::Untagged(Untagged::Fetch { seq, record }) = r else {
            panic!("not fetch");
        };
        assert_eq!(seq, 12);
        assert_eq!(record.uid, Some(4827));
        assert_eq!(record.rfc822_size, Some(4096));
        assert!(record.flags.as_ref().unwrap().contains(&Flag::Seen));
        let header = record.section("HEADER.FIELDS (MESSAGE-ID)").unwrap();
        assert!(header.starts_with(b"Message-ID:"));
        let date = record.internal_date.unwrap();
        assert_eq!(date.timestamp(), 1_700_000_000);
    }

    #[test]
    fn fetch_full_body_with_envelope() {
        let input = b"* 3 FETCH (UID 9 FLAGS () BODY[] {15}\r\nSubject: hi\r\n\r\n ENVELOPE (\"Tue, 14 Nov 2023 22:13:20 +0000\" \"hi\" ((\"Ann\" NIL \"ann\" \"example.com\")) NIL NIL NIL NIL NIL NIL \"<abc@example.com>\"))\r\n";
        let r = Response::parse(input).unwrap();
        let Response::Untagged(Untagged::Fetch { record, .. }) = r else {
            panic!("not fetch");
        };
        assert_eq!(record.body().unwrap(), b"Subject: hi\r\n\r\n");
        let env = record.envelope.unwrap();
        assert_eq!(env.subject.as_deref(), Some("hi"));
        assert_eq!(env.from.as_deref(), Some("Ann <ann@example.com>"));
        assert_eq!(env.message_id.as_deref(), Some("<abc@example.com>"));
    }

    #[test]
    fn fetch_unknown_attribute_is_skipped() {
        let input = b"* 1 FETCH (X-GM-MSGID 1278455344230334865 UID 4 FLAGS (\\Seen))\r\n";
        let r = Response::parse(input).unwrap();
        let Response::Untagged(Untagged::Fetch { record, .. }) = r else {
            panic!("not fetch");
        };
        assert_eq!(record.uid, Some(4));
    }

    #[test]
    fn continuation() {
        assert_eq!(
            Response::parse(b"+ Ready for literal\r\n").unwrap(),
            Response::Continuation { text: "Ready for literal".into() }
        );
        assert_eq!(
            Response::parse(b"+\r\n").unwrap(),
            Response::Continuation { text: String::new() }
        );
    }

    #[test]
    fn bye() {
        let r = Response::parse(b"* BYE server shutting down\r\n").unwrap();
        assert_eq!(
            r,
            Response::Untagged(Untagged::Bye { text: "server shutting down".into() })
        );
    }

    #[test]
    fn internal_date_space_padded_day() {
        let date = parse_internal_date(" 4-Nov-2023 01:02:03 +0200").unwrap();
        assert_eq!(date.to_rfc3339(), "2023-11-03T23:02:03+00:00");
    }

    #[test]
    fn unknown_untagged_is_ignored_not_fatal() {
        let r = Response::parse(b"* ID (\"name\" \"Dovecot\")\r\n").unwrap();
        assert!(matches!(r, Response::Untagged(Untagged::Ignored(_))));
    }
}
