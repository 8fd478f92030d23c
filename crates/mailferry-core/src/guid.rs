//! Cross-server message identity.
//!
//! A message's GUID must come out identical on the source and the
//! destination, whatever UIDs the servers assigned. When a Message-ID
//! header exists its bracketed value is hashed; otherwise size and
//! arrival time stand in.

/// Computes the GUID for a message.
///
/// `message_id` is the raw `Message-ID:` header value when one was
/// fetched; `size` is RFC822.SIZE; `internal_date` is INTERNALDATE as
/// Unix seconds.
#[must_use]
pub fn message_guid(message_id: Option<&str>, size: u32, internal_date: i64) -> String {
    match message_id.and_then(normalize_message_id) {
        Some(id) => format!("{:x}", md5::compute(id.as_bytes())),
        None => format!("{:x}", md5::compute(format!("{size}{internal_date}").as_bytes())),
    }
}

/// Extracts the identifying token from a Message-ID header value: the
/// contents of the `<…>` bracket, or the first whitespace-delimited token
/// when unbracketed. Returns `None` for values with nothing usable.
fn normalize_message_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(open) = trimmed.find('<') {
        if let Some(close) = trimmed[open + 1..].find('>') {
            let inner = &trimmed[open + 1..open + 1 + close];
            if !inner.is_empty() {
                return Some(inner.to_string());
            }
        }
    }
    trimmed
        .split_whitespace()
        .next()
        .map(str::to_string)
        .filter(|t| !t.is_empty())
}

/// Pulls the value of a `Message-ID:` header out of a fetched header
/// block (the payload of `BODY[HEADER.FIELDS (MESSAGE-ID)]`), unfolding
/// continuation lines.
#[must_use]
pub fn message_id_from_headers(headers: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(headers);
    let mut value: Option<String> = None;
    for line in text.lines() {
        if let Some(current) = value.as_mut() {
            // RFC 5322 folding: continuation lines start with whitespace.
            if line.starts_with(' ') || line.starts_with('\t') {
                current.push(' ');
                current.push_str(line.trim());
                continue;
            }
            break;
        }
        if let Some((name, rest)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Message-ID") {
                value = Some(rest.trim().to_string());
            }
        }
    }
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_id_hashes_inner_value() {
        let guid = message_guid(Some("<abc@example.com>"), 1, 2);
        assert_eq!(guid, format!("{:x}", md5::compute(b"abc@example.com")));
    }

    #[test]
    fn unbracketed_id_uses_first_token() {
        let guid = message_guid(Some("abc@example.com (old mailer)"), 1, 2);
        assert_eq!(guid, format!("{:x}", md5::compute(b"abc@example.com")));
    }

    #[test]
    fn missing_id_falls_back_to_size_and_date() {
        let guid = message_guid(None, 4096, 1_700_000_000);
        assert_eq!(guid, format!("{:x}", md5::compute(b"40961700000000")));
    }

    #[test]
    fn empty_id_falls_back_too() {
        assert_eq!(
            message_guid(Some("   "), 4096, 1_700_000_000),
            message_guid(None, 4096, 1_700_000_000)
        );
        assert_eq!(
            message_guid(Some("<>"), 4096, 1_700_000_000),
            message_guid(None, 4096, 1_700_000_000)
        );
    }

    #[test]
    fn guid_is_deterministic() {
        let a = message_guid(Some("<x@y>"), 10, 20);
        let b = message_guid(Some("<x@y>"), 10, 20);
        assert_eq!(a, b);
    }

    #[test]
    fn same_size_and_date_collide_without_id() {
        // Two ID-less messages with equal size and arrival time are the
        // same message as far as the catalog can tell.
        assert_eq!(message_guid(None, 4096, 1_700_000_000), message_guid(None, 4096, 1_700_000_000));
    }

    #[test]
    fn header_block_extraction() {
        let block = b"Message-ID: <abc@example.com>\r\n\r\n";
        assert_eq!(message_id_from_headers(block).unwrap(), "<abc@example.com>");
    }

    #[test]
    fn folded_header_is_unfolded() {
        let block = b"Message-Id:\r\n <long-id@host.example>\r\n\r\n";
        assert_eq!(
            message_id_from_headers(block).unwrap(),
            "<long-id@host.example>"
        );
    }

    #[test]
    fn absent_header_is_none() {
        assert_eq!(message_id_from_headers(b"\r\n"), None);
        assert_eq!(message_id_from_headers(b"Subject: hi\r\n\r\n"), None);
    }

    proptest::proptest! {
        #[test]
        fn guid_never_panics(id in proptest::option::of("[ -~]{0,60}"), size: u32, date: i64) {
            let _ = message_guid(id.as_deref(), size, date);
        }
    }
}
