//! Modified UTF-7 mailbox name encoding (RFC 3501 §5.1.3).
//!
//! Every mailbox name crossing the wire is encoded on the way out and
//! decoded on the way in; higher layers only ever see UTF-8.

/// Encodes a UTF-8 mailbox name into its wire (modified UTF-7) form.
#[must_use]
pub fn encode(name: &str) -> String {
    utf7_imap::encode_utf7_imap(name.to_string())
}

/// Decodes a wire (modified UTF-7) mailbox name into UTF-8.
#[must_use]
pub fn decode(wire: &str) -> String {
    utf7_imap::decode_utf7_imap(wire.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(encode("INBOX"), "INBOX");
        assert_eq!(decode("Sent Items"), "Sent Items");
    }

    #[test]
    fn ampersand_is_escaped() {
        assert_eq!(encode("Tom & Jerry"), "Tom &- Jerry");
        assert_eq!(decode("Tom &- Jerry"), "Tom & Jerry");
    }

    #[test]
    fn japanese_round_trip() {
        let name = "円グラフ良いです";
        let wire = "&UYYwsDDpMNWCbzBEMGcwWQ-";
        assert_eq!(encode(name), wire);
        assert_eq!(decode(wire), name);
    }

    #[test]
    fn mixed_segments() {
        assert_eq!(decode("~peter/mail/&U,BTFw-/&ZeVnLIqe-"), "~peter/mail/台北/日本語");
    }

    proptest::proptest! {
        #[test]
        fn encode_decode_round_trips(name in "[\\PC]{0,40}") {
            proptest::prop_assert_eq!(decode(&encode(&name)), name);
        }
    }
}
