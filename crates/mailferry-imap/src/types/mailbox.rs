//! Mailbox metadata: LIST attributes, listing rows, and open-mailbox state.

use super::flags::Flags;

/// Server attribute on a LIST / LSUB row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxAttribute {
    /// Mailbox cannot be selected; it only exists as a hierarchy node.
    Noselect,
    /// Mailbox cannot have children.
    Noinferiors,
    /// Mailbox has no children.
    Hasnochildren,
    /// Mailbox has children.
    Haschildren,
    /// Marked as containing recent messages.
    Marked,
    /// Explicitly unmarked.
    Unmarked,
    /// Any other attribute, kept verbatim.
    Other(String),
}

impl MailboxAttribute {
    /// Parses an attribute from its wire form (`\Noselect` etc).
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "\\NOSELECT" => Self::Noselect,
            "\\NOINFERIORS" => Self::Noinferiors,
            "\\HASNOCHILDREN" => Self::Hasnochildren,
            "\\HASCHILDREN" => Self::Haschildren,
            "\\MARKED" => Self::Marked,
            "\\UNMARKED" => Self::Unmarked,
            _ => Self::Other(s.to_string()),
        }
    }

    /// Returns the attribute in wire form.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Noselect => "\\Noselect",
            Self::Noinferiors => "\\Noinferiors",
            Self::Hasnochildren => "\\HasNoChildren",
            Self::Haschildren => "\\HasChildren",
            Self::Marked => "\\Marked",
            Self::Unmarked => "\\Unmarked",
            Self::Other(s) => s,
        }
    }
}

/// One row of a LIST or LSUB response.
///
/// The name is kept exactly as received (modified UTF-7); decoding happens
/// in the account layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// Raw mailbox name in modified UTF-7.
    pub raw_name: String,
    /// Hierarchy delimiter, or `None` for a flat namespace.
    pub delimiter: Option<char>,
    /// Attributes on the row.
    pub attributes: Vec<MailboxAttribute>,
}

impl ListItem {
    /// True when the mailbox rejects SELECT / EXAMINE.
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

/// State extracted from the untagged responses of SELECT / EXAMINE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectInfo {
    /// Number of messages in the mailbox.
    pub exists: u32,
    /// Number of recent messages.
    pub recent: u32,
    /// Flags defined in the mailbox.
    pub flags: Flags,
    /// Flags the client may change permanently. A `\*` entry is reported
    /// through [`SelectInfo::accepts_new_keywords`].
    pub permanent_flags: Flags,
    /// True when PERMANENTFLAGS contained `\*`.
    pub accepts_new_keywords: bool,
    /// UIDVALIDITY response code value.
    pub uid_validity: Option<u32>,
    /// UIDNEXT response code value.
    pub uid_next: Option<u32>,
    /// First unseen message, when reported.
    pub unseen: Option<u32>,
    /// True when the mailbox was opened read-only.
    pub read_only: bool,
}

impl SelectInfo {
    /// Union of FLAGS and PERMANENTFLAGS: everything the server will
    /// accept in an APPEND or STORE.
    #[must_use]
    pub fn accepted_flags(&self) -> Flags {
        let mut all = self.flags.clone();
        for flag in self.permanent_flags.iter() {
            all.insert(flag.clone());
        }
        all
    }
}

/// Integer counters returned by STATUS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusInfo {
    /// MESSAGES attribute.
    pub messages: Option<u32>,
    /// RECENT attribute.
    pub recent: Option<u32>,
    /// UIDNEXT attribute.
    pub uid_next: Option<u32>,
    /// UIDVALIDITY attribute.
    pub uid_validity: Option<u32>,
    /// UNSEEN attribute.
    pub unseen: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::flags::Flag;

    #[test]
    fn attribute_parse() {
        assert_eq!(MailboxAttribute::from_wire("\\Noselect"), MailboxAttribute::Noselect);
        assert_eq!(MailboxAttribute::from_wire("\\NOSELECT"), MailboxAttribute::Noselect);
        assert_eq!(
            MailboxAttribute::from_wire("\\XSpecial"),
            MailboxAttribute::Other("\\XSpecial".into())
        );
    }

    #[test]
    fn descend_gating() {
        let open = ListItem {
            raw_name: "Work".into(),
            delimiter: Some('/'),
            attributes: vec![MailboxAttribute::Haschildren],
        };
        assert!(open.may_have_children());

        let leaf = ListItem {
            raw_name: "Work/Done".into(),
            delimiter: Some('/'),
            attributes: vec![MailboxAttribute::Hasnochildren],
        };
        assert!(!leaf.may_have_children());

        let flat = ListItem {
            raw_name: "Chatter".into(),
            delimiter: None,
            attributes: vec![MailboxAttribute::Noinferiors],
        };
        assert!(!flat.may_have_children());
    }

    #[test]
    fn accepted_flags_union() {
        let info = SelectInfo {
            flags: Flags::from_vec(vec![Flag::Seen]),
            permanent_flags: Flags::from_vec(vec![Flag::Seen, Flag::Deleted]),
            ..SelectInfo::default()
        };
        let accepted = info.accepted_flags();
        assert!(accepted.contains(&Flag::Seen));
        assert!(accepted.contains(&Flag::Deleted));
        assert_eq!(accepted.len(), 2);
    }
}
