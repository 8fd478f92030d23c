//! Message flags and their wire / catalog forms.

/// A message flag.
///
/// System flags carry a backslash on the wire (`\Seen`); keyword flags are
/// bare atoms. In the catalog the system flags are stored as bare tokens
/// and keywords gain a `$` prefix so the two namespaces cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read.
    Seen,
    /// Message has been answered.
    Answered,
    /// Message is flagged for special attention.
    Flagged,
    /// Message is marked for deletion.
    Deleted,
    /// Message is a draft.
    Draft,
    /// Message is recent. Never appendable.
    Recent,
    /// Keyword flag, stored without any prefix.
    Keyword(String),
}

impl Flag {
    /// Parses a flag from its wire form.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }

    /// Returns the flag in its wire form.
    #[must_use]
    pub fn as_wire(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }

    /// Returns the flag in its catalog token form.
    #[must_use]
    pub fn to_catalog(&self) -> String {
        match self {
            Self::Keyword(s) => format!("${s}"),
            system => system.as_wire().trim_start_matches('\\').to_string(),
        }
    }

    /// Parses a flag from its catalog token form.
    #[must_use]
    pub fn from_catalog(token: &str) -> Self {
        token.strip_prefix('$').map_or_else(
            || Self::from_wire(&format!("\\{token}")),
            |kw| Self::Keyword(kw.to_string()),
        )
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// An ordered set of message flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags(Vec<Flag>);

impl Flags {
    /// Creates an empty flag set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a flag set from a vector.
    #[must_use]
    pub fn from_vec(flags: Vec<Flag>) -> Self {
        let mut set = Self::new();
        for flag in flags {
            set.insert(flag);
        }
        set
    }

    /// Adds a flag if not already present.
    pub fn insert(&mut self, flag: Flag) {
        if !self.0.contains(&flag) {
            self.0.push(flag);
        }
    }

    /// Removes a flag.
    pub fn remove(&mut self, flag: &Flag) {
        self.0.retain(|f| f != flag);
    }

    /// Returns true if the flag is present.
    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }

    /// Returns true if the message is marked for deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.contains(&Flag::Deleted)
    }

    /// Returns an iterator over the flags.
    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Returns the number of flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no flags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serializes to the comma-joined catalog form.
    ///
    /// The rendering is order-insensitive: tokens are sorted so two sets
    /// with the same members always produce the same string.
    #[must_use]
    pub fn to_catalog(&self) -> String {
        let mut tokens: Vec<String> = self.0.iter().map(Flag::to_catalog).collect();
        tokens.sort();
        tokens.join(",")
    }

    /// Parses the comma-joined catalog form.
    #[must_use]
    pub fn from_catalog(s: &str) -> Self {
        Self::from_vec(
            s.split(',')
                .filter(|t| !t.is_empty())
                .map(Flag::from_catalog)
                .collect(),
        )
    }

    /// Returns the flags suitable for APPEND or STORE at a destination:
    /// `\Recent` removed, and any flag the destination does not accept
    /// dropped. `accepted` comes from the destination's FLAGS /
    /// PERMANENTFLAGS responses; a permanent `\*` entry admits arbitrary
    /// keywords.
    #[must_use]
    pub fn filtered_for(&self, accepted: &Flags, allow_new_keywords: bool) -> (Self, Vec<Flag>) {
        let mut kept = Self::new();
        let mut dropped = Vec::new();
        for flag in &self.0 {
            if *flag == Flag::Recent {
                continue;
            }
            let ok = accepted.contains(flag)
                || (allow_new_keywords && matches!(flag, Flag::Keyword(_)));
            if ok {
                kept.insert(flag.clone());
            } else {
                dropped.push(flag.clone());
            }
        }
        (kept, dropped)
    }
}

impl IntoIterator for Flags {
    type Item = Flag;
    type IntoIter = std::vec::IntoIter<Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}
