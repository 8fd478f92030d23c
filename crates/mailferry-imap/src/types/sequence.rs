//! UID sets for UID FETCH / STORE / COPY commands.

/// A set of message UIDs in wire syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UidSet {
    /// A single UID.
    Single(u32),
    /// A closed range, inclusive on both ends.
    Range(u32, u32),
    /// A half-open range `lo:*` reaching the highest UID in the mailbox.
    From(u32),
    /// An explicit list of UIDs.
    List(Vec<u32>),
}

impl UidSet {
    /// Builds the smallest set covering a run of UIDs.
    #[must_use]
    pub const fn range(lo: u32, hi: u32) -> Self {
        if lo == hi { Self::Single(lo) } else { Self::Range(lo, hi) }
    }

    /// Number of UIDs the set names, when finite.
    #[must_use]
    pub fn len(&self) -> Option<u64> {
        match self {
            Self::Single(_) => Some(1),
            Self::Range(lo, hi) => Some(u64::from(hi.saturating_sub(*lo)) + 1),
            Self::From(_) => None,
            Self::List(uids) => Some(uids.len() as u64),
        }
    }

    /// True when the set is empty (an empty explicit list).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::List(uids) if uids.is_empty())
    }
}

impl std::fmt::Display for UidSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(uid) => write!(f, "{uid}"),
            Self::Range(lo, hi) => write!(f, "{lo}:{hi}"),
            Self::From(lo) => write!(f, "{lo}:*"),
            Self::List(uids) => {
                let parts: Vec<String> = uids.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<u32> for UidSet {
    fn from(uid: u32) -> Self {
        Self::Single(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_forms() {
        assert_eq!(UidSet::Single(7).to_string(), "7");
        assert_eq!(UidSet::Range(1, 1024).to_string(), "1:1024");
        assert_eq!(UidSet::From(4000).to_string(), "4000:*");
        assert_eq!(UidSet::List(vec![1, 5, 9]).to_string(), "1,5,9");
    }

    #[test]
    fn range_collapses_to_single() {
        assert_eq!(UidSet::range(3, 3), UidSet::Single(3));
        assert_eq!(UidSet::range(3, 9), UidSet::Range(3, 9));
    }

    #[test]
    fn lengths() {
        assert_eq!(UidSet::Single(7).len(), Some(1));
        assert_eq!(UidSet::Range(1, 1024).len(), Some(1024));
        assert_eq!(UidSet::From(1).len(), None);
        assert_eq!(UidSet::List(vec![]).len(), Some(0));
        assert!(UidSet::List(vec![]).is_empty());
    }
}
