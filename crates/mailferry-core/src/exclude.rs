//! Mailbox exclusion filters.
//!
//! Patterns are either globs (`*` and `?` wildcards) or `/…/`-delimited
//! regular expressions; both match case-insensitively against the full
//! mailbox name.

use std::path::Path;

use regex::Regex;

use crate::{Error, Result};

/// A compiled set of exclusion patterns.
#[derive(Debug, Default)]
pub struct ExcludeList {
    patterns: Vec<Regex>,
}

impl ExcludeList {
    /// Compiles a list of pattern strings.
    ///
    /// # Errors
    ///
    /// [`Error::Pattern`] on an uncompilable pattern.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            compiled.push(compile_one(pattern.as_ref())?);
        }
        Ok(Self { patterns: compiled })
    }

    /// Reads additional patterns from a file: one per line, `#` comments
    /// and blank lines skipped.
    ///
    /// # Errors
    ///
    /// I/O errors reading the file; [`Error::Pattern`] on a bad line.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.patterns.push(compile_one(line)?);
        }
        Ok(())
    }

    /// True when the mailbox name matches any pattern.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }

    /// Number of compiled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no patterns are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// `/…/` lines (with an optional trailing flag run, e.g. `/^trash$/i`)
/// compile as regex; anything else as a glob anchored to the whole name.
fn compile_one(pattern: &str) -> Result<Regex> {
    let source = regex_pattern(pattern).unwrap_or_else(|| glob_to_regex(pattern));

    Regex::new(&format!("(?i){source}")).map_err(|e| Error::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Splits a `/source/flags` pattern into an inline-flagged regex source.
/// Matching is case-insensitive across the board, so an `i` flag is
/// absorbed; `m`, `s`, and `x` fold into an inline `(?…)` group.
fn regex_pattern(pattern: &str) -> Option<String> {
    let rest = pattern.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let (inner, flags) = (&rest[..close], &rest[close + 1..]);
    if inner.is_empty() || !flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'x')) {
        return None;
    }
    let extra: String = flags.chars().filter(|&c| c != 'i').collect();
    if extra.is_empty() {
        Some(inner.to_string())
    } else {
        Some(format!("(?{extra}){inner}"))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_is_anchored_and_case_insensitive() {
        let list = ExcludeList::compile(&["Spam", "Lists/*"]).unwrap();
        assert!(list.matches("Spam"));
        assert!(list.matches("SPAM"));
        assert!(!list.matches("Spammer"));
        assert!(list.matches("Lists/rust-users"));
        assert!(!list.matches("Lists"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let list = ExcludeList::compile(&["Draft?"]).unwrap();
        assert!(list.matches("Drafts"));
        assert!(!list.matches("Draft"));
        assert!(!list.matches("Draftses"));
    }

    #[test]
    fn regex_patterns_are_unanchored() {
        let list = ExcludeList::compile(&["/^trash$/"]).unwrap();
        assert!(list.matches("Trash"));
        assert!(list.matches("trash"));
        assert!(!list.matches("Trashcan"));

        let list = ExcludeList::compile(&["/archiv/"]).unwrap();
        assert!(list.matches("Archive/2019"));
    }

    #[test]
    fn regex_flag_suffixes_are_parsed() {
        // An explicit `i` flag is redundant but must still parse as regex.
        let list = ExcludeList::compile(&["/^trash$/i"]).unwrap();
        assert!(list.matches("Trash"));
        assert!(list.matches("TRASH"));
        assert!(!list.matches("Trashcan"));

        let list = ExcludeList::compile(&["/^spam #folder$/x"]).unwrap();
        assert!(list.matches("spam"));

        // An unknown flag run means the line is not a regex.
        let list = ExcludeList::compile(&["/foo/bar"]).unwrap();
        assert!(list.matches("/foo/bar"));
        assert!(!list.matches("foo"));
    }

    #[test]
    fn glob_escapes_regex_metacharacters() {
        let list = ExcludeList::compile(&["[Gmail]/All Mail"]).unwrap();
        assert!(list.matches("[Gmail]/All Mail"));
        assert!(!list.matches("Gmail/All Mail"));
    }

    #[test]
    fn bad_regex_is_reported_with_its_pattern() {
        let err = ExcludeList::compile(&["/((/"]).unwrap_err();
        assert!(matches!(err, Error::Pattern { .. }));
        assert!(err.to_string().contains("((") );
    }

    #[test]
    fn file_lines_with_comments() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("mailferry-exclude-{}.txt", std::process::id()));
        std::fs::write(&path, "# comment\n\nSpam\n/^trash$/\nLists/*\n").unwrap();

        let mut list = ExcludeList::default();
        list.load_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(list.len(), 3);
        assert!(list.matches("spam"));
        assert!(list.matches("TRASH"));
        assert!(list.matches("Lists/x"));
        assert!(!list.matches("INBOX"));
    }

    #[test]
    fn scenario_filter() {
        // exclude: ["Spam", "/^trash$/i"] over INBOX, Spam, Trash, Work.
        let list = ExcludeList::compile(&["Spam", "/^trash$/i"]).unwrap();
        let kept: Vec<&str> = ["INBOX", "Spam", "Trash", "Work"]
            .into_iter()
            .filter(|name| !list.matches(name))
            .collect();
        assert_eq!(kept, vec!["INBOX", "Work"]);
    }
}
