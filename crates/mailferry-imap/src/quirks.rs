//! Server quirks and workarounds.
//!
//! Providers deviate from RFC 3501 in known ways. The session classifies
//! the server once the greeting and hostname are known and consults the
//! resulting [`ServerQuirks`] at the affected call sites.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

/// Known IMAP providers with specific quirks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerKind {
    /// Plain RFC 3501 server.
    #[default]
    Generic,
    /// Gmail (greeting starts with `Gimap ready`).
    Gmail,
    /// Yahoo Mail.
    Yahoo,
    /// Rackspace hosted mail.
    Rackspace,
}

fn yahoo_host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a literal
        Regex::new(r"^imap(?:-ssl)?\.mail\.yahoo\.com$").unwrap()
    })
}

fn rackspace_host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a literal
        Regex::new(r"emailsrvr\.com").unwrap()
    })
}

impl ServerKind {
    /// Classifies a server from its hostname and greeting text.
    #[must_use]
    pub fn detect(host: &str, greeting: &str) -> Self {
        if greeting.starts_with("Gimap ready") {
            return Self::Gmail;
        }
        if yahoo_host_re().is_match(host) {
            return Self::Yahoo;
        }
        if rackspace_host_re().is_match(host) {
            return Self::Rackspace;
        }
        Self::Generic
    }
}

/// Behavior switches derived from the detected server kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerQuirks {
    /// The detected provider.
    pub kind: ServerKind,
}

impl ServerQuirks {
    /// Builds the quirk set for a server.
    #[must_use]
    pub fn detect(host: &str, greeting: &str) -> Self {
        Self { kind: ServerKind::detect(host, greeting) }
    }

    /// Mailbox that deletions must be copied into before flagging
    /// `\Deleted`. Gmail ignores `\Deleted` outside its trash label.
    #[must_use]
    pub const fn delete_via_trash(&self) -> Option<&'static str> {
        match self.kind {
            ServerKind::Gmail => Some("[Gmail]/Trash"),
            _ => None,
        }
    }

    /// True when an `ID ("guid" "1")` must be sent before authenticating.
    #[must_use]
    pub const fn needs_pre_auth_id(&self) -> bool {
        matches!(self.kind, ServerKind::Yahoo)
    }

    /// True for UID FETCH failures that should be logged and skipped
    /// rather than retried. Gmail intermittently refuses FETCHes of
    /// certain messages with this fixed string.
    #[must_use]
    pub fn tolerates_fetch_error(&self, message: &str) -> bool {
        self.kind == ServerKind::Gmail
            && message.contains("Some messages could not be FETCHed (Failure)")
    }

    /// Applies the provider's mailbox namespace mapping. Rackspace keeps
    /// every folder under `INBOX.`; other providers pass through.
    #[must_use]
    pub fn map_mailbox(&self, name: &str) -> String {
        if self.kind != ServerKind::Rackspace {
            return name.to_string();
        }
        if name.eq_ignore_ascii_case("INBOX") || name.starts_with("INBOX.") {
            return name.to_string();
        }
        let mapped = format!("INBOX.{name}");
        // Lossy for hierarchies rooted elsewhere; make that visible.
        warn!(original = name, mapped = %mapped, "rewriting mailbox into the INBOX namespace");
        mapped
    }
}
