//! High-level IMAP session: lazy connect, authentication, quirk
//! detection, retry with backoff, and the open-mailbox state machine.
//!
//! Every operation goes through [`Session::safely`], which (re)establishes
//! the connection, restores the desired mailbox, runs the operation, and
//! classifies failures into reconnect-retry, in-place retry, or surfacing.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::client::WireClient;
use crate::quirks::ServerQuirks;
use crate::stream::{self, ImapStream, TlsOptions};
use crate::types::SelectInfo;
use crate::uri::ImapUri;
use crate::{Error, Result};

/// Option bag carried by every session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// TLS verification settings.
    pub tls: TlsOptions,
    /// Retry cap for the `safely` envelope.
    pub max_retries: u32,
    /// Suppress mutating commands downstream; scans still run.
    pub dry_run: bool,
    /// Create missing mailboxes instead of failing.
    pub create_mailbox: bool,
    /// Open the URI mailbox with EXAMINE instead of SELECT.
    pub read_only: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tls: TlsOptions::verified(),
            max_retries: 3,
            dry_run: false,
            create_mailbox: true,
            read_only: false,
        }
    }
}

/// What is (or should be) open on the wire. At most one mailbox per
/// session, per the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MailboxState {
    /// No mailbox open.
    #[default]
    Closed,
    /// Mailbox open read-only via EXAMINE.
    Examined(String),
    /// Mailbox open read-write via SELECT.
    Selected(String),
}

impl MailboxState {
    /// The open mailbox name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Closed => None,
            Self::Examined(name) | Self::Selected(name) => Some(name),
        }
    }
}

/// An authenticated IMAP connection with automatic recovery.
pub struct Session {
    uri: ImapUri,
    options: SessionOptions,
    client: Option<WireClient<ImapStream>>,
    quirks: ServerQuirks,
    /// State actually established on the wire.
    open: MailboxState,
    /// State operations expect; restored after every reconnect.
    want: MailboxState,
    /// Untagged state from the most recent SELECT / EXAMINE.
    last_select: Option<SelectInfo>,
}

impl Session {
    /// Creates a session; no I/O happens until the first operation.
    #[must_use]
    pub fn new(uri: ImapUri, options: SessionOptions) -> Self {
        let want = match &uri.mailbox {
            Some(name) if options.read_only => MailboxState::Examined(name.clone()),
            Some(name) => MailboxState::Selected(name.clone()),
            None => MailboxState::Closed,
        };
        Self {
            uri,
            options,
            client: None,
            quirks: ServerQuirks::default(),
            open: MailboxState::Closed,
            want,
            last_select: None,
        }
    }

    /// The session's URI.
    #[must_use]
    pub const fn uri(&self) -> &ImapUri {
        &self.uri
    }

    /// The session's options.
    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Quirks detected at connect time; default until then.
    #[must_use]
    pub const fn quirks(&self) -> ServerQuirks {
        self.quirks
    }

    /// Untagged state from the most recent mailbox open.
    #[must_use]
    pub const fn select_info(&self) -> Option<&SelectInfo> {
        self.last_select.as_ref()
    }

    /// True when a socket is established.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Connects and authenticates eagerly (the pool calls this before
    /// handing a session out).
    ///
    /// # Errors
    ///
    /// Propagates connect/auth failure after retries.
    pub async fn start(&mut self) -> Result<()> {
        self.safely(async |_, _| Ok(())).await
    }

    /// Runs `op` inside the retry envelope. The closure receives the wire
    /// client with the desired mailbox already restored, plus the quirk
    /// set.
    ///
    /// # Errors
    ///
    /// Surfaces the operation's error once retries are exhausted or when
    /// it is not retryable.
    pub async fn safely<T>(
        &mut self,
        mut op: impl AsyncFnMut(&mut WireClient<ImapStream>, ServerQuirks) -> Result<T>,
    ) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            let result = match self.ensure_ready().await {
                Ok(()) => {
                    let quirks = self.quirks;
                    match self.client.as_mut() {
                        Some(client) => op(client, quirks).await,
                        None => Err(Error::NotConnected),
                    }
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_fatal() || attempt >= self.options.max_retries {
                return Err(err);
            }
            attempt += 1;
            let delay = Duration::from_secs(u64::from(attempt));

            if err.needs_reconnect() {
                warn!(
                    server = %self.uri,
                    attempt,
                    error = %err,
                    "connection lost; reconnecting"
                );
                self.drop_connection();
            } else if err.is_transient() {
                debug!(server = %self.uri, attempt, error = %err, "transient server error; retrying");
            } else {
                return Err(err);
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Examines (read-only) a mailbox, transitioning through Closed.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxNotFound`] when the mailbox is missing.
    pub async fn examine(&mut self, mailbox: &str) -> Result<SelectInfo> {
        self.want = MailboxState::Examined(mailbox.to_string());
        self.safely(async |_, _| Ok(())).await?;
        self.last_select
            .clone()
            .ok_or_else(|| Error::Protocol("EXAMINE produced no state".to_string()))
    }

    /// Selects (read-write) a mailbox, transitioning through Closed.
    ///
    /// # Errors
    ///
    /// [`Error::MailboxNotFound`] when the mailbox is missing.
    pub async fn select(&mut self, mailbox: &str) -> Result<SelectInfo> {
        self.want = MailboxState::Selected(mailbox.to_string());
        self.safely(async |_, _| Ok(())).await?;
        self.last_select
            .clone()
            .ok_or_else(|| Error::Protocol("SELECT produced no state".to_string()))
    }

    /// Closes the open mailbox, if any. CLOSE is used from the selected
    /// state (and silently expunges); UNSELECT from examined.
    ///
    /// # Errors
    ///
    /// Propagates command failure.
    pub async fn close_mailbox(&mut self) -> Result<()> {
        self.want = MailboxState::Closed;
        self.last_select = None;
        if self.client.is_some() {
            self.safely(async |_, _| Ok(())).await?;
        }
        Ok(())
    }

    /// The mailbox state this session is maintaining.
    #[must_use]
    pub const fn mailbox_state(&self) -> &MailboxState {
        &self.want
    }

    /// Logs out politely and drops the socket.
    pub async fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.logout().await;
        }
        self.open = MailboxState::Closed;
        self.last_select = None;
    }

    /// Drops the socket without a goodbye; used on reconnect.
    pub fn drop_connection(&mut self) {
        self.client = None;
        self.open = MailboxState::Closed;
        self.last_select = None;
    }

    // === Connection establishment ===

    async fn ensure_ready(&mut self) -> Result<()> {
        if self.client.is_none() {
            self.connect_and_authenticate().await?;
        }
        self.restore_mailbox().await
    }

    async fn connect_and_authenticate(&mut self) -> Result<()> {
        let host = self.uri.host.clone();
        let stream = if self.uri.tls {
            stream::connect_tls(&host, self.uri.port, &self.options.tls).await?
        } else {
            stream::connect_plain(&host, self.uri.port).await?
        };

        let mut client = WireClient::from_stream(stream).await?;
        self.quirks = ServerQuirks::detect(&host, client.greeting());
        client.ensure_capabilities().await?;

        if !self.uri.tls && client.has_capability("STARTTLS") {
            client = client.starttls(&host, &self.options.tls).await?;
        }

        if self.quirks.needs_pre_auth_id() {
            if let Err(e) = client.id(&[("guid", "1")]).await {
                warn!(server = %self.uri, error = %e, "ID handshake refused; continuing");
            }
        }

        if !client.is_pre_authenticated() {
            authenticate(&mut client, &self.uri.username, &self.uri.password).await?;
        }
        info!(server = %self.uri, "connected and authenticated");

        self.client = Some(client);
        self.open = MailboxState::Closed;
        self.last_select = None;
        Ok(())
    }

    /// Re-establishes `want` on the wire, passing through Closed so the
    /// FLAGS / PERMANENTFLAGS state is fresh after every transition.
    async fn restore_mailbox(&mut self) -> Result<()> {
        if self.open == self.want {
            return Ok(());
        }
        let client = self.client.as_mut().ok_or(Error::NotConnected)?;

        match std::mem::take(&mut self.open) {
            MailboxState::Closed => {}
            MailboxState::Selected(_) => {
                client.close().await?;
            }
            MailboxState::Examined(name) => {
                if client.has_capability("UNSELECT") {
                    client.unselect().await?;
                } else {
                    // No expunge risk: re-EXAMINE pins read-only, then CLOSE.
                    client.examine(&self.quirks.map_mailbox(&name)).await?;
                    client.close().await?;
                }
            }
        }
        self.last_select = None;

        match self.want.clone() {
            MailboxState::Closed => {}
            MailboxState::Examined(name) => {
                let info = client.examine(&self.quirks.map_mailbox(&name)).await?;
                self.open = MailboxState::Examined(name);
                self.last_select = Some(info);
            }
            MailboxState::Selected(name) => {
                let info = client.select(&self.quirks.map_mailbox(&name)).await?;
                self.open = MailboxState::Selected(name);
                self.last_select = Some(info);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uri", &self.uri.to_string())
            .field("connected", &self.is_connected())
            .field("mailbox", &self.want)
            .finish_non_exhaustive()
    }
}

/// Tries PLAIN, LOGIN, CRAM-MD5 in order against the advertised
/// mechanisms. PLAIN and LOGIN are skipped under LOGINDISABLED. The final
/// error names every method attempted.
async fn authenticate(
    client: &mut WireClient<ImapStream>,
    username: &str,
    password: &str,
) -> Result<()> {
    let login_disabled = client.has_capability("LOGINDISABLED");

    let mut candidates: Vec<&str> = Vec::new();
    if !login_disabled && client.has_capability("AUTH=PLAIN") {
        candidates.push("PLAIN");
    }
    if !login_disabled {
        candidates.push("LOGIN");
    }
    if client.has_capability("AUTH=CRAM-MD5") {
        candidates.push("CRAM-MD5");
    }

    if candidates.is_empty() {
        return Err(Error::Auth {
            methods: Vec::new(),
            message: "server advertises no usable authentication method".to_string(),
        });
    }

    let mut attempted = Vec::new();
    let mut last_message = String::new();
    for method in candidates {
        attempted.push(method.to_string());
        let result = match method {
            "PLAIN" => client.authenticate_plain(username, password).await,
            "LOGIN" => client.login(username, password).await,
            "CRAM-MD5" => client.authenticate_cram_md5(username, password).await,
            _ => unreachable!(),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(Error::No(text) | Error::Bad(text)) => {
                debug!(method, reason = %text, "authentication method refused");
                last_message = text;
            }
            Err(other) => return Err(other),
        }
    }

    Err(Error::Auth { methods: attempted, message: last_message })
}
