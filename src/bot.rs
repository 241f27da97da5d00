//! Bot orchestration: event routing and the reconnect supervisor.
//!
//! This module provides the main [`Bot`] implementation tying the session
//! store, the provisioner, the transport and the status watcher together.
//!
//! # Lifecycle
//!
//! Every supervisor iteration runs the full startup flow:
//!
//! ```text
//! provision (if configured) → load credentials → connect transport
//!     → route events until the connection closes
//! ```
//!
//! A close with the terminal reason (credentials invalidated) ends the bot
//! with an error: the account requires re-authentication out of band. Any
//! other close re-enters the flow after a bounded exponential backoff, up to
//! a ceiling of consecutive failed attempts. A connect failure before the
//! first successful connection is a fatal startup error and is not retried.
//!
//! # Event routing
//!
//! - credential updates are persisted through the store;
//! - message batches go to the status watcher;
//! - connection state changes drive the supervisor.

use std::time::Duration;

use anyhow::bail;
use log::{debug, error, info, warn};
use tokio::{sync::mpsc, time};

use crate::{
    config::Config,
    session::{CredentialBundle, Provisioner, SessionStore},
    transport::{ConnectionState, CloseReason, Transport, TransportEvent},
    watcher::{StatusWatcher, WatchPolicy},
};

/// Delay before the first reconnect attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on the reconnect delay.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Consecutive failed attempts after which the supervisor gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// What ended a driven session.
struct SessionOutcome {
    /// The connection reported `Open` at least once.
    reached_open: bool,
    /// Reason attached to the close event, if any.
    close_reason: Option<CloseReason>,
}

/// Main bot structure supervising one messaging session.
///
/// All collaborators are constructed by the caller and injected here; the
/// bot owns them for its whole lifetime.
///
/// # Examples
///
/// ```no_run
/// use veilleur::bot::Bot;
/// use veilleur::config::Config;
/// use veilleur::session::{Provisioner, SessionStore, DEFAULT_ENDPOINT};
/// use veilleur::transport::MatrixTransport;
///
/// # async fn example() -> Result<(), anyhow::Error> {
/// let config = Config::from_env()?;
/// let store = SessionStore::new("./session");
/// let provisioner = Provisioner::new(DEFAULT_ENDPOINT, &config.session_id);
///
/// let bot = Bot::new(&config, store, provisioner, MatrixTransport::new());
/// bot.run().await?; // runs until a terminal close
/// # Ok(())
/// # }
/// ```
pub struct Bot<T: Transport> {
    /// Durability layer for the credential bundle.
    store: SessionStore,
    /// Remote bundle provisioning, attempted at every startup.
    provisioner: Provisioner,
    /// Handler for incoming message batches.
    watcher: StatusWatcher,
    /// The messaging session collaborator.
    transport: T,
}

impl<T: Transport> Bot<T> {
    /// Create a new bot from its collaborators.
    ///
    /// The watcher policy is derived from `config` once, here.
    pub fn new(config: &Config, store: SessionStore, provisioner: Provisioner, transport: T) -> Bot<T> {
        Bot {
            store,
            provisioner,
            watcher: StatusWatcher::new(WatchPolicy::from(config)),
            transport,
        }
    }

    /// Run the bot until the session ends for good.
    ///
    /// # Errors
    ///
    /// Returns an error when:
    /// - the initial session cannot be established (startup failure),
    /// - the connection closes with the terminal reason (credentials
    ///   invalidated),
    /// - the reconnect ceiling is reached.
    pub async fn run(mut self) -> Result<(), anyhow::Error> {
        let mut connected_once = false;
        let mut attempts: u32 = 0;
        let mut delay = INITIAL_RECONNECT_DELAY;

        loop {
            // Full startup flow, re-entered after every non-terminal close.
            self.provisioner.provision(&self.store).await;

            match self.store.load().await {
                Ok(Some(bundle)) => {
                    debug!("loaded credential bundle with {} record(s)", bundle.len());
                }
                Ok(None) => {
                    warn!("no local credential bundle, the transport may fail to authenticate");
                }
                Err(error) => warn!("failed to read credential bundle: {error:#}"),
            }

            let mut events = match self.transport.connect(&self.store).await {
                Ok(events) => events,
                Err(error) => {
                    if !connected_once {
                        bail!("failed to establish the initial session: {error}");
                    }
                    attempts += 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        bail!(
                            "giving up after {attempts} consecutive reconnect attempts, last error: {error}"
                        );
                    }
                    warn!(
                        "reconnect failed ({error}), retrying in {}s",
                        delay.as_secs()
                    );
                    time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    continue;
                }
            };
            connected_once = true;

            let outcome = self.drive(&mut events).await;

            if outcome.reached_open {
                attempts = 0;
                delay = INITIAL_RECONNECT_DELAY;
            }

            if let Some(reason) = &outcome.close_reason
                && reason.is_terminal()
            {
                bail!(
                    "connection closed permanently ({reason}), the account requires re-authentication"
                );
            }

            attempts += 1;
            if attempts >= MAX_RECONNECT_ATTEMPTS {
                bail!("giving up after {attempts} consecutive reconnect attempts");
            }

            match &outcome.close_reason {
                Some(reason) => warn!(
                    "connection closed ({reason}), reconnecting in {}s",
                    delay.as_secs()
                ),
                None => warn!("connection closed, reconnecting in {}s", delay.as_secs()),
            }
            time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    /// Route events until the connection closes or the stream ends.
    async fn drive(&self, events: &mut mpsc::Receiver<TransportEvent>) -> SessionOutcome {
        let mut reached_open = false;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::CredentialsChanged(update) => {
                    self.on_credentials_changed(update).await;
                }
                TransportEvent::MessagesReceived { messages, delivery } => {
                    self.watcher
                        .process_batch(&self.transport, &messages, delivery)
                        .await;
                }
                TransportEvent::ConnectionStateChanged { state, reason } => match state {
                    ConnectionState::Connecting => debug!("connecting"),
                    ConnectionState::Open => {
                        info!("connected");
                        reached_open = true;
                    }
                    ConnectionState::Closed => {
                        return SessionOutcome {
                            reached_open,
                            close_reason: reason,
                        };
                    }
                },
            }
        }

        debug!("event stream ended without a close event");
        SessionOutcome {
            reached_open,
            close_reason: None,
        }
    }

    /// Persist a credential rotation. Errors are logged, not fatal: the
    /// session keeps running on the in-memory credentials.
    async fn on_credentials_changed(&self, update: CredentialBundle) {
        debug!("persisting {} rotated credential record(s)", update.len());
        if let Err(error) = self.store.save(&update).await {
            error!("failed to persist credential update: {error:#}");
        }
    }
}
