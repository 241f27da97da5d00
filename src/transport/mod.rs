//! Messaging transport integration.
//!
//! The transport is the external collaborator providing the encrypted
//! messaging connection: session establishment, the event stream, and the
//! outbound operations the bot performs. All of the hard problems (wire
//! protocol, encryption, message framing) live behind the [`Transport`]
//! trait; the rest of the crate only consumes this capability surface.
//!
//! # Architecture
//!
//! - [`Transport`]: the capability trait, mockable in tests.
//! - The event types ([`TransportEvent`] and friends): what a live session
//!   emits.
//! - [`MatrixTransport`]: the production implementation, backed by the
//!   Matrix SDK in restore-only mode.

mod events;
mod matrix;

pub use crate::transport::events::{
    CloseReason, ConnectionState, DeliveryKind, IncomingMessage, MessageKey, TransportEvent,
};
pub use crate::transport::matrix::MatrixTransport;

use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::SessionStore;

/// Errors surfaced at the transport boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The session store holds no usable credential bundle.
    #[error("no usable credentials in the session store")]
    MissingCredentials,
    /// The credential bundle could not be understood by the transport.
    #[error("credential bundle is malformed: {0}")]
    InvalidCredentials(String),
    /// The session could not be established.
    #[error("failed to establish the session: {0}")]
    Connection(String),
    /// An outbound operation was attempted without a live session.
    #[error("transport is not connected")]
    NotConnected,
    /// An outbound operation failed.
    #[error("outbound request failed: {0}")]
    Request(String),
}

/// Capability surface of the underlying messaging session.
///
/// One transport session exists per process. [`Transport::connect`] builds
/// the session from the credentials held by the store and yields the event
/// stream; the remaining operations act on the live session.
#[automock]
pub trait Transport {
    /// Establish a session from the credentials held by `store`.
    ///
    /// The store also roots the transport's own durable state (message
    /// history backing, encryption state), per its persistence contract.
    /// Events flow through the returned receiver until the connection
    /// closes; credential rotations are surfaced as
    /// [`TransportEvent::CredentialsChanged`] and must be persisted by the
    /// caller.
    async fn connect(
        &mut self,
        store: &SessionStore,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Acknowledge the message with the given key as read.
    async fn mark_read(&self, key: &MessageKey) -> Result<(), TransportError>;

    /// React to the message with the given key.
    ///
    /// `audience` lists the identities the reaction is scoped to, on
    /// services that support per-recipient visibility.
    async fn send_reaction(
        &self,
        key: &MessageKey,
        emoji: &str,
        audience: &[String],
    ) -> Result<(), TransportError>;

    /// Service-normalized identity of the authenticated account, once known.
    fn self_id(&self) -> Option<String>;
}
