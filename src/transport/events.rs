//! Domain events and message types emitted by a transport session.

use std::fmt;

use crate::session::CredentialBundle;

/// Origin suffix reserved for status broadcasts.
pub const STATUS_BROADCAST_SUFFIX: &str = "status@broadcast";

/// Lifecycle state of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport is establishing the connection.
    Connecting,
    /// The connection is live.
    Open,
    /// The connection ended.
    Closed,
}

/// Whether a delivery carries just-occurred messages or replayed history.
///
/// Only live deliveries may trigger side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Just-occurred messages.
    Live,
    /// Historical backfill replayed while catching up.
    Backfill,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Status code attached by the transport, if any.
    pub status_code: Option<u16>,
    /// Human-readable description of the failure.
    pub detail: Option<String>,
}

impl CloseReason {
    /// Sentinel status code: the stored credentials are permanently invalid.
    pub const LOGGED_OUT: u16 = 401;

    /// A terminal close: the account requires re-authentication out of band.
    pub fn logged_out(detail: impl Into<String>) -> CloseReason {
        CloseReason {
            status_code: Some(CloseReason::LOGGED_OUT),
            detail: Some(detail.into()),
        }
    }

    /// A close without a recognized status code.
    pub fn other(detail: impl Into<String>) -> CloseReason {
        CloseReason {
            status_code: None,
            detail: Some(detail.into()),
        }
    }

    /// Returns `true` when the session must not be restarted.
    pub fn is_terminal(&self) -> bool {
        self.status_code == Some(CloseReason::LOGGED_OUT)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status_code, self.detail.as_deref()) {
            (Some(code), Some(detail)) => write!(f, "status {}: {}", code, detail),
            (Some(code), None) => write!(f, "status {}", code),
            (None, Some(detail)) => write!(f, "{}", detail),
            (None, None) => write!(f, "unknown reason"),
        }
    }
}

/// Identifies one message for acknowledgement and reaction purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    /// Identifier of the chat or broadcast feed the message belongs to.
    pub origin: String,
    /// Unique message identifier within the origin.
    pub id: String,
    /// Whether the authenticated account sent the message itself.
    pub from_me: bool,
    /// Identity of the individual author, when the origin is shared.
    pub participant: Option<String>,
}

impl MessageKey {
    /// Returns `true` when the origin is a status broadcast feed.
    pub fn is_status_broadcast(&self) -> bool {
        self.origin.ends_with(STATUS_BROADCAST_SUFFIX)
    }
}

/// One received message, consumed once per delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Acknowledgement key of the message.
    pub key: MessageKey,
    /// Display name of the sender, when the transport knows it.
    pub sender_name: Option<String>,
    /// Text payload, `None` for media and other non-text messages.
    pub content: Option<String>,
}

impl IncomingMessage {
    /// Loggable summary of the payload.
    pub fn summary(&self) -> &str {
        self.content.as_deref().unwrap_or("media message")
    }

    /// Best available name for the sender.
    pub fn sender(&self) -> &str {
        self.sender_name
            .as_deref()
            .or(self.key.participant.as_deref())
            .unwrap_or(&self.key.origin)
    }
}

/// Events surfaced by a transport session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Part of the credential bundle was rotated and must be persisted.
    CredentialsChanged(CredentialBundle),
    /// A batch of messages arrived, in delivery order.
    MessagesReceived {
        /// The messages of the batch.
        messages: Vec<IncomingMessage>,
        /// Live delivery or historical backfill.
        delivery: DeliveryKind,
    },
    /// The connection changed state.
    ConnectionStateChanged {
        /// The new state.
        state: ConnectionState,
        /// Attached close reason, for [`ConnectionState::Closed`].
        reason: Option<CloseReason>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(origin: &str) -> MessageKey {
        MessageKey {
            origin: origin.to_string(),
            id: "event-1".to_string(),
            from_me: false,
            participant: None,
        }
    }

    #[test]
    fn test_status_broadcast_classification() {
        assert!(key("1234@status@broadcast").is_status_broadcast());
        assert!(key("status@broadcast").is_status_broadcast());
        assert!(!key("1234@example.net").is_status_broadcast());
        assert!(!key("status@broadcast.example.net").is_status_broadcast());
        assert!(!key("").is_status_broadcast());
    }

    #[test]
    fn test_close_reason_terminality() {
        assert!(CloseReason::logged_out("logged out").is_terminal());
        assert!(!CloseReason::other("connection reset").is_terminal());
        assert!(
            !CloseReason {
                status_code: Some(500),
                detail: None
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(
            CloseReason::logged_out("token expired").to_string(),
            "status 401: token expired"
        );
        assert_eq!(
            CloseReason::other("connection reset").to_string(),
            "connection reset"
        );
        assert_eq!(
            CloseReason {
                status_code: None,
                detail: None
            }
            .to_string(),
            "unknown reason"
        );
    }

    #[test]
    fn test_message_summary_and_sender() {
        let message = IncomingMessage {
            key: MessageKey {
                origin: "1234@status@broadcast".to_string(),
                id: "event-1".to_string(),
                from_me: false,
                participant: Some("5678@example.net".to_string()),
            },
            sender_name: None,
            content: None,
        };

        assert_eq!(message.summary(), "media message");
        assert_eq!(message.sender(), "5678@example.net");

        let named = IncomingMessage {
            sender_name: Some("Alice".to_string()),
            content: Some("hello".to_string()),
            ..message
        };
        assert_eq!(named.summary(), "hello");
        assert_eq!(named.sender(), "Alice");
    }
}
