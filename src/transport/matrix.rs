//! Matrix implementation of the transport capability surface.
//!
//! This module binds the [`Transport`] trait to the Matrix SDK in
//! restore-only mode: the session is rebuilt from the persisted credential
//! bundle, never created here. Accounts are authenticated out of band; a
//! bundle whose tokens were invalidated surfaces as a terminal close and the
//! bot will not retry it.
//!
//! # Credential record
//!
//! The primary `creds` record carries the homeserver URL, the user session
//! (authentication tokens and device metadata) and the latest sync token.
//! Each time the sync position advances, the rotated record is surfaced as a
//! [`TransportEvent::CredentialsChanged`] event so the caller can persist it.
//!
//! # Delivery classification
//!
//! Messages replayed by the catch-up sync are tagged
//! [`DeliveryKind::Backfill`]; everything after the first completed sync is
//! [`DeliveryKind::Live`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, error, warn};
use matrix_sdk::{
    Client, LoopCtrl, Room, RoomState,
    authentication::matrix::MatrixSession,
    config::SyncSettings,
    ruma::{
        EventId, OwnedUserId, RoomId,
        api::client::{
            error::ErrorKind, filter::FilterDefinition,
            receipt::create_receipt::v3::ReceiptType,
        },
        events::{
            reaction::ReactionEventContent,
            receipt::ReceiptThread,
            relation::Annotation,
            room::message::{MessageType, OriginalSyncRoomMessageEvent},
        },
    },
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    session::{CREDS_RECORD, CredentialBundle, SessionStore},
    transport::{
        Transport, TransportError,
        events::{
            CloseReason, ConnectionState, DeliveryKind, IncomingMessage, MessageKey,
            TransportEvent,
        },
    },
};

/// Capacity of the event channel between the sync task and the router.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shape of the `creds` record for Matrix-backed accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredsRecord {
    /// Homeserver the session belongs to.
    homeserver: String,
    /// The user session containing authentication credentials.
    user_session: MatrixSession,
    /// The latest sync token for resuming sync operations.
    ///
    /// Omitted from serialization when `None` to keep the file clean.
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_token: Option<String>,
}

/// Matrix-backed [`Transport`].
///
/// One instance drives at most one live session. [`Transport::connect`]
/// restores the session from the store and spawns the sync task; the
/// outbound operations act on the restored client.
pub struct MatrixTransport {
    /// The client of the live session, once connected.
    client: Option<Client>,
    /// Identity of the authenticated account, once connected.
    user_id: Option<OwnedUserId>,
}

impl MatrixTransport {
    /// Create a transport with no live session.
    pub fn new() -> MatrixTransport {
        MatrixTransport {
            client: None,
            user_id: None,
        }
    }

    /// Look up the room backing the given origin identifier.
    fn room(&self, origin: &str) -> Result<Room, TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        let room_id =
            RoomId::parse(origin).map_err(|error| TransportError::Request(error.to_string()))?;
        client
            .get_room(&room_id)
            .ok_or_else(|| TransportError::Request(format!("unknown room {}", origin)))
    }
}

impl Default for MatrixTransport {
    fn default() -> MatrixTransport {
        MatrixTransport::new()
    }
}

impl Transport for MatrixTransport {
    async fn connect(
        &mut self,
        store: &SessionStore,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let record = store
            .read_record(CREDS_RECORD)
            .await
            .map_err(|error| TransportError::InvalidCredentials(error.to_string()))?
            .ok_or(TransportError::MissingCredentials)?;
        let creds: CredsRecord = serde_json::from_value(record)
            .map_err(|error| TransportError::InvalidCredentials(error.to_string()))?;

        debug!("restoring session for {}", creds.user_session.meta.user_id);

        let client = Client::builder()
            .homeserver_url(&creds.homeserver)
            .sqlite_store(store.path().join("sqlite"), None)
            .build()
            .await
            .map_err(|error| TransportError::Connection(error.to_string()))?;

        client
            .restore_session(creds.user_session.clone())
            .await
            .map_err(|error| TransportError::Connection(error.to_string()))?;

        let user_id = client.user_id().map(ToOwned::to_owned);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Messages seen before the first completed sync are backfill.
        let live = Arc::new(AtomicBool::new(false));

        client.add_event_handler({
            let tx = tx.clone();
            let live = Arc::clone(&live);
            let own_user = user_id.clone();
            move |event: OriginalSyncRoomMessageEvent, room: Room| {
                let tx = tx.clone();
                let live = Arc::clone(&live);
                let own_user = own_user.clone();
                async move {
                    forward_room_message(event, room, own_user, live, tx).await;
                }
            }
        });

        tokio::spawn(run_sync(client.clone(), creds, live, tx));

        self.user_id = user_id;
        self.client = Some(client);

        Ok(rx)
    }

    async fn mark_read(&self, key: &MessageKey) -> Result<(), TransportError> {
        let room = self.room(&key.origin)?;
        let event_id =
            EventId::parse(&key.id).map_err(|error| TransportError::Request(error.to_string()))?;

        room.send_single_receipt(ReceiptType::Read, ReceiptThread::Unthreaded, event_id)
            .await
            .map_err(|error| TransportError::Request(error.to_string()))
    }

    /// The reaction is an annotation on the target event. The audience is
    /// accepted for interface compatibility only: reaction visibility cannot
    /// be scoped per recipient on room-based services.
    async fn send_reaction(
        &self,
        key: &MessageKey,
        emoji: &str,
        _audience: &[String],
    ) -> Result<(), TransportError> {
        let room = self.room(&key.origin)?;
        let event_id =
            EventId::parse(&key.id).map_err(|error| TransportError::Request(error.to_string()))?;

        let content = ReactionEventContent::new(Annotation::new(event_id, emoji.to_owned()));
        room.send(content)
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;
        Ok(())
    }

    fn self_id(&self) -> Option<String> {
        self.user_id.as_ref().map(ToString::to_string)
    }
}

/// Drive the sync loop, forwarding lifecycle events until the session ends.
async fn run_sync(
    client: Client,
    creds: CredsRecord,
    live: Arc<AtomicBool>,
    tx: mpsc::Sender<TransportEvent>,
) {
    send_state(&tx, ConnectionState::Connecting, None).await;

    // Enable room members lazy-loading
    // See <https://spec.matrix.org/v1.6/client-server-api/#lazy-loading-room-members>.
    let filter = FilterDefinition::with_lazy_loading();
    let mut sync_settings = SyncSettings::default().filter(filter.into());

    if let Some(sync_token) = creds.sync_token.clone() {
        sync_settings = sync_settings.token(sync_token);
    }

    // Catch-up sync: messages replayed here reach the handler as backfill.
    let response = match client.sync_once(sync_settings.clone()).await {
        Ok(response) => response,
        Err(error) => {
            error!("an error occurred during initial sync: {error}");
            let reason = classify_sync_error(&error);
            send_state(&tx, ConnectionState::Closed, Some(reason)).await;
            return;
        }
    };

    live.store(true, Ordering::SeqCst);
    sync_settings = sync_settings.token(response.next_batch.clone());
    send_rotated_credentials(&tx, &creds, response.next_batch).await;
    send_state(&tx, ConnectionState::Open, None).await;

    let result = client
        .sync_with_result_callback(sync_settings, {
            let tx = tx.clone();
            let creds = creds.clone();
            move |sync_result| {
                let tx = tx.clone();
                let creds = creds.clone();
                async move {
                    let response = sync_result?;

                    // Surface the rotated sync token so it gets persisted and
                    // the next session resumes from here.
                    send_rotated_credentials(&tx, &creds, response.next_batch).await;

                    Ok(LoopCtrl::Continue)
                }
            }
        })
        .await;

    let reason = match result {
        Ok(()) => None,
        Err(error) => {
            error!("sync loop ended with error: {error}");
            Some(classify_sync_error(&error))
        }
    };
    send_state(&tx, ConnectionState::Closed, reason).await;
}

/// Map one room message event into the domain model and forward it.
async fn forward_room_message(
    event: OriginalSyncRoomMessageEvent,
    room: Room,
    own_user: Option<OwnedUserId>,
    live: Arc<AtomicBool>,
    tx: mpsc::Sender<TransportEvent>,
) {
    // Ignore messages from non-joined rooms
    if room.state() != RoomState::Joined {
        return;
    }

    let content = match event.content.msgtype {
        MessageType::Text(text_content) => Some(text_content.body),
        _ => None,
    };
    let from_me = own_user.as_ref() == Some(&event.sender);

    let message = IncomingMessage {
        key: MessageKey {
            origin: room.room_id().to_string(),
            id: event.event_id.to_string(),
            from_me,
            participant: Some(event.sender.to_string()),
        },
        sender_name: Some(event.sender.localpart().to_owned()),
        content,
    };

    let delivery = if live.load(Ordering::SeqCst) {
        DeliveryKind::Live
    } else {
        DeliveryKind::Backfill
    };

    let batch = TransportEvent::MessagesReceived {
        messages: vec![message],
        delivery,
    };
    if tx.send(batch).await.is_err() {
        debug!("event receiver dropped, message not delivered");
    }
}

/// Surface a credential record carrying the new sync token.
async fn send_rotated_credentials(
    tx: &mpsc::Sender<TransportEvent>,
    creds: &CredsRecord,
    sync_token: String,
) {
    let rotated = CredsRecord {
        homeserver: creds.homeserver.clone(),
        user_session: creds.user_session.clone(),
        sync_token: Some(sync_token),
    };
    let value = match serde_json::to_value(&rotated) {
        Ok(value) => value,
        Err(error) => {
            warn!("failed to serialize rotated credentials: {error}");
            return;
        }
    };

    let update = CredentialBundle::with_record(CREDS_RECORD, value);
    if tx
        .send(TransportEvent::CredentialsChanged(update))
        .await
        .is_err()
    {
        debug!("event receiver dropped, credential rotation not delivered");
    }
}

/// Forward a connection state change.
async fn send_state(
    tx: &mpsc::Sender<TransportEvent>,
    state: ConnectionState,
    reason: Option<CloseReason>,
) {
    if tx
        .send(TransportEvent::ConnectionStateChanged { state, reason })
        .await
        .is_err()
    {
        debug!("event receiver dropped, state change not delivered");
    }
}

/// Classify why the sync loop ended.
///
/// An unknown-token response means the stored credentials were invalidated:
/// the close is terminal and the session must not be restarted.
fn classify_sync_error(error: &matrix_sdk::Error) -> CloseReason {
    if let Some(ErrorKind::UnknownToken { .. }) = error.client_api_error_kind() {
        CloseReason::logged_out(error.to_string())
    } else {
        CloseReason::other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::{SessionMeta, SessionTokens};
    use serde_json::json;

    // Helper function to create a user session for the record tests
    fn create_mock_user_session() -> MatrixSession {
        let session_meta = SessionMeta {
            user_id: "@veilleur:example.org".try_into().unwrap(),
            device_id: "DEVICEID".into(),
        };

        let tokens = SessionTokens {
            access_token: "access_token".to_string(),
            refresh_token: Some("refresh_token".to_string()),
        };

        MatrixSession {
            meta: session_meta,
            tokens,
        }
    }

    #[test]
    fn test_creds_record_round_trip() {
        let record = CredsRecord {
            homeserver: "https://example.org".to_string(),
            user_session: create_mock_user_session(),
            sync_token: Some("sync_token_123".to_string()),
        };

        let serialized = serde_json::to_string(&record).unwrap();
        assert!(serialized.contains("sync_token_123"));
        assert!(serialized.contains("@veilleur:example.org"));

        let deserialized: CredsRecord = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.homeserver, "https://example.org");
        assert_eq!(deserialized.sync_token, Some("sync_token_123".to_string()));
        assert_eq!(
            deserialized.user_session.meta.user_id.to_string(),
            "@veilleur:example.org"
        );
    }

    #[test]
    fn test_creds_record_serialization_without_sync_token() {
        let record = CredsRecord {
            homeserver: "https://example.org".to_string(),
            user_session: create_mock_user_session(),
            sync_token: None,
        };

        // sync_token should be omitted when None
        let serialized = serde_json::to_string(&record).unwrap();
        assert!(!serialized.contains("sync_token"));

        let deserialized: CredsRecord = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.sync_token, None);
    }

    #[test]
    fn test_creds_record_rejects_missing_homeserver() {
        let user_session = serde_json::to_value(create_mock_user_session()).unwrap();
        let record = json!({ "user_session": user_session });

        assert!(serde_json::from_value::<CredsRecord>(record).is_err());
    }

    #[test]
    fn test_self_id_without_session() {
        let transport = MatrixTransport::new();
        assert_eq!(transport.self_id(), None);
    }

    #[tokio::test]
    async fn test_outbound_operations_require_a_session() {
        let transport = MatrixTransport::new();
        let key = MessageKey {
            origin: "!room:example.org".to_string(),
            id: "$event:example.org".to_string(),
            from_me: false,
            participant: None,
        };

        assert!(matches!(
            transport.mark_read(&key).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.send_reaction(&key, "✨", &[]).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_without_credentials() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());

        let mut transport = MatrixTransport::new();
        assert!(matches!(
            transport.connect(&store).await,
            Err(TransportError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_connect_with_malformed_credentials() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        store
            .write_record(CREDS_RECORD, &json!({"creds": {"k": "v"}}))
            .await
            .unwrap();

        let mut transport = MatrixTransport::new();
        assert!(matches!(
            transport.connect(&store).await,
            Err(TransportError::InvalidCredentials(_))
        ));
    }
}
