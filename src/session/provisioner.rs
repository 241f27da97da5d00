//! Remote provisioning of the session credential bundle.
//!
//! This module provides the [`Provisioner`] struct which, when the session
//! identifier names a remotely hosted bundle, fetches that bundle from the
//! upload service and hands it to the [`SessionStore`].

use log::{debug, error, info};
use reqwest::Client;
use serde_json::Value;

use crate::session::{CREDS_RECORD, SessionStore};

/// Recognized prefix marking a remotely hosted credential bundle.
pub const SESSION_ID_PREFIX: &str = "X-KING-";

/// Default base URL of the upload service hosting credential bundles.
pub const DEFAULT_ENDPOINT: &str = "https://king-api-437z.onrender.com";

/// Fetches a serialized credential bundle from the upload service.
///
/// Provisioning is best effort: every failure is logged and reported as
/// `false`, and startup proceeds with whatever credentials already exist
/// locally.
///
/// # Examples
///
/// ```no_run
/// use veilleur::session::{Provisioner, SessionStore, DEFAULT_ENDPOINT};
///
/// # async fn example() {
/// let store = SessionStore::new("./session");
/// let provisioner = Provisioner::new(DEFAULT_ENDPOINT, "X-KING-abc123");
/// let restored = provisioner.provision(&store).await;
/// # }
/// ```
pub struct Provisioner {
    /// Base URL of the upload service.
    endpoint: String,
    /// Configured session identifier.
    session_id: String,
    /// HTTP client
    client: Client,
}

impl Provisioner {
    /// Create a new [`Provisioner`].
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL of the upload service, without trailing slash.
    /// * `session_id` - The configured session identifier.
    pub fn new(endpoint: &str, session_id: &str) -> Provisioner {
        Provisioner {
            endpoint: endpoint.to_string(),
            session_id: session_id.to_string(),
            client: Client::new(),
        }
    }

    /// Fetch the remote bundle named by the session identifier and persist
    /// it, overwriting any existing primary record.
    ///
    /// Returns `true` only when a bundle was fetched and written to disk.
    /// Identifiers without the [`SESSION_ID_PREFIX`] skip provisioning
    /// entirely: no network call is made and local storage is used as-is.
    pub async fn provision(&self, store: &SessionStore) -> bool {
        let Some(file_id) = self.session_id.strip_prefix(SESSION_ID_PREFIX) else {
            debug!("session id does not name a remote bundle, using local storage as-is");
            return false;
        };

        let url = format!("{}/upload/{}", self.endpoint, file_id);
        info!("fetching session bundle {}", file_id);
        debug!("request {}", url);

        let body = match self.fetch(&url).await {
            Ok(body) => body,
            Err(error) => {
                error!("failed to fetch session bundle: {}", error);
                return false;
            }
        };

        if let Err(error) = store.write_record(CREDS_RECORD, &body).await {
            error!("failed to persist fetched session bundle: {:#}", error);
            return false;
        }

        info!("session restored from remote bundle {}", file_id);
        true
    }

    /// Request the bundle and parse the response body as JSON.
    async fn fetch(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_provision_skips_unrecognized_session_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        let provisioner = Provisioner::new(&server.url(), "plain-local-session");

        assert!(!provisioner.provision(&store).await);
        mock.assert_async().await;
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_fetches_and_persists_remote_bundle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/upload/abc123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"creds": {"k": "v"}}"#)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        let provisioner = Provisioner::new(&server.url(), "X-KING-abc123");

        assert!(provisioner.provision(&store).await);
        mock.assert_async().await;

        // The response body is persisted verbatim as the primary record.
        let on_disk = fs::read_to_string(temp_dir.path().join("creds.json"))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&on_disk).unwrap();
        assert_eq!(parsed, json!({"creds": {"k": "v"}}));

        let bundle = store.load().await.unwrap().expect("bundle must exist");
        assert_eq!(bundle.get(CREDS_RECORD), Some(&json!({"creds": {"k": "v"}})));
    }

    #[tokio::test]
    async fn test_provision_overwrites_existing_bundle() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/upload/abc123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"creds": {"k": "fresh"}}"#)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        store
            .write_record(CREDS_RECORD, &json!({"creds": {"k": "stale"}}))
            .await
            .unwrap();

        let provisioner = Provisioner::new(&server.url(), "X-KING-abc123");
        assert!(provisioner.provision(&store).await);

        let bundle = store.load().await.unwrap().unwrap();
        assert_eq!(
            bundle.get(CREDS_RECORD),
            Some(&json!({"creds": {"k": "fresh"}}))
        );
    }

    #[tokio::test]
    async fn test_provision_reports_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/upload/missing")
            .with_status(404)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        let provisioner = Provisioner::new(&server.url(), "X-KING-missing");

        assert!(!provisioner.provision(&store).await);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_provision_reports_malformed_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/upload/abc123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json")
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let store = SessionStore::new(temp_dir.path());
        let provisioner = Provisioner::new(&server.url(), "X-KING-abc123");

        assert!(!provisioner.provision(&store).await);
        assert!(store.load().await.unwrap().is_none());
    }
}
