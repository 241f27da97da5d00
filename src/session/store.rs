//! Durable storage for the session credential bundle.
//!
//! The store persists each named sub-record of a [`CredentialBundle`] as its
//! own JSON file inside the session directory, with `creds.json` holding the
//! primary record. It is a pass-through durability layer: there is no
//! in-memory cache beyond what the transport holds, updates are incremental
//! and idempotent, and concurrent writers are not expected since credential
//! updates originate from the single transport session.

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, trace};
use serde_json::Value;
use tokio::fs;

use crate::session::{CREDS_RECORD, CredentialBundle};

/// File-backed store for one account's credential bundle.
///
/// # File Structure
///
/// The session directory contains one `<name>.json` file per sub-record.
/// Further files (such as the transport's own state database) may live next
/// to them; the exact set is owned by the transport's persistence contract.
///
/// # Examples
///
/// ```no_run
/// use veilleur::session::SessionStore;
///
/// # async fn example() -> Result<(), anyhow::Error> {
/// let store = SessionStore::new("./session");
/// match store.load().await? {
///     Some(bundle) => println!("found {} record(s)", bundle.len()),
///     None => println!("no session yet"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory holding the record files.
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `dir`.
    ///
    /// The directory is created lazily on the first write, not here.
    pub fn new(dir: impl Into<PathBuf>) -> SessionStore {
        SessionStore { dir: dir.into() }
    }

    /// Path of the session directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Load the full bundle from disk.
    ///
    /// Returns `None` when no usable bundle exists, which is the case until
    /// a `creds` record has been persisted. Record files that are not valid
    /// JSON produce an error.
    pub async fn load(&self) -> Result<Option<CredentialBundle>, anyhow::Error> {
        debug!("read credential bundle at {}", self.dir.display());

        if !fs::try_exists(self.record_path(CREDS_RECORD))
            .await
            .unwrap_or(false)
        {
            return Ok(None);
        }

        let mut bundle = CredentialBundle::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to read session directory {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let data = fs::read_to_string(&path).await?;
            let value: Value = serde_json::from_str(&data)
                .with_context(|| format!("record {} is not valid JSON", path.display()))?;
            bundle.insert(name, value);
        }

        Ok(Some(bundle))
    }

    /// Persist every record of `update`, leaving other records untouched.
    ///
    /// Safe to invoke repeatedly with overlapping data: each record write is
    /// a full-file replacement, so the last write wins.
    pub async fn save(&self, update: &CredentialBundle) -> Result<(), anyhow::Error> {
        for (name, value) in update.records() {
            self.write_record(name, value).await?;
        }
        Ok(())
    }

    /// Read a single record, `None` if its file does not exist.
    pub async fn read_record(&self, name: &str) -> Result<Option<Value>, anyhow::Error> {
        let path = self.record_path(name);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let data = fs::read_to_string(&path).await?;
        let value = serde_json::from_str(&data)
            .with_context(|| format!("record {} is not valid JSON", path.display()))?;
        Ok(Some(value))
    }

    /// Write a single record, creating the session directory if absent.
    pub async fn write_record(&self, name: &str, value: &Value) -> Result<(), anyhow::Error> {
        trace!("persist credential record {}", name);

        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create session directory {}", self.dir.display()))?;

        let serialized = serde_json::to_string_pretty(value)?;
        let path = self.record_path(name);
        fs::write(&path, serialized)
            .await
            .with_context(|| format!("failed to write record {}", path.display()))?;

        trace!("credential record {} persisted", name);
        Ok(())
    }

    /// File path of the record with the given name.
    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_record_name(name)))
    }
}

/// Map a record name to a file-system safe stem.
///
/// Record names may carry `/` and `:` (key identifiers do); the mapping
/// matches the transport's persistence contract.
fn sanitize_record_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}
