//! Session credential persistence and provisioning.
//!
//! This module owns the durable side of the bot account: the credential
//! bundle that allows the transport to resume an authenticated session
//! without an interactive login.
//!
//! # Architecture
//!
//! - [`CredentialBundle`]: the set of named JSON sub-records making up one
//!   account's authentication state. The same type carries full bundles and
//!   partial updates.
//! - [`SessionStore`]: a pass-through durability layer persisting one file
//!   per sub-record in the session directory.
//! - [`Provisioner`]: fetches a serialized bundle from the remote upload
//!   service when the configured session identifier names one.
//!
//! # Examples
//!
//! ```no_run
//! use veilleur::session::{Provisioner, SessionStore, DEFAULT_ENDPOINT};
//!
//! # async fn example() -> Result<(), anyhow::Error> {
//! let store = SessionStore::new("./session");
//! let provisioner = Provisioner::new(DEFAULT_ENDPOINT, "X-KING-abc123");
//!
//! if provisioner.provision(&store).await {
//!     // a fresh bundle is on disk
//! }
//! let bundle = store.load().await?;
//! # Ok(())
//! # }
//! ```

mod provisioner;
mod store;

pub use crate::session::provisioner::{DEFAULT_ENDPOINT, Provisioner};
pub use crate::session::store::SessionStore;

use std::collections::BTreeMap;

use serde_json::Value;

/// Name of the primary credential sub-record.
pub const CREDS_RECORD: &str = "creds";

/// Serialized authentication state for one account.
///
/// A bundle is a set of named sub-records, each an arbitrary JSON document
/// whose schema is owned by the transport. At minimum the [`CREDS_RECORD`]
/// record is present in a usable bundle. The type is also used for partial
/// updates: the transport may rotate a single sub-record at any time during
/// operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialBundle {
    /// Sub-records keyed by name.
    records: BTreeMap<String, Value>,
}

impl CredentialBundle {
    /// Create an empty bundle.
    pub fn new() -> CredentialBundle {
        CredentialBundle::default()
    }

    /// Create a bundle holding a single record.
    pub fn with_record(name: &str, value: Value) -> CredentialBundle {
        let mut bundle = CredentialBundle::new();
        bundle.insert(name, value);
        bundle
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, name: &str, value: Value) {
        self.records.insert(name.to_owned(), value);
    }

    /// Returns the record with the given name, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.records.get(name)
    }

    /// Iterate over all records in name order.
    pub fn records(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.records.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of records in the bundle.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the bundle holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_record() {
        let bundle = CredentialBundle::with_record(CREDS_RECORD, json!({"k": "v"}));

        assert_eq!(bundle.len(), 1);
        assert!(!bundle.is_empty());
        assert_eq!(bundle.get(CREDS_RECORD), Some(&json!({"k": "v"})));
    }

    #[test]
    fn test_insert_replaces_existing_record() {
        let mut bundle = CredentialBundle::with_record(CREDS_RECORD, json!({"k": "v"}));
        bundle.insert(CREDS_RECORD, json!({"k": "rotated"}));

        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.get(CREDS_RECORD), Some(&json!({"k": "rotated"})));
    }

    #[test]
    fn test_records_iterates_in_name_order() {
        let mut bundle = CredentialBundle::new();
        bundle.insert("keys", json!(2));
        bundle.insert(CREDS_RECORD, json!(1));

        let names: Vec<&str> = bundle.records().map(|(name, _)| name).collect();
        assert_eq!(names, vec![CREDS_RECORD, "keys"]);
    }

    #[test]
    fn test_empty_bundle() {
        let bundle = CredentialBundle::new();

        assert!(bundle.is_empty());
        assert_eq!(bundle.len(), 0);
        assert_eq!(bundle.get(CREDS_RECORD), None);
    }
}
